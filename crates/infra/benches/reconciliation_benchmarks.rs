use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::Value as JsonValue;

use hims_billing::{BillingConfig, ChargeCategory, Payment, PaymentId, PaymentMethod, PaymentStatus, balance};
use hims_core::TenantId;
use hims_events::{EventEnvelope, InMemoryEventBus};
use hims_infra::{
    BillingReadModels, CommandDispatcher, InMemoryEventStore, LineItem, NewInvoice, PaymentRequest,
    ReconciliationService, RetryPolicy,
};

type Service = ReconciliationService<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

fn service() -> (Service, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::new());
    let svc = ReconciliationService::new(
        CommandDispatcher::new(store.clone(), Arc::new(InMemoryEventBus::new())),
        BillingConfig::default(),
        RetryPolicy::new(5, Duration::from_millis(1)),
        Arc::new(BillingReadModels::new()),
    );
    (svc, store)
}

fn new_invoice(total: u64) -> NewInvoice {
    NewInvoice {
        patient_id: "P-1001".to_string(),
        patient_name: "Bench Patient".to_string(),
        lines: vec![LineItem {
            description: "Ward stay".to_string(),
            category: ChargeCategory::Room,
            quantity: 1,
            unit_price: total,
            pharmacy_id: None,
        }],
        invoice_date: None,
        due_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap_or(NaiveDate::MAX),
    }
}

fn completed(amount: u64) -> Payment {
    Payment {
        payment_id: PaymentId::new(),
        amount,
        method: PaymentMethod::Cash,
        status: PaymentStatus::Completed,
        transaction_id: None,
        notes: None,
        failure_reason: None,
        paid_at: Utc::now(),
    }
}

fn bench_balance_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance_calculate");
    let now = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
    let due = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
    let config = BillingConfig::default();

    for n in [1usize, 10, 100, 1000] {
        let payments: Vec<_> = (0..n).map(|_| completed(10)).collect();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &payments, |b, payments| {
            b.iter(|| balance::calculate(black_box(100_000), black_box(payments), due, now, &config))
        });
    }
    group.finish();
}

/// Cost of one payment as the invoice's payment log grows (rehydration is
/// linear in stream length).
fn bench_apply_payment(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_payment");
    for history in [0usize, 10, 100] {
        group.bench_with_input(BenchmarkId::new("history", history), &history, |b, &history| {
            let (svc, _store) = service();
            let tenant = TenantId::new();
            let id = svc
                .create_invoice(tenant, new_invoice(u64::MAX / 2), Utc::now())
                .unwrap()
                .invoice_id;
            for _ in 0..history {
                svc.apply_payment(tenant, request(id, 1), Utc::now()).unwrap();
            }
            b.iter(|| svc.apply_payment(tenant, request(id, 1), Utc::now()).unwrap())
        });
    }
    group.finish();
}

fn request(invoice_id: hims_billing::InvoiceId, amount: i64) -> PaymentRequest {
    PaymentRequest {
        invoice_id,
        amount,
        method: PaymentMethod::Cash,
        transaction_id: None,
        notes: None,
    }
}

fn bench_rebuild(c: &mut Criterion) {
    let (svc, store) = service();
    let tenant = TenantId::new();
    for _ in 0..200 {
        let id = svc
            .create_invoice(tenant, new_invoice(10_000), Utc::now())
            .unwrap()
            .invoice_id;
        svc.apply_payment(tenant, request(id, 2_500), Utc::now()).unwrap();
    }

    c.bench_function("read_models_rebuild_400_records", |b| {
        let models = BillingReadModels::new();
        b.iter(|| models.rebuild(&store).unwrap())
    });
}

criterion_group!(benches, bench_balance_calculation, bench_apply_payment, bench_rebuild);
criterion_main!(benches);
