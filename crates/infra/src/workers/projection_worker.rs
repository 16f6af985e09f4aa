//! Background consumers of the billing bus.

use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;

use hims_core::TenantId;
use hims_events::{EventBus, EventEnvelope, Subscription, TenantScoped};

use crate::event_store::EventStore;
use crate::projections::{BillingReadModels, ProjectionError};
use crate::subscribers::AuditTrail;

const POLL: Duration = Duration::from_millis(250);

/// Stops and joins a worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!(worker = self.name, "worker thread panicked");
            }
        }
    }
}

#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Subscribe now and drain the subscription on a dedicated thread.
    ///
    /// Delivery is at-least-once, so `handler` must tolerate redelivery. With
    /// `tenant_id` set, records of other tenants are skipped.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(name, sub, shutdown_rx, tenant_id, &mut handler))?;

        tracing::debug!(worker = name, "projection worker started");
        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn run<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    M: TenantScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        match sub.recv_timeout(POLL) {
            Ok(msg) => {
                if tenant_id.is_some_and(|t| !msg.belongs_to(t)) {
                    continue;
                }
                if let Err(err) = handler(msg) {
                    tracing::warn!(worker = name, error = %err, "projection handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!(worker = name, "projection worker stopped");
}

/// Keep the billing read models in step with the bus. Records can arrive out
/// of order when two writers race on one invoice; a gap is closed by reading
/// the stream back from the ledger.
pub fn spawn_billing_projections<S, B>(
    bus: &B,
    store: S,
    read_models: Arc<BillingReadModels>,
) -> io::Result<WorkerHandle>
where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + ?Sized,
{
    ProjectionWorker::spawn("billing-projections", bus, None, move |env: EventEnvelope<JsonValue>| {
        match read_models.apply_envelope(&env) {
            Err(ProjectionError::Invoices(_) | ProjectionError::Payments(_)) => {
                read_models.catch_up(&store, env.tenant_id(), env.aggregate_id())
            }
            other => other,
        }
    })
}

pub fn spawn_audit_trail<B>(bus: &B, audit: Arc<AuditTrail>) -> io::Result<WorkerHandle>
where
    B: EventBus<EventEnvelope<JsonValue>> + ?Sized,
{
    ProjectionWorker::spawn("billing-audit", bus, None, move |env: EventEnvelope<JsonValue>| {
        audit.record(&env).map(|_| ())
    })
}
