use std::{convert::Infallible, io, sync::Arc, sync::Mutex, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use hims_auth::{Hs256JwtIssuer, NewUser, Role};
use hims_core::TenantId;
use hims_events::{EventEnvelope, InMemoryEventBus};
use hims_infra::{
    AuditTrail, BillingReadModels, CommandDispatcher, EventStore, EventStoreError, InMemoryEventStore,
    ProjectionError, ReconciliationService, UserDirectory, UserDirectoryError,
    workers::{ProjectionWorker, WorkerHandle, spawn_audit_trail, spawn_billing_projections},
};

use crate::app::errors::ApiError;
use crate::config::{AppConfig, BootstrapAdmin, Persistence};

pub type BillingBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Reconciler = ReconciliationService<Arc<dyn EventStore>, BillingBus>;

/// Realtime message broadcast via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: JsonValue,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("event store: {0}")]
    Store(#[from] EventStoreError),

    #[error("read model rebuild: {0}")]
    Projection(#[from] ProjectionError),

    #[error("bootstrap admin: {0}")]
    Bootstrap(#[from] UserDirectoryError),

    #[error("worker thread: {0}")]
    Worker(#[from] io::Error),

    #[error("start-up task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[cfg(feature = "postgres")]
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(not(feature = "postgres"))]
    #[error("USE_PERSISTENT_STORES is set but the binary was built without the `postgres` feature")]
    PostgresDisabled,
}

pub struct AppServices {
    pub reconciliation: Reconciler,
    pub users: UserDirectory,
    pub audit: Arc<AuditTrail>,
    pub issuer: Hs256JwtIssuer,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl AppServices {
    pub fn read_models(&self) -> &BillingReadModels {
        self.reconciliation.read_models()
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    /// Run synchronous service code on the blocking pool. Store calls, bcrypt
    /// and retry back-off all sleep or block.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&AppServices) -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let services = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&services)).await?
    }

    /// Stop the bus workers and wait for their threads.
    pub fn shutdown(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for worker in workers {
            tracing::debug!(worker = worker.name(), "stopping worker");
            worker.shutdown();
        }
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    let store = open_store(&config.persistence).await?;
    let bus: BillingBus = Arc::new(InMemoryEventBus::new());

    let read_models = Arc::new(BillingReadModels::new());
    let replayed = {
        let store = Arc::clone(&store);
        let read_models = Arc::clone(&read_models);
        tokio::task::spawn_blocking(move || read_models.rebuild(&store)).await??
    };

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);
    let audit = Arc::new(AuditTrail::new());

    let mut workers = vec![
        spawn_audit_trail(&bus, Arc::clone(&audit))?,
        spawn_realtime_forwarder(&bus, realtime_tx.clone())?,
    ];
    // The Postgres store blocks on the runtime handle, which a plain worker
    // thread does not have; there the service's own catch-up is enough.
    if config.persistence == Persistence::InMemory {
        workers.push(spawn_billing_projections(&bus, Arc::clone(&store), Arc::clone(&read_models))?);
    }

    let dispatcher = CommandDispatcher::new(store, bus);
    let reconciliation =
        ReconciliationService::new(dispatcher, config.billing, config.retry, read_models);

    let services = AppServices {
        reconciliation,
        users: UserDirectory::new(config.bcrypt_cost),
        audit,
        issuer: Hs256JwtIssuer::new(config.jwt_secret.as_bytes(), config.jwt_ttl),
        realtime_tx,
        workers: Mutex::new(workers),
    };

    let services = match &config.bootstrap_admin {
        Some(admin) => seed_admin(services, admin.clone()).await?,
        None => services,
    };

    tracing::info!(
        replayed_events = replayed,
        currency = %config.billing.currency,
        overpayment_allowance = config.billing.overpayment_allowance,
        max_attempts = config.retry.max_attempts,
        "billing services ready"
    );
    Ok(services)
}

#[cfg(feature = "postgres")]
async fn open_store(persistence: &Persistence) -> Result<Arc<dyn EventStore>, StartupError> {
    match persistence {
        Persistence::InMemory => Ok(Arc::new(InMemoryEventStore::new())),
        Persistence::Postgres { database_url } => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .connect(database_url)
                .await?;
            let store = hims_infra::event_store::PostgresEventStore::new(pool);
            store.ensure_schema().await?;
            tracing::info!("using postgres event store");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_store(persistence: &Persistence) -> Result<Arc<dyn EventStore>, StartupError> {
    match persistence {
        Persistence::InMemory => Ok(Arc::new(InMemoryEventStore::new())),
        Persistence::Postgres { .. } => Err(StartupError::PostgresDisabled),
    }
}

async fn seed_admin(services: AppServices, admin: BootstrapAdmin) -> Result<AppServices, StartupError> {
    tokio::task::spawn_blocking(move || -> Result<AppServices, StartupError> {
        if services.users.is_empty() {
            services.users.register(
                NewUser {
                    tenant_id: admin.tenant_id,
                    email: admin.email,
                    name: "Administrator".to_string(),
                    role: Role::ADMIN,
                    department: None,
                    password: admin.password,
                },
                Utc::now(),
            )?;
        }
        Ok(services)
    })
    .await?
}

fn spawn_realtime_forwarder(
    bus: &BillingBus,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) -> io::Result<WorkerHandle> {
    ProjectionWorker::spawn("billing-realtime", bus, None, move |env: EventEnvelope<JsonValue>| {
        // Lossy: no subscribers simply means nobody is listening.
        let _ = realtime_tx.send(RealtimeMessage {
            tenant_id: env.tenant_id(),
            topic: env.event_type().to_string(),
            payload: serde_json::json!({
                "invoice_id": env.aggregate_id().to_string(),
                "sequence_number": env.sequence_number(),
                "recorded_at": env.recorded_at(),
                "event": env.payload(),
            }),
        });
        Ok::<(), Infallible>(())
    })
}

pub fn tenant_sse_stream(
    services: &AppServices,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>> + use<>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
