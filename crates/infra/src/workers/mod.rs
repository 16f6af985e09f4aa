pub mod projection_worker;

pub use projection_worker::{
    ProjectionWorker, WorkerHandle, spawn_audit_trail, spawn_billing_projections,
};
