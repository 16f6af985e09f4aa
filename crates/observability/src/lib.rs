//! `hims-observability`: process-wide structured logging.

pub mod logging;

pub use logging::{LogFormat, init, init_with};
