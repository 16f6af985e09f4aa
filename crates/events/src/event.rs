use chrono::{DateTime, Utc};

/// A fact recorded in a ledger stream.
///
/// Records are immutable once appended. `version` is the payload schema
/// version, not the stream position.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable name such as `billing.invoice.created`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
