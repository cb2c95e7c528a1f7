//! Pipeline agents subscribed to the event bus.
//!
//! Each agent is attached to a shared bus at startup and communicates with
//! the others exclusively through published events.

pub mod checkin;
pub mod dedup;
pub mod delete;
pub mod notifier;
pub mod router;

pub use checkin::CheckinWriter;
pub use dedup::Dedup;
pub use delete::Delete;
pub use notifier::Notifier;
pub use router::Router;

/// Metadata key marking updates that already went through deduplication.
pub const DEDUP_PASSED: &str = "dedup_passed";
