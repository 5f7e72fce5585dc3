//! Pull and push paths into the caches.
//!
//! - `bulk`: paginated fetch loop
//! - `reconcile`: expire-then-sweep passes over a list endpoint
//! - `live`: push event routing
//! - `sync`: full refresh of every kind
//! - `schedule`: reconciliation interval with rate-limit backoff

pub mod bulk;
pub mod live;
pub mod reconcile;
pub mod schedule;
pub mod sync;

pub use bulk::{Bulk, BulkOutcome, Page, PageParams, PageSource, should_continue};
pub use live::{LiveEventRouter, Routed};
pub use reconcile::{PassSummary, ReconcileOutcome, Reconciler};
pub use schedule::ReconcileInterval;
pub use sync::{FriendSummary, SyncReport, SyncSession};
