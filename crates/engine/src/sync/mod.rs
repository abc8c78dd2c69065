//! Sync orchestration: reconciliation, the store sync lifecycle, and the
//! service the worker pool and webhook ingress call into.

pub mod reconcile;
pub mod service;
pub mod status;

pub use reconcile::{CATEGORY_PAGE_SIZE, PRODUCT_PAGE_SIZE, match_variants};
pub use service::{FullSyncOutcome, SyncService};
pub use status::{StatusEvent, SyncLifecycle};
