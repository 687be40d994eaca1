pub mod config;
pub mod directory;
pub mod error;
pub mod matcher;
pub mod members;
pub mod model;
pub mod pagination;
pub mod reconcile;
pub mod registry;
mod retry;
pub mod sync;
pub mod telemetry;

pub use config::GroupSyncConfig;
pub use error::{GroupSyncError, GroupSyncResult};
pub use members::MemberFetcher;
pub use reconcile::Reconciler;
pub use sync::{GroupSyncService, SyncReport};
