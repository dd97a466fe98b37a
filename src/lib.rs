pub mod error;
pub mod types;

pub mod observe;
pub mod store;
pub mod sync;

pub use error::{EngineError, Result};
pub use sync::{SyncManager, SyncScheduler};
