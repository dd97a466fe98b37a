pub mod conflict;
pub mod envelope;
pub mod manager;
pub mod metadata;
pub mod scheduler;
pub mod tracker;
pub mod types;

pub use conflict::{ConflictResolver, DuplicateBoth, FnResolver, PreferLocal, PreferRemote, Resolution};
pub use manager::SyncManager;
pub use metadata::{LedgerEntry, SyncLedger};
pub use scheduler::SyncScheduler;
pub use tracker::ChangeTracker;
pub use types::{
    Connectivity, NetworkGate, StaticNetworkGate, SyncErrorEvent, SyncManagerOptions, SyncOutcome,
    SyncPhase, SyncPolicy, SyncReport, SyncState,
};
