pub mod memory;
pub mod traits;

pub use memory::{MemoryLocalStore, MemoryRemoteStore};
pub use traits::{LocalStore, RemoteObject, RemoteStore};
