pub mod durable;
pub mod error;
pub mod memory;
pub mod sync;

pub use durable::{DurableStore, HttpDurableStore};
pub use error::{DurableStoreError, SyncError};
pub use memory::MemoryDurableStore;
pub use sync::CredentialSync;
