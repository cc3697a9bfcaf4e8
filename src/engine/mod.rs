// ota-state Engine - Core module structure
pub mod backend;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod items;
pub mod lifecycle;
pub mod lock;
pub mod record;
pub mod store;

pub use backend::BlobBackend;
pub use config::StoreConfig;
pub use error::{ErrorKind, StoreError};
pub use lifecycle::{decide_boot_action, finish_deployment, BootAction};
pub use lock::{NoopMutex, StdMutex, StoreMutex, Wait};
pub use record::{AuthenticationKeyPair, ProvidesMap, UpdateState, UpdateStateRecord};
pub use store::UpdateStore;
