pub mod canister;
pub mod memory;
pub mod traits;

pub use canister::CanisterClient;
pub use memory::{InMemoryBackend, StoredAlert};
pub use traits::{AlertStore, ContractSource, NotificationChannel};
