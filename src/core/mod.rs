pub mod config;
pub mod domain;
pub mod errors;

pub use domain::{AdminEvent, Contract, ContractId, ContractStatus, FunctionCall, PriceSample, Snapshot, Transaction};
pub use errors::{GuardianError, Result};
