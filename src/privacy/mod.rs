//! The privacy core: network classification, address pseudonymization
//! and the per-shard protector worker.

pub mod classify;
pub mod protect;
pub mod pseudo;

pub use classify::NetworkSets;
pub use protect::{Protector, WorkerDeath};
pub use pseudo::{Category, Pseudonymizer};
