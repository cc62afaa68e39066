//! Typed flow records and their wire formats: the ingress JSON
//! envelope, the pseudonymized record, IOC side-outputs, encrypted
//! originals and the session-key envelope.

pub mod bitmask;
pub mod encrypted;
pub mod ioc;
pub mod key;
pub mod message;
pub mod protocol;
pub mod record;

pub use bitmask::Bitmask;
pub use encrypted::{EncryptedRecord, Plaintext};
pub use ioc::Ioc;
pub use key::Key;
pub use message::Envelope;
pub use record::{Record, TcpFlags};
