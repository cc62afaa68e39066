#[macro_use]
extern crate tracing;

pub mod app;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod flow;
pub mod privacy;
pub mod shutdown;
pub mod signal;
pub mod sinks;
pub mod sources;
pub mod test_util;
pub mod trace;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Result<T> = std::result::Result<T, Error>;
