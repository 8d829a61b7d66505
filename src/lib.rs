// Library crate - strategy core, broker adapter and orchestrators

pub mod api;
pub mod error;
pub mod execution;
pub mod kite;
pub mod market;
pub mod pipeline;
pub mod trading_core;
pub mod types;

// Re-export commonly used types
pub use error::{BrokerError, InputError};
pub use types::*;
