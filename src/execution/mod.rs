//! Execution module for placing strategy orders
//!
//! Orders go through the [`OrderGateway`] trait: the paper gateway
//! acknowledges locally, the Kite client sends them to the broker.

mod config;
mod order;
pub mod paper;

pub use config::{ExecutionMode, HighLowConfig, MultiCprRunConfig, OutputConfig};
pub use order::{OrderGateway, OrderReceipt, OrderRequest, OrderSide, OrderTarget};
pub use paper::PaperGateway;
