//! Order types and the order gateway seam

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OptionContract, Underlying};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// What the order trades
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderTarget {
    /// Index option, nearest expiry after today
    Option(OptionContract),
    /// Near-month index future
    NearMonthFuture(Underlying),
}

impl std::fmt::Display for OrderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Option(contract) => write!(f, "{}", contract),
            Self::NearMonthFuture(underlying) => write!(f, "{} FUT", underlying),
        }
    }
}

/// Market order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub target: OrderTarget,
    pub side: OrderSide,
    /// Units, already multiplied by lot size
    pub quantity: u32,
}

impl OrderRequest {
    pub fn new(target: OrderTarget, side: OrderSide, quantity: u32) -> Self {
        Self { target, side, quantity }
    }
}

/// Acknowledgement of a placed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub placed_at: DateTime<Utc>,
}

/// Fire-and-forget order placement. An `Err` means the order was not
/// accepted and the caller keeps its state.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;

    /// Gateway name for logging
    fn name(&self) -> &'static str;
}
