//! Paper execution: orders are acknowledged locally and never leave the process

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::order::{OrderGateway, OrderReceipt, OrderRequest};

#[derive(Debug, Default, Clone)]
pub struct PaperGateway;

impl PaperGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let order_id = format!("PAPER-{}", Uuid::new_v4());
        info!("[PAPER] {} {} x{} -> {}", request.side, request.target, request.quantity, order_id);
        Ok(OrderReceipt { order_id, placed_at: Utc::now() })
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every request; scripted failures are consumed in order
    #[derive(Default)]
    pub struct RecordingGateway {
        pub requests: Mutex<Vec<OrderRequest>>,
        failures: Mutex<VecDeque<bool>>,
    }

    impl RecordingGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Next `n` orders are rejected
        pub fn fail_next(&self, n: usize) {
            self.failures.lock().unwrap().extend(std::iter::repeat(true).take(n));
        }

        pub fn placed(&self) -> Vec<OrderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderGateway for RecordingGateway {
        async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
            if self.failures.lock().unwrap().pop_front().unwrap_or(false) {
                return Err(anyhow!("order rejected: insufficient margin"));
            }
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            Ok(OrderReceipt { order_id: format!("TEST-{}", requests.len()), placed_at: Utc::now() })
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::order::{OrderSide, OrderTarget};
    use crate::types::Underlying;

    #[tokio::test]
    async fn test_paper_order_ids_are_unique() {
        let gateway = PaperGateway::new();
        let request = OrderRequest::new(OrderTarget::NearMonthFuture(Underlying::Nifty), OrderSide::Buy, 75);
        let a = gateway.place_order(&request).await.unwrap();
        let b = gateway.place_order(&request).await.unwrap();
        assert!(a.order_id.starts_with("PAPER-"));
        assert_ne!(a.order_id, b.order_id);
    }
}
