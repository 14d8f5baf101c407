//! 未结算订单采样
//!
//! 每轮开始时从账本取出一批待查询订单。存储故障不致命：
//! 记录日志后本轮跳过采样，下一轮重试。

use std::sync::Arc;

use tracing::{debug, error};

use crate::models::Order;
use crate::repository::LedgerStore;

/// 订单采样器
#[derive(Clone)]
pub struct PoolSampler {
    store: Arc<dyn LedgerStore>,
}

impl PoolSampler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// 取出最多 limit 笔未结算订单，按上传时间从旧到新
    ///
    /// 存储故障时返回 None，表示本轮应跳过
    pub async fn sample(&self, limit: u32) -> Option<Vec<Order>> {
        match self.store.sample_unsettled(limit).await {
            Ok(orders) => {
                debug!(limit, sampled = orders.len(), "采样未结算订单");
                Some(orders)
            }
            Err(e) => {
                error!(limit, error = %e, code = e.code(), "采样未结算订单失败，本轮跳过");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockLedgerStore;
    use ledger_shared::error::LedgerError;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_sample_passes_limit_through() {
        let mut store = MockLedgerStore::new();
        store
            .expect_sample_unsettled()
            .with(eq(25u32))
            .times(1)
            .returning(|_| Ok(vec![Order::new("79927398713", 1)]));

        let sampler = PoolSampler::new(Arc::new(store));
        let orders = sampler.sample(25).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, "79927398713");
    }

    #[tokio::test]
    async fn test_store_fault_skips_cycle() {
        let mut store = MockLedgerStore::new();
        store
            .expect_sample_unsettled()
            .returning(|_| Err(LedgerError::Internal("connection reset".to_string())));

        let sampler = PoolSampler::new(Arc::new(store));
        assert!(sampler.sample(10).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_pool_is_not_a_fault() {
        let mut store = MockLedgerStore::new();
        store.expect_sample_unsettled().returning(|_| Ok(Vec::new()));

        let sampler = PoolSampler::new(Arc::new(store));
        assert_eq!(sampler.sample(10).await, Some(Vec::new()));
    }
}
