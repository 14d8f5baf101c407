//! 单笔订单查询任务
//!
//! 向积分服务查询一笔订单，按响应分类处理：
//!
//! | 响应 | 处理 |
//! |---|---|
//! | 200 且订单号一致 | 映射状态后对账落库 |
//! | 200 但订单号不一致 | 记录告警，视为成功 |
//! | 204 | 记录日志，视为成功 |
//! | 429 | 上报限流，本轮失败 |
//! | 500 / 其他状态码 / 超时 / 网络错误 | 上报通用失败 |
//!
//! 任务内部从不重试，重试只通过下一轮重新采样发生。

use std::sync::Arc;

use ledger_shared::observability::metrics;
use tracing::{debug, error, info, instrument, warn};

use crate::accrual_client::{AccrualClient, AccrualResponse};
use crate::error::{AccrualError, Result};
use crate::models::{AccrualStatus, Order, OrderStatus};
use crate::rate_controller::RateController;
use crate::repository::{LedgerStore, ReconcileOutcome};

/// 单笔任务的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 已提交对账事务
    Reconciled(ReconcileOutcome),
    /// 204，积分服务尚未登记该订单
    NoContent,
    /// 积分服务状态与本地一致，或仍为 REGISTERED
    Unchanged,
    /// 返回的订单号与查询的不一致
    OrderMismatch,
    /// 未知的状态取值
    UnknownStatus,
    /// PROCESSED 但积分为负数或溢出
    InvalidAmount,
    /// 429
    Throttled,
    /// 网络、超时、服务端错误或落库失败
    Failed,
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reconciled(ReconcileOutcome::AlreadySettled) => "already_settled",
            Self::Reconciled(_) => "reconciled",
            Self::NoContent => "no_content",
            Self::Unchanged => "unchanged",
            Self::OrderMismatch => "order_mismatch",
            Self::UnknownStatus => "unknown_status",
            Self::InvalidAmount => "invalid_amount",
            Self::Throttled => "throttled",
            Self::Failed => "failed",
        }
    }
}

/// 订单查询任务
///
/// 持有共享依赖的引用计数句柄，clone 后可直接移入 tokio 任务
#[derive(Clone)]
pub struct PollTask {
    client: Arc<dyn AccrualClient>,
    store: Arc<dyn LedgerStore>,
    rate: Arc<RateController>,
}

impl PollTask {
    pub fn new(
        client: Arc<dyn AccrualClient>,
        store: Arc<dyn LedgerStore>,
        rate: Arc<RateController>,
    ) -> Self {
        Self {
            client,
            store,
            rate,
        }
    }

    /// 查询并处理一笔订单
    ///
    /// 失败只反馈给速率控制器，不向调用方传播
    #[instrument(skip(self, order), fields(order = %order.id, user_id = order.user_id))]
    pub async fn run(&self, order: Order) -> PollOutcome {
        let outcome = match self.poll(&order).await {
            Ok(outcome) => outcome,
            Err(AccrualError::Throttled { limit_hint }) => {
                warn!(?limit_hint, "积分服务限流");
                self.rate.report_throttled(limit_hint);
                PollOutcome::Throttled
            }
            Err(e) => {
                match &e {
                    AccrualError::Store(inner) if inner.is_retryable() => {
                        warn!(error = %e, code = inner.code(), "对账落库暂时失败，下一轮重试")
                    }
                    AccrualError::Store(inner) => {
                        error!(error = %e, code = inner.code(), "对账落库失败，订单保持未结算")
                    }
                    _ => warn!(error = %e, "积分查询失败"),
                }
                self.rate.report_failure();
                PollOutcome::Failed
            }
        };

        metrics::record_poll(outcome.label());
        outcome
    }

    async fn poll(&self, order: &Order) -> Result<PollOutcome> {
        let result = match self.client.fetch(&order.id).await? {
            AccrualResponse::Found(result) => result,
            AccrualResponse::NoContent => {
                info!("积分服务尚未登记该订单");
                return Ok(PollOutcome::NoContent);
            }
        };

        if result.order != order.id {
            warn!(returned = %result.order, "积分服务返回的订单号不一致，忽略");
            return Ok(PollOutcome::OrderMismatch);
        }

        let Some(status) = result.status.order_status() else {
            return Ok(match result.status {
                AccrualStatus::Registered => {
                    debug!("订单已登记，尚未开始计算");
                    PollOutcome::Unchanged
                }
                other => {
                    warn!(status = %other, "未知的积分状态，忽略");
                    PollOutcome::UnknownStatus
                }
            });
        };

        if status == order.status && !status.is_terminal() {
            debug!(status = %status, "状态未变化，跳过写入");
            return Ok(PollOutcome::Unchanged);
        }

        let accrual = if status == OrderStatus::Processed {
            match result.accrual_minor_units() {
                Some(amount) => amount,
                None => {
                    warn!(accrual = ?result.accrual, "积分金额无效，忽略");
                    return Ok(PollOutcome::InvalidAmount);
                }
            }
        } else {
            0
        };

        let next = Order {
            status,
            accrual,
            ..order.clone()
        };
        let outcome = self.store.reconcile(&next).await?;

        match outcome {
            ReconcileOutcome::Credited { amount } => {
                info!(status = %status, amount, "订单已结算并入账");
                metrics::record_reconciled(status.as_str(), amount.unsigned_abs());
            }
            ReconcileOutcome::Updated { status } => {
                info!(status = %status, "订单状态已更新");
                metrics::record_reconciled(status.as_str(), 0);
            }
            ReconcileOutcome::AlreadySettled => {
                debug!("订单已被其他任务结算");
            }
        }

        Ok(PollOutcome::Reconciled(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual_client::MockAccrualClient;
    use crate::models::AccrualResult;
    use crate::repository::{MemoryLedgerStore, MockLedgerStore};
    use ledger_shared::error::LedgerError;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::time::Duration;

    const ORDER: &str = "4561261212345467";

    fn rate() -> Arc<RateController> {
        Arc::new(RateController::new(
            1000,
            1,
            Duration::from_secs(1),
            Duration::from_secs(60),
        ))
    }

    fn found(order: &str, status: &str, accrual: Option<&str>) -> AccrualResponse {
        AccrualResponse::Found(AccrualResult {
            order: order.to_string(),
            status: AccrualStatus::from(status.to_string()),
            accrual: accrual.map(|a| Decimal::from_str(a).unwrap()),
        })
    }

    fn client_returning(response: Result<AccrualResponse>) -> MockAccrualClient {
        let mut client = MockAccrualClient::new();
        let mut response = Some(response);
        client
            .expect_fetch()
            .times(1)
            .returning(move |_| response.take().unwrap());
        client
    }

    async fn seeded_store() -> (Arc<MemoryLedgerStore>, Order) {
        let store = Arc::new(MemoryLedgerStore::new());
        let order = store.add_order(ORDER, 1).await.unwrap();
        (store, order)
    }

    #[tokio::test]
    async fn test_processed_order_is_credited() {
        let (store, order) = seeded_store().await;
        let rate = rate();
        let client = client_returning(Ok(found(ORDER, "PROCESSED", Some("500.0"))));
        let task = PollTask::new(Arc::new(client), store.clone(), rate.clone());

        let outcome = task.run(order).await;

        assert_eq!(
            outcome,
            PollOutcome::Reconciled(ReconcileOutcome::Credited { amount: 50_000 })
        );
        let stored = store.get_order(ORDER).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processed);
        assert_eq!(stored.accrual, 50_000);
        assert_eq!(store.get_balance(1).await.unwrap().current, 50_000);
        assert!(!rate.needs_backoff());
    }

    #[tokio::test]
    async fn test_no_content_is_not_a_failure() {
        let (store, order) = seeded_store().await;
        let rate = rate();
        let client = client_returning(Ok(AccrualResponse::NoContent));
        let task = PollTask::new(Arc::new(client), store.clone(), rate.clone());

        assert_eq!(task.run(order.clone()).await, PollOutcome::NoContent);
        assert_eq!(store.get_order(ORDER).await.unwrap(), Some(order));
        assert!(!rate.needs_backoff());
    }

    #[tokio::test]
    async fn test_order_mismatch_is_ignored() {
        let (store, order) = seeded_store().await;
        let rate = rate();
        let client = client_returning(Ok(found("79927398713", "PROCESSED", Some("10"))));
        let task = PollTask::new(Arc::new(client), store.clone(), rate.clone());

        assert_eq!(task.run(order).await, PollOutcome::OrderMismatch);
        assert_eq!(store.get_balance(1).await.unwrap().current, 0);
        assert!(!rate.needs_backoff());
    }

    #[tokio::test]
    async fn test_unknown_and_registered_statuses_are_noops() {
        let mut store = MockLedgerStore::new();
        store.expect_reconcile().never();
        let store = Arc::new(store);
        let rate = rate();
        let order = Order::new(ORDER, 1);

        let client = client_returning(Ok(found(ORDER, "DONE", None)));
        let task = PollTask::new(Arc::new(client), store.clone(), rate.clone());
        assert_eq!(task.run(order.clone()).await, PollOutcome::UnknownStatus);

        let client = client_returning(Ok(found(ORDER, "REGISTERED", None)));
        let task = PollTask::new(Arc::new(client), store, rate.clone());
        assert_eq!(task.run(order).await, PollOutcome::Unchanged);

        assert!(!rate.needs_backoff());
    }

    #[tokio::test]
    async fn test_processing_to_processing_skips_write() {
        let mut store = MockLedgerStore::new();
        store.expect_reconcile().never();
        let order = Order::new(ORDER, 1).with_status(OrderStatus::Processing);

        let client = client_returning(Ok(found(ORDER, "PROCESSING", None)));
        let task = PollTask::new(Arc::new(client), Arc::new(store), rate());

        assert_eq!(task.run(order).await, PollOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_new_to_processing_updates_status() {
        let (store, order) = seeded_store().await;
        let client = client_returning(Ok(found(ORDER, "PROCESSING", None)));
        let task = PollTask::new(Arc::new(client), store.clone(), rate());

        assert_eq!(
            task.run(order).await,
            PollOutcome::Reconciled(ReconcileOutcome::Updated {
                status: OrderStatus::Processing
            })
        );
        let stored = store.get_order(ORDER).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(store.get_balance(1).await.unwrap().current, 0);
    }

    #[tokio::test]
    async fn test_negative_accrual_is_ignored() {
        let mut store = MockLedgerStore::new();
        store.expect_reconcile().never();
        let client = client_returning(Ok(found(ORDER, "PROCESSED", Some("-5"))));
        let rate = rate();
        let task = PollTask::new(Arc::new(client), Arc::new(store), rate.clone());

        assert_eq!(
            task.run(Order::new(ORDER, 1)).await,
            PollOutcome::InvalidAmount
        );
        assert!(!rate.needs_backoff());
    }

    #[tokio::test]
    async fn test_throttle_reports_hint() {
        let (store, order) = seeded_store().await;
        let rate = rate();
        let client = client_returning(Err(AccrualError::Throttled {
            limit_hint: Some(60),
        }));
        let task = PollTask::new(Arc::new(client), store.clone(), rate.clone());

        assert_eq!(task.run(order.clone()).await, PollOutcome::Throttled);
        assert_eq!(rate.limit(), 60);
        assert!(rate.needs_backoff());
        assert_eq!(store.get_order(ORDER).await.unwrap(), Some(order));
    }

    #[tokio::test]
    async fn test_generic_failures_raise_backoff() {
        for err in [
            AccrualError::ServerError { status: 500 },
            AccrualError::UnexpectedStatus { status: 502 },
            AccrualError::Timeout,
            AccrualError::Transport("connection refused".to_string()),
        ] {
            let rate = rate();
            let mut store = MockLedgerStore::new();
            store.expect_reconcile().never();
            let client = client_returning(Err(err));
            let task = PollTask::new(Arc::new(client), Arc::new(store), rate.clone());

            assert_eq!(task.run(Order::new(ORDER, 1)).await, PollOutcome::Failed);
            assert!(rate.needs_backoff());
            assert_eq!(rate.limit(), 1000);
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_a_task_failure() {
        let mut store = MockLedgerStore::new();
        store
            .expect_reconcile()
            .times(1)
            .returning(|_| Err(LedgerError::Internal("deadlock detected".to_string())));
        let rate = rate();
        let client = client_returning(Ok(found(ORDER, "PROCESSED", Some("1.5"))));
        let task = PollTask::new(Arc::new(client), Arc::new(store), rate.clone());

        assert_eq!(task.run(Order::new(ORDER, 1)).await, PollOutcome::Failed);
        assert!(rate.needs_backoff());
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_a_task_failure() {
        let mut store = MockLedgerStore::new();
        store
            .expect_reconcile()
            .times(1)
            .returning(|_| Err(LedgerError::Database(sqlx::Error::PoolTimedOut)));
        let rate = rate();
        let client = client_returning(Ok(found(ORDER, "INVALID", None)));
        let task = PollTask::new(Arc::new(client), Arc::new(store), rate.clone());

        assert_eq!(task.run(Order::new(ORDER, 1)).await, PollOutcome::Failed);
        assert!(rate.needs_backoff());
        assert_eq!(rate.finish_cycle().label(), "backoff");
    }

    #[tokio::test]
    async fn test_reconcile_receives_minor_units() {
        let mut store = MockLedgerStore::new();
        store
            .expect_reconcile()
            .withf(|order| {
                order.id == ORDER && order.status == OrderStatus::Processed && order.accrual == 72_998
            })
            .times(1)
            .returning(|order| {
                Ok(ReconcileOutcome::Credited {
                    amount: order.accrual,
                })
            });
        let client = client_returning(Ok(found(ORDER, "PROCESSED", Some("729.98"))));
        let task = PollTask::new(Arc::new(client), Arc::new(store), rate());

        assert_eq!(
            task.run(Order::new(ORDER, 1)).await,
            PollOutcome::Reconciled(ReconcileOutcome::Credited { amount: 72_998 })
        );
    }
}
