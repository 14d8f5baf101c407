//! 内存账本存储
//!
//! 用于本地联调和测试，进程重启后数据丢失。
//! 读路径直接访问 DashMap；所有写操作串行化在同一把锁下，
//! 保证订单状态迁移与余额入账对其他写者是原子的。

use async_trait::async_trait;
use dashmap::DashMap;
use ledger_shared::error::{LedgerError, Result};
use ledger_shared::luhn;
use parking_lot::Mutex;
use tracing::debug;

use super::traits::{LedgerStore, ReconcileOutcome};
use crate::models::{Balance, Order, OrderStatus};

/// 内存账本存储
#[derive(Default)]
pub struct MemoryLedgerStore {
    orders: DashMap<String, Order>,
    balances: DashMap<i64, Balance>,
    write_lock: Mutex<()>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入订单（测试与数据导入用），已存在时覆盖
    pub fn insert_order(&self, order: Order) {
        let _guard = self.write_lock.lock();
        self.orders.insert(order.id.clone(), order);
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn sample_unsettled(&self, limit: u32) -> Result<Vec<Order>> {
        let mut pool: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| OrderStatus::UNSETTLED.contains(&entry.status))
            .map(|entry| entry.value().clone())
            .collect();

        pool.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        pool.truncate(limit as usize);

        Ok(pool)
    }

    async fn reconcile(&self, order: &Order) -> Result<ReconcileOutcome> {
        let _guard = self.write_lock.lock();

        let Some(mut stored) = self.orders.get_mut(&order.id) else {
            debug!(order = %order.id, "订单不存在，跳过");
            return Ok(ReconcileOutcome::AlreadySettled);
        };

        if stored.status.is_terminal() {
            debug!(order = %order.id, status = %stored.status, "订单已结算，跳过");
            return Ok(ReconcileOutcome::AlreadySettled);
        }

        let outcome = if order.status == OrderStatus::Processed {
            let user_id = stored.user_id;
            let mut balance = self
                .balances
                .entry(user_id)
                .or_insert_with(|| Balance::empty(user_id));
            balance.current = balance
                .current
                .checked_add(order.accrual)
                .ok_or_else(|| LedgerError::Internal(format!("用户 {user_id} 余额溢出")))?;

            stored.accrual = order.accrual;
            ReconcileOutcome::Credited {
                amount: order.accrual,
            }
        } else {
            stored.accrual = 0;
            ReconcileOutcome::Updated {
                status: order.status,
            }
        };
        stored.status = order.status;

        Ok(outcome)
    }

    async fn get_balance(&self, user_id: i64) -> Result<Balance> {
        Ok(self
            .balances
            .get(&user_id)
            .map(|b| *b)
            .unwrap_or_else(|| Balance::empty(user_id)))
    }

    async fn add_order(&self, number: &str, user_id: i64) -> Result<Order> {
        if !luhn::is_valid(number) {
            return Err(LedgerError::InvalidOrderNumber {
                number: number.to_string(),
            });
        }

        let _guard = self.write_lock.lock();

        if let Some(existing) = self.orders.get(number) {
            return Err(if existing.user_id == user_id {
                LedgerError::OrderAlreadyUploadedByUser {
                    number: number.to_string(),
                }
            } else {
                LedgerError::OrderAlreadyUploadedByAnotherUser {
                    number: number.to_string(),
                }
            });
        }

        let order = Order::new(number, user_id);
        self.orders.insert(number.to_string(), order.clone());
        Ok(order)
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>> {
        Ok(self.orders.get(number).map(|o| o.value().clone()))
    }
}
