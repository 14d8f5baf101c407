//! PostgreSQL 账本存储
//!
//! 对账在单个事务内完成：带状态守卫的条件更新 + 余额 upsert。
//! 状态守卫与 credited_at 共同构成持久化的"已入账"标记，
//! 进程在提交前崩溃时整个事务回滚，订单保持未结算，下一轮重新采样。

use async_trait::async_trait;
use ledger_shared::error::{LedgerError, Result};
use ledger_shared::luhn;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

use super::traits::{LedgerStore, ReconcileOutcome};
use crate::models::{Balance, Order, OrderStatus};

/// PostgreSQL 账本存储
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中为用户入账
    ///
    /// 用户尚无余额记录时插入新行
    pub async fn credit_in_tx(tx: &mut PgConnection, user_id: i64, amount: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (user_id, current, withdrawn)
            VALUES ($1, $2, 0)
            ON CONFLICT (user_id)
            DO UPDATE SET current = balances.current + EXCLUDED.current
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 在事务中迁移订单状态
    ///
    /// 仅当订单仍未结算时生效，返回订单所属用户；订单已是终态或不存在时返回 None
    async fn transition_in_tx(tx: &mut PgConnection, order: &Order) -> Result<Option<i64>> {
        let credited = order.status == OrderStatus::Processed;
        let accrual = if credited { order.accrual } else { 0 };

        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                accrual = $3,
                credited_at = CASE WHEN $4 THEN NOW() ELSE credited_at END
            WHERE id = $1
              AND status IN ('NEW', 'PROCESSING')
              AND credited_at IS NULL
            RETURNING user_id
            "#,
        )
        .bind(&order.id)
        .bind(order.status)
        .bind(accrual)
        .bind(credited)
        .fetch_optional(tx)
        .await?;

        Ok(row.map(|r| r.get("user_id")))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn sample_unsettled(&self, limit: u32) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY uploaded_at ASC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn reconcile(&self, order: &Order) -> Result<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(user_id) = Self::transition_in_tx(&mut *tx, order).await? else {
            tx.rollback().await?;
            debug!(order = %order.id, "订单已结算，跳过");
            return Ok(ReconcileOutcome::AlreadySettled);
        };

        let outcome = if order.status == OrderStatus::Processed {
            Self::credit_in_tx(&mut *tx, user_id, order.accrual).await?;
            ReconcileOutcome::Credited {
                amount: order.accrual,
            }
        } else {
            ReconcileOutcome::Updated {
                status: order.status,
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_balance(&self, user_id: i64) -> Result<Balance> {
        let balance = sqlx::query_as::<_, Balance>(
            r#"
            SELECT user_id, current, withdrawn
            FROM balances
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or_else(|| Balance::empty(user_id)))
    }

    async fn add_order(&self, number: &str, user_id: i64) -> Result<Order> {
        if !luhn::is_valid(number) {
            return Err(LedgerError::InvalidOrderNumber {
                number: number.to_string(),
            });
        }

        let inserted = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (id, user_id, status, accrual, uploaded_at)
            VALUES ($1, $2, 'NEW', 0, NOW())
            ON CONFLICT (id) DO NOTHING
            RETURNING id, user_id, status, accrual, uploaded_at
            "#,
        )
        .bind(number)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(order) = inserted {
            return Ok(order);
        }

        match self.get_order(number).await? {
            Some(existing) if existing.user_id == user_id => {
                Err(LedgerError::OrderAlreadyUploadedByUser {
                    number: number.to_string(),
                })
            }
            Some(_) => Err(LedgerError::OrderAlreadyUploadedByAnotherUser {
                number: number.to_string(),
            }),
            None => Err(LedgerError::Internal(format!(
                "订单 {number} 插入冲突后未找到"
            ))),
        }
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }
}
