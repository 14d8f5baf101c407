//! 账本存储 Trait 定义
//!
//! 对账流程只依赖此接口，PostgreSQL 与内存实现可互换，测试时可注入 mock

use async_trait::async_trait;
use ledger_shared::error::Result;

use crate::models::{Balance, Order, OrderStatus};

/// 单笔对账的落库结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 只更新了订单状态，余额未变
    Updated { status: OrderStatus },
    /// 订单进入 PROCESSED 并已入账（分）
    Credited { amount: i64 },
    /// 订单已是终态（或不存在），本次未做任何修改
    AlreadySettled,
}

/// 账本存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// 取出最多 limit 笔未结算订单（NEW / PROCESSING），按上传时间升序
    async fn sample_unsettled(&self, limit: u32) -> Result<Vec<Order>>;

    /// 原子地写入订单新状态；状态为 PROCESSED 时同一事务内为用户入账
    ///
    /// 同一订单至多入账一次：订单已是终态时返回 AlreadySettled
    async fn reconcile(&self, order: &Order) -> Result<ReconcileOutcome>;

    /// 查询用户余额，从未入账的用户返回零余额
    async fn get_balance(&self, user_id: i64) -> Result<Balance>;

    /// 上传订单（订单号须通过 Luhn 校验，不可重复）
    async fn add_order(&self, number: &str, user_id: i64) -> Result<Order>;

    async fn get_order(&self, number: &str) -> Result<Option<Order>>;
}
