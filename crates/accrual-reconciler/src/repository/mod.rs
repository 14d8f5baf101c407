//! 账本存储层
//!
//! 对账流程读写订单与余额的唯一入口。
//!
//! ## 设计原则
//!
//! - 订单状态迁移与余额入账在同一个原子单元内完成
//! - 以订单号为键、以"未结算"状态为守卫，保证同一订单至多入账一次
//! - 定义 trait 接口以支持 mock 测试

mod memory_store;
mod pg_store;
mod traits;

pub use memory_store::MemoryLedgerStore;
pub use pg_store::PgLedgerStore;
pub use traits::*;
