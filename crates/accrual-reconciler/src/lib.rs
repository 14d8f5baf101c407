//! 积分对账服务
//!
//! 后台循环：采样未结算订单，并发向积分计算服务（accrual）查询结果，
//! 按响应分类处理，根据限流信号自适应调整请求速率，并在事务中同时更新订单状态与用户余额。
//!
//! ## 模块结构
//!
//! - `models`: 订单、余额、积分查询结果等领域模型
//! - `error`: 单笔查询任务的错误分类
//! - `accrual_client`: 积分计算服务 HTTP 客户端
//! - `rate_controller`: 进程级自适应速率状态
//! - `repository`: 账本存储接口及 PostgreSQL / 内存实现
//! - `sampler`: 每轮的未结算订单采样
//! - `poll_task`: 单笔订单的查询、分类与对账
//! - `reconciler`: 对账循环编排

pub mod accrual_client;
pub mod error;
pub mod models;
pub mod poll_task;
pub mod rate_controller;
pub mod reconciler;
pub mod repository;
pub mod sampler;

pub use accrual_client::{AccrualClient, AccrualResponse, HttpAccrualClient};
pub use error::{AccrualError, Result};
pub use models::{AccrualResult, AccrualStatus, Balance, Order, OrderStatus};
pub use poll_task::{PollOutcome, PollTask};
pub use rate_controller::{CycleDecision, RateController};
pub use reconciler::{CycleReport, ReconciliationCycle};
pub use repository::{LedgerStore, MemoryLedgerStore, PgLedgerStore, ReconcileOutcome};
pub use sampler::PoolSampler;
