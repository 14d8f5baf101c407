//! 共享库
//!
//! 积分账本各组件共用的配置、错误处理、数据库连接、可观测性以及订单号校验等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod luhn;
pub mod observability;
pub mod test_utils;
