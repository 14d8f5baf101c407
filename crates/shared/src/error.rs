//! 统一错误处理模块
//!
//! 定义账本各组件共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 账本错误类型
#[derive(Debug, Error)]
pub enum LedgerError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // ==================== 订单错误 ====================
    #[error("订单号格式无效: {number}")]
    InvalidOrderNumber { number: String },

    #[error("订单已由当前用户上传: {number}")]
    OrderAlreadyUploadedByUser { number: String },

    #[error("订单已由其他用户上传: {number}")]
    OrderAlreadyUploadedByAnotherUser { number: String },

    // ==================== 通用错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::InvalidOrderNumber { .. } => "INVALID_ORDER_NUMBER",
            Self::OrderAlreadyUploadedByUser { .. } => "ORDER_ALREADY_UPLOADED_BY_USER",
            Self::OrderAlreadyUploadedByAnotherUser { .. } => {
                "ORDER_ALREADY_UPLOADED_BY_ANOTHER_USER"
            }
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 对账循环不在任务内部重试，下一轮重新采样即为重试；此判断只决定日志级别
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}
