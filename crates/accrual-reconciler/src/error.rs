//! 对账服务专用错误类型
//!
//! 在共享库 LedgerError 基础上区分积分服务的各类失败：
//! 限流与通用失败对速率控制的影响不同，需要在类型上分开。

use ledger_shared::error::LedgerError;

/// 单笔查询任务错误
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// 429，携带积分服务给出的每分钟请求上限（解析失败时为 None）
    #[error("积分服务限流: 上限 {limit_hint:?}")]
    Throttled { limit_hint: Option<u32> },

    /// 500
    #[error("积分服务内部错误: HTTP {status}")]
    ServerError { status: u16 },

    /// 其他未约定的状态码
    #[error("积分服务返回未预期状态码: HTTP {status}")]
    UnexpectedStatus { status: u16 },

    #[error("积分服务请求超时")]
    Timeout,

    /// 连接失败等网络层错误
    #[error("积分服务请求失败: {0}")]
    Transport(String),

    /// 200 响应体无法解析
    #[error("积分服务响应解析失败: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, AccrualError>;

impl From<reqwest::Error> for AccrualError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AccrualError::Throttled {
            limit_hint: Some(60),
        };
        assert_eq!(err.to_string(), "积分服务限流: 上限 Some(60)");

        let err = AccrualError::ServerError { status: 500 };
        assert_eq!(err.to_string(), "积分服务内部错误: HTTP 500");

        let err = AccrualError::UnexpectedStatus { status: 418 };
        assert_eq!(err.to_string(), "积分服务返回未预期状态码: HTTP 418");

        assert_eq!(AccrualError::Timeout.to_string(), "积分服务请求超时");
    }

    #[test]
    fn test_shared_error_is_transparent() {
        let err: AccrualError = LedgerError::Internal("boom".to_string()).into();
        assert_eq!(err.to_string(), "内部错误: boom");
        assert!(matches!(err, AccrualError::Store(LedgerError::Internal(_))));
    }
}
