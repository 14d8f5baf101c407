//! 积分计算服务客户端
//!
//! 通过 AccrualClient trait 抽象 HTTP 调用，便于测试时注入 mock 实现。
//! 客户端只负责把 HTTP 响应归类为成功结果或 AccrualError，
//! 如何响应这些结果（更新订单、调整速率）由 poll_task 决定。

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use ledger_shared::config::AccrualConfig;
use regex::Regex;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{AccrualError, Result};
use crate::models::AccrualResult;

/// 429 响应体中的限额描述，例如 `No more than 60 requests per minute allowed`
static LIMIT_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"No more than (\d+) requests per minute allowed")
        .expect("hardcoded regex pattern is valid")
});

/// 从 429 响应体中解析每分钟请求上限
pub fn parse_limit_hint(body: &str) -> Option<u32> {
    LIMIT_HINT
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ==================== Trait 抽象 ====================

/// 积分服务成功响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualResponse {
    /// 200，携带查询结果
    Found(AccrualResult),
    /// 204，积分服务尚不知道该订单
    NoContent,
}

/// 积分服务客户端接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualClient: Send + Sync {
    /// 查询单个订单的积分状态
    async fn fetch(&self, number: &str) -> Result<AccrualResponse>;
}

// ==================== HTTP 实现 ====================

/// 基于 reqwest 的积分服务客户端
///
/// reqwest::Client 内部带连接池，clone 是廉价操作
#[derive(Clone)]
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &AccrualConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.request_timeout())
    }

    fn order_url(&self, number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn fetch(&self, number: &str) -> Result<AccrualResponse> {
        let response = self.http.get(self.order_url(number)).send().await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let body = response.text().await?;
                let result: AccrualResult = serde_json::from_str(&body)
                    .map_err(|e| AccrualError::Decode(e.to_string()))?;
                debug!(order = %number, status = %result.status, "积分服务返回结果");
                Ok(AccrualResponse::Found(result))
            }
            StatusCode::NO_CONTENT => Ok(AccrualResponse::NoContent),
            StatusCode::TOO_MANY_REQUESTS => {
                // 读不到响应体时按无提示处理
                let body = response.text().await.unwrap_or_default();
                let limit_hint = parse_limit_hint(&body);
                if limit_hint.is_none() {
                    warn!(order = %number, body = %body, "限流响应中未找到请求上限");
                }
                Err(AccrualError::Throttled { limit_hint })
            }
            StatusCode::INTERNAL_SERVER_ERROR => Err(AccrualError::ServerError {
                status: status.as_u16(),
            }),
            _ => Err(AccrualError::UnexpectedStatus {
                status: status.as_u16(),
            }),
        }
    }
}
