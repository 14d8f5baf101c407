//! 积分对账领域模型
//!
//! 金额在账本内部一律使用最小货币单位（分）的整数表示，
//! 只有积分计算服务返回的原始金额是十进制的主单位。

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// 订单状态
///
/// PROCESSED 与 INVALID 为终态，进入终态的订单不会再被采样，也不会再次入账
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 新上传，尚未被积分服务处理
    #[default]
    New,
    /// 积分服务计算中
    Processing,
    /// 积分服务拒绝计算
    Invalid,
    /// 计算完成，积分已确定
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    /// 未结算状态，即采样范围
    pub const UNSETTLED: [OrderStatus; 2] = [OrderStatus::New, OrderStatus::Processing];
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    /// 订单号（通过 Luhn 校验的数字串）
    pub id: String,
    pub user_id: i64,
    pub status: OrderStatus,
    /// 积分（分），仅 PROCESSED 时有意义
    pub accrual: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// 新上传的订单
    pub fn new(id: impl Into<String>, user_id: i64) -> Self {
        Self {
            id: id.into(),
            user_id,
            status: OrderStatus::New,
            accrual: 0,
            uploaded_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_uploaded_at(mut self, uploaded_at: DateTime<Utc>) -> Self {
        self.uploaded_at = uploaded_at;
        self
    }
}

/// 用户余额（分）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Balance {
    pub user_id: i64,
    pub current: i64,
    pub withdrawn: i64,
}

impl Balance {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

/// 积分服务返回的订单状态
///
/// 积分服务用 REGISTERED 表示"已登记、尚未开始计算"，它不是账本的订单状态；
/// 其他未知取值原样保留以便记录日志
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum AccrualStatus {
    Registered,
    New,
    Processing,
    Invalid,
    Processed,
    Unknown(String),
}

impl From<String> for AccrualStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "REGISTERED" => Self::Registered,
            "NEW" => Self::New,
            "PROCESSING" => Self::Processing,
            "INVALID" => Self::Invalid,
            "PROCESSED" => Self::Processed,
            _ => Self::Unknown(value),
        }
    }
}

impl AccrualStatus {
    /// 映射为账本订单状态，非订单状态返回 None
    pub fn order_status(&self) -> Option<OrderStatus> {
        match self {
            Self::New => Some(OrderStatus::New),
            Self::Processing => Some(OrderStatus::Processing),
            Self::Invalid => Some(OrderStatus::Invalid),
            Self::Processed => Some(OrderStatus::Processed),
            Self::Registered | Self::Unknown(_) => None,
        }
    }
}

impl std::fmt::Display for AccrualStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registered => f.write_str("REGISTERED"),
            Self::New => f.write_str("NEW"),
            Self::Processing => f.write_str("PROCESSING"),
            Self::Invalid => f.write_str("INVALID"),
            Self::Processed => f.write_str("PROCESSED"),
            Self::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

/// 积分服务单次查询结果
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccrualResult {
    /// 订单号
    pub order: String,
    pub status: AccrualStatus,
    /// 积分（主单位），非 PROCESSED 时通常缺省
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

impl AccrualResult {
    /// 积分换算为分
    ///
    /// 缺省视为 0；负数或超出 i64 范围返回 None，由调用方按数据异常处理
    pub fn accrual_minor_units(&self) -> Option<i64> {
        let amount = self.accrual.unwrap_or(Decimal::ZERO);
        if amount.is_sign_negative() && !amount.is_zero() {
            return None;
        }

        (amount * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn result(status: &str, accrual: Option<&str>) -> AccrualResult {
        AccrualResult {
            order: "79927398713".to_string(),
            status: AccrualStatus::from(status.to_string()),
            accrual: accrual.map(|a| Decimal::from_str(a).unwrap()),
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Processed.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
    }

    #[test]
    fn test_accrual_status_mapping() {
        assert_eq!(
            AccrualStatus::from("PROCESSED".to_string()).order_status(),
            Some(OrderStatus::Processed)
        );
        assert_eq!(
            AccrualStatus::from("PROCESSING".to_string()).order_status(),
            Some(OrderStatus::Processing)
        );
        assert_eq!(AccrualStatus::from("REGISTERED".to_string()).order_status(), None);

        let unknown = AccrualStatus::from("DONE".to_string());
        assert_eq!(unknown, AccrualStatus::Unknown("DONE".to_string()));
        assert_eq!(unknown.order_status(), None);
        assert_eq!(unknown.to_string(), "DONE");
    }

    #[test]
    fn test_deserialize_accrual_result() {
        let parsed: AccrualResult = serde_json::from_str(
            r#"{"order":"4561261212345467","status":"PROCESSED","accrual":500.0}"#,
        )
        .unwrap();
        assert_eq!(parsed.order, "4561261212345467");
        assert_eq!(parsed.status, AccrualStatus::Processed);
        assert_eq!(parsed.accrual_minor_units(), Some(50_000));

        let registered: AccrualResult =
            serde_json::from_str(r#"{"order":"4561261212345467","status":"REGISTERED"}"#).unwrap();
        assert_eq!(registered.accrual, None);
        assert_eq!(registered.accrual_minor_units(), Some(0));
    }

    #[test]
    fn test_minor_units_conversion() {
        assert_eq!(result("PROCESSED", Some("729.98")).accrual_minor_units(), Some(72_998));
        assert_eq!(result("PROCESSED", Some("12.34")).accrual_minor_units(), Some(1_234));
        assert_eq!(result("PROCESSED", Some("0.005")).accrual_minor_units(), Some(1));
        assert_eq!(result("PROCESSED", Some("0")).accrual_minor_units(), Some(0));
        assert_eq!(result("PROCESSED", Some("-1.5")).accrual_minor_units(), None);
    }

    #[test]
    fn test_order_builder() {
        let order = Order::new("79927398713", 7).with_status(OrderStatus::Processing);
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.accrual, 0);
        assert_eq!(order.user_id, 7);
    }
}
