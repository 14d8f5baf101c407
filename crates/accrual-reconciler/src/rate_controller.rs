//! 自适应速率控制
//!
//! 进程级共享状态，由同一轮内的所有查询任务并发写入，在轮末统一结算。
//! 只包含几个独立的标量，全部使用原子操作；同一轮内多个任务同时上报时
//! 后写者覆盖先写者，限额精度不影响正确性，只影响下一轮的吞吐。

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use ledger_shared::config::AccrualConfig;
use ledger_shared::observability::metrics;
use tracing::{info, warn};

/// 轮末决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDecision {
    /// 本轮无失败：上调限额，短暂休眠
    Advance { sleep: Duration },
    /// 本轮有失败：长时间退避，`throttled` 表示是否由限流触发
    Backoff { sleep: Duration, throttled: bool },
}

impl CycleDecision {
    pub fn sleep(&self) -> Duration {
        match self {
            Self::Advance { sleep } | Self::Backoff { sleep, .. } => *sleep,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Advance { .. } => "advance",
            Self::Backoff {
                throttled: true, ..
            } => "throttled",
            Self::Backoff { .. } => "backoff",
        }
    }
}

/// 速率控制器
#[derive(Debug)]
pub struct RateController {
    limit: AtomicU32,
    need_backoff: AtomicBool,
    throttled: AtomicBool,
    default_limit: u32,
    delta: u32,
    advance_interval: Duration,
    backoff_interval: Duration,
}

impl RateController {
    pub fn new(
        default_limit: u32,
        delta: u32,
        advance_interval: Duration,
        backoff_interval: Duration,
    ) -> Self {
        let default_limit = default_limit.max(1);
        Self {
            limit: AtomicU32::new(default_limit),
            need_backoff: AtomicBool::new(false),
            throttled: AtomicBool::new(false),
            default_limit,
            delta,
            advance_interval,
            backoff_interval,
        }
    }

    pub fn from_config(config: &AccrualConfig) -> Self {
        Self::new(
            config.default_limit,
            config.limit_delta,
            config.advance_interval(),
            config.backoff_interval(),
        )
    }

    /// 当前每轮最多处理的订单数，始终 >= 1
    pub fn limit(&self) -> u32 {
        self.limit.load(Ordering::Acquire)
    }

    /// 本轮是否已有任务失败
    pub fn needs_backoff(&self) -> bool {
        self.need_backoff.load(Ordering::Acquire)
    }

    /// 上报限流
    ///
    /// 有提示时直接采用；没有提示时本轮第一次上报把限额减半，
    /// 同一轮后续的无提示上报不再继续削减
    pub fn report_throttled(&self, limit_hint: Option<u32>) {
        let first_in_cycle = !self.throttled.swap(true, Ordering::AcqRel);

        match limit_hint {
            Some(hint) => {
                self.limit.store(hint.max(1), Ordering::Release);
            }
            None if first_in_cycle => {
                let current = self.limit();
                let estimated = (current / 2).max(1);
                warn!(current, estimated, "限流响应未给出上限，按减半估算");
                self.limit.store(estimated, Ordering::Release);
            }
            None => {}
        }

        self.need_backoff.store(true, Ordering::Release);
    }

    /// 上报通用失败
    pub fn report_failure(&self) {
        self.need_backoff.store(true, Ordering::Release);
    }

    /// 本轮未发出任何请求（采样失败）：状态保持不变，按正常间隔重试
    pub fn skip_cycle(&self) -> CycleDecision {
        CycleDecision::Advance {
            sleep: self.advance_interval,
        }
    }

    /// 轮末结算
    ///
    /// 必须在本轮所有任务结束后调用一次；清空本轮标志并返回下一次休眠时长
    pub fn finish_cycle(&self) -> CycleDecision {
        let need_backoff = self.need_backoff.swap(false, Ordering::AcqRel);
        let throttled = self.throttled.swap(false, Ordering::AcqRel);

        let (next_limit, decision) = next_state(
            self.limit(),
            self.default_limit,
            self.delta,
            need_backoff,
            throttled,
            self.advance_interval,
            self.backoff_interval,
        );
        self.limit.store(next_limit, Ordering::Release);
        metrics::set_cycle_limit(next_limit);

        if let CycleDecision::Backoff { sleep, throttled } = decision {
            info!(
                limit = next_limit,
                throttled,
                sleep_ms = sleep.as_millis() as u64,
                "本轮存在失败，进入退避"
            );
        }

        decision
    }
}

/// 轮末状态迁移
///
/// 限流优先于通用失败：同一轮既有限流又有其他失败时保留限流给出的限额
fn next_state(
    current: u32,
    default_limit: u32,
    delta: u32,
    need_backoff: bool,
    throttled: bool,
    advance_interval: Duration,
    backoff_interval: Duration,
) -> (u32, CycleDecision) {
    if !need_backoff {
        let next = current.saturating_add(delta).max(1);
        return (
            next,
            CycleDecision::Advance {
                sleep: advance_interval,
            },
        );
    }

    let next = if throttled { current } else { default_limit };
    (
        next.max(1),
        CycleDecision::Backoff {
            sleep: backoff_interval,
            throttled,
        },
    )
}
