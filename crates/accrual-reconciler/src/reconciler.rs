//! 对账循环编排
//!
//! 每轮：采样 → 并发查询（每笔订单一个任务）→ 等待本轮全部任务结束 →
//! 速率控制器轮末结算 → 休眠 1 秒或退避 60 秒 → 下一轮。
//!
//! 关闭信号在三处生效：等待并发额度时、等待本轮任务时与轮间休眠时。
//! 收到信号后不再发出新的查询，也不再开始新一轮；已发出的查询不强行取消，
//! 进程退出前未结束的查询随运行时一起丢弃，订单保持未结算，下次启动重新采样。

use std::sync::Arc;
use std::time::Instant;

use ledger_shared::config::AccrualConfig;
use ledger_shared::observability::metrics;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::accrual_client::AccrualClient;
use crate::poll_task::{PollOutcome, PollTask};
use crate::rate_controller::{CycleDecision, RateController};
use crate::repository::{LedgerStore, ReconcileOutcome};
use crate::sampler::PoolSampler;

/// 单轮统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// 本轮开始时的限额
    pub limit: u32,
    pub sampled: usize,
    /// 提交了状态变更的订单数
    pub reconciled: usize,
    /// 本轮入账总额（分）
    pub credited: i64,
    /// 无需写入的成功结果（204、状态未变、数据异常等）
    pub ignored: usize,
    pub throttled: usize,
    pub failed: usize,
    /// 采样失败，本轮未发出请求
    pub skipped: bool,
    /// 派发或等待任务期间收到关闭信号
    pub interrupted: bool,
    pub decision: CycleDecision,
}

impl CycleReport {
    fn new(limit: u32, sampled: usize, decision: CycleDecision) -> Self {
        Self {
            limit,
            sampled,
            reconciled: 0,
            credited: 0,
            ignored: 0,
            throttled: 0,
            failed: 0,
            skipped: false,
            interrupted: false,
            decision,
        }
    }

    fn record(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Reconciled(ReconcileOutcome::Credited { amount }) => {
                self.reconciled += 1;
                self.credited += amount;
            }
            PollOutcome::Reconciled(ReconcileOutcome::Updated { .. }) => self.reconciled += 1,
            PollOutcome::Throttled => self.throttled += 1,
            PollOutcome::Failed => self.failed += 1,
            PollOutcome::Reconciled(ReconcileOutcome::AlreadySettled)
            | PollOutcome::NoContent
            | PollOutcome::Unchanged
            | PollOutcome::OrderMismatch
            | PollOutcome::UnknownStatus
            | PollOutcome::InvalidAmount => self.ignored += 1,
        }
    }

    /// 指标标签
    fn label(&self) -> &'static str {
        if self.skipped {
            "skipped"
        } else {
            self.decision.label()
        }
    }
}

/// 对账循环
pub struct ReconciliationCycle {
    sampler: PoolSampler,
    task: PollTask,
    rate: Arc<RateController>,
    in_flight: Arc<Semaphore>,
}

impl ReconciliationCycle {
    /// 创建对账循环
    ///
    /// `max_in_flight` 限制同时进行的查询数，与每轮订单数上限相互独立
    pub fn new(
        store: Arc<dyn LedgerStore>,
        client: Arc<dyn AccrualClient>,
        rate: Arc<RateController>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            sampler: PoolSampler::new(Arc::clone(&store)),
            task: PollTask::new(client, store, Arc::clone(&rate)),
            rate,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn from_config(
        store: Arc<dyn LedgerStore>,
        client: Arc<dyn AccrualClient>,
        config: &AccrualConfig,
    ) -> Self {
        Self::new(
            store,
            client,
            Arc::new(RateController::from_config(config)),
            config.max_in_flight,
        )
    }

    pub fn rate(&self) -> &Arc<RateController> {
        &self.rate
    }

    /// 主循环：持续对账直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            limit = self.rate.limit(),
            max_in_flight = self.in_flight.available_permits(),
            "对账循环已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_once(&mut shutdown).await;
            if report.interrupted {
                break;
            }

            let sleep = report.decision.sleep();
            debug!(sleep_ms = sleep.as_millis() as u64, limit = self.rate.limit(), "轮间休眠");

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("对账循环已停止");
    }

    /// 执行一轮对账并完成轮末结算
    ///
    /// 每笔订单先取得并发额度再派发任务。派发或等待期间收到关闭信号时立即返回：
    /// 尚未派发的订单不再查询，已派发的任务转入后台继续运行
    pub async fn run_once(&self, shutdown: &mut watch::Receiver<bool>) -> CycleReport {
        let started = Instant::now();
        let limit = self.rate.limit();

        let Some(orders) = self.sampler.sample(limit).await else {
            let mut report = CycleReport::new(limit, 0, self.rate.skip_cycle());
            report.skipped = true;
            metrics::record_cycle(report.label(), started.elapsed().as_secs_f64());
            return report;
        };

        let sampled = orders.len();
        let mut tasks = JoinSet::new();
        let mut interrupted = false;
        for order in orders {
            let permit = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => {
                    interrupted = true;
                    break;
                }
                permit = Arc::clone(&self.in_flight).acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                error!("并发额度信号量已关闭，停止派发本轮剩余订单");
                break;
            };

            let task = self.task.clone();
            tasks.spawn(async move {
                let _permit = permit;
                task.run(order).await
            });
        }

        let mut outcomes = Vec::with_capacity(sampled);
        if interrupted {
            warn!(
                dispatched = tasks.len(),
                sampled, "派发期间收到关闭信号，剩余订单不再查询"
            );
            tasks.detach_all();
        }
        while !interrupted {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => outcomes.push(outcome),
                    Some(Err(e)) => {
                        error!(error = %e, "查询任务异常退出");
                        self.rate.report_failure();
                        outcomes.push(PollOutcome::Failed);
                    }
                    None => break,
                },
                _ = wait_for_shutdown(shutdown) => {
                    warn!(pending = tasks.len(), "收到关闭信号，不再等待已发出的查询");
                    tasks.detach_all();
                    interrupted = true;
                    break;
                }
            }
        }

        let decision = self.rate.finish_cycle();
        let mut report = CycleReport::new(limit, sampled, decision);
        report.interrupted = interrupted;
        for outcome in outcomes {
            report.record(outcome);
        }

        let elapsed = started.elapsed();
        metrics::record_cycle(report.label(), elapsed.as_secs_f64());
        info!(
            limit,
            sampled,
            reconciled = report.reconciled,
            credited = report.credited,
            ignored = report.ignored,
            throttled = report.throttled,
            failed = report.failed,
            next_limit = self.rate.limit(),
            decision = report.label(),
            elapsed_ms = elapsed.as_millis() as u64,
            "本轮对账完成"
        );

        report
    }
}

/// 等待关闭信号
///
/// 发送端被丢弃后再也不会收到信号，此时永远挂起
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
