// ==========================================
// 住院医师排班系统 - 利用率监测
// ==========================================
// 利用率 = 窗口内已分配工时 / 窗口内可用工时
// 可用工时 = Σ 个人周可用工时 × (窗口天数 - 阻断缺勤天数) / 7
// 关键缺口 = 关键活动未填补的需求席位
// 红线: 样本序号单调递增,由监测器统一分配
// ==========================================

use crate::config::EngineConfig;
use crate::constraints::capacity::coverage_cells;
use crate::constraints::ConstraintContext;
use crate::domain::calendar::DateRange;
use crate::domain::resilience::UtilizationSample;
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::types::AssignmentRole;
use chrono::NaiveDateTime;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ==========================================
// UtilizationMonitor - 利用率监测器
// ==========================================
#[derive(Debug, Default)]
pub struct UtilizationMonitor {
    seq: AtomicU64,
}

impl UtilizationMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一个样本序号（从 1 开始）
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// 采样（分配新序号）
    pub fn sample(
        &self,
        snapshot: &DomainSnapshot,
        window: DateRange,
        config: &EngineConfig,
        at: NaiveDateTime,
    ) -> UtilizationSample {
        let seq = self.next_seq();
        let sample = measure(snapshot, window, config, seq, at);
        tracing::debug!(
            program_id = %sample.program_id,
            seq = sample.seq,
            utilization = sample.utilization,
            critical_gaps = sample.critical_gaps,
            "利用率采样"
        );
        sample
    }
}

/// 计算利用率（纯函数,不分配序号）
pub fn measure(
    snapshot: &DomainSnapshot,
    window: DateRange,
    config: &EngineConfig,
    seq: u64,
    at: NaiveDateTime,
) -> UtilizationSample {
    let ctx = ConstraintContext::new(snapshot, window, config);

    let load_hours: f64 = ctx
        .window_assignments()
        .filter(|a| a.role != AssignmentRole::Backup)
        .filter(|a| ctx.index.people.contains_key(a.person_id.as_str()))
        .map(|a| ctx.index.duty_hours(a))
        .sum();

    let capacity_hours: f64 = snapshot
        .people
        .iter()
        .map(|p| {
            let absent_days = window
                .iter_days()
                .filter(|d| {
                    snapshot
                        .absences
                        .iter()
                        .any(|a| a.blocking && a.person_id == p.person_id && a.covers_date(*d))
                })
                .count() as i64;
            let available_days = (window.days() - absent_days).max(0) as f64;
            p.weekly_capacity_hours(config.compliance.default_weekly_capacity_hours) * available_days / 7.0
        })
        .sum();

    let utilization = if capacity_hours > 0.0 {
        load_hours / capacity_hours
    } else if load_hours > 0.0 {
        1.0
    } else {
        0.0
    };

    let critical_gaps = coverage_cells(&ctx)
        .iter()
        .filter(|c| c.critical)
        .map(|c| c.shortfall())
        .sum();

    UtilizationSample {
        seq,
        program_id: snapshot.program_id.clone(),
        window,
        load_hours,
        capacity_hours,
        utilization,
        critical_gaps,
        sampled_at: at,
    }
}

// ==========================================
// PeriodicSampler - 周期采样任务
// ==========================================
// 在 tokio interval 上周期调用 tick,shutdown 通知后退出
pub struct PeriodicSampler {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl PeriodicSampler {
    pub fn spawn<F, Fut>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.notified() => {
                        tracing::debug!("周期采样任务退出");
                        break;
                    }
                    _ = ticker.tick() => {
                        tick().await;
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    /// 通知退出并等待任务结束
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "周期采样任务异常结束");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_sequence_is_monotonic() {
        let monitor = UtilizationMonitor::new();
        assert_eq!(monitor.next_seq(), 1);
        assert_eq!(monitor.next_seq(), 2);
        assert_eq!(monitor.last_seq(), 2);
    }

    #[tokio::test]
    async fn test_periodic_sampler_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sampler = PeriodicSampler::spawn(Duration::from_millis(5), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        sampler.stop().await;
        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), ticks);
    }
}
