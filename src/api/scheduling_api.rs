// ==========================================
// 住院医师排班系统 - 排班 API
// ==========================================
// 职责: 排班生成/校验、防御等级与危机响应、应急推演、换班、缺勤冲突
// 红线: 同一 (program, 窗口) 单写者; 失败的写操作不留部分效果
// ==========================================

mod conflicts;
mod generation;
mod resilience_ops;
mod swaps;

use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::config::EngineConfig;
use crate::domain::assignment::Assignment;
use crate::domain::resilience::{DefenseTransition, UtilizationSample};
use crate::domain::swap::SwapRecord;
use crate::domain::types::SolveStatus;
use crate::domain::violation::Violation;
use crate::engine::compliance::ComplianceValidator;
use crate::engine::events::{EngineEventPublisher, OptionalEventPublisher};
use crate::engine::window_lock::WindowLockRegistry;
use crate::repository::{
    ConflictAlertRepository, DefenseLogRepository, ScheduleRepository, ScheduleSnapshotRepository,
    SwapRepository, VulnerabilityReportRepository,
};
use crate::resilience::{
    ContingencyAnalyzer, CrisisCoordinator, CrisisResponse, DefenseController, StaticStabilityCache,
    UtilizationMonitor,
};
use crate::solver::SolveDiagnostics;
use crate::swap::{ConflictDetector, ConflictQueue, ConflictWorker, SwapExecutor, SwapIssue, SwapLifecycle, SwapValidator};

// ==========================================
// Clock - 时钟
// ==========================================

/// 当前时间来源（测试中可替换为固定时钟）
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// 系统本地时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// 固定时钟（可手动推进）
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: NaiveDateTime) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ==========================================
// 返回值
// ==========================================

/// 排班生成结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub program_id: String,
    pub status: SolveStatus,
    /// 存档版本（FAILED 时无）
    pub version: Option<i64>,
    /// 是否已替换在线排班（仅 SUCCESS）
    pub applied: bool,
    /// 窗口内分配
    pub assignments: Vec<Assignment>,
    pub violations: Vec<Violation>,
    pub diagnostics: SolveDiagnostics,
}

/// 换班申请结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapProposal {
    pub record: SwapRecord,
    pub warnings: Vec<SwapIssue>,
}

/// 一次利用率采样的处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilizationTick {
    pub sample: UtilizationSample,
    pub transition: Option<DefenseTransition>,
    pub response: CrisisResponse,
}

// ==========================================
// SchedulingApi - 排班 API
// ==========================================

/// 排班API
///
/// 职责：
/// 1. 排班生成与合规校验（窗口写锁内求解,SUCCESS 才替换在线排班）
/// 2. 利用率采样 → 防御等级 → 危机响应
/// 3. N-1/N-2 应急推演与兜底方案预计算
/// 4. 换班申请/审批/执行/回滚
/// 5. 缺勤登记与冲突检测队列
pub struct SchedulingApi {
    schedule_repo: Arc<dyn ScheduleRepository>,
    compliance: Arc<ComplianceValidator>,
    snapshot_repo: Arc<ScheduleSnapshotRepository>,
    vulnerability_repo: Arc<VulnerabilityReportRepository>,
    alert_repo: Arc<ConflictAlertRepository>,
    defense: Arc<DefenseController>,
    monitor: Arc<UtilizationMonitor>,
    contingency: Arc<ContingencyAnalyzer>,
    fallback_cache: Arc<StaticStabilityCache>,
    coordinator: Arc<CrisisCoordinator>,
    swap_validator: Arc<SwapValidator>,
    lifecycle: Arc<SwapLifecycle>,
    executor: Arc<SwapExecutor>,
    conflict_queue: ConflictQueue,
    conflict_worker: tokio::sync::Mutex<ConflictWorker>,
    locks: WindowLockRegistry,
    clock: Arc<dyn Clock>,
    // 事件发布器（投递由外部协作方实现）
    event_publisher: OptionalEventPublisher,
}

impl SchedulingApi {
    /// 创建新的SchedulingApi实例
    ///
    /// # 参数
    /// - schedule_repo: 在线排班仓储
    /// - conn: 审计库共享连接（需已建表）
    /// - config: 引擎配置（先校验）
    /// - event_publisher: 事件发布器（可选）
    /// - clock: 时钟
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        conn: Arc<Mutex<Connection>>,
        config: EngineConfig,
        event_publisher: Option<Arc<dyn EngineEventPublisher>>,
        clock: Arc<dyn Clock>,
    ) -> ApiResult<Self> {
        config.validate()?;

        let event_publisher = match event_publisher {
            Some(p) => OptionalEventPublisher::with_publisher(p),
            None => OptionalEventPublisher::none(),
        };

        // ===== 仓储 =====
        let snapshot_repo = Arc::new(ScheduleSnapshotRepository::from_connection(conn.clone()));
        let defense_log = Arc::new(DefenseLogRepository::from_connection(conn.clone()));
        let swap_repo = Arc::new(SwapRepository::from_connection(conn.clone()));
        let vulnerability_repo = Arc::new(VulnerabilityReportRepository::from_connection(conn.clone()));
        let alert_repo = Arc::new(ConflictAlertRepository::from_connection(conn));

        // ===== 引擎 =====
        let locks = WindowLockRegistry::new();
        let swap_config = config.swap.clone();
        let defense = Arc::new(
            DefenseController::new(config.defense.clone())
                .with_log(defense_log)
                .with_publisher(event_publisher.clone()),
        );
        let contingency = Arc::new(ContingencyAnalyzer::new(config.contingency.clone()));
        let swap_validator = Arc::new(SwapValidator::new(swap_config.clone(), config.coupling_rules.clone()));
        let compliance = Arc::new(ComplianceValidator::new(config));
        let fallback_cache = Arc::new(StaticStabilityCache::new());

        let coordinator = Arc::new(
            CrisisCoordinator::new(
                schedule_repo.clone(),
                compliance.clone(),
                fallback_cache.clone(),
                locks.clone(),
            )?
            .with_archive(snapshot_repo.clone())
            .with_publisher(event_publisher.clone()),
        );

        let lifecycle = Arc::new(SwapLifecycle::new(swap_repo, event_publisher.clone()));
        let executor = Arc::new(SwapExecutor::new(
            schedule_repo.clone(),
            lifecycle.clone(),
            swap_validator.clone(),
            compliance.clone(),
            locks.clone(),
        ));

        let detector = Arc::new(ConflictDetector::new(
            alert_repo.clone(),
            event_publisher.clone(),
        ));
        let (conflict_queue, conflict_worker) = ConflictQueue::channel(
            swap_config.conflict_queue_capacity,
            swap_config.conflict_max_retries,
            detector,
            schedule_repo.clone(),
        );

        Ok(Self {
            schedule_repo,
            compliance,
            snapshot_repo,
            vulnerability_repo,
            alert_repo,
            defense,
            monitor: Arc::new(UtilizationMonitor::new()),
            contingency,
            fallback_cache,
            coordinator,
            swap_validator,
            lifecycle,
            executor,
            conflict_queue,
            conflict_worker: tokio::sync::Mutex::new(conflict_worker),
            locks,
            clock,
            event_publisher,
        })
    }

    /// 替换冲突检测 worker 的重试退避（测试用短退避）
    pub async fn set_conflict_backoff(&self, backoff: std::time::Duration) {
        self.conflict_worker.lock().await.set_backoff(backoff);
    }

    /// 当前生效的引擎配置
    pub fn config(&self) -> &EngineConfig {
        self.compliance.config()
    }

    pub fn window_locks(&self) -> &WindowLockRegistry {
        &self.locks
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }
}
