// ==========================================
// 住院医师排班系统 - 危机响应协调器
// ==========================================
// 升级响应:
// - < ORANGE: 不动作
// - >= ORANGE: 逐层削减并提交
// - 削减未达标且 >= RED: 危机算法限时重算 → 失败则启用兜底方案
// - 仍无解: 发布 CapacityExhausted,交由人工决策（不自动解除）
// 红线: 所有写操作在窗口写锁内完成
// ==========================================

use crate::config::CrisisConfig;
use crate::domain::assignment::Assignment;
use crate::domain::calendar::DateRange;
use crate::domain::types::{ActivityCategory, DefenseLevel, SnapshotStatus, SolveStatus};
use crate::engine::compliance::ComplianceValidator;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EngineEvent, EngineEventType, OptionalEventPublisher};
use crate::engine::window_lock::WindowLockRegistry;
use crate::repository::{NewScheduleSnapshot, ScheduleRepository, ScheduleSnapshotRepository};
use crate::resilience::sacrifice::{without_demand, LoadShedder, SacrificeHierarchy, ShedOutcome};
use crate::resilience::static_stability::StaticStabilityCache;
use crate::solver::{ScheduleSolver, SolveBudget};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// ==========================================
// CrisisResponse - 响应结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrisisResponse {
    NoAction,
    LoadShed {
        shed: ShedOutcome,
    },
    Regenerated {
        shed: ShedOutcome,
        status: SolveStatus,
        assignments: usize,
    },
    FallbackActivated {
        shed: ShedOutcome,
        scenario: String,
    },
    /// 需人工决策
    CapacityExhausted {
        shed: ShedOutcome,
        utilization: f64,
    },
}

impl CrisisResponse {
    pub fn name(&self) -> &'static str {
        match self {
            CrisisResponse::NoAction => "NO_ACTION",
            CrisisResponse::LoadShed { .. } => "LOAD_SHED",
            CrisisResponse::Regenerated { .. } => "REGENERATED",
            CrisisResponse::FallbackActivated { .. } => "FALLBACK_ACTIVATED",
            CrisisResponse::CapacityExhausted { .. } => "CAPACITY_EXHAUSTED",
        }
    }
}

// ==========================================
// CrisisCoordinator - 危机响应协调器
// ==========================================
pub struct CrisisCoordinator {
    schedule_repo: Arc<dyn ScheduleRepository>,
    validator: Arc<ComplianceValidator>,
    shedder: Arc<LoadShedder>,
    cache: Arc<StaticStabilityCache>,
    locks: WindowLockRegistry,
    crisis: CrisisConfig,
    node_limit: u64,
    archive: Option<Arc<ScheduleSnapshotRepository>>,
    publisher: OptionalEventPublisher,
}

impl CrisisCoordinator {
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        validator: Arc<ComplianceValidator>,
        cache: Arc<StaticStabilityCache>,
        locks: WindowLockRegistry,
    ) -> EngineResult<Self> {
        let config = validator.config();
        let hierarchy = SacrificeHierarchy::from_config(&config.shedding)?;
        let shedder = Arc::new(LoadShedder::new(hierarchy, config.defense.clone()));
        Ok(Self {
            crisis: config.crisis.clone(),
            node_limit: config.solver.cp_node_limit,
            schedule_repo,
            validator,
            shedder,
            cache,
            locks,
            archive: None,
            publisher: OptionalEventPublisher::none(),
        })
    }

    pub fn with_archive(mut self, archive: Arc<ScheduleSnapshotRepository>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_publisher(mut self, publisher: OptionalEventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// 按防御等级执行危机响应
    #[instrument(skip(self), fields(level = %level))]
    pub async fn respond(
        &self,
        program_id: &str,
        window: DateRange,
        level: DefenseLevel,
        at: NaiveDateTime,
    ) -> EngineResult<CrisisResponse> {
        if level < DefenseLevel::Orange {
            return Ok(CrisisResponse::NoAction);
        }

        let _guard = self.locks.acquire(program_id, window).await;
        let mut snapshot = self.schedule_repo.load_snapshot(program_id).await?;

        // ===== 1. 逐层削减 =====
        let shed = {
            let shedder = self.shedder.clone();
            let validator = self.validator.clone();
            let snapshot = snapshot.clone();
            let budget = SolveBudget::from_millis(self.crisis.regeneration_budget_ms, self.node_limit);
            tokio::task::spawn_blocking(move || shedder.shed(&snapshot, window, level, &validator, &budget, at))
                .await
                .map_err(|e| EngineError::Internal(format!("削减任务异常: {}", e)))?
        };

        if !shed.change_set.is_empty() {
            self.schedule_repo.apply_change_set(program_id, &shed.change_set).await?;
            shed.change_set.apply_to(&mut snapshot.assignments);
            self.publish(
                program_id,
                EngineEventType::LoadShed,
                window,
                at,
                serde_json::json!({
                    "level": level,
                    "removed": shed.change_set.removed.len(),
                    "added": shed.change_set.added.len(),
                    "utilization_before": shed.utilization_before,
                    "utilization_after": shed.utilization_after,
                }),
            );
        }

        if shed.resolved {
            info!(utilization = shed.utilization_after, "削减后利用率已达标");
            return Ok(CrisisResponse::LoadShed { shed });
        }

        if level < DefenseLevel::Red {
            return Ok(self.exhausted(program_id, window, at, shed));
        }

        // ===== 2. 危机算法限时重算 =====
        let shed_set: HashSet<ActivityCategory> = shed.shed_categories.iter().copied().collect();
        let working = without_demand(&snapshot, &shed_set);
        let outcome = {
            let validator = self.validator.clone();
            let algorithm = self.crisis.crisis_algorithm;
            let budget = SolveBudget::from_millis(self.crisis.regeneration_budget_ms, self.node_limit);
            tokio::task::spawn_blocking(move || {
                ScheduleSolver::new().generate(algorithm, &working, &validator, window, &budget)
            })
            .await
            .map_err(|e| EngineError::Internal(format!("重算任务异常: {}", e)))?
        };

        if outcome.status == SolveStatus::Success {
            let in_window: Vec<Assignment> = outcome
                .assignments
                .iter()
                .filter(|a| window.contains(a.slot.date))
                .cloned()
                .collect();
            self.schedule_repo
                .replace_window(program_id, window, in_window.clone())
                .await?;
            self.archive(
                program_id,
                window,
                SnapshotStatus::Accepted,
                self.crisis.crisis_algorithm.as_str(),
                &in_window,
                at,
            );
            info!(assignments = in_window.len(), "危机重算成功");
            return Ok(CrisisResponse::Regenerated {
                shed,
                status: outcome.status,
                assignments: in_window.len(),
            });
        }
        warn!(
            status = %outcome.status,
            hard = outcome.hard_violation_count(),
            "危机重算未得到可行排班"
        );

        // ===== 3. 兜底方案 =====
        let fallback = self
            .crisis
            .fallback_scenario
            .as_deref()
            .and_then(|scenario| self.cache.get(program_id, scenario));

        if let Some(fallback) = fallback {
            let in_window: Vec<Assignment> = fallback
                .assignments
                .iter()
                .filter(|a| window.contains(a.slot.date))
                .cloned()
                .collect();
            self.schedule_repo
                .replace_window(program_id, window, in_window.clone())
                .await?;
            self.archive(program_id, window, SnapshotStatus::Fallback, "FALLBACK", &in_window, at);
            self.publish(
                program_id,
                EngineEventType::FallbackActivated,
                window,
                at,
                serde_json::json!({
                    "scenario": fallback.scenario,
                    "computed_at": fallback.computed_at,
                    "assignments": in_window.len(),
                }),
            );
            warn!(scenario = %fallback.scenario, "已启用兜底方案");
            return Ok(CrisisResponse::FallbackActivated {
                shed,
                scenario: fallback.scenario,
            });
        }

        Ok(self.exhausted(program_id, window, at, shed))
    }

    fn exhausted(&self, program_id: &str, window: DateRange, at: NaiveDateTime, shed: ShedOutcome) -> CrisisResponse {
        let utilization = shed.utilization_after;
        error!(
            program_id = %program_id,
            utilization,
            "容量耗尽，需人工决策"
        );
        self.publish(
            program_id,
            EngineEventType::CapacityExhausted,
            window,
            at,
            serde_json::json!({
                "utilization": utilization,
                "target": shed.target_utilization,
                "shed_categories": shed.shed_categories,
            }),
        );
        CrisisResponse::CapacityExhausted { shed, utilization }
    }

    fn archive(
        &self,
        program_id: &str,
        window: DateRange,
        status: SnapshotStatus,
        algorithm: &str,
        assignments: &[Assignment],
        at: NaiveDateTime,
    ) {
        let Some(archive) = &self.archive else {
            return;
        };
        let result = archive.insert(NewScheduleSnapshot {
            program_id,
            status,
            window,
            algorithm,
            assignments,
            violations: &[],
            config_snapshot_json: None,
            created_at: at,
        });
        if let Err(e) = result {
            warn!(error = %e, "危机排班存档失败");
        }
    }

    fn publish(
        &self,
        program_id: &str,
        event_type: EngineEventType,
        window: DateRange,
        at: NaiveDateTime,
        payload: serde_json::Value,
    ) {
        self.publisher.publish_best_effort(
            EngineEvent::new(program_id, event_type, payload, at)
                .with_source("crisis_coordinator")
                .with_range(window),
        );
    }
}
