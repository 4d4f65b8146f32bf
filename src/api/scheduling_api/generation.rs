use super::*;

use crate::api::error::ApiError;
use crate::api::validator::{require_non_empty, validate_window};
use crate::domain::calendar::DateRange;
use crate::domain::resilience::{CrisisScenario, FallbackSchedule};
use crate::domain::types::SnapshotStatus;
use crate::engine::compliance::ValidationReport;
use crate::engine::error::EngineError;
use crate::engine::events::{EngineEvent, EngineEventType};
use crate::repository::{NewScheduleSnapshot, ScheduleSnapshotEntity};
use crate::solver::{ScheduleSolver, SolveBudget, SolverAlgorithm};
use futures::future::join_all;
use tracing::{info, warn};

impl SchedulingApi {
    // ==========================================
    // 排班生成与校验接口
    // ==========================================

    /// 生成排班
    ///
    /// # 参数
    /// - program_id: 项目ID
    /// - window: 时间窗口（含首尾）
    /// - algorithm: 求解算法（None = 配置默认值）
    /// - timeout_ms: 求解时限（None = 配置默认值）
    ///
    /// # 返回
    /// - SUCCESS: 存档 ACCEPTED 并替换在线排班窗口
    /// - PARTIAL: 存档 PARTIAL,在线排班不变
    /// - FAILED: 不存档,diagnostics.notes 给出原因
    pub async fn generate_schedule(
        &self,
        program_id: &str,
        window: DateRange,
        algorithm: Option<SolverAlgorithm>,
        timeout_ms: Option<u64>,
    ) -> ApiResult<GenerationResult> {
        require_non_empty("program_id", program_id)?;
        validate_window(&window)?;

        let solver_config = &self.config().solver;
        let algorithm = algorithm.unwrap_or(solver_config.default_algorithm);
        let budget = SolveBudget::from_millis(
            timeout_ms.unwrap_or(solver_config.default_timeout_ms),
            solver_config.cp_node_limit,
        );

        let guard = self.locks.acquire(program_id, window).await;
        let snapshot = self.schedule_repo.load_snapshot(program_id).await?;

        let outcome = {
            let compliance = self.compliance.clone();
            let snapshot = snapshot.clone();
            tokio::task::spawn_blocking(move || {
                ScheduleSolver::new().generate(algorithm, &snapshot, &compliance, window, &budget)
            })
            .await
            .map_err(|e| ApiError::InternalError(format!("求解任务异常: {}", e)))?
        };

        let in_window: Vec<Assignment> = outcome
            .assignments
            .iter()
            .filter(|a| window.contains(a.slot.date))
            .cloned()
            .collect();

        let (version, applied) = match outcome.status {
            SolveStatus::Failed => {
                warn!(program_id = %program_id, notes = ?outcome.diagnostics.notes, "排班生成失败");
                (None, false)
            }
            status => {
                let snapshot_status = if status == SolveStatus::Success {
                    SnapshotStatus::Accepted
                } else {
                    SnapshotStatus::Partial
                };
                let entity = self.snapshot_repo.insert(NewScheduleSnapshot {
                    program_id,
                    status: snapshot_status,
                    window,
                    algorithm: algorithm.as_str(),
                    assignments: &in_window,
                    violations: &outcome.violations,
                    config_snapshot_json: serde_json::to_string(self.config()).ok(),
                    created_at: self.now(),
                })?;

                let applied = status == SolveStatus::Success;
                if applied {
                    self.schedule_repo
                        .replace_window(program_id, window, in_window.clone())
                        .await?;
                }
                (Some(entity.version), applied)
            }
        };

        drop(guard);
        if applied {
            self.sample_after_mutation(program_id, "generation").await;
        }

        info!(
            program_id = %program_id,
            status = %outcome.status,
            version = ?version,
            applied,
            "排班生成完成"
        );

        self.event_publisher.publish_best_effort(
            EngineEvent::new(
                program_id,
                EngineEventType::ScheduleGenerated,
                serde_json::json!({
                    "status": outcome.status,
                    "algorithm": algorithm,
                    "version": version,
                    "applied": applied,
                    "hard_violations": outcome.hard_violation_count(),
                }),
                self.now(),
            )
            .with_source("scheduling_api")
            .with_range(window),
        );

        Ok(GenerationResult {
            program_id: program_id.to_string(),
            status: outcome.status,
            version,
            applied,
            assignments: in_window,
            violations: outcome.violations,
            diagnostics: outcome.diagnostics,
        })
    }

    /// 校验在线排班
    ///
    /// # 返回
    /// 完整违规集合与覆盖率（同一排班重复调用结果一致）
    pub async fn validate_schedule(&self, program_id: &str, window: DateRange) -> ApiResult<ValidationReport> {
        require_non_empty("program_id", program_id)?;
        validate_window(&window)?;

        let snapshot = self.schedule_repo.load_snapshot(program_id).await?;
        if let Err(problems) = snapshot.check_integrity() {
            return Err(EngineError::MalformedDomain(problems).into());
        }
        Ok(self.compliance.validate(&snapshot, window))
    }

    /// 查询排班存档版本
    pub fn list_schedule_versions(&self, program_id: &str) -> ApiResult<Vec<ScheduleSnapshotEntity>> {
        require_non_empty("program_id", program_id)?;
        Ok(self.snapshot_repo.list_by_program(program_id)?)
    }

    // ==========================================
    // 静态稳定兜底方案
    // ==========================================

    /// 预计算场景兜底方案（危机时直接启用）
    pub async fn precompute_fallback(
        &self,
        program_id: &str,
        window: DateRange,
        scenario: CrisisScenario,
    ) -> ApiResult<FallbackSchedule> {
        require_non_empty("program_id", program_id)?;
        require_non_empty("scenario", &scenario.name)?;
        validate_window(&window)?;

        let snapshot = self.schedule_repo.load_snapshot(program_id).await?;
        let solver_config = &self.config().solver;
        let algorithm = solver_config.default_algorithm;
        let budget = SolveBudget::from_millis(solver_config.default_timeout_ms, solver_config.cp_node_limit);
        let at = self.now();

        let cache = self.fallback_cache.clone();
        let compliance = self.compliance.clone();
        let fallback = tokio::task::spawn_blocking(move || {
            cache.precompute(&snapshot, window, &scenario, algorithm, &compliance, &budget, at)
        })
        .await
        .map_err(|e| ApiError::InternalError(format!("兜底方案任务异常: {}", e)))??;

        Ok(fallback)
    }

    /// 并发预计算多个场景的兜底方案
    ///
    /// # 返回
    /// 每个场景的结果（顺序与输入一致,单个失败不影响其余场景）
    pub async fn precompute_fallbacks(
        &self,
        program_id: &str,
        window: DateRange,
        scenarios: Vec<CrisisScenario>,
    ) -> Vec<(String, ApiResult<FallbackSchedule>)> {
        let names: Vec<String> = scenarios.iter().map(|s| s.name.clone()).collect();
        let results = join_all(
            scenarios
                .into_iter()
                .map(|scenario| self.precompute_fallback(program_id, window, scenario)),
        )
        .await;
        names.into_iter().zip(results).collect()
    }

    /// 已缓存的兜底场景
    pub fn fallback_scenarios(&self, program_id: &str) -> Vec<String> {
        self.fallback_cache.scenarios(program_id)
    }
}
