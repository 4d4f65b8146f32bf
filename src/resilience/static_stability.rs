// ==========================================
// 住院医师排班系统 - 静态稳定兜底缓存
// ==========================================
// 职责: 按危机场景预计算兜底排班,危机时整体激活
// 预计算: 场景缺岗人员以合成阻断缺勤屏蔽,其窗口内分配移除后求解
// 红线: FAILED 结果不入缓存
// ==========================================

use crate::domain::absence::Absence;
use crate::domain::calendar::DateRange;
use crate::domain::resilience::{CrisisScenario, FallbackSchedule};
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::types::SolveStatus;
use crate::engine::compliance::ComplianceValidator;
use crate::engine::error::{EngineError, EngineResult};
use crate::solver::{ScheduleSolver, SolveBudget, SolverAlgorithm};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{info, instrument, warn};

type CacheKey = (String, String); // (program_id, scenario)

#[derive(Debug, Default)]
pub struct StaticStabilityCache {
    entries: RwLock<HashMap<CacheKey, FallbackSchedule>>,
}

impl StaticStabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预计算并缓存场景兜底方案
    ///
    /// # 返回
    /// 缓存的兜底方案; 求解 FAILED 时返回 Internal 错误,缓存不变
    #[instrument(skip(self, snapshot, scenario, validator, budget), fields(
        program_id = %snapshot.program_id,
        scenario = %scenario.name
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn precompute(
        &self,
        snapshot: &DomainSnapshot,
        window: DateRange,
        scenario: &CrisisScenario,
        algorithm: SolverAlgorithm,
        validator: &ComplianceValidator,
        budget: &SolveBudget,
        at: NaiveDateTime,
    ) -> EngineResult<FallbackSchedule> {
        let degraded = scenario_snapshot(snapshot, window, scenario);
        let outcome = ScheduleSolver::new().generate(algorithm, &degraded, validator, window, budget);
        if outcome.status == SolveStatus::Failed {
            warn!(notes = ?outcome.diagnostics.notes, "兜底方案求解失败");
            return Err(EngineError::Internal(format!(
                "场景 {} 兜底方案求解失败",
                scenario.name
            )));
        }

        let fallback = FallbackSchedule {
            scenario: scenario.name.clone(),
            program_id: snapshot.program_id.clone(),
            window,
            assignments: outcome
                .assignments
                .into_iter()
                .filter(|a| window.contains(a.slot.date))
                .collect(),
            computed_at: at,
        };

        info!(
            status = %outcome.status,
            assignments = fallback.assignments.len(),
            "兜底方案已缓存"
        );

        let mut entries = self
            .entries
            .write()
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        entries.insert(
            (snapshot.program_id.clone(), scenario.name.clone()),
            fallback.clone(),
        );
        Ok(fallback)
    }

    pub fn get(&self, program_id: &str, scenario: &str) -> Option<FallbackSchedule> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(program_id.to_string(), scenario.to_string()))
            .cloned()
    }

    /// 已缓存场景名（排序）
    pub fn scenarios(&self, program_id: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = entries
            .keys()
            .filter(|(p, _)| p == program_id)
            .map(|(_, s)| s.clone())
            .collect();
        names.sort();
        names
    }
}

/// 场景快照: 缺岗人员整窗阻断,其窗口内分配移除
pub fn scenario_snapshot(snapshot: &DomainSnapshot, window: DateRange, scenario: &CrisisScenario) -> DomainSnapshot {
    let absent: HashSet<&str> = scenario.absent_person_ids.iter().map(String::as_str).collect();
    let mut degraded = snapshot.with_assignments(
        snapshot
            .assignments
            .iter()
            .filter(|a| !(absent.contains(a.person_id.as_str()) && window.contains(a.slot.date)))
            .cloned()
            .collect(),
    );
    for person_id in &scenario.absent_person_ids {
        if snapshot.person(person_id).is_none() {
            continue;
        }
        degraded.absences.push(Absence {
            absence_id: format!("scenario:{}:{}", scenario.name, person_id),
            person_id: person_id.clone(),
            start_date: window.start,
            end_date: window.end,
            absence_type: "CRISIS_SCENARIO".to_string(),
            blocking: true,
            revision: 0,
        });
    }
    degraded
}
