// ==========================================
// 住院医师排班系统 - 牺牲层级与负载削减
// ==========================================
// 层级: sacrifice_order 从"永不牺牲"到"最先削减"
// 流程: 从最末层开始逐层移除窗口内分配 → 释放容量
//       → 贪心重算（已削减活动需求归零）→ 直到利用率低于当前等级阈值
// 红线:
// - 受保护层（前 protected_tiers 层）永不削减
// - 高层级在低层级仍有分配时不得削减
// - 手工覆盖分配默认不削减
// ==========================================

use crate::config::{DefenseConfig, SheddingConfig};
use crate::domain::assignment::{Assignment, AssignmentChangeSet};
use crate::domain::calendar::DateRange;
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::types::{ActivityCategory, DefenseLevel, SolveStatus};
use crate::engine::compliance::ComplianceValidator;
use crate::engine::error::{EngineError, EngineResult};
use crate::resilience::utilization::measure;
use crate::solver::{ScheduleSolver, SolveBudget, SolverAlgorithm};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

// ==========================================
// SacrificeHierarchy - 牺牲层级
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct SacrificeHierarchy {
    order: Vec<ActivityCategory>,
    protected_tiers: usize,
    shed_manual_overrides: bool,
}

impl SacrificeHierarchy {
    /// 校验: 每个类别恰好出现一次,受保护层数不超过总层数
    pub fn from_config(config: &SheddingConfig) -> EngineResult<Self> {
        let mut seen = HashSet::new();
        for category in &config.sacrifice_order {
            if !seen.insert(*category) {
                return Err(EngineError::Config(format!(
                    "牺牲层级中类别重复: {}",
                    category.as_str()
                )));
            }
        }
        if let Some(missing) = ActivityCategory::all().into_iter().find(|c| !seen.contains(c)) {
            return Err(EngineError::Config(format!(
                "牺牲层级缺少类别: {}",
                missing.as_str()
            )));
        }
        if config.protected_tiers > config.sacrifice_order.len() {
            return Err(EngineError::Config(format!(
                "protected_tiers={} 超过层级数 {}",
                config.protected_tiers,
                config.sacrifice_order.len()
            )));
        }
        Ok(Self {
            order: config.sacrifice_order.clone(),
            protected_tiers: config.protected_tiers,
            shed_manual_overrides: config.shed_manual_overrides,
        })
    }

    pub fn order(&self) -> &[ActivityCategory] {
        &self.order
    }

    /// 层级序号（0 = 最不可牺牲）
    pub fn tier_of(&self, category: ActivityCategory) -> usize {
        self.order
            .iter()
            .position(|c| *c == category)
            .unwrap_or(0)
    }

    pub fn is_protected(&self, category: ActivityCategory) -> bool {
        self.tier_of(category) < self.protected_tiers
    }

    /// 可削减层级,按削减顺序（最末层在前）
    pub fn shed_sequence(&self) -> impl Iterator<Item = (usize, ActivityCategory)> + '_ {
        self.order
            .iter()
            .copied()
            .enumerate()
            .skip(self.protected_tiers)
            .rev()
    }
}

// ==========================================
// 削减结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShedStep {
    pub tier: usize,
    pub category: ActivityCategory,
    pub removed: usize,
    /// 重算新增分配数
    pub refilled: usize,
    pub utilization_after: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShedOutcome {
    pub level: DefenseLevel,
    pub target_utilization: f64,
    pub utilization_before: f64,
    pub utilization_after: f64,
    pub steps: Vec<ShedStep>,
    /// 已削减（需求归零）的全部类别,含无分配的层级
    pub shed_categories: Vec<ActivityCategory>,
    /// 相对在线排班的净变更
    pub change_set: AssignmentChangeSet,
    /// 利用率已降至阈值以下
    pub resolved: bool,
}

// ==========================================
// LoadShedder - 负载削减器
// ==========================================
pub struct LoadShedder {
    hierarchy: SacrificeHierarchy,
    defense: DefenseConfig,
}

impl LoadShedder {
    pub fn new(hierarchy: SacrificeHierarchy, defense: DefenseConfig) -> Self {
        Self { hierarchy, defense }
    }

    pub fn hierarchy(&self) -> &SacrificeHierarchy {
        &self.hierarchy
    }

    /// 执行逐层削减（只计算,不提交）
    #[instrument(skip(self, snapshot, validator, budget), fields(program_id = %snapshot.program_id, level = %level))]
    pub fn shed(
        &self,
        snapshot: &DomainSnapshot,
        window: DateRange,
        level: DefenseLevel,
        validator: &ComplianceValidator,
        budget: &SolveBudget,
        at: NaiveDateTime,
    ) -> ShedOutcome {
        let config = validator.config();
        let target = self.defense.lower_bound(level);
        let before = measure(snapshot, window, config, 0, at).utilization;

        let category_of: HashMap<&str, ActivityCategory> = snapshot
            .activities
            .iter()
            .map(|a| (a.activity_id.as_str(), a.category))
            .collect();
        let original_ids: HashSet<&str> = snapshot
            .assignments
            .iter()
            .map(|a| a.assignment_id.as_str())
            .collect();

        let mut current: Vec<Assignment> = snapshot.assignments.clone();
        let mut shed: HashSet<ActivityCategory> = HashSet::new();
        let mut shed_order = Vec::new();
        let mut steps = Vec::new();
        let mut utilization = before;

        for (tier, category) in self.hierarchy.shed_sequence() {
            if utilization < target {
                break;
            }

            let (dropped, kept): (Vec<Assignment>, Vec<Assignment>) = current.into_iter().partition(|a| {
                window.contains(a.slot.date)
                    && category_of.get(a.activity_id.as_str()) == Some(&category)
                    && (self.hierarchy.shed_manual_overrides || !a.is_override)
            });
            current = kept;
            shed.insert(category);
            shed_order.push(category);

            if dropped.is_empty() {
                debug!(tier, category = category.as_str(), "层级无可削减分配");
                continue;
            }

            let before_refill = current.len();
            current = self.refill(snapshot, window, &current, &shed, validator, budget);
            let refilled = current.len().saturating_sub(before_refill);

            utilization = measure(&snapshot.with_assignments(current.clone()), window, config, 0, at).utilization;
            info!(
                tier,
                category = category.as_str(),
                removed = dropped.len(),
                refilled,
                utilization,
                "削减层级"
            );
            steps.push(ShedStep {
                tier,
                category,
                removed: dropped.len(),
                refilled,
                utilization_after: utilization,
            });
        }

        let resolved = utilization < target;
        if !resolved {
            warn!(utilization, target, "可削减层级已用尽，利用率仍高于阈值");
        }

        let current_ids: HashSet<&str> = current.iter().map(|a| a.assignment_id.as_str()).collect();
        let change_set = AssignmentChangeSet {
            removed: snapshot
                .assignments
                .iter()
                .filter(|a| !current_ids.contains(a.assignment_id.as_str()))
                .cloned()
                .collect(),
            added: current
                .iter()
                .filter(|a| !original_ids.contains(a.assignment_id.as_str()))
                .cloned()
                .collect(),
        };

        ShedOutcome {
            level,
            target_utilization: target,
            utilization_before: before,
            utilization_after: utilization,
            steps,
            shed_categories: shed_order,
            change_set,
            resolved,
        }
    }

    /// 贪心重算: 已削减活动需求归零,窗口内保留分配固定不动
    fn refill(
        &self,
        snapshot: &DomainSnapshot,
        window: DateRange,
        current: &[Assignment],
        shed: &HashSet<ActivityCategory>,
        validator: &ComplianceValidator,
        budget: &SolveBudget,
    ) -> Vec<Assignment> {
        let fixed: Vec<Assignment> = current
            .iter()
            .cloned()
            .map(|mut a| {
                a.is_override = true;
                a
            })
            .collect();
        let working = without_demand(&snapshot.with_assignments(fixed), shed);

        let outcome = ScheduleSolver::new().generate(SolverAlgorithm::Greedy, &working, validator, window, budget);
        if outcome.status == SolveStatus::Failed {
            warn!("削减后重算失败，保留削减结果");
            return current.to_vec();
        }

        let overrides: HashMap<&str, bool> = current
            .iter()
            .map(|a| (a.assignment_id.as_str(), a.is_override))
            .collect();
        outcome
            .assignments
            .into_iter()
            .map(|mut a| {
                a.is_override = overrides.get(a.assignment_id.as_str()).copied().unwrap_or(false);
                a
            })
            .collect()
    }
}

/// 指定类别活动需求归零（危机期间不再排入）
pub fn without_demand(snapshot: &DomainSnapshot, categories: &HashSet<ActivityCategory>) -> DomainSnapshot {
    let mut working = snapshot.clone();
    for activity in working.activities.iter_mut() {
        if categories.contains(&activity.category) {
            activity.required_per_slot = 0;
        }
    }
    working
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_rejects_duplicates_and_gaps() {
        let mut config = SheddingConfig::default();
        config.sacrifice_order.push(ActivityCategory::Research);
        assert!(matches!(
            SacrificeHierarchy::from_config(&config),
            Err(EngineError::Config(_))
        ));

        let mut config = SheddingConfig::default();
        config.sacrifice_order.retain(|c| *c != ActivityCategory::Research);
        assert!(SacrificeHierarchy::from_config(&config).is_err());

        let mut config = SheddingConfig::default();
        config.protected_tiers = 8;
        assert!(SacrificeHierarchy::from_config(&config).is_err());
    }

    #[test]
    fn test_shed_sequence_skips_protected_tiers() {
        let hierarchy = SacrificeHierarchy::from_config(&SheddingConfig::default()).unwrap();
        let sequence: Vec<ActivityCategory> = hierarchy.shed_sequence().map(|(_, c)| c).collect();
        assert_eq!(sequence.first(), Some(&ActivityCategory::OptionalEducation));
        assert_eq!(sequence.last(), Some(&ActivityCategory::Accreditation));
        assert!(!sequence.contains(&ActivityCategory::PatientSafety));
        assert!(hierarchy.is_protected(ActivityCategory::PatientSafety));
        assert!(!hierarchy.is_protected(ActivityCategory::Research));
    }
}
