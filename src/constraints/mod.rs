// ==========================================
// 住院医师排班系统 - 约束目录
// ==========================================
// 职责: 硬约束/软约束规则对象,对候选排班求违规集合
// 红线: 每条规则报告每个人的每一处违规,不得截断
// 红线: 软约束默认全部启用
// ==========================================

pub mod acgme;
pub mod capacity;
pub mod resilience;

use crate::config::EngineConfig;
use crate::domain::activity::ActivityTemplate;
use crate::domain::assignment::Assignment;
use crate::domain::calendar::{DateRange, SlotKey};
use crate::domain::person::Person;
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::types::{AssignmentRole, Severity, ViolationKind};
use crate::domain::violation::Violation;
use std::collections::HashMap;

pub use acgme::{DutyHourCeiling, PostExtendedDutyRest, RestDayFrequency, SupervisionRatio};
pub use capacity::{
    coverage_cells, ActivityCapacity, Availability, CellCoverage, CoverageRequirement, DoubleBooking,
    Qualification, WorkloadCap,
};
pub use resilience::{HubProtection, N1Vulnerability, PreferenceTrail, UtilizationBuffer, ZoneBoundary};

// ==========================================
// ScheduleIndex - 分配索引
// ==========================================
// 一次构建,供所有规则共享
pub struct ScheduleIndex<'a> {
    pub people: HashMap<&'a str, &'a Person>,
    pub activities: HashMap<&'a str, &'a ActivityTemplate>,
    /// 人员 → 分配（按槽位排序）
    pub by_person: HashMap<&'a str, Vec<&'a Assignment>>,
    /// (槽位, 活动) → 分配
    pub by_cell: HashMap<(SlotKey, String), Vec<&'a Assignment>>,
    /// (槽位, 人员) → 分配
    pub by_person_slot: HashMap<(SlotKey, String), Vec<&'a Assignment>>,
}

impl<'a> ScheduleIndex<'a> {
    pub fn build(snapshot: &'a DomainSnapshot, assignments: &'a [Assignment]) -> Self {
        let people = snapshot.people.iter().map(|p| (p.person_id.as_str(), p)).collect();
        let activities = snapshot
            .activities
            .iter()
            .map(|a| (a.activity_id.as_str(), a))
            .collect();

        let mut by_person: HashMap<&str, Vec<&Assignment>> = HashMap::new();
        let mut by_cell: HashMap<(SlotKey, String), Vec<&Assignment>> = HashMap::new();
        let mut by_person_slot: HashMap<(SlotKey, String), Vec<&Assignment>> = HashMap::new();
        for a in assignments {
            by_person.entry(a.person_id.as_str()).or_default().push(a);
            by_cell.entry((a.slot, a.activity_id.clone())).or_default().push(a);
            by_person_slot.entry((a.slot, a.person_id.clone())).or_default().push(a);
        }
        for list in by_person.values_mut() {
            list.sort_by_key(|a| a.slot);
        }

        Self {
            people,
            activities,
            by_person,
            by_cell,
            by_person_slot,
        }
    }

    /// 分配计入的工时（BACKUP 不计工时）
    pub fn duty_hours(&self, assignment: &Assignment) -> f64 {
        if assignment.role == AssignmentRole::Backup {
            return 0.0;
        }
        self.activities
            .get(assignment.activity_id.as_str())
            .map(|a| a.duty_hours)
            .unwrap_or(0.0)
    }

    pub fn person_assignments(&self, person_id: &str) -> &[&'a Assignment] {
        self.by_person.get(person_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn cell_assignments(&self, slot: SlotKey, activity_id: &str) -> &[&'a Assignment] {
        self.by_cell
            .get(&(slot, activity_id.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn person_slot_assignments(&self, slot: SlotKey, person_id: &str) -> &[&'a Assignment] {
        self.by_person_slot
            .get(&(slot, person_id.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

// ==========================================
// ConstraintContext - 约束求值上下文
// ==========================================
pub struct ConstraintContext<'a> {
    pub snapshot: &'a DomainSnapshot,
    pub assignments: &'a [Assignment],
    pub window: DateRange,
    pub config: &'a EngineConfig,
    pub index: ScheduleIndex<'a>,
}

impl<'a> ConstraintContext<'a> {
    /// 以快照自带的分配构建上下文
    pub fn new(snapshot: &'a DomainSnapshot, window: DateRange, config: &'a EngineConfig) -> Self {
        Self::with_assignments(snapshot, &snapshot.assignments, window, config)
    }

    /// 以候选分配构建上下文（快照其余部分不变）
    pub fn with_assignments(
        snapshot: &'a DomainSnapshot,
        assignments: &'a [Assignment],
        window: DateRange,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            snapshot,
            assignments,
            window,
            config,
            index: ScheduleIndex::build(snapshot, assignments),
        }
    }

    /// 窗口内的分配
    pub fn window_assignments(&self) -> impl Iterator<Item = &'a Assignment> + '_ {
        let window = self.window;
        self.assignments.iter().filter(move |a| window.contains(a.slot.date))
    }
}

// ==========================================
// ScheduleConstraint Trait
// ==========================================
pub trait ScheduleConstraint: Send + Sync {
    fn kind(&self) -> ViolationKind;

    fn severity(&self) -> Severity;

    /// 软约束权重（硬约束固定为 1.0）
    fn weight(&self) -> f64 {
        1.0
    }

    /// 适用性判断（不适用时跳过检查）
    fn applies_to(&self, _ctx: &ConstraintContext) -> bool {
        true
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation>;
}

// ==========================================
// ConstraintCatalog - 约束目录
// ==========================================
pub struct ConstraintCatalog {
    constraints: Vec<Box<dyn ScheduleConstraint>>,
}

impl ConstraintCatalog {
    pub fn empty() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    /// 按配置构建完整目录
    ///
    /// 硬约束始终全部加载;软约束按设置启用（默认全部启用）
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut catalog = Self::empty();

        // ===== 硬约束 =====
        catalog.register(Box::new(DutyHourCeiling));
        catalog.register(Box::new(RestDayFrequency));
        catalog.register(Box::new(SupervisionRatio));
        catalog.register(Box::new(PostExtendedDutyRest));
        catalog.register(Box::new(Availability));
        catalog.register(Box::new(DoubleBooking));
        catalog.register(Box::new(Qualification));
        catalog.register(Box::new(ActivityCapacity));
        catalog.register(Box::new(CoverageRequirement));
        catalog.register(Box::new(WorkloadCap));

        // ===== 软约束 =====
        let soft = &config.soft_constraints;
        if soft.hub_protection.enabled {
            catalog.register(Box::new(HubProtection {
                weight: soft.hub_protection.weight,
                top_k: soft.hub_top_k,
                load_cap: soft.hub_load_cap,
            }));
        }
        if soft.utilization_buffer.enabled {
            catalog.register(Box::new(UtilizationBuffer {
                weight: soft.utilization_buffer.weight,
                target: soft.buffer_target,
            }));
        }
        if soft.zone_boundary.enabled {
            catalog.register(Box::new(ZoneBoundary {
                weight: soft.zone_boundary.weight,
            }));
        }
        if soft.preference_trail.enabled {
            catalog.register(Box::new(PreferenceTrail {
                weight: soft.preference_trail.weight,
            }));
        }
        if soft.n1_vulnerability.enabled {
            catalog.register(Box::new(N1Vulnerability {
                weight: soft.n1_vulnerability.weight,
            }));
        }

        catalog
    }

    pub fn register(&mut self, constraint: Box<dyn ScheduleConstraint>) {
        self.constraints.push(constraint);
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn kinds(&self) -> Vec<ViolationKind> {
        self.constraints.iter().map(|c| c.kind()).collect()
    }

    pub fn is_enabled(&self, kind: ViolationKind) -> bool {
        self.constraints.iter().any(|c| c.kind() == kind)
    }

    /// 全部约束的违规（硬 + 软）
    pub fn check_all(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        self.check_where(ctx, |_| true)
    }

    /// 仅硬约束违规
    pub fn check_hard(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        self.check_where(ctx, |c| c.severity() == Severity::Hard)
    }

    /// 软约束加权目标值（越小越好）
    pub fn objective(&self, ctx: &ConstraintContext) -> f64 {
        self.constraints
            .iter()
            .filter(|c| c.severity() == Severity::Soft && c.applies_to(ctx))
            .map(|c| c.weight() * c.check(ctx).iter().map(|v| v.penalty).sum::<f64>())
            .sum()
    }

    fn check_where<F>(&self, ctx: &ConstraintContext, filter: F) -> Vec<Violation>
    where
        F: Fn(&dyn ScheduleConstraint) -> bool,
    {
        let mut violations = Vec::new();
        for constraint in &self.constraints {
            if !filter(constraint.as_ref()) || !constraint.applies_to(ctx) {
                continue;
            }
            violations.extend(constraint.check(ctx));
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_defaults_enable_all_soft() {
        let catalog = ConstraintCatalog::from_config(&EngineConfig::default());
        assert_eq!(catalog.len(), 15);
        for kind in [
            ViolationKind::HubProtection,
            ViolationKind::UtilizationBuffer,
            ViolationKind::ZoneBoundary,
            ViolationKind::PreferenceTrail,
            ViolationKind::N1Vulnerability,
        ] {
            assert!(catalog.is_enabled(kind), "{} 应默认启用", kind);
        }
    }

    #[test]
    fn test_catalog_respects_audited_disable() {
        let mut config = EngineConfig::default();
        config.soft_constraints.zone_boundary.enabled = false;
        config.soft_constraints.zone_boundary.override_reason = Some("单院区".to_string());
        config.soft_constraints.zone_boundary.override_by = Some("chief".to_string());
        let catalog = ConstraintCatalog::from_config(&config);
        assert!(!catalog.is_enabled(ViolationKind::ZoneBoundary));
        assert!(catalog.is_enabled(ViolationKind::DutyHourCeiling));
    }
}
