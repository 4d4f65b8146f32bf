// ==========================================
// 住院医师排班系统 - 合规校验器
// ==========================================
// 职责: 对任意排班重新检查全部约束,返回完整违规集合
// 红线: 不在首个违规处停止,不截断
// 红线: 违规是数据,不是错误
// ==========================================

use crate::config::EngineConfig;
use crate::constraints::capacity::{coverage_cells, coverage_rate};
use crate::constraints::{ConstraintCatalog, ConstraintContext};
use crate::domain::assignment::Assignment;
use crate::domain::calendar::{DateRange, SlotKey};
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::types::ViolationKind;
use crate::domain::violation::{count_hard, Violation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::instrument;

// ==========================================
// ValidationReport - 校验结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub window: DateRange,
    pub violations: Vec<Violation>,
    pub hard_count: usize,
    pub soft_count: usize,
    /// 有效覆盖席位 / 需求席位
    pub coverage_rate: f64,
    /// 软约束加权目标值
    pub objective: f64,
}

impl ValidationReport {
    pub fn is_compliant(&self) -> bool {
        self.hard_count == 0
    }

    pub fn hard_violations(&self) -> Vec<&Violation> {
        self.violations.iter().filter(|v| v.is_hard()).collect()
    }

    pub fn count_of(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}

// ==========================================
// ComplianceValidator - 合规校验器
// ==========================================
pub struct ComplianceValidator {
    config: EngineConfig,
    catalog: ConstraintCatalog,
}

impl ComplianceValidator {
    pub fn new(config: EngineConfig) -> Self {
        let catalog = ConstraintCatalog::from_config(&config);
        Self { config, catalog }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ConstraintCatalog {
        &self.catalog
    }

    /// 校验快照自带的分配
    pub fn validate(&self, snapshot: &DomainSnapshot, window: DateRange) -> ValidationReport {
        self.validate_assignments(snapshot, &snapshot.assignments, window)
    }

    /// 校验候选分配
    #[instrument(skip(self, snapshot, assignments, window), fields(
        program_id = %snapshot.program_id,
        window = %window,
        assignments = assignments.len()
    ))]
    pub fn validate_assignments(
        &self,
        snapshot: &DomainSnapshot,
        assignments: &[Assignment],
        window: DateRange,
    ) -> ValidationReport {
        let ctx = ConstraintContext::with_assignments(snapshot, assignments, window, &self.config);
        let violations = self.catalog.check_all(&ctx);
        let objective = violations
            .iter()
            .filter(|v| !v.is_hard())
            .map(|v| self.soft_weight(v.kind) * v.penalty)
            .sum();
        let hard_count = count_hard(&violations);
        let cells = coverage_cells(&ctx);

        let report = ValidationReport {
            window,
            hard_count,
            soft_count: violations.len() - hard_count,
            coverage_rate: coverage_rate(&cells),
            objective,
            violations,
        };

        tracing::debug!(
            hard = report.hard_count,
            soft = report.soft_count,
            coverage_rate = report.coverage_rate,
            "合规校验完成"
        );
        report
    }

    /// 仅硬约束违规（求解器内部使用,跳过软约束计算）
    pub fn hard_violations(
        &self,
        snapshot: &DomainSnapshot,
        assignments: &[Assignment],
        window: DateRange,
    ) -> Vec<Violation> {
        let ctx = ConstraintContext::with_assignments(snapshot, assignments, window, &self.config);
        self.catalog.check_hard(&ctx)
    }

    /// 软约束目标值
    pub fn objective(&self, snapshot: &DomainSnapshot, assignments: &[Assignment], window: DateRange) -> f64 {
        let ctx = ConstraintContext::with_assignments(snapshot, assignments, window, &self.config);
        self.catalog.objective(&ctx)
    }

    fn soft_weight(&self, kind: ViolationKind) -> f64 {
        let soft = &self.config.soft_constraints;
        match kind {
            ViolationKind::HubProtection => soft.hub_protection.weight,
            ViolationKind::UtilizationBuffer => soft.utilization_buffer.weight,
            ViolationKind::ZoneBoundary => soft.zone_boundary.weight,
            ViolationKind::PreferenceTrail => soft.preference_trail.weight,
            ViolationKind::N1Vulnerability => soft.n1_vulnerability.weight,
            _ => 1.0,
        }
    }
}

/// 违规指纹（用于前后对比）
fn fingerprint(v: &Violation) -> (ViolationKind, Option<String>, Option<SlotKey>, Option<String>, String) {
    (
        v.kind,
        v.person_id.clone(),
        v.slot,
        v.activity_id.clone(),
        v.message.clone(),
    )
}

/// 变更后新增的硬违规（变更前已存在的不计）
pub fn new_hard_violations(before: &[Violation], after: &[Violation]) -> Vec<Violation> {
    let existing: HashSet<_> = before.iter().filter(|v| v.is_hard()).map(fingerprint).collect();
    after
        .iter()
        .filter(|v| v.is_hard() && !existing.contains(&fingerprint(v)))
        .cloned()
        .collect()
}
