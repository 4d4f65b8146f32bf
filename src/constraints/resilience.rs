// ==========================================
// 住院医师排班系统 - 韧性软约束
// ==========================================
// 每条软约束贡献加权目标项,不阻断排班接受
// 红线: 默认全部启用（见 SoftConstraintSettings）
// ==========================================

use crate::constraints::capacity::coverage_cells;
use crate::constraints::{ConstraintContext, ScheduleConstraint};
use crate::domain::person::Person;
use crate::domain::types::{AssignmentRole, Severity, ViolationKind};
use crate::domain::violation::Violation;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// 窗口内可用工时（按周可用工时折算）
fn window_capacity_hours(ctx: &ConstraintContext, person: &Person) -> f64 {
    person.weekly_capacity_hours(ctx.config.compliance.default_weekly_capacity_hours) * ctx.window.days() as f64
        / 7.0
}

/// 窗口内已分配工时
fn window_load_hours(ctx: &ConstraintContext, person_id: &str) -> f64 {
    ctx.index
        .person_assignments(person_id)
        .iter()
        .filter(|a| ctx.window.contains(a.slot.date))
        .map(|a| ctx.index.duty_hours(a))
        .sum()
}

// ==========================================
// HubProtection - 枢纽人员保护
// ==========================================
// 枢纽: 具备最多关键活动资格的 top_k 人
// 惩罚: 枢纽工时超过 load_cap × 可用工时的部分（小时）
pub struct HubProtection {
    pub weight: f64,
    pub top_k: usize,
    pub load_cap: f64,
}

impl HubProtection {
    pub fn hubs<'a>(&self, ctx: &ConstraintContext<'a>) -> Vec<&'a Person> {
        let critical: Vec<_> = ctx.snapshot.activities.iter().filter(|a| a.is_critical()).collect();
        let mut ranked: Vec<(&Person, usize)> = ctx
            .snapshot
            .people
            .iter()
            .map(|p| (p, critical.iter().filter(|a| a.is_qualified(p)).count()))
            .filter(|(_, n)| *n > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.person_id.cmp(&b.0.person_id)));
        ranked.into_iter().take(self.top_k).map(|(p, _)| p).collect()
    }
}

impl ScheduleConstraint for HubProtection {
    fn kind(&self) -> ViolationKind {
        ViolationKind::HubProtection
    }

    fn severity(&self) -> Severity {
        Severity::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn applies_to(&self, ctx: &ConstraintContext) -> bool {
        self.top_k > 0 && ctx.snapshot.activities.iter().any(|a| a.is_critical())
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        self.hubs(ctx)
            .into_iter()
            .filter_map(|hub| {
                let cap = self.load_cap * window_capacity_hours(ctx, hub);
                let load = window_load_hours(ctx, &hub.person_id);
                (load > cap + 1e-6).then(|| {
                    Violation::soft(
                        ViolationKind::HubProtection,
                        load - cap,
                        format!(
                            "枢纽人员 {} 工时 {:.1}h 超过保护线 {:.1}h",
                            hub.person_id, load, cap
                        ),
                    )
                    .with_person(&hub.person_id)
                })
            })
            .collect()
    }
}

// ==========================================
// UtilizationBuffer - 个人利用率缓冲
// ==========================================
pub struct UtilizationBuffer {
    pub weight: f64,
    pub target: f64,
}

impl ScheduleConstraint for UtilizationBuffer {
    fn kind(&self) -> ViolationKind {
        ViolationKind::UtilizationBuffer
    }

    fn severity(&self) -> Severity {
        Severity::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        ctx.snapshot
            .people
            .iter()
            .filter_map(|p| {
                let capacity = window_capacity_hours(ctx, p);
                if capacity <= 0.0 {
                    return None;
                }
                let utilization = window_load_hours(ctx, &p.person_id) / capacity;
                (utilization > self.target + 1e-9).then(|| {
                    Violation::soft(
                        ViolationKind::UtilizationBuffer,
                        (utilization - self.target) * 10.0,
                        format!(
                            "{} 利用率 {:.0}% 超过缓冲目标 {:.0}%",
                            p.person_id,
                            utilization * 100.0,
                            self.target * 100.0
                        ),
                    )
                    .with_person(&p.person_id)
                })
            })
            .collect()
    }
}

// ==========================================
// ZoneBoundary - 院区边界
// ==========================================
// 同一天跨多个院区,每多一个院区惩罚 1
pub struct ZoneBoundary {
    pub weight: f64,
}

impl ScheduleConstraint for ZoneBoundary {
    fn kind(&self) -> ViolationKind {
        ViolationKind::ZoneBoundary
    }

    fn severity(&self) -> Severity {
        Severity::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn applies_to(&self, ctx: &ConstraintContext) -> bool {
        ctx.snapshot.activities.iter().any(|a| a.zone.is_some())
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let mut zones: BTreeMap<(&str, NaiveDate), BTreeSet<&str>> = BTreeMap::new();
        for a in ctx.window_assignments() {
            if let Some(zone) = ctx
                .index
                .activities
                .get(a.activity_id.as_str())
                .and_then(|t| t.zone.as_deref())
            {
                zones
                    .entry((a.person_id.as_str(), a.slot.date))
                    .or_default()
                    .insert(zone);
            }
        }

        zones
            .into_iter()
            .filter(|(_, set)| set.len() > 1)
            .map(|((person_id, date), set)| {
                Violation::soft(
                    ViolationKind::ZoneBoundary,
                    (set.len() - 1) as f64,
                    format!("{} 在 {} 跨院区 {:?}", person_id, date, set),
                )
                .with_person(person_id)
            })
            .collect()
    }
}

// ==========================================
// PreferenceTrail - 个人偏好
// ==========================================
pub struct PreferenceTrail {
    pub weight: f64,
}

impl ScheduleConstraint for PreferenceTrail {
    fn kind(&self) -> ViolationKind {
        ViolationKind::PreferenceTrail
    }

    fn severity(&self) -> Severity {
        Severity::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let mut violations = Vec::new();
        for a in ctx.window_assignments() {
            let Some(person) = ctx.index.people.get(a.person_id.as_str()) else {
                continue;
            };
            let prefs = &person.preferences;
            if prefs.avoid_dates.contains(&a.slot.date) {
                violations.push(
                    Violation::soft(
                        ViolationKind::PreferenceTrail,
                        1.0,
                        format!("{} 被安排在回避日期 {}", a.person_id, a.slot.date),
                    )
                    .with_person(&a.person_id)
                    .with_slot(a.slot)
                    .with_activity(&a.activity_id),
                );
            } else if !prefs.preferred_activities.is_empty()
                && !prefs.preferred_activities.contains(&a.activity_id)
            {
                violations.push(
                    Violation::soft(
                        ViolationKind::PreferenceTrail,
                        0.25,
                        format!("{} 被安排在非偏好活动 {}", a.person_id, a.activity_id),
                    )
                    .with_person(&a.person_id)
                    .with_slot(a.slot)
                    .with_activity(&a.activity_id),
                );
            }
        }
        violations
    }
}

// ==========================================
// N1Vulnerability - 单点失效
// ==========================================
// 已覆盖的关键单元若同槽位没有任何空闲合格替补,惩罚 1
pub struct N1Vulnerability {
    pub weight: f64,
}

impl ScheduleConstraint for N1Vulnerability {
    fn kind(&self) -> ViolationKind {
        ViolationKind::N1Vulnerability
    }

    fn severity(&self) -> Severity {
        Severity::Soft
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn applies_to(&self, ctx: &ConstraintContext) -> bool {
        ctx.snapshot.activities.iter().any(|a| a.is_critical())
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let mut violations = Vec::new();
        for cell in coverage_cells(ctx)
            .into_iter()
            .filter(|c| c.critical && c.shortfall() == 0)
        {
            let Some(activity) = ctx.index.activities.get(cell.activity_id.as_str()) else {
                continue;
            };
            let has_spare = ctx.snapshot.people.iter().any(|p| {
                activity.is_qualified(p)
                    && ctx.snapshot.blocking_absence(&p.person_id, &cell.slot).is_none()
                    && ctx
                        .index
                        .person_slot_assignments(cell.slot, &p.person_id)
                        .iter()
                        .all(|a| a.role == AssignmentRole::Backup)
            });
            if !has_spare {
                violations.push(
                    Violation::soft(
                        ViolationKind::N1Vulnerability,
                        1.0,
                        format!("关键活动 {} {} 无空闲合格替补", cell.activity_id, cell.slot),
                    )
                    .with_slot(cell.slot)
                    .with_activity(&cell.activity_id),
                );
            }
        }
        violations
    }
}
