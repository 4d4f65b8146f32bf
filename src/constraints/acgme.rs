// ==========================================
// 住院医师排班系统 - 监管硬约束
// ==========================================
// 规则:
// 1) 滚动窗口周平均工时上限（默认 28 天内平均 80h/周）
// 2) 滚动窗口最少休息日（默认 28 天内 4 天）
// 3) 监督比例下限（按 PGY-1 / PGY-2+ 分别折算）
// 4) 延长值班后强制休息（默认 2 个时段）
// ==========================================
// 窗口规则: 评估区间长度 L >= W 时取区间内全部 W 天滑动窗口;
//          否则整个区间为单一窗口,限额按 L/W 折算
// ==========================================

use crate::constraints::{ConstraintContext, ScheduleConstraint};
use crate::domain::types::{AssignmentRole, Severity, ViolationKind};
use crate::domain::violation::Violation;
use chrono::NaiveDate;
use std::collections::BTreeSet;

// ==========================================
// DutyHourCeiling - 工时上限
// ==========================================
pub struct DutyHourCeiling;

impl ScheduleConstraint for DutyHourCeiling {
    fn kind(&self) -> ViolationKind {
        ViolationKind::DutyHourCeiling
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let compliance = &ctx.config.compliance;
        let windows = ctx.window.rolling_windows(compliance.rolling_window_days);
        let mut violations = Vec::new();

        for person in ctx.snapshot.people.iter().filter(|p| p.is_trainee()) {
            let list = ctx.index.person_assignments(&person.person_id);
            if list.is_empty() {
                continue;
            }
            for w in &windows {
                let hours: f64 = list
                    .iter()
                    .filter(|a| w.contains(a.slot.date))
                    .map(|a| ctx.index.duty_hours(a))
                    .sum();
                let limit = compliance.hour_limit_for(w.days());
                if hours > limit + 1e-6 {
                    violations.push(
                        Violation::hard(
                            ViolationKind::DutyHourCeiling,
                            format!(
                                "{} 在 {} 内工时 {:.1}h 超过上限 {:.1}h",
                                person.person_id, w, hours, limit
                            ),
                        )
                        .with_person(&person.person_id),
                    );
                }
            }
        }

        violations
    }
}

// ==========================================
// RestDayFrequency - 休息日频率
// ==========================================
pub struct RestDayFrequency;

impl ScheduleConstraint for RestDayFrequency {
    fn kind(&self) -> ViolationKind {
        ViolationKind::RestDayFrequency
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let compliance = &ctx.config.compliance;
        let windows = ctx.window.rolling_windows(compliance.rolling_window_days);
        let mut violations = Vec::new();

        for person in ctx.snapshot.people.iter().filter(|p| p.is_trainee()) {
            // 后备不计为工作日
            let worked: BTreeSet<NaiveDate> = ctx
                .index
                .person_assignments(&person.person_id)
                .iter()
                .filter(|a| a.role != AssignmentRole::Backup)
                .map(|a| a.slot.date)
                .collect();

            for w in &windows {
                let worked_days = worked.range(w.start..=w.end).count() as i64;
                let days_off = (w.days() - worked_days).max(0) as u32;
                let required = compliance.days_off_for(w.days());
                if days_off < required {
                    violations.push(
                        Violation::hard(
                            ViolationKind::RestDayFrequency,
                            format!(
                                "{} 在 {} 内仅休息 {} 天,要求至少 {} 天",
                                person.person_id, w, days_off, required
                            ),
                        )
                        .with_person(&person.person_id),
                    );
                }
            }
        }

        violations
    }
}

// ==========================================
// SupervisionRatio - 监督比例
// ==========================================
pub struct SupervisionRatio;

impl ScheduleConstraint for SupervisionRatio {
    fn kind(&self) -> ViolationKind {
        ViolationKind::SupervisionRatio
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn applies_to(&self, ctx: &ConstraintContext) -> bool {
        ctx.snapshot.activities.iter().any(|a| a.supervision.is_some())
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let mut cells: Vec<_> = ctx
            .index
            .by_cell
            .keys()
            .filter(|(slot, _)| ctx.window.contains(slot.date))
            .cloned()
            .collect();
        cells.sort();

        let mut violations = Vec::new();
        for (slot, activity_id) in cells {
            let Some(activity) = ctx.index.activities.get(activity_id.as_str()) else {
                continue;
            };
            let Some(requirement) = activity.supervision else {
                continue;
            };

            let mut juniors = 0u32;
            let mut seniors = 0u32;
            let mut supervisors = 0u32;
            for a in ctx.index.cell_assignments(slot, &activity_id) {
                let Some(person) = ctx.index.people.get(a.person_id.as_str()) else {
                    continue;
                };
                match a.role {
                    AssignmentRole::Supervising if person.is_supervisor() => supervisors += 1,
                    AssignmentRole::Primary if person.is_trainee() => {
                        if person.is_junior() {
                            juniors += 1;
                        } else {
                            seniors += 1;
                        }
                    }
                    _ => {}
                }
            }

            let required = requirement.required_supervisors(juniors, seniors);
            if supervisors < required {
                violations.push(
                    Violation::hard(
                        ViolationKind::SupervisionRatio,
                        format!(
                            "{} {} 需要 {} 名带教（初级 {} / 高年资 {}）,实际 {}",
                            activity_id, slot, required, juniors, seniors, supervisors
                        ),
                    )
                    .with_slot(slot)
                    .with_activity(&activity_id),
                );
            }
        }

        violations
    }
}

// ==========================================
// PostExtendedDutyRest - 延长值班后休息
// ==========================================
pub struct PostExtendedDutyRest;

impl ScheduleConstraint for PostExtendedDutyRest {
    fn kind(&self) -> ViolationKind {
        ViolationKind::PostExtendedDutyRest
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn applies_to(&self, ctx: &ConstraintContext) -> bool {
        ctx.snapshot.activities.iter().any(|a| a.extended_duty)
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let rest = ctx.config.compliance.post_extended_rest_periods as i64;
        let mut violations = Vec::new();

        for person in &ctx.snapshot.people {
            let list = ctx.index.person_assignments(&person.person_id);
            for duty in list.iter().filter(|a| {
                a.role != AssignmentRole::Backup
                    && ctx.window.contains(a.slot.date)
                    && ctx
                        .index
                        .activities
                        .get(a.activity_id.as_str())
                        .map(|t| t.extended_duty)
                        .unwrap_or(false)
            }) {
                let start = duty.slot.ordinal();
                for follower in list.iter().filter(|b| {
                    let o = b.slot.ordinal();
                    b.role != AssignmentRole::Backup && o > start && o <= start + rest
                }) {
                    violations.push(
                        Violation::hard(
                            ViolationKind::PostExtendedDutyRest,
                            format!(
                                "{} 在 {} 延长值班后 {} 个时段内被安排 {}（{}）",
                                person.person_id, duty.slot, rest, follower.activity_id, follower.slot
                            ),
                        )
                        .with_person(&person.person_id)
                        .with_slot(follower.slot)
                        .with_activity(&follower.activity_id),
                    );
                }
            }
        }

        violations
    }
}
