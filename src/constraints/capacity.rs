// ==========================================
// 住院医师排班系统 - 容量与可用性硬约束
// ==========================================
// 规则:
// 1) 阻断型缺勤期间不得有分配
// 2) 同一人同一槽位只能有一项分配
// 3) 资格（角色 + 专科）与活动生效日
// 4) 活动每槽位人数上限
// 5) 覆盖需求（同槽位兼任阻断型活动者不计入覆盖）
// 6) 个人周工作量上限
// ==========================================

use crate::constraints::{ConstraintContext, ScheduleConstraint};
use crate::domain::calendar::{DateRange, Slot, SlotKey};
use crate::domain::types::{AssignmentRole, Severity, ViolationKind};
use crate::domain::violation::Violation;
use chrono::Duration;
use std::collections::HashMap;

// ==========================================
// 覆盖统计
// ==========================================

/// 单个 (槽位, 活动) 的覆盖情况
#[derive(Debug, Clone, PartialEq)]
pub struct CellCoverage {
    pub slot: SlotKey,
    pub activity_id: String,
    pub required: u32,
    /// 有效覆盖人数
    pub effective: u32,
    pub critical: bool,
}

impl CellCoverage {
    pub fn shortfall(&self) -> u32 {
        self.required.saturating_sub(self.effective)
    }
}

/// 计算窗口内全部需求单元的覆盖情况
///
/// 有效覆盖: PRIMARY 分配,且该人未被阻断型缺勤覆盖,
///          也未在同一槽位兼任其他阻断型活动
pub fn coverage_cells(ctx: &ConstraintContext) -> Vec<CellCoverage> {
    let mut cells = Vec::new();
    for slot in ctx.snapshot.slots.iter().filter(|s| ctx.window.contains(s.date)) {
        let key = slot.key();
        for activity in &ctx.snapshot.activities {
            if activity.required_per_slot == 0 || !activity.is_active_on(slot) {
                continue;
            }
            let effective = ctx
                .index
                .cell_assignments(key, &activity.activity_id)
                .iter()
                .filter(|a| a.role == AssignmentRole::Primary)
                .filter(|a| ctx.snapshot.blocking_absence(&a.person_id, &key).is_none())
                .filter(|a| {
                    !ctx.index
                        .person_slot_assignments(key, &a.person_id)
                        .iter()
                        .any(|other| {
                            other.activity_id != activity.activity_id
                                && ctx
                                    .index
                                    .activities
                                    .get(other.activity_id.as_str())
                                    .map(|t| t.blocking)
                                    .unwrap_or(false)
                        })
                })
                .count() as u32;

            cells.push(CellCoverage {
                slot: key,
                activity_id: activity.activity_id.clone(),
                required: activity.required_per_slot,
                effective,
                critical: activity.is_critical(),
            });
        }
    }
    cells
}

/// 覆盖率 = 有效覆盖席位 / 需求席位（无需求时为 1.0）
pub fn coverage_rate(cells: &[CellCoverage]) -> f64 {
    let required: u32 = cells.iter().map(|c| c.required).sum();
    if required == 0 {
        return 1.0;
    }
    let filled: u32 = cells.iter().map(|c| c.effective.min(c.required)).sum();
    filled as f64 / required as f64
}

// ==========================================
// Availability - 阻断型缺勤
// ==========================================
pub struct Availability;

impl ScheduleConstraint for Availability {
    fn kind(&self) -> ViolationKind {
        ViolationKind::Availability
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn applies_to(&self, ctx: &ConstraintContext) -> bool {
        ctx.snapshot.absences.iter().any(|a| a.blocking)
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        ctx.window_assignments()
            .filter_map(|a| {
                ctx.snapshot.blocking_absence(&a.person_id, &a.slot).map(|absence| {
                    Violation::hard(
                        ViolationKind::Availability,
                        format!(
                            "{} 在 {} 处于阻断型缺勤 {}（{}）期间,不得安排 {}",
                            a.person_id, a.slot, absence.absence_id, absence.absence_type, a.activity_id
                        ),
                    )
                    .with_person(&a.person_id)
                    .with_slot(a.slot)
                    .with_activity(&a.activity_id)
                })
            })
            .collect()
    }
}

// ==========================================
// DoubleBooking - 同槽位重复分配
// ==========================================
pub struct DoubleBooking;

impl ScheduleConstraint for DoubleBooking {
    fn kind(&self) -> ViolationKind {
        ViolationKind::DoubleBooking
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let mut keys: Vec<_> = ctx
            .index
            .by_person_slot
            .iter()
            .filter(|((slot, _), list)| ctx.window.contains(slot.date) && list.len() > 1)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();

        let mut violations = Vec::new();
        for (slot, person_id) in keys {
            let list = ctx.index.person_slot_assignments(slot, &person_id);
            // 每多出一项记一次违规
            for extra in list.iter().skip(1) {
                violations.push(
                    Violation::hard(
                        ViolationKind::DoubleBooking,
                        format!(
                            "{} 在 {} 同时被安排 {} 项活动（{}）",
                            person_id,
                            slot,
                            list.len(),
                            extra.activity_id
                        ),
                    )
                    .with_person(&person_id)
                    .with_slot(slot)
                    .with_activity(&extra.activity_id),
                );
            }
        }
        violations
    }
}

// ==========================================
// Qualification - 资格与生效日
// ==========================================
pub struct Qualification;

impl ScheduleConstraint for Qualification {
    fn kind(&self) -> ViolationKind {
        ViolationKind::Qualification
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let calendar: HashMap<SlotKey, &Slot> = ctx.snapshot.slots.iter().map(|s| (s.key(), s)).collect();
        let mut violations = Vec::new();

        for a in ctx.window_assignments() {
            let (Some(person), Some(activity)) = (
                ctx.index.people.get(a.person_id.as_str()),
                ctx.index.activities.get(a.activity_id.as_str()),
            ) else {
                continue;
            };

            let reason = match a.role {
                AssignmentRole::Supervising if !person.is_supervisor() => {
                    Some("非带教人员不得担任监督角色".to_string())
                }
                AssignmentRole::Supervising if !person.has_specialties(&activity.required_specialties) => {
                    Some("带教人员缺少活动所需专科".to_string())
                }
                AssignmentRole::Supervising => None,
                _ if !activity.is_qualified(person) => Some(format!(
                    "角色 {} 或专科不满足活动要求 {:?}",
                    person.role, activity.required_specialties
                )),
                _ => None,
            };
            let reason = reason.or_else(|| match calendar.get(&a.slot) {
                Some(slot) if !activity.is_active_on(slot) => Some("活动在该槽位不生效".to_string()),
                _ => None,
            });

            if let Some(reason) = reason {
                violations.push(
                    Violation::hard(
                        ViolationKind::Qualification,
                        format!("{} 不可担任 {}（{}）: {}", a.person_id, a.activity_id, a.slot, reason),
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
// ActivityCapacity - 每槽位人数上限
// ==========================================
pub struct ActivityCapacity;

impl ScheduleConstraint for ActivityCapacity {
    fn kind(&self) -> ViolationKind {
        ViolationKind::ActivityCapacity
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let mut keys: Vec<_> = ctx
            .index
            .by_cell
            .keys()
            .filter(|(slot, _)| ctx.window.contains(slot.date))
            .cloned()
            .collect();
        keys.sort();

        let mut violations = Vec::new();
        for (slot, activity_id) in keys {
            let Some(activity) = ctx.index.activities.get(activity_id.as_str()) else {
                continue;
            };
            let primaries = ctx
                .index
                .cell_assignments(slot, &activity_id)
                .iter()
                .filter(|a| a.role == AssignmentRole::Primary)
                .count() as u32;
            if primaries > activity.max_per_slot {
                violations.push(
                    Violation::hard(
                        ViolationKind::ActivityCapacity,
                        format!(
                            "{} {} 安排 {} 人,超过上限 {}",
                            activity_id, slot, primaries, activity.max_per_slot
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
// CoverageRequirement - 覆盖需求
// ==========================================
pub struct CoverageRequirement;

impl ScheduleConstraint for CoverageRequirement {
    fn kind(&self) -> ViolationKind {
        ViolationKind::CoverageGap
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        coverage_cells(ctx)
            .into_iter()
            .filter(|c| c.shortfall() > 0)
            .map(|c| {
                Violation::hard(
                    ViolationKind::CoverageGap,
                    format!(
                        "{} {} 覆盖缺口: 需要 {} 人,有效 {} 人",
                        c.activity_id, c.slot, c.required, c.effective
                    ),
                )
                .with_slot(c.slot)
                .with_activity(&c.activity_id)
            })
            .collect()
    }
}

// ==========================================
// WorkloadCap - 个人周工作量上限
// ==========================================
// 以窗口起始日对齐的 7 天周块计算;不足 7 天的周块按比例折算
pub struct WorkloadCap;

impl WorkloadCap {
    pub fn week_blocks(window: &DateRange) -> Vec<DateRange> {
        let mut blocks = Vec::new();
        let mut start = window.start;
        while start <= window.end {
            let end = (start + Duration::days(6)).min(window.end);
            blocks.push(DateRange::new(start, end));
            start += Duration::days(7);
        }
        blocks
    }
}

impl ScheduleConstraint for WorkloadCap {
    fn kind(&self) -> ViolationKind {
        ViolationKind::WorkloadCap
    }

    fn severity(&self) -> Severity {
        Severity::Hard
    }

    fn applies_to(&self, ctx: &ConstraintContext) -> bool {
        ctx.snapshot
            .people
            .iter()
            .any(|p| p.max_hours_per_week.is_some() || p.max_slots_per_week.is_some())
    }

    fn check(&self, ctx: &ConstraintContext) -> Vec<Violation> {
        let blocks = Self::week_blocks(&ctx.window);
        let mut violations = Vec::new();

        for person in &ctx.snapshot.people {
            if person.max_hours_per_week.is_none() && person.max_slots_per_week.is_none() {
                continue;
            }
            let list = ctx.index.person_assignments(&person.person_id);
            for block in &blocks {
                let scale = block.days() as f64 / 7.0;
                let in_block: Vec<_> = list
                    .iter()
                    .filter(|a| block.contains(a.slot.date) && a.role != AssignmentRole::Backup)
                    .collect();

                if let Some(cap) = person.max_hours_per_week {
                    let hours: f64 = in_block.iter().map(|a| ctx.index.duty_hours(a)).sum();
                    let limit = cap * scale;
                    if hours > limit + 1e-6 {
                        violations.push(
                            Violation::hard(
                                ViolationKind::WorkloadCap,
                                format!(
                                    "{} 在 {} 工时 {:.1}h 超过个人上限 {:.1}h",
                                    person.person_id, block, hours, limit
                                ),
                            )
                            .with_person(&person.person_id),
                        );
                    }
                }
                if let Some(cap) = person.max_slots_per_week {
                    let limit = (cap as f64 * scale).ceil() as usize;
                    if in_block.len() > limit {
                        violations.push(
                            Violation::hard(
                                ViolationKind::WorkloadCap,
                                format!(
                                    "{} 在 {} 安排 {} 个时段,超过个人上限 {}",
                                    person.person_id,
                                    block,
                                    in_block.len(),
                                    limit
                                ),
                            )
                            .with_person(&person.person_id),
                        );
                    }
                }
            }
        }
        violations
    }
}
