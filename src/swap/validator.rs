// ==========================================
// 住院医师排班系统 - 换班校验器
// ==========================================
// 错误（阻断）:
// - 人员不存在 / 源目标相同 / 类型与目标周期不一致
// - 周期已过（past date）
// - 源周期内无可交换分配
// - 接收方阻断型缺勤冲突（external conflict）
// - 接收方同槽位已有分配 / 资格不符
// - 背靠背: 接收的阻断型活动与接收方保留的阻断型活动间隔 ≤ adjacency_window_days
// 警告（提示）:
// - 周期临近（imminent date）
// - 一换一目标周期内无分配
// 红线: 收集全部问题,不在第一个错误处返回
// ==========================================

use crate::config::{CouplingRule, SwapConfig};
use crate::domain::assignment::{Assignment, AssignmentChangeSet};
use crate::domain::calendar::DateRange;
use crate::domain::person::Person;
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::swap::SwapRecord;
use crate::domain::types::{AssignmentRole, SwapKind};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

// ==========================================
// 校验结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapIssueKind {
    UnknownPerson,
    SamePerson,
    KindMismatch,
    PastDate,
    EmptySource,
    ExternalConflict,
    SlotConflict,
    Qualification,
    BackToBack,
    ImminentDate,
    EmptyTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapIssue {
    pub kind: SwapIssueKind,
    pub person_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub message: String,
}

impl SwapIssue {
    fn new(kind: SwapIssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            person_id: None,
            date: None,
            message: message.into(),
        }
    }

    fn for_person(mut self, person_id: &str) -> Self {
        self.person_id = Some(person_id.to_string());
        self
    }

    fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapValidationResult {
    pub valid: bool,
    pub errors: Vec<SwapIssue>,
    pub warnings: Vec<SwapIssue>,
}

impl SwapValidationResult {
    pub fn has_error(&self, kind: SwapIssueKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    pub fn has_warning(&self, kind: SwapIssueKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

// ==========================================
// SwapPlan - 换班移动计划
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct SwapMove {
    pub assignment: Assignment,
    pub to_person_id: String,
    /// 由耦合规则带出的次要职责
    pub coupled: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwapPlan {
    pub moves: Vec<SwapMove>,
}

impl SwapPlan {
    /// 按耦合规则收集移动计划
    pub fn build(snapshot: &DomainSnapshot, swap: &SwapRecord, config: &SwapConfig, coupling: &[CouplingRule]) -> Self {
        let mut moves = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut push_period = |from: &str, to: &str, period: DateRange, moves: &mut Vec<SwapMove>| {
            for a in snapshot.assignments.iter().filter(|a| {
                a.person_id == from
                    && period.contains(a.slot.date)
                    && swap
                        .activity_filter
                        .as_deref()
                        .map(|f| f == a.activity_id)
                        .unwrap_or(true)
            }) {
                if seen.insert(a.assignment_id.clone()) {
                    moves.push(SwapMove {
                        assignment: a.clone(),
                        to_person_id: to.to_string(),
                        coupled: false,
                    });
                }
            }
        };

        push_period(
            &swap.source_person_id,
            &swap.target_person_id,
            swap.source_period(config.swap_block_days),
            &mut moves,
        );
        if let (SwapKind::OneToOne, Some(period)) = (swap.kind, swap.target_period(config.swap_block_days)) {
            push_period(&swap.target_person_id, &swap.source_person_id, period, &mut moves);
        }

        // 耦合次要职责: 同一人同日的耦合活动随主活动一起移动
        let mut coupled = Vec::new();
        for m in &moves {
            for rule in coupling.iter().filter(|r| r.primary_activity == m.assignment.activity_id) {
                for a in snapshot.assignments.iter().filter(|a| {
                    a.person_id == m.assignment.person_id
                        && a.slot.date == m.assignment.slot.date
                        && a.activity_id == rule.coupled_activity
                }) {
                    if seen.insert(a.assignment_id.clone()) {
                        coupled.push(SwapMove {
                            assignment: a.clone(),
                            to_person_id: m.to_person_id.clone(),
                            coupled: true,
                        });
                    }
                }
            }
        }
        moves.extend(coupled);
        Self { moves }
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// 某人转出的分配 ID
    fn given_by(&self, person_id: &str) -> HashSet<&str> {
        self.moves
            .iter()
            .filter(|m| m.assignment.person_id == person_id)
            .map(|m| m.assignment.assignment_id.as_str())
            .collect()
    }

    fn received_by<'p>(&'p self, person_id: &'p str) -> impl Iterator<Item = &'p SwapMove> + 'p {
        self.moves.iter().filter(move |m| m.to_person_id == person_id)
    }

    /// 生成原子变更集（分配 ID 保持不变）
    pub fn change_set(&self, created_by: &str, at: NaiveDateTime) -> AssignmentChangeSet {
        AssignmentChangeSet {
            removed: self.moves.iter().map(|m| m.assignment.clone()).collect(),
            added: self
                .moves
                .iter()
                .map(|m| m.assignment.reassigned_to(&m.to_person_id, created_by, at))
                .collect(),
        }
    }

    /// 涉及人员
    pub fn people(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for m in &self.moves {
            for id in [&m.assignment.person_id, &m.to_person_id] {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }
}

// ==========================================
// SwapValidator - 换班校验器
// ==========================================
pub struct SwapValidator {
    config: SwapConfig,
    coupling: Vec<CouplingRule>,
}

impl SwapValidator {
    pub fn new(config: SwapConfig, coupling: Vec<CouplingRule>) -> Self {
        Self { config, coupling }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn plan(&self, snapshot: &DomainSnapshot, swap: &SwapRecord) -> SwapPlan {
        SwapPlan::build(snapshot, swap, &self.config, &self.coupling)
    }

    /// 校验换班申请
    pub fn validate(&self, snapshot: &DomainSnapshot, swap: &SwapRecord, today: NaiveDate) -> SwapValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let source = snapshot.person(&swap.source_person_id);
        let target = snapshot.person(&swap.target_person_id);
        for (id, person) in [(&swap.source_person_id, source), (&swap.target_person_id, target)] {
            if person.is_none() {
                errors.push(
                    SwapIssue::new(SwapIssueKind::UnknownPerson, format!("人员 {} 不存在", id)).for_person(id),
                );
            }
        }
        if swap.source_person_id == swap.target_person_id {
            errors.push(SwapIssue::new(SwapIssueKind::SamePerson, "源与目标为同一人"));
        }
        match (swap.kind, swap.target_period_start) {
            (SwapKind::OneToOne, None) => errors.push(SwapIssue::new(
                SwapIssueKind::KindMismatch,
                "一换一换班缺少目标周期",
            )),
            (SwapKind::Absorb, Some(_)) => errors.push(SwapIssue::new(
                SwapIssueKind::KindMismatch,
                "单向接收换班不应指定目标周期",
            )),
            _ => {}
        }

        // ===== 日期 =====
        let mut periods = vec![swap.source_period_start];
        periods.extend(swap.target_period_start);
        for start in periods {
            if start < today {
                errors.push(
                    SwapIssue::new(SwapIssueKind::PastDate, format!("周期 {} 已过", start)).on(start),
                );
            } else if (start - today).num_days() < self.config.imminent_days {
                warnings.push(
                    SwapIssue::new(SwapIssueKind::ImminentDate, format!("周期 {} 临近", start)).on(start),
                );
            }
        }

        let plan = self.plan(snapshot, swap);
        if !plan.moves.iter().any(|m| m.assignment.person_id == swap.source_person_id) {
            errors.push(
                SwapIssue::new(SwapIssueKind::EmptySource, "源周期内无可交换分配")
                    .for_person(&swap.source_person_id),
            );
        }
        if swap.kind == SwapKind::OneToOne
            && swap.target_period_start.is_some()
            && !plan.moves.iter().any(|m| m.assignment.person_id == swap.target_person_id)
        {
            warnings.push(
                SwapIssue::new(SwapIssueKind::EmptyTarget, "目标周期内无分配,将按单向接收处理")
                    .for_person(&swap.target_person_id),
            );
        }

        // ===== 接收方检查 =====
        for receiver in [source, target].into_iter().flatten() {
            self.check_receiver(snapshot, &plan, receiver, &mut errors);
        }

        debug!(
            swap_id = %swap.swap_id,
            errors = errors.len(),
            warnings = warnings.len(),
            moves = plan.moves.len(),
            "换班校验完成"
        );

        SwapValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn check_receiver(&self, snapshot: &DomainSnapshot, plan: &SwapPlan, receiver: &Person, errors: &mut Vec<SwapIssue>) {
        let person_id = receiver.person_id.as_str();
        let given = plan.given_by(person_id);
        let retained: Vec<&Assignment> = snapshot
            .assignments
            .iter()
            .filter(|a| a.person_id == person_id && !given.contains(a.assignment_id.as_str()))
            .collect();
        let is_blocking = |activity_id: &str| snapshot.activity(activity_id).map(|t| t.blocking).unwrap_or(false);

        let mut reported_absences = HashSet::new();
        let mut back_to_back_dates = HashSet::new();

        for m in plan.received_by(person_id) {
            let a = &m.assignment;

            if let Some(absence) = snapshot.blocking_absence(person_id, &a.slot) {
                if reported_absences.insert((absence.absence_id.clone(), a.slot.date)) {
                    errors.push(
                        SwapIssue::new(
                            SwapIssueKind::ExternalConflict,
                            format!("{} 在 {} 有阻断型缺勤 {}", person_id, a.slot.date, absence.absence_type),
                        )
                        .for_person(person_id)
                        .on(a.slot.date),
                    );
                }
            }

            if retained.iter().any(|r| r.slot == a.slot) {
                errors.push(
                    SwapIssue::new(
                        SwapIssueKind::SlotConflict,
                        format!("{} 在 {} 已有分配", person_id, a.slot),
                    )
                    .for_person(person_id)
                    .on(a.slot.date),
                );
            }

            if let Some(activity) = snapshot.activity(&a.activity_id) {
                let qualified = match a.role {
                    AssignmentRole::Supervising => {
                        receiver.is_supervisor() && receiver.has_specialties(&activity.required_specialties)
                    }
                    _ => activity.is_qualified(receiver),
                };
                if !qualified {
                    errors.push(
                        SwapIssue::new(
                            SwapIssueKind::Qualification,
                            format!("{} 不具备 {} 资格", person_id, a.activity_id),
                        )
                        .for_person(person_id)
                        .on(a.slot.date),
                    );
                }
            }

            if is_blocking(&a.activity_id) {
                let adjacent = retained.iter().any(|r| {
                    is_blocking(&r.activity_id)
                        && (r.slot.date - a.slot.date).num_days().abs() <= self.config.adjacency_window_days
                });
                if adjacent && back_to_back_dates.insert(a.slot.date) {
                    errors.push(
                        SwapIssue::new(
                            SwapIssueKind::BackToBack,
                            format!(
                                "{} 接收 {} 的 {} 与其既有阻断型活动间隔不足 {} 天",
                                person_id, a.slot.date, a.activity_id, self.config.adjacency_window_days
                            ),
                        )
                        .for_person(person_id)
                        .on(a.slot.date),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::absence::Absence;
    use crate::domain::activity::ActivityTemplate;
    use crate::domain::calendar::SlotKey;
    use crate::domain::person::Preferences;
    use crate::domain::types::{ActivityCategory, PersonRole, SubPeriod};
    use std::collections::BTreeSet;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn resident(person_id: &str, specialties: &[&str]) -> Person {
        Person {
            person_id: person_id.to_string(),
            name: person_id.to_string(),
            role: PersonRole::Trainee,
            seniority: 2,
            specialties: specialties.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            max_hours_per_week: None,
            max_slots_per_week: None,
            preferences: Preferences::default(),
        }
    }

    fn template(activity_id: &str, specialties: &[&str], blocking: bool) -> ActivityTemplate {
        ActivityTemplate {
            activity_id: activity_id.to_string(),
            name: activity_id.to_string(),
            category: ActivityCategory::ContinuityOfCare,
            duty_hours: 4.0,
            required_per_slot: 0,
            max_per_slot: 2,
            active_weekdays: vec![0, 1, 2, 3, 4, 5, 6],
            periods: vec![SubPeriod::Am, SubPeriod::Pm],
            include_holidays: true,
            required_specialties: specialties.iter().map(|s| s.to_string()).collect(),
            allowed_roles: vec![PersonRole::Trainee],
            supervision: None,
            blocking,
            extended_duty: false,
            critical: false,
            zone: None,
        }
    }

    fn duty(assignment_id: &str, person_id: &str, slot: SlotKey, activity_id: &str) -> Assignment {
        Assignment {
            assignment_id: assignment_id.to_string(),
            person_id: person_id.to_string(),
            slot,
            activity_id: activity_id.to_string(),
            role: AssignmentRole::Primary,
            created_by: "fixture".to_string(),
            created_at: d(1).and_hms_opt(0, 0, 0).unwrap(),
            is_override: false,
        }
    }

    fn snapshot(assignments: Vec<Assignment>, absences: Vec<Absence>) -> DomainSnapshot {
        DomainSnapshot {
            program_id: "IM".to_string(),
            people: vec![
                resident("R1", &["im", "cards"]),
                resident("R2", &["im"]),
                resident("R3", &["im"]),
            ],
            slots: vec![],
            activities: vec![
                template("clinic", &[], false),
                template("cath", &["cards"], false),
                template("ward", &[], true),
                template("handoff", &[], false),
            ],
            assignments,
            absences,
        }
    }

    fn swap(kind: SwapKind, source: &str, source_start: NaiveDate, target: &str, target_start: Option<NaiveDate>) -> SwapRecord {
        SwapRecord::new(
            "S1".to_string(),
            "IM",
            kind,
            source,
            source_start,
            target,
            target_start,
            source,
            d(1).and_hms_opt(8, 0, 0).unwrap(),
        )
    }

    fn validator() -> SwapValidator {
        SwapValidator::new(SwapConfig::default(), vec![])
    }

    #[test]
    fn test_receiver_absence_and_qualification_are_both_reported() {
        let snap = snapshot(
            vec![duty("A-1", "R1", SlotKey::am(d(10)), "cath")],
            vec![Absence {
                absence_id: "ABS-1".to_string(),
                person_id: "R3".to_string(),
                start_date: d(10),
                end_date: d(10),
                absence_type: "CONFERENCE".to_string(),
                blocking: true,
                revision: 0,
            }],
        );
        let result = validator().validate(&snap, &swap(SwapKind::Absorb, "R1", d(9), "R3", None), d(1));

        assert!(!result.valid);
        assert!(result.has_error(SwapIssueKind::ExternalConflict));
        assert!(result.has_error(SwapIssueKind::Qualification));
        assert!(!result.has_error(SwapIssueKind::PastDate));
    }

    #[test]
    fn test_receiver_already_booked_in_slot() {
        let snap = snapshot(
            vec![
                duty("A-1", "R1", SlotKey::am(d(10)), "clinic"),
                duty("B-1", "R2", SlotKey::am(d(10)), "clinic"),
            ],
            vec![],
        );
        let result = validator().validate(&snap, &swap(SwapKind::Absorb, "R1", d(9), "R2", None), d(1));

        assert_eq!(result.errors.len(), 1);
        assert!(result.has_error(SwapIssueKind::SlotConflict));
        // 门诊非阻断型,不检查背靠背
        assert!(!result.has_error(SwapIssueKind::BackToBack));
    }

    #[test]
    fn test_one_to_one_swap_of_same_slot_is_not_a_slot_conflict() {
        let snap = snapshot(
            vec![
                duty("A-1", "R1", SlotKey::am(d(10)), "clinic"),
                duty("B-1", "R2", SlotKey::am(d(10)), "clinic"),
            ],
            vec![],
        );
        let result = validator().validate(&snap, &swap(SwapKind::OneToOne, "R1", d(9), "R2", Some(d(9))), d(1));
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_imminent_period_and_empty_target_only_warn() {
        let snap = snapshot(vec![duty("A-1", "R1", SlotKey::am(d(10)), "clinic")], vec![]);
        let result = validator().validate(&snap, &swap(SwapKind::OneToOne, "R1", d(9), "R2", Some(d(16))), d(8));

        assert!(result.valid);
        assert!(result.has_warning(SwapIssueKind::ImminentDate));
        assert!(result.has_warning(SwapIssueKind::EmptyTarget));
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_structural_errors_are_collected_together() {
        let snap = snapshot(vec![], vec![]);
        let result = validator().validate(&snap, &swap(SwapKind::OneToOne, "R1", d(9), "R1", None), d(1));

        assert!(result.has_error(SwapIssueKind::SamePerson));
        assert!(result.has_error(SwapIssueKind::KindMismatch));
        assert!(result.has_error(SwapIssueKind::EmptySource));
        assert_eq!(result.error_messages().len(), 3);
    }

    #[test]
    fn test_plan_carries_coupled_duties() {
        let snap = snapshot(
            vec![
                duty("A-1", "R1", SlotKey::am(d(10)), "ward"),
                duty("A-2", "R1", SlotKey::pm(d(10)), "handoff"),
                duty("A-3", "R1", SlotKey::pm(d(11)), "handoff"),
            ],
            vec![],
        );
        let coupling = vec![CouplingRule {
            primary_activity: "ward".to_string(),
            coupled_activity: "handoff".to_string(),
        }];
        let mut record = swap(SwapKind::Absorb, "R1", d(9), "R2", None);
        record.activity_filter = Some("ward".to_string());

        let plan = SwapValidator::new(SwapConfig::default(), coupling).plan(&snap, &record);
        assert_eq!(plan.moves.len(), 2);
        assert!(!plan.moves[0].coupled);
        assert_eq!(plan.moves[1].assignment.assignment_id, "A-2");
        assert!(plan.moves[1].coupled);
        assert_eq!(plan.people(), vec!["R1".to_string(), "R2".to_string()]);

        let changes = plan.change_set("chief", d(2).and_hms_opt(9, 0, 0).unwrap());
        assert!(changes.added.iter().all(|a| a.person_id == "R2"));
        assert_eq!(changes.removed.len(), 2);
    }
}
