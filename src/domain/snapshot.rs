// ==========================================
// 住院医师排班系统 - 领域快照
// ==========================================
// 职责: 求解器/校验器的只读输入
// 红线: 快照为值对象,求解过程中不可修改
// ==========================================

use crate::domain::absence::Absence;
use crate::domain::activity::ActivityTemplate;
use crate::domain::assignment::Assignment;
use crate::domain::calendar::{DateRange, Slot, SlotKey};
use crate::domain::person::Person;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub program_id: String,
    pub people: Vec<Person>,
    pub slots: Vec<Slot>,
    pub activities: Vec<ActivityTemplate>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub absences: Vec<Absence>,
}

impl DomainSnapshot {
    // ===== 查找 =====

    pub fn person(&self, person_id: &str) -> Option<&Person> {
        self.people.iter().find(|p| p.person_id == person_id)
    }

    pub fn activity(&self, activity_id: &str) -> Option<&ActivityTemplate> {
        self.activities.iter().find(|a| a.activity_id == activity_id)
    }

    pub fn slot(&self, key: &SlotKey) -> Option<&Slot> {
        self.slots.iter().find(|s| s.date == key.date && s.period == key.period)
    }

    pub fn slots_in(&self, range: &DateRange) -> Vec<&Slot> {
        self.slots.iter().filter(|s| range.contains(s.date)).collect()
    }

    pub fn assignments_in(&self, range: &DateRange) -> Vec<&Assignment> {
        self.assignments
            .iter()
            .filter(|a| range.contains(a.slot.date))
            .collect()
    }

    pub fn assignments_for(&self, person_id: &str) -> Vec<&Assignment> {
        self.assignments
            .iter()
            .filter(|a| a.person_id == person_id)
            .collect()
    }

    /// 某人某槽位上的阻断型缺勤
    pub fn blocking_absence(&self, person_id: &str, slot: &SlotKey) -> Option<&Absence> {
        self.absences.iter().find(|a| a.blocks(person_id, slot))
    }

    /// 覆盖全部槽位的日期范围
    pub fn calendar_range(&self) -> Option<DateRange> {
        let start = self.slots.iter().map(|s| s.date).min()?;
        let end = self.slots.iter().map(|s| s.date).max()?;
        Some(DateRange::new(start, end))
    }

    /// 替换分配集合（生成新快照,原快照不变）
    pub fn with_assignments(&self, assignments: Vec<Assignment>) -> DomainSnapshot {
        DomainSnapshot {
            assignments,
            ..self.clone()
        }
    }

    // ===== 完整性检查 =====

    /// 引用完整性检查
    ///
    /// # 返回
    /// - Ok(()): 模型合法
    /// - Err(问题列表): 任一引用缺失、重复 ID 或非法区间
    pub fn check_integrity(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        let mut person_ids = HashSet::new();
        for p in &self.people {
            if !person_ids.insert(p.person_id.as_str()) {
                problems.push(format!("人员 ID 重复: {}", p.person_id));
            }
        }

        let mut activity_ids = HashSet::new();
        for a in &self.activities {
            if !activity_ids.insert(a.activity_id.as_str()) {
                problems.push(format!("活动 ID 重复: {}", a.activity_id));
            }
            if a.max_per_slot < a.required_per_slot {
                problems.push(format!(
                    "活动 {} 容量上限({})小于最低人数({})",
                    a.activity_id, a.max_per_slot, a.required_per_slot
                ));
            }
            if a.duty_hours < 0.0 {
                problems.push(format!("活动 {} 工时为负", a.activity_id));
            }
        }

        let mut assignment_ids = HashSet::new();
        for asg in &self.assignments {
            if !assignment_ids.insert(asg.assignment_id.as_str()) {
                problems.push(format!("分配 ID 重复: {}", asg.assignment_id));
            }
            if !person_ids.contains(asg.person_id.as_str()) {
                problems.push(format!(
                    "分配 {} 引用了不存在的人员 {}",
                    asg.assignment_id, asg.person_id
                ));
            }
            if !activity_ids.contains(asg.activity_id.as_str()) {
                problems.push(format!(
                    "分配 {} 引用了不存在的活动 {}",
                    asg.assignment_id, asg.activity_id
                ));
            }
        }

        for absence in &self.absences {
            if !person_ids.contains(absence.person_id.as_str()) {
                problems.push(format!(
                    "缺勤 {} 引用了不存在的人员 {}",
                    absence.absence_id, absence.person_id
                ));
            }
            if absence.end_date < absence.start_date {
                problems.push(format!("缺勤 {} 日期区间非法", absence.absence_id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
