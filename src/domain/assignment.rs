// ==========================================
// 住院医师排班系统 - 排班分配领域模型
// ==========================================
// 红线: 分配只能由求解器运行或换班执行器产生
// ==========================================

use crate::domain::calendar::SlotKey;
use crate::domain::types::AssignmentRole;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// Assignment - 排班分配
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: String,
    pub person_id: String,
    pub slot: SlotKey,
    pub activity_id: String,
    pub role: AssignmentRole,

    // ===== 来源 =====
    pub created_by: String,
    pub created_at: NaiveDateTime,
    /// 人工覆写（求解器不得改动）
    #[serde(default)]
    pub is_override: bool,
}

impl Assignment {
    /// 创建新分配（生成 UUID）
    pub fn new(
        person_id: &str,
        slot: SlotKey,
        activity_id: &str,
        role: AssignmentRole,
        created_by: &str,
    ) -> Self {
        Self {
            assignment_id: Uuid::new_v4().to_string(),
            person_id: person_id.to_string(),
            slot,
            activity_id: activity_id.to_string(),
            role,
            created_by: created_by.to_string(),
            created_at: Utc::now().naive_utc(),
            is_override: false,
        }
    }

    /// 转移给另一人（保留 assignment_id,更新来源）
    pub fn reassigned_to(&self, person_id: &str, created_by: &str, at: NaiveDateTime) -> Self {
        Self {
            person_id: person_id.to_string(),
            created_by: created_by.to_string(),
            created_at: at,
            ..self.clone()
        }
    }
}

// ==========================================
// AssignmentChangeSet - 原子变更集
// ==========================================
// 仓储必须整体提交或整体拒绝
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentChangeSet {
    pub removed: Vec<Assignment>,
    pub added: Vec<Assignment>,
}

impl AssignmentChangeSet {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    /// 反向变更集（用于回滚）
    pub fn inverse(&self) -> AssignmentChangeSet {
        AssignmentChangeSet {
            removed: self.added.clone(),
            added: self.removed.clone(),
        }
    }

    /// 应用到分配列表（先删后增）
    pub fn apply_to(&self, assignments: &mut Vec<Assignment>) {
        assignments.retain(|a| {
            !self
                .removed
                .iter()
                .any(|r| r.assignment_id == a.assignment_id)
        });
        assignments.extend(self.added.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn slot() -> SlotKey {
        SlotKey::am(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
    }

    #[test]
    fn test_change_set_apply_and_inverse() {
        let a = Assignment::new("R1", slot(), "clinic", AssignmentRole::Primary, "solver");
        let b = a.reassigned_to("R2", "swap", a.created_at);
        assert_eq!(a.assignment_id, b.assignment_id);

        let mut live = vec![a.clone()];
        let cs = AssignmentChangeSet {
            removed: vec![a.clone()],
            added: vec![b.clone()],
        };
        cs.apply_to(&mut live);
        assert_eq!(live, vec![b.clone()]);

        cs.inverse().apply_to(&mut live);
        assert_eq!(live, vec![a]);
    }
}
