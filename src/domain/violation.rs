// ==========================================
// 住院医师排班系统 - 违规记录
// ==========================================
// 红线: 违规集合每次校验重新计算,不可截断
// ==========================================

use crate::domain::calendar::SlotKey;
use crate::domain::types::{Severity, ViolationKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub person_id: Option<String>,
    pub slot: Option<SlotKey>,
    pub activity_id: Option<String>,
    pub message: String,
    /// 软约束惩罚量（硬约束为 1.0）
    pub penalty: f64,
}

impl Violation {
    pub fn hard(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Hard,
            person_id: None,
            slot: None,
            activity_id: None,
            message: message.into(),
            penalty: 1.0,
        }
    }

    pub fn soft(kind: ViolationKind, penalty: f64, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Soft,
            person_id: None,
            slot: None,
            activity_id: None,
            message: message.into(),
            penalty,
        }
    }

    pub fn with_person(mut self, person_id: &str) -> Self {
        self.person_id = Some(person_id.to_string());
        self
    }

    pub fn with_slot(mut self, slot: SlotKey) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_activity(mut self, activity_id: &str) -> Self {
        self.activity_id = Some(activity_id.to_string());
        self
    }

    pub fn is_hard(&self) -> bool {
        self.severity == Severity::Hard
    }
}

/// 统计硬违规数量
pub fn count_hard(violations: &[Violation]) -> usize {
    violations.iter().filter(|v| v.is_hard()).count()
}
