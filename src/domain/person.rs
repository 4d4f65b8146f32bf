// ==========================================
// 住院医师排班系统 - 人员领域模型
// ==========================================
// 红线: 中心性元数据为派生值,不在此权威存储
// ==========================================

use crate::domain::types::PersonRole;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ==========================================
// Person - 人员
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    pub name: String,
    pub role: PersonRole,
    /// 年资（住院医师为 PGY 年级,带教为从业年数）
    pub seniority: u8,
    #[serde(default)]
    pub specialties: BTreeSet<String>,

    // ===== 周期工作量上限 =====
    #[serde(default)]
    pub max_hours_per_week: Option<f64>,
    #[serde(default)]
    pub max_slots_per_week: Option<u32>,

    #[serde(default)]
    pub preferences: Preferences,
}

/// 个人偏好（仅影响软约束）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub avoid_dates: Vec<NaiveDate>,
    #[serde(default)]
    pub preferred_activities: Vec<String>,
}

impl Person {
    pub fn is_trainee(&self) -> bool {
        self.role == PersonRole::Trainee
    }

    pub fn is_supervisor(&self) -> bool {
        self.role == PersonRole::Supervisor
    }

    /// PGY-1 视为初级住院医师（监督比例更严格）
    pub fn is_junior(&self) -> bool {
        self.is_trainee() && self.seniority <= 1
    }

    pub fn has_specialties(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.specialties.contains(s))
    }

    /// 周可用工时（未配置时使用默认值）
    pub fn weekly_capacity_hours(&self, default_hours: f64) -> f64 {
        self.max_hours_per_week.unwrap_or(default_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_junior_trainee() {
        let p = Person {
            person_id: "R1".to_string(),
            name: "Resident One".to_string(),
            role: PersonRole::Trainee,
            seniority: 1,
            specialties: BTreeSet::new(),
            max_hours_per_week: None,
            max_slots_per_week: None,
            preferences: Preferences::default(),
        };
        assert!(p.is_junior());
        assert_eq!(p.weekly_capacity_hours(80.0), 80.0);
    }

    #[test]
    fn test_has_specialties() {
        let mut specialties = BTreeSet::new();
        specialties.insert("peds".to_string());
        let p = Person {
            person_id: "F1".to_string(),
            name: "Faculty".to_string(),
            role: PersonRole::Supervisor,
            seniority: 10,
            specialties,
            max_hours_per_week: Some(60.0),
            max_slots_per_week: None,
            preferences: Preferences::default(),
        };
        assert!(p.has_specialties(&["peds".to_string()]));
        assert!(!p.has_specialties(&["derm".to_string()]));
        assert!(p.has_specialties(&[]));
    }
}
