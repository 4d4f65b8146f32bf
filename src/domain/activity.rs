// ==========================================
// 住院医师排班系统 - 活动模板领域模型
// ==========================================
// 职责: 可分配活动类型、容量上下限、监督比例
// ==========================================

use crate::domain::calendar::Slot;
use crate::domain::person::Person;
use crate::domain::types::{ActivityCategory, PersonRole, SubPeriod};
use chrono::Datelike;
use serde::{Deserialize, Serialize};

// ==========================================
// SupervisionRequirement - 监督比例
// ==========================================
// 需要带教人数 = ceil(初级/junior_ratio + 高年资/senior_ratio)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupervisionRequirement {
    pub junior_ratio: u32, // 每名带教可监督的 PGY-1 人数
    pub senior_ratio: u32, // 每名带教可监督的 PGY-2+ 人数
}

impl SupervisionRequirement {
    pub fn required_supervisors(&self, juniors: u32, seniors: u32) -> u32 {
        if juniors == 0 && seniors == 0 {
            return 0;
        }
        let load = juniors as f64 / self.junior_ratio.max(1) as f64
            + seniors as f64 / self.senior_ratio.max(1) as f64;
        load.ceil() as u32
    }
}

// ==========================================
// ActivityTemplate - 活动模板
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTemplate {
    pub activity_id: String,
    pub name: String,
    pub category: ActivityCategory,

    // ===== 工时与容量 =====
    pub duty_hours: f64,          // 单槽位工时
    pub required_per_slot: u32,   // 每槽位最低人数
    pub max_per_slot: u32,        // 每槽位最高人数

    // ===== 生效规则 =====
    /// 生效星期（0=周一 … 6=周日）
    pub active_weekdays: Vec<u32>,
    pub periods: Vec<SubPeriod>,
    #[serde(default)]
    pub include_holidays: bool,

    // ===== 资格 =====
    #[serde(default)]
    pub required_specialties: Vec<String>,
    pub allowed_roles: Vec<PersonRole>,
    #[serde(default)]
    pub supervision: Option<SupervisionRequirement>,

    // ===== 标志 =====
    /// 阻断型活动（如住院病房周）,用于背靠背换班检测
    #[serde(default)]
    pub blocking: bool,
    /// 延长值班（如 24 小时值班）,之后必须强制休息
    #[serde(default)]
    pub extended_duty: bool,
    /// 关键活动（参与 N-1/N-2 推演）
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub zone: Option<String>,
}

impl ActivityTemplate {
    /// 判断活动在某槽位是否生效
    pub fn is_active_on(&self, slot: &Slot) -> bool {
        if slot.is_holiday && !self.include_holidays {
            return false;
        }
        let weekday = slot.date.weekday().num_days_from_monday();
        self.active_weekdays.contains(&weekday) && self.periods.contains(&slot.period)
    }

    /// 判断人员是否具备资格（专科 + 角色）
    pub fn is_qualified(&self, person: &Person) -> bool {
        self.allowed_roles.contains(&person.role) && person.has_specialties(&self.required_specialties)
    }

    pub fn is_critical(&self) -> bool {
        self.critical || self.category == ActivityCategory::PatientSafety
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn clinic() -> ActivityTemplate {
        ActivityTemplate {
            activity_id: "clinic".to_string(),
            name: "Continuity Clinic".to_string(),
            category: ActivityCategory::ContinuityOfCare,
            duty_hours: 4.0,
            required_per_slot: 1,
            max_per_slot: 2,
            active_weekdays: vec![0, 1, 2, 3, 4],
            periods: vec![SubPeriod::Am],
            include_holidays: false,
            required_specialties: vec![],
            allowed_roles: vec![PersonRole::Trainee],
            supervision: None,
            blocking: false,
            extended_duty: false,
            critical: false,
            zone: None,
        }
    }

    #[test]
    fn test_is_active_on() {
        let t = clinic();
        // 2026-03-02 周一
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let slot = |date, period, is_holiday| Slot {
            date,
            period,
            is_weekend: false,
            is_holiday,
        };
        assert!(t.is_active_on(&slot(monday, SubPeriod::Am, false)));
        assert!(!t.is_active_on(&slot(monday, SubPeriod::Pm, false)));
        assert!(!t.is_active_on(&slot(monday, SubPeriod::Am, true)));
        assert!(!t.is_active_on(&slot(saturday, SubPeriod::Am, false)));
    }

    #[test]
    fn test_required_supervisors() {
        let req = SupervisionRequirement {
            junior_ratio: 2,
            senior_ratio: 4,
        };
        assert_eq!(req.required_supervisors(0, 0), 0);
        assert_eq!(req.required_supervisors(2, 0), 1);
        assert_eq!(req.required_supervisors(3, 0), 2);
        assert_eq!(req.required_supervisors(1, 2), 1);
        assert_eq!(req.required_supervisors(2, 1), 2);
    }
}
