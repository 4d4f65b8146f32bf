// ==========================================
// 住院医师排班系统 - 韧性领域模型
// ==========================================
// 职责: 利用率样本、防御等级转换、脆弱性报告、兜底方案
// 红线: 防御等级与脆弱性报告均为派生值,不可手工编辑
// ==========================================

use crate::domain::assignment::Assignment;
use crate::domain::calendar::{DateRange, SlotKey};
use crate::domain::types::DefenseLevel;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// UtilizationSample - 利用率样本
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    /// 单调递增序号（旧样本不得驱动等级变化）
    pub seq: u64,
    pub program_id: String,
    pub window: DateRange,
    pub load_hours: f64,
    pub capacity_hours: f64,
    pub utilization: f64, // 0.0 ~ 1.0+
    /// 关键活动未填补席位数
    pub critical_gaps: u32,
    pub sampled_at: NaiveDateTime,
}

// ==========================================
// DefenseTransition - 防御等级转换记录（只追加）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefenseTransition {
    pub transition_id: String,
    pub program_id: String,
    pub from: DefenseLevel,
    pub to: DefenseLevel,
    pub utilization: f64,
    pub sample_seq: u64,
    pub at: NaiveDateTime,
}

/// 当前防御状态（GetDefenseLevel 返回值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefenseStatus {
    pub level: DefenseLevel,
    pub utilization: f64,
    pub since: NaiveDateTime,
}

// ==========================================
// 脆弱性报告
// ==========================================

/// 单人中心性指标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonCentrality {
    pub person_id: String,
    pub betweenness: f64,
    pub degree: u32,
    /// 作为唯一合格人选的关键席位数
    pub sole_provider_count: u32,
    pub rank: u32, // 1 = 最关键
}

/// 推演后无法覆盖的关键活动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncoveredActivity {
    pub activity_id: String,
    pub slot: SlotKey,
    pub shortfall: u32,
}

/// 单次 N-k 推演结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyOutcome {
    pub removed_person_ids: Vec<String>,
    pub feasible: bool,
    pub uncovered: Vec<UncoveredActivity>,
}

impl ContingencyOutcome {
    /// 不可覆盖的活动 ID（去重,保持出现顺序）
    pub fn dark_activities(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for u in &self.uncovered {
            if !ids.contains(&u.activity_id) {
                ids.push(u.activity_id.clone());
            }
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityReport {
    pub report_id: String,
    pub program_id: String,
    pub scenario: String,
    pub window: DateRange,
    pub generated_at: NaiveDateTime,
    pub centrality: Vec<PersonCentrality>,
    /// 当前排班下已存在的关键缺口（推演基线）
    pub baseline_uncovered: Vec<UncoveredActivity>,
    pub n1: Vec<ContingencyOutcome>,
    pub n2: Option<ContingencyOutcome>,
}

impl VulnerabilityReport {
    pub fn is_stale(&self, now: NaiveDateTime, stale_after: Duration) -> bool {
        now - self.generated_at > stale_after
    }

    /// 所有场景是否均通过
    pub fn all_pass(&self) -> bool {
        self.n1.iter().all(|o| o.feasible) && self.n2.as_ref().map(|o| o.feasible).unwrap_or(true)
    }
}

// ==========================================
// 静态稳定兜底方案
// ==========================================

/// 危机场景定义（如"流感季三人缺岗"）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisScenario {
    pub name: String,
    pub absent_person_ids: Vec<String>,
}

impl CrisisScenario {
    pub const BASELINE: &'static str = "baseline";

    /// 无人缺岗的基线场景
    pub fn baseline() -> Self {
        Self {
            name: Self::BASELINE.to_string(),
            absent_person_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackSchedule {
    pub scenario: String,
    pub program_id: String,
    pub window: DateRange,
    pub assignments: Vec<Assignment>,
    pub computed_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_report_staleness() {
        let report = VulnerabilityReport {
            report_id: "VR1".to_string(),
            program_id: "IM".to_string(),
            scenario: "baseline".to_string(),
            window: DateRange::new(at(1, 0).date(), at(28, 0).date()),
            generated_at: at(1, 8),
            centrality: vec![],
            baseline_uncovered: vec![],
            n1: vec![],
            n2: None,
        };
        assert!(!report.is_stale(at(2, 8), Duration::hours(24)));
        assert!(report.is_stale(at(2, 9), Duration::hours(24)));
        assert!(report.all_pass());
    }

    #[test]
    fn test_dark_activities_dedup() {
        let d = at(3, 0).date();
        let outcome = ContingencyOutcome {
            removed_person_ids: vec!["R1".to_string()],
            feasible: false,
            uncovered: vec![
                UncoveredActivity {
                    activity_id: "icu".to_string(),
                    slot: SlotKey::am(d),
                    shortfall: 1,
                },
                UncoveredActivity {
                    activity_id: "icu".to_string(),
                    slot: SlotKey::pm(d),
                    shortfall: 1,
                },
            ],
        };
        assert_eq!(outcome.dark_activities(), vec!["icu".to_string()]);
    }
}
