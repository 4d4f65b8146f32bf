// ==========================================
// 住院医师排班系统 - 领域类型定义
// ==========================================
// 职责: 枚举类型、等级体系、状态机状态
// 红线: 等级制,不是评分制
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 人员角色 (Person Role)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersonRole {
    Trainee,    // 住院医师
    Supervisor, // 带教/主治
}

impl fmt::Display for PersonRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonRole::Trainee => write!(f, "TRAINEE"),
            PersonRole::Supervisor => write!(f, "SUPERVISOR"),
        }
    }
}

// ==========================================
// 活动中角色 (Role in Activity)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentRole {
    Primary,     // 主责
    Supervising, // 带教监督
    Backup,      // 后备
}

impl fmt::Display for AssignmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentRole::Primary => write!(f, "PRIMARY"),
            AssignmentRole::Supervising => write!(f, "SUPERVISING"),
            AssignmentRole::Backup => write!(f, "BACKUP"),
        }
    }
}

// ==========================================
// 时段 (Sub Period)
// ==========================================
// 顺序: AM < PM（用于槽位序号计算）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubPeriod {
    Am, // 上午
    Pm, // 下午/夜间
}

impl SubPeriod {
    pub fn index(&self) -> i64 {
        match self {
            SubPeriod::Am => 0,
            SubPeriod::Pm => 1,
        }
    }

    pub fn all() -> [SubPeriod; 2] {
        [SubPeriod::Am, SubPeriod::Pm]
    }
}

impl fmt::Display for SubPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubPeriod::Am => write!(f, "AM"),
            SubPeriod::Pm => write!(f, "PM"),
        }
    }
}

// ==========================================
// 活动类别 (Activity Category)
// ==========================================
// 注意: 声明顺序不代表牺牲顺序
// 牺牲顺序由 SheddingConfig.sacrifice_order 显式配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityCategory {
    PatientSafety,     // 患者安全关键
    Accreditation,     // 认证必需
    ContinuityOfCare,  // 连续性照护
    CoreEducation,     // 核心教学
    Research,          // 科研
    Administration,    // 行政
    OptionalEducation, // 选修教学
}

impl ActivityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityCategory::PatientSafety => "PATIENT_SAFETY",
            ActivityCategory::Accreditation => "ACCREDITATION",
            ActivityCategory::ContinuityOfCare => "CONTINUITY_OF_CARE",
            ActivityCategory::CoreEducation => "CORE_EDUCATION",
            ActivityCategory::Research => "RESEARCH",
            ActivityCategory::Administration => "ADMINISTRATION",
            ActivityCategory::OptionalEducation => "OPTIONAL_EDUCATION",
        }
    }

    pub fn all() -> [ActivityCategory; 7] {
        [
            ActivityCategory::PatientSafety,
            ActivityCategory::Accreditation,
            ActivityCategory::ContinuityOfCare,
            ActivityCategory::CoreEducation,
            ActivityCategory::Research,
            ActivityCategory::Administration,
            ActivityCategory::OptionalEducation,
        ]
    }
}

impl fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 防御等级 (Defense Level)
// ==========================================
// 顺序: Green < Yellow < Orange < Red < Black < Critical
// 红线: 只能由重新计算的利用率样本驱动,不可外部直接写入
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefenseLevel {
    Green,    // 正常 (<70%)
    Yellow,   // 关注 (70-80%)
    Orange,   // 紧张 (80-90%)
    Red,      // 危险 (90-95%)
    Black,    // 极限 (>=95%)
    Critical, // 级联不可行,需人工决策
}

impl DefenseLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefenseLevel::Green => "GREEN",
            DefenseLevel::Yellow => "YELLOW",
            DefenseLevel::Orange => "ORANGE",
            DefenseLevel::Red => "RED",
            DefenseLevel::Black => "BLACK",
            DefenseLevel::Critical => "CRITICAL",
        }
    }

    /// 等级序号（用于"每次采样最多跨一级"的判定）
    pub fn rank(&self) -> u8 {
        match self {
            DefenseLevel::Green => 0,
            DefenseLevel::Yellow => 1,
            DefenseLevel::Orange => 2,
            DefenseLevel::Red => 3,
            DefenseLevel::Black => 4,
            DefenseLevel::Critical => 5,
        }
    }

    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 => DefenseLevel::Green,
            1 => DefenseLevel::Yellow,
            2 => DefenseLevel::Orange,
            3 => DefenseLevel::Red,
            4 => DefenseLevel::Black,
            _ => DefenseLevel::Critical,
        }
    }

    /// 向目标等级移动一级
    pub fn step_toward(&self, target: DefenseLevel) -> DefenseLevel {
        let (cur, tgt) = (self.rank(), target.rank());
        if tgt > cur {
            DefenseLevel::from_rank(cur + 1)
        } else if tgt < cur {
            DefenseLevel::from_rank(cur - 1)
        } else {
            *self
        }
    }
}

impl fmt::Display for DefenseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DefenseLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GREEN" => Ok(DefenseLevel::Green),
            "YELLOW" => Ok(DefenseLevel::Yellow),
            "ORANGE" => Ok(DefenseLevel::Orange),
            "RED" => Ok(DefenseLevel::Red),
            "BLACK" => Ok(DefenseLevel::Black),
            "CRITICAL" => Ok(DefenseLevel::Critical),
            other => Err(format!("未知防御等级: {}", other)),
        }
    }
}

// ==========================================
// 违规严重度 (Severity)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Hard, // 硬约束: 必须为零
    Soft, // 软约束: 加权惩罚
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Hard => write!(f, "HARD"),
            Severity::Soft => write!(f, "SOFT"),
        }
    }
}

// ==========================================
// 违规类型 (Violation Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    // ===== 硬约束 =====
    DutyHourCeiling,
    RestDayFrequency,
    SupervisionRatio,
    PostExtendedDutyRest,
    Availability,
    DoubleBooking,
    Qualification,
    ActivityCapacity,
    CoverageGap,
    WorkloadCap,
    // ===== 软约束（韧性）=====
    HubProtection,
    UtilizationBuffer,
    ZoneBoundary,
    PreferenceTrail,
    N1Vulnerability,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::DutyHourCeiling => "DUTY_HOUR_CEILING",
            ViolationKind::RestDayFrequency => "REST_DAY_FREQUENCY",
            ViolationKind::SupervisionRatio => "SUPERVISION_RATIO",
            ViolationKind::PostExtendedDutyRest => "POST_EXTENDED_DUTY_REST",
            ViolationKind::Availability => "AVAILABILITY",
            ViolationKind::DoubleBooking => "DOUBLE_BOOKING",
            ViolationKind::Qualification => "QUALIFICATION",
            ViolationKind::ActivityCapacity => "ACTIVITY_CAPACITY",
            ViolationKind::CoverageGap => "COVERAGE_GAP",
            ViolationKind::WorkloadCap => "WORKLOAD_CAP",
            ViolationKind::HubProtection => "HUB_PROTECTION",
            ViolationKind::UtilizationBuffer => "UTILIZATION_BUFFER",
            ViolationKind::ZoneBoundary => "ZONE_BOUNDARY",
            ViolationKind::PreferenceTrail => "PREFERENCE_TRAIL",
            ViolationKind::N1Vulnerability => "N1_VULNERABILITY",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 换班类型 (Swap Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapKind {
    OneToOne, // 一换一
    Absorb,   // 单向接收
}

impl fmt::Display for SwapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapKind::OneToOne => write!(f, "ONE_TO_ONE"),
            SwapKind::Absorb => write!(f, "ABSORB"),
        }
    }
}

// ==========================================
// 换班状态 (Swap Status)
// ==========================================
// 状态机: PENDING → APPROVED → EXECUTED → ROLLED_BACK
//         PENDING/APPROVED → REJECTED/CANCELLED (终态)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Pending,
    Approved,
    Executed,
    Rejected,
    Cancelled,
    RolledBack,
}

impl SwapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Pending => "PENDING",
            SwapStatus::Approved => "APPROVED",
            SwapStatus::Executed => "EXECUTED",
            SwapStatus::Rejected => "REJECTED",
            SwapStatus::Cancelled => "CANCELLED",
            SwapStatus::RolledBack => "ROLLED_BACK",
        }
    }

    /// 状态转换合法性（不含回滚窗口判断）
    pub fn can_transition_to(&self, to: SwapStatus) -> bool {
        matches!(
            (self, to),
            (SwapStatus::Pending, SwapStatus::Approved)
                | (SwapStatus::Pending, SwapStatus::Rejected)
                | (SwapStatus::Pending, SwapStatus::Cancelled)
                | (SwapStatus::Approved, SwapStatus::Executed)
                | (SwapStatus::Approved, SwapStatus::Rejected)
                | (SwapStatus::Approved, SwapStatus::Cancelled)
                | (SwapStatus::Executed, SwapStatus::RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Rejected | SwapStatus::Cancelled | SwapStatus::RolledBack
        )
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 求解状态 (Solve Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Success, // 全部硬约束满足
    Partial, // 预算内未能满足全部硬约束,附完整未解决违规
    Failed,  // 领域模型本身不合法
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Success => write!(f, "SUCCESS"),
            SolveStatus::Partial => write!(f, "PARTIAL"),
            SolveStatus::Failed => write!(f, "FAILED"),
        }
    }
}

// ==========================================
// 排班快照状态 (Snapshot Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    Accepted, // 已接受（零硬违规）
    Partial,  // 部分结果（仅存档,不替换在线排班）
    Fallback, // 静态稳定兜底方案
}

impl SnapshotStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Accepted => "ACCEPTED",
            SnapshotStatus::Partial => "PARTIAL",
            SnapshotStatus::Fallback => "FALLBACK",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "ACCEPTED" => SnapshotStatus::Accepted,
            "FALLBACK" => SnapshotStatus::Fallback,
            _ => SnapshotStatus::Partial,
        }
    }
}

// ==========================================
// 冲突告警状态 (Alert Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Resolved,
}

impl AlertStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "OPEN",
            AlertStatus::Resolved => "RESOLVED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "RESOLVED" => AlertStatus::Resolved,
            _ => AlertStatus::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defense_level_ordering() {
        assert!(DefenseLevel::Green < DefenseLevel::Yellow);
        assert!(DefenseLevel::Red < DefenseLevel::Black);
        assert!(DefenseLevel::Black < DefenseLevel::Critical);
    }

    #[test]
    fn test_defense_level_step_toward() {
        assert_eq!(
            DefenseLevel::Green.step_toward(DefenseLevel::Orange),
            DefenseLevel::Yellow
        );
        assert_eq!(
            DefenseLevel::Red.step_toward(DefenseLevel::Green),
            DefenseLevel::Orange
        );
        assert_eq!(
            DefenseLevel::Yellow.step_toward(DefenseLevel::Yellow),
            DefenseLevel::Yellow
        );
    }

    #[test]
    fn test_swap_status_never_skips_approved() {
        assert!(!SwapStatus::Pending.can_transition_to(SwapStatus::Executed));
        assert!(SwapStatus::Approved.can_transition_to(SwapStatus::Executed));
        assert!(!SwapStatus::Executed.can_transition_to(SwapStatus::Pending));
        assert!(!SwapStatus::Rejected.can_transition_to(SwapStatus::Approved));
    }

    #[test]
    fn test_defense_level_from_str() {
        assert_eq!("orange".parse::<DefenseLevel>(), Ok(DefenseLevel::Orange));
        assert!("purple".parse::<DefenseLevel>().is_err());
    }
}
