// ==========================================
// 住院医师排班系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、不变量
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod absence;
pub mod activity;
pub mod assignment;
pub mod calendar;
pub mod person;
pub mod resilience;
pub mod snapshot;
pub mod swap;
pub mod types;
pub mod violation;

// 重导出核心类型
pub use absence::Absence;
pub use activity::{ActivityTemplate, SupervisionRequirement};
pub use assignment::{Assignment, AssignmentChangeSet};
pub use calendar::{DateRange, Slot, SlotKey};
pub use person::{Person, Preferences};
pub use resilience::{
    ContingencyOutcome, CrisisScenario, DefenseStatus, DefenseTransition, FallbackSchedule,
    PersonCentrality, UncoveredActivity, UtilizationSample, VulnerabilityReport,
};
pub use snapshot::DomainSnapshot;
pub use swap::{ConflictAlert, ExecutionSnapshot, SwapRecord, SwapTransition};
pub use types::{
    ActivityCategory, AlertStatus, AssignmentRole, DefenseLevel, PersonRole, Severity,
    SnapshotStatus, SolveStatus, SubPeriod, SwapKind, SwapStatus, ViolationKind,
};
pub use violation::Violation;
