// ==========================================
// 住院医师排班系统 - 韧性层
// ==========================================
// 职责: 利用率监测 → 防御等级 → 削减/重算/兜底
//       + N-1/N-2 应急推演
// 红线: 防御等级只由新样本驱动; 推演只读
// ==========================================

pub mod contingency;
pub mod coordinator;
pub mod defense;
pub mod sacrifice;
pub mod static_stability;
pub mod utilization;

pub use contingency::ContingencyAnalyzer;
pub use coordinator::{CrisisCoordinator, CrisisResponse};
pub use defense::DefenseController;
pub use sacrifice::{LoadShedder, SacrificeHierarchy, ShedOutcome, ShedStep};
pub use static_stability::{scenario_snapshot, StaticStabilityCache};
pub use utilization::{measure, PeriodicSampler, UtilizationMonitor};
