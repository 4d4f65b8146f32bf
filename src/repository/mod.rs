// ==========================================
// 住院医师排班系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 在线排班读写 + 审计数据（快照/防御日志/换班/报告/告警）
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod alert_repo;
pub mod defense_log_repo;
pub mod error;
pub mod schedule_repo;
pub mod snapshot_repo;
pub mod swap_repo;
pub mod vulnerability_repo;

// 重导出核心仓储
pub use alert_repo::ConflictAlertRepository;
pub use defense_log_repo::DefenseLogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use schedule_repo::{InMemoryScheduleRepository, ScheduleRepository};
pub use snapshot_repo::{NewScheduleSnapshot, ScheduleSnapshotEntity, ScheduleSnapshotRepository};
pub use swap_repo::SwapRepository;
pub use vulnerability_repo::VulnerabilityReportRepository;
