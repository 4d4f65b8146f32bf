// ==========================================
// 住院医师排班系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite（审计存储）
// 系统定位: 排班生成与危机韧性引擎 (人工最终控制权)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 合规校验/事件/窗口锁
pub mod engine;

// 约束目录 - 硬约束与软约束
pub mod constraints;

// 求解器层 - 排班生成策略
pub mod solver;

// 韧性层 - 利用率/防御等级/削减/兜底/推演
pub mod resilience;

// 换班层 - 校验/执行/回滚/冲突检测
pub mod swap;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ActivityCategory, AssignmentRole, DefenseLevel, PersonRole, Severity, SolveStatus, SubPeriod,
    SwapKind, SwapStatus, ViolationKind,
};

// 领域实体
pub use domain::{
    Absence, ActivityTemplate, Assignment, DateRange, DomainSnapshot, Person, Slot, SlotKey,
    SwapRecord, Violation, VulnerabilityReport,
};

// 引擎
pub use engine::{ComplianceValidator, EngineError, EngineResult, ValidationReport};
pub use solver::{ScheduleSolver, SolveBudget, SolveOutcome, SolverAlgorithm};

// API
pub use api::{ApiError, ApiResult, SchedulingApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "住院医师排班系统";

// 数据库版本
pub const DB_VERSION: &str = "v1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
