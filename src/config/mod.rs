// ==========================================
// 住院医师排班系统 - 配置层
// ==========================================
// 职责: 引擎配置（默认值 + JSON 加载 + 校验）与持久化覆写
// 存储: config_kv 表, config_override_log 表
// ==========================================

pub mod config_manager;
pub mod engine_config;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager, ConfigOverrideRecord, EngineConfigReader};
pub use engine_config::{
    ComplianceConfig, ContingencyConfig, CouplingRule, CrisisConfig, DefenseConfig, EngineConfig,
    SheddingConfig, SoftConstraintSetting, SoftConstraintSettings, SolverConfig, SwapConfig,
};
