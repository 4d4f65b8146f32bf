// ==========================================
// 住院医师排班系统 - 引擎层错误类型
// ==========================================
// 说明: 合规违规为数据（Violation）,不作为错误抛出
//       不可行排班返回 PARTIAL,同样不是错误
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 输入错误 =====
    #[error("领域模型不合法: {}", .0.join("; "))]
    MalformedDomain(Vec<String>),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    // ===== 换班错误 =====
    #[error("换班校验失败 (swap_id={swap_id}): {}", .errors.join("; "))]
    SwapValidation { swap_id: String, errors: Vec<String> },

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    /// 执行失败（已完整回滚,step 为失败步骤）
    #[error("执行失败 (step={step}): {reason}")]
    ExecutionFailure { step: String, reason: String },

    #[error("回滚窗口已过期: swap_id={swap_id}")]
    RollbackWindowExpired { swap_id: String },

    // ===== 韧性错误 =====
    /// 无可削减层级且无兜底方案,需人工决策
    #[error("容量耗尽: program_id={program_id}, utilization={utilization:.3}")]
    CapacityExhausted { program_id: String, utilization: f64 },

    #[error("过期样本: seq={seq}, last_seq={last_seq}")]
    StaleSample { seq: u64, last_seq: u64 },

    // ===== 基础设施 =====
    #[error("冲突检测队列不可用: {0}")]
    QueueUnavailable(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
