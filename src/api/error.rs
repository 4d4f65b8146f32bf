// ==========================================
// 住院医师排班系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型,将仓储/引擎错误转换为用户友好的错误消息
// 红线: 所有错误信息必须包含显式原因
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 排班/韧性错误
    // ==========================================
    /// 换班校验失败（未做任何修改）
    #[error("换班校验失败 (swap_id={swap_id}): {}", .errors.join("; "))]
    SwapValidationError { swap_id: String, errors: Vec<String> },

    /// 换班执行失败（已完整回滚）
    #[error("执行失败 (step={step}): {reason}")]
    ExecutionFailure { step: String, reason: String },

    #[error("回滚窗口已过期: {0}")]
    RollbackWindowExpired(String),

    /// 需人工决策,不自动解除
    #[error("容量耗尽: program_id={program_id}, utilization={utilization:.3}")]
    CapacityExhausted { program_id: String, utilization: f64 },

    #[error("过期样本: {0}")]
    StaleSample(String),

    #[error("冲突检测未完成: {0}")]
    ConflictDetectionPending(String),

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("变更集冲突: {0}")]
    ChangeSetConflict(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("队列不可用: {0}")]
    QueueUnavailable(String),

    #[error("内部错误: {0}")]
    InternalError(String),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 并发控制错误
            RepositoryError::ChangeSetConflict(msg) => ApiError::ChangeSetConflict(msg),

            // 数据库错误
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }

            // 数据质量错误
            RepositoryError::SerializationError(msg) => ApiError::DatabaseError(format!("序列化失败: {}", msg)),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::MalformedDomain(problems) => {
                ApiError::InvalidInput(format!("领域模型不合法: {}", problems.join("; ")))
            }
            EngineError::Config(msg) => ApiError::ConfigError(msg),
            EngineError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            EngineError::SwapValidation { swap_id, errors } => {
                ApiError::SwapValidationError { swap_id, errors }
            }
            EngineError::InvalidStateTransition { from, to } => ApiError::InvalidStateTransition { from, to },
            EngineError::ExecutionFailure { step, reason } => ApiError::ExecutionFailure { step, reason },
            EngineError::RollbackWindowExpired { swap_id } => ApiError::RollbackWindowExpired(swap_id),
            EngineError::CapacityExhausted {
                program_id,
                utilization,
            } => ApiError::CapacityExhausted {
                program_id,
                utilization,
            },
            EngineError::StaleSample { seq, last_seq } => {
                ApiError::StaleSample(format!("seq={} <= last_seq={}", seq, last_seq))
            }
            EngineError::QueueUnavailable(msg) => ApiError::QueueUnavailable(msg),
            EngineError::Internal(msg) => ApiError::InternalError(msg),
            EngineError::Repository(err) => ApiError::from(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_not_found_maps_to_not_found() {
        let err: ApiError = RepositoryError::NotFound {
            entity: "SwapRecord".to_string(),
            id: "SW-1".to_string(),
        }
        .into();
        assert!(matches!(err, ApiError::NotFound(ref msg) if msg.contains("SW-1")));
    }

    #[test]
    fn test_engine_errors_keep_failed_step() {
        let err: ApiError = EngineError::ExecutionFailure {
            step: "commit".to_string(),
            reason: "磁盘已满".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "执行失败 (step=commit): 磁盘已满");

        let wrapped: ApiError = EngineError::Repository(RepositoryError::LockError("poisoned".to_string())).into();
        assert!(matches!(wrapped, ApiError::DatabaseConnectionError(_)));
    }
}
