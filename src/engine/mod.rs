// ==========================================
// 住院医师排班系统 - 引擎层
// ==========================================
// 职责: 合规校验、领域事件、窗口写锁、引擎错误
// 红线: Engine 不拼 SQL, 违规必须输出 message
// ==========================================

pub mod compliance;
pub mod error;
pub mod events;
pub mod window_lock;

pub use compliance::{new_hard_violations, ComplianceValidator, ValidationReport};
pub use error::{EngineError, EngineResult};
pub use events::{
    EngineEvent, EngineEventPublisher, EngineEventType, NoOpEventPublisher, OptionalEventPublisher,
    RecordingEventPublisher,
};
pub use window_lock::{WindowGuard, WindowLockRegistry};
