// ==========================================
// 住院医师排班系统 - 换班层
// ==========================================
// 职责: 换班校验 / 状态流转 / 原子执行与回滚 / 缺勤冲突检测
// 红线: 执行失败时在线排班保持不变
// ==========================================

pub mod conflict;
pub mod executor;
pub mod lifecycle;
pub mod validator;

pub use conflict::{ConflictDetector, ConflictQueue, ConflictWorker, DetectionSummary, QueueDrainReport};
pub use executor::SwapExecutor;
pub use lifecycle::SwapLifecycle;
pub use validator::{SwapIssue, SwapIssueKind, SwapMove, SwapPlan, SwapValidationResult, SwapValidator};
