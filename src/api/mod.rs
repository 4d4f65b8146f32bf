// ==========================================
// 住院医师排班系统 - API 层
// ==========================================
// 职责: 对外暴露排班/韧性/换班业务接口
// ==========================================

pub mod error;
pub mod scheduling_api;
pub mod validator;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use scheduling_api::{
    Clock, FixedClock, GenerationResult, SchedulingApi, SwapProposal, SystemClock, UtilizationTick,
};
pub use validator::SwapRequest;
