// ==========================================
// 住院医师排班系统 - 应用层
// ==========================================
// 职责: 组装仓储/引擎/API,供 CLI 与宿主进程使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
