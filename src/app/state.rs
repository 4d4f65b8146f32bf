// ==========================================
// 住院医师排班系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{SchedulingApi, SystemClock};
use crate::config::{ConfigManager, EngineConfigReader};
use crate::db::{open_in_memory, open_sqlite_connection};
use crate::engine::events::EngineEventPublisher;
use crate::repository::InMemoryScheduleRepository;

/// 应用状态
///
/// 包含API实例和共享资源
pub struct AppState {
    /// 数据库路径（内存库为 ":memory:"）
    pub db_path: String,

    /// 排班API
    pub scheduling_api: Arc<SchedulingApi>,

    /// 在线排班仓储（内存实现,由宿主载入快照）
    pub schedule_repo: Arc<InMemoryScheduleRepository>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 审计库文件路径
    /// - event_publisher: 事件发布器（可选）
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开审计库并建表
    /// 2. 从 config_kv 读取引擎配置（未配置时用默认值）
    /// 3. 创建 SchedulingApi
    pub async fn new(
        db_path: String,
        event_publisher: Option<Arc<dyn EngineEventPublisher>>,
    ) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        Self::build(db_path, Arc::new(Mutex::new(conn)), event_publisher).await
    }

    /// 使用内存审计库创建（CLI 临时运行、测试）
    pub async fn in_memory(event_publisher: Option<Arc<dyn EngineEventPublisher>>) -> Result<Self, String> {
        let conn = open_in_memory().map_err(|e| format!("无法打开内存数据库: {}", e))?;
        Self::build(":memory:".to_string(), Arc::new(Mutex::new(conn)), event_publisher).await
    }

    async fn build(
        db_path: String,
        conn: Arc<Mutex<rusqlite::Connection>>,
        event_publisher: Option<Arc<dyn EngineEventPublisher>>,
    ) -> Result<Self, String> {
        // 配置管理器（同时负责建表）
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config = config_manager
            .load_engine_config()
            .await
            .map_err(|e| format!("引擎配置加载失败: {}", e))?;

        let schedule_repo = Arc::new(InMemoryScheduleRepository::new());
        let scheduling_api = Arc::new(
            SchedulingApi::new(
                schedule_repo.clone(),
                conn,
                config,
                event_publisher,
                Arc::new(SystemClock),
            )
            .map_err(|e| format!("无法创建SchedulingApi: {}", e))?,
        );

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            scheduling_api,
            schedule_repo,
            config_manager,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - RESIDENCY_APS_DB_PATH 环境变量（非空时）
/// - 否则: 用户数据目录/residency-aps/residency_aps.db
pub fn get_default_db_path() -> String {
    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("RESIDENCY_APS_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let path = ConfigManager::default_db_path();
    if let Some(dir) = path.parent() {
        // 目录创建失败时由打开数据库报错
        std::fs::create_dir_all(dir).ok();
    }
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_state_uses_default_config() {
        let state = AppState::in_memory(None).await.unwrap();
        assert_eq!(state.get_db_path(), ":memory:");
        assert_eq!(state.scheduling_api.config().swap.rollback_window_hours, 24);
    }
}
