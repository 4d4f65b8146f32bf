// ==========================================
// 住院医师排班系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理、软约束禁用审计
// 存储: config_kv 表 (key-value + scope)
//       config_override_log 表 (只追加)
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::db::{init_schema, open_sqlite_connection};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// EngineConfigReader Trait
// ==========================================
// 用途: API 层启动时读取引擎配置
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait EngineConfigReader: Send + Sync {
    /// 读取并校验引擎配置（未配置时返回默认值）
    async fn load_engine_config(&self) -> ConfigResult<EngineConfig>;
}

/// 软约束禁用审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrideRecord {
    pub log_id: String,
    pub constraint_name: String,
    pub reason: String,
    pub overridden_by: String,
    pub logged_at: NaiveDateTime,
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例（自动建表,幂等）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
            init_schema(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 默认数据库路径（用户数据目录下）
    pub fn default_db_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("residency-aps")
            .join("residency_aps.db")
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// 保存引擎配置
    ///
    /// # 说明
    /// - 先校验,校验失败不写入
    /// - 每个被禁用的软约束追加一条 config_override_log 审计记录
    pub fn save_engine_config(&self, config: &EngineConfig, at: NaiveDateTime) -> ConfigResult<usize> {
        config.validate()?;
        let raw = serde_json::to_string(config)?;
        self.set_global_config_value(config_keys::ENGINE_CONFIG, &raw)?;
        self.record_soft_constraint_overrides(config, at)
    }

    /// 记录软约束禁用审计
    pub fn record_soft_constraint_overrides(
        &self,
        config: &EngineConfig,
        at: NaiveDateTime,
    ) -> ConfigResult<usize> {
        let disabled = config.disabled_soft_constraints();
        if disabled.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let tx = conn.unchecked_transaction()?;
        for (name, setting) in &disabled {
            let reason = setting.override_reason.clone().unwrap_or_default();
            let by = setting.override_by.clone().unwrap_or_default();
            tx.execute(
                "INSERT INTO config_override_log (log_id, constraint_name, reason, overridden_by, logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    name,
                    reason,
                    by,
                    at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ],
            )?;
            tracing::warn!(
                constraint = %name,
                overridden_by = %by,
                reason = %reason,
                "软约束已被禁用（审计覆写）"
            );
        }
        tx.commit()?;
        Ok(disabled.len())
    }

    /// 查询软约束禁用审计记录（按时间升序）
    pub fn list_override_log(&self) -> ConfigResult<Vec<ConfigOverrideRecord>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT log_id, constraint_name, reason, overridden_by, logged_at
             FROM config_override_log ORDER BY logged_at, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            let logged_at: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                logged_at,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (log_id, constraint_name, reason, overridden_by, logged_at) = row?;
            let logged_at = NaiveDateTime::parse_from_str(&logged_at, "%Y-%m-%d %H:%M:%S")?;
            records.push(ConfigOverrideRecord {
                log_id,
                constraint_name,
                reason,
                overridden_by,
                logged_at,
            });
        }
        Ok(records)
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 在保存排班快照时记录配置快照
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }
}

#[async_trait]
impl EngineConfigReader for ConfigManager {
    async fn load_engine_config(&self) -> ConfigResult<EngineConfig> {
        match self.get_config_value(config_keys::ENGINE_CONFIG)? {
            Some(raw) => Ok(EngineConfig::from_json_str(&raw)?),
            None => {
                tracing::info!("未找到引擎配置，使用默认值");
                Ok(EngineConfig::default())
            }
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    /// 完整引擎配置（JSON）
    pub const ENGINE_CONFIG: &str = "engine_config";
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_default_when_missing() {
        let mgr = manager();
        let config = mgr.load_engine_config().await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_reload_with_override_log() {
        let mgr = manager();
        let mut config = EngineConfig::default();
        config.soft_constraints.preference_trail.enabled = false;
        config.soft_constraints.preference_trail.override_reason = Some("疫情期间".to_string());
        config.soft_constraints.preference_trail.override_by = Some("pd".to_string());

        let logged = mgr.save_engine_config(&config, at()).unwrap();
        assert_eq!(logged, 1);

        let reloaded = mgr.load_engine_config().await.unwrap();
        assert!(!reloaded.soft_constraints.preference_trail.enabled);

        let log = mgr.list_override_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].constraint_name, "PREFERENCE_TRAIL");
        assert_eq!(log[0].overridden_by, "pd");
    }

    #[test]
    fn test_save_rejects_unaudited_disable() {
        let mgr = manager();
        let mut config = EngineConfig::default();
        config.soft_constraints.hub_protection.enabled = false;
        assert!(mgr.save_engine_config(&config, at()).is_err());
        assert!(mgr.get_global_config_value(config_keys::ENGINE_CONFIG).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_config_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aps.db");
        let path = path.to_str().unwrap();

        let mut config = EngineConfig::default();
        config.swap.rollback_window_hours = 48;
        ConfigManager::new(path).unwrap().save_engine_config(&config, at()).unwrap();

        let reopened = ConfigManager::new(path).unwrap();
        let loaded = reopened.load_engine_config().await.unwrap();
        assert_eq!(loaded.swap.rollback_window_hours, 48);
        assert!(reopened.list_override_log().unwrap().is_empty());
    }

    #[test]
    fn test_config_snapshot() {
        let mgr = manager();
        mgr.set_global_config_value("a", "1").unwrap();
        mgr.set_global_config_value("b", "2").unwrap();
        let snapshot = mgr.get_config_snapshot().unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["b"], "2");
    }
}
