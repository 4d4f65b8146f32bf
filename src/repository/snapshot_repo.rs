// ==========================================
// 住院医师排班系统 - 排班快照仓储
// ==========================================
// 职责: 按 program 版本化存档求解结果（ACCEPTED / PARTIAL / FALLBACK）
// 红线: 快照写入后不可修改（schedule_snapshot 触发器保证）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::assignment::Assignment;
use crate::domain::calendar::DateRange;
use crate::domain::types::SnapshotStatus;
use crate::domain::violation::Violation;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// ScheduleSnapshotEntity - 快照实体
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSnapshotEntity {
    pub snapshot_id: String,
    pub program_id: String,
    pub version: i64,
    pub status: SnapshotStatus,
    pub window: DateRange,
    pub algorithm: String,
    pub assignments: Vec<Assignment>,
    pub violations: Vec<Violation>,
    pub config_snapshot_json: Option<String>,
    pub created_at: NaiveDateTime,
}

/// 新快照（version 由仓储分配）
#[derive(Debug, Clone)]
pub struct NewScheduleSnapshot<'a> {
    pub program_id: &'a str,
    pub status: SnapshotStatus,
    pub window: DateRange,
    pub algorithm: &'a str,
    pub assignments: &'a [Assignment],
    pub violations: &'a [Violation],
    pub config_snapshot_json: Option<String>,
    pub created_at: NaiveDateTime,
}

pub struct ScheduleSnapshotRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = "snapshot_id, program_id, version, status, window_start, window_end, \
     algorithm, assignments_json, violations_json, config_snapshot_json, created_at";

impl ScheduleSnapshotRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入新版本快照
    ///
    /// # 返回
    /// 新快照实体（version = 当前最大版本 + 1）
    pub fn insert(&self, snapshot: NewScheduleSnapshot<'_>) -> RepositoryResult<ScheduleSnapshotEntity> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM schedule_snapshot WHERE program_id = ?1",
            params![snapshot.program_id],
            |row| row.get(0),
        )?;

        let entity = ScheduleSnapshotEntity {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            program_id: snapshot.program_id.to_string(),
            version,
            status: snapshot.status,
            window: snapshot.window,
            algorithm: snapshot.algorithm.to_string(),
            assignments: snapshot.assignments.to_vec(),
            violations: snapshot.violations.to_vec(),
            config_snapshot_json: snapshot.config_snapshot_json,
            created_at: snapshot.created_at,
        };

        tx.execute(
            r#"
            INSERT INTO schedule_snapshot (
                snapshot_id, program_id, version, status, window_start, window_end,
                algorithm, assignments_json, violations_json, config_snapshot_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                entity.snapshot_id,
                entity.program_id,
                entity.version,
                entity.status.to_db_str(),
                entity.window.start,
                entity.window.end,
                entity.algorithm,
                serde_json::to_string(&entity.assignments)?,
                serde_json::to_string(&entity.violations)?,
                entity.config_snapshot_json,
                entity.created_at,
            ],
        )?;
        tx.commit()?;

        tracing::debug!(
            program_id = %entity.program_id,
            version = entity.version,
            status = entity.status.to_db_str(),
            "排班快照已存档"
        );
        Ok(entity)
    }

    pub fn find_by_version(&self, program_id: &str, version: i64) -> RepositoryResult<Option<ScheduleSnapshotEntity>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM schedule_snapshot WHERE program_id = ?1 AND version = ?2",
            SELECT_COLUMNS
        );
        let raw = conn
            .query_row(&sql, params![program_id, version], RawSnapshotRow::from_row)
            .optional()?;
        raw.map(RawSnapshotRow::into_entity).transpose()
    }

    /// 最新快照（可按状态过滤）
    pub fn find_latest(
        &self,
        program_id: &str,
        status: Option<SnapshotStatus>,
    ) -> RepositoryResult<Option<ScheduleSnapshotEntity>> {
        let conn = self.get_conn()?;
        let raw = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM schedule_snapshot WHERE program_id = ?1 AND status = ?2 \
                     ORDER BY version DESC LIMIT 1",
                    SELECT_COLUMNS
                );
                conn.query_row(&sql, params![program_id, status.to_db_str()], RawSnapshotRow::from_row)
                    .optional()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM schedule_snapshot WHERE program_id = ?1 ORDER BY version DESC LIMIT 1",
                    SELECT_COLUMNS
                );
                conn.query_row(&sql, params![program_id], RawSnapshotRow::from_row)
                    .optional()?
            }
        };
        raw.map(RawSnapshotRow::into_entity).transpose()
    }

    /// 版本列表（升序）
    pub fn list_by_program(&self, program_id: &str) -> RepositoryResult<Vec<ScheduleSnapshotEntity>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM schedule_snapshot WHERE program_id = ?1 ORDER BY version ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![program_id], RawSnapshotRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawSnapshotRow::into_entity).collect()
    }
}

/// 原始行（JSON 解析放在锁外的映射阶段）
struct RawSnapshotRow {
    snapshot_id: String,
    program_id: String,
    version: i64,
    status: String,
    window_start: NaiveDate,
    window_end: NaiveDate,
    algorithm: String,
    assignments_json: String,
    violations_json: String,
    config_snapshot_json: Option<String>,
    created_at: NaiveDateTime,
}

impl RawSnapshotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            snapshot_id: row.get(0)?,
            program_id: row.get(1)?,
            version: row.get(2)?,
            status: row.get(3)?,
            window_start: row.get(4)?,
            window_end: row.get(5)?,
            algorithm: row.get(6)?,
            assignments_json: row.get(7)?,
            violations_json: row.get(8)?,
            config_snapshot_json: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_entity(self) -> RepositoryResult<ScheduleSnapshotEntity> {
        Ok(ScheduleSnapshotEntity {
            snapshot_id: self.snapshot_id,
            program_id: self.program_id,
            version: self.version,
            status: SnapshotStatus::from_str(&self.status),
            window: DateRange::new(self.window_start, self.window_end),
            algorithm: self.algorithm,
            assignments: serde_json::from_str(&self.assignments_json)?,
            violations: serde_json::from_str(&self.violations_json)?,
            config_snapshot_json: self.config_snapshot_json,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::calendar::SlotKey;
    use crate::domain::types::AssignmentRole;

    fn repo() -> ScheduleSnapshotRepository {
        ScheduleSnapshotRepository::from_connection(Arc::new(Mutex::new(open_in_memory().unwrap())))
    }

    fn window() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
        )
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    #[test]
    fn test_versions_increment_per_program() {
        let repo = repo();
        let assignments = vec![Assignment::new(
            "r1",
            SlotKey::am(window().start),
            "CLINIC",
            AssignmentRole::Primary,
            "solver:greedy",
        )];
        let new = |program_id, status| NewScheduleSnapshot {
            program_id,
            status,
            window: window(),
            algorithm: "GREEDY",
            assignments: &assignments,
            violations: &[],
            config_snapshot_json: None,
            created_at: at(),
        };

        assert_eq!(repo.insert(new("IM", SnapshotStatus::Accepted)).unwrap().version, 1);
        assert_eq!(repo.insert(new("IM", SnapshotStatus::Partial)).unwrap().version, 2);
        assert_eq!(repo.insert(new("PEDS", SnapshotStatus::Accepted)).unwrap().version, 1);

        let latest_accepted = repo.find_latest("IM", Some(SnapshotStatus::Accepted)).unwrap().unwrap();
        assert_eq!(latest_accepted.version, 1);
        assert_eq!(latest_accepted.assignments, assignments);
        assert_eq!(repo.find_latest("IM", None).unwrap().unwrap().version, 2);
        assert_eq!(repo.list_by_program("IM").unwrap().len(), 2);
    }

    #[test]
    fn test_snapshot_rows_are_write_once() {
        let repo = repo();
        let entity = repo
            .insert(NewScheduleSnapshot {
                program_id: "IM",
                status: SnapshotStatus::Partial,
                window: window(),
                algorithm: "CP",
                assignments: &[],
                violations: &[],
                config_snapshot_json: None,
                created_at: at(),
            })
            .unwrap();

        let conn = repo.get_conn().unwrap();
        let result = conn.execute(
            "UPDATE schedule_snapshot SET status = 'ACCEPTED' WHERE snapshot_id = ?1",
            params![entity.snapshot_id],
        );
        assert!(result.is_err());
    }
}
