// ==========================================
// 住院医师排班系统 - 换班审计仓储
// ==========================================
// swap_audit: 每次状态变化追加一行完整记录（只追加）
// swap_execution_snapshot: 执行前后分配快照（回滚依据）
// ==========================================

use crate::domain::swap::{ExecutionSnapshot, SwapRecord};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct SwapRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SwapRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加一条审计记录
    pub fn append_audit(&self, record: &SwapRecord) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let recorded_at = record
            .transitions
            .last()
            .map(|t| t.at)
            .unwrap_or(record.created_at);
        conn.execute(
            "INSERT INTO swap_audit (swap_id, status, record_json, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.swap_id,
                record.status.as_str(),
                serde_json::to_string(record)?,
                recorded_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 最新状态
    pub fn find_latest(&self, swap_id: &str) -> RepositoryResult<Option<SwapRecord>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT record_json FROM swap_audit WHERE swap_id = ?1 ORDER BY audit_id DESC LIMIT 1",
                params![swap_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    /// 全部审计记录（按追加顺序）
    pub fn history(&self, swap_id: &str) -> RepositoryResult<Vec<SwapRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT record_json FROM swap_audit WHERE swap_id = ?1 ORDER BY audit_id ASC")?;
        let rows = stmt
            .query_map(params![swap_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(RepositoryError::from))
            .collect()
    }

    /// 某 program 下每个换班的最新状态
    pub fn list_latest_by_program(&self, program_id: &str) -> RepositoryResult<Vec<SwapRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT a.record_json
            FROM swap_audit a
            JOIN (SELECT swap_id, MAX(audit_id) AS max_id FROM swap_audit GROUP BY swap_id) m
              ON a.audit_id = m.max_id
            ORDER BY a.audit_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut records = Vec::new();
        for json in rows {
            let record: SwapRecord = serde_json::from_str(&json)?;
            if record.program_id == program_id {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn insert_execution_snapshot(&self, snapshot: &ExecutionSnapshot) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO swap_execution_snapshot (snapshot_id, swap_id, before_json, after_json, taken_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                snapshot.snapshot_id,
                snapshot.swap_id,
                serde_json::to_string(&snapshot.before)?,
                serde_json::to_string(&snapshot.after)?,
                snapshot.taken_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_execution_snapshot(&self, snapshot_id: &str) -> RepositoryResult<Option<ExecutionSnapshot>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                "SELECT snapshot_id, swap_id, before_json, after_json, taken_at FROM swap_execution_snapshot WHERE snapshot_id = ?1",
                params![snapshot_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, chrono::NaiveDateTime>(4)?,
                    ))
                },
            )
            .optional()?;
        match raw {
            Some((snapshot_id, swap_id, before, after, taken_at)) => Ok(Some(ExecutionSnapshot {
                snapshot_id,
                swap_id,
                before: serde_json::from_str(&before)?,
                after: serde_json::from_str(&after)?,
                taken_at,
            })),
            None => Ok(None),
        }
    }

    /// 删除执行快照（仅用于执行失败时撤销未完成的写入）
    pub fn delete_execution_snapshot(&self, snapshot_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "DELETE FROM swap_execution_snapshot WHERE snapshot_id = ?1",
            params![snapshot_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::types::{SwapKind, SwapStatus};
    use chrono::NaiveDate;

    fn record(swap_id: &str, program_id: &str) -> SwapRecord {
        let at = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        SwapRecord::new(
            swap_id.to_string(),
            program_id,
            SwapKind::OneToOne,
            "f1",
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            "f2",
            Some(NaiveDate::from_ymd_opt(2026, 3, 16).unwrap()),
            "f1",
            at,
        )
    }

    #[test]
    fn test_audit_keeps_every_transition() {
        let repo = SwapRepository::from_connection(Arc::new(Mutex::new(open_in_memory().unwrap())));
        let mut swap = record("s-1", "IM");
        repo.append_audit(&swap).unwrap();
        let at = swap.created_at + chrono::Duration::hours(1);
        assert!(swap.advance(SwapStatus::Approved, "chief", at, None));
        repo.append_audit(&swap).unwrap();
        repo.append_audit(&record("s-2", "PEDS")).unwrap();

        let history = repo.history("s-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, SwapStatus::Pending);
        assert_eq!(repo.find_latest("s-1").unwrap().unwrap().status, SwapStatus::Approved);

        let im = repo.list_latest_by_program("IM").unwrap();
        assert_eq!(im.len(), 1);
        assert_eq!(im[0].status, SwapStatus::Approved);

        let conn = repo.get_conn().unwrap();
        assert!(conn.execute("UPDATE swap_audit SET status = 'EXECUTED'", []).is_err());
    }
}
