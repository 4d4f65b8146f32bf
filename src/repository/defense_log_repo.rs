// ==========================================
// 住院医师排班系统 - 防御等级日志仓储
// ==========================================
// 红线: 只追加,不修改不删除（触发器保证）
// ==========================================

use crate::domain::resilience::DefenseTransition;
use crate::domain::types::DefenseLevel;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub struct DefenseLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DefenseLogRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn append(&self, transition: &DefenseTransition) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO defense_transition_log (
                transition_id, program_id, from_level, to_level, utilization, sample_seq, at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                transition.transition_id,
                transition.program_id,
                transition.from.as_str(),
                transition.to.as_str(),
                transition.utilization,
                transition.sample_seq as i64,
                transition.at,
            ],
        )?;
        Ok(())
    }

    /// 按时间顺序列出某 program 的全部转换
    pub fn list_by_program(&self, program_id: &str) -> RepositoryResult<Vec<DefenseTransition>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT transition_id, program_id, from_level, to_level, utilization, sample_seq, at
            FROM defense_transition_log
            WHERE program_id = ?1
            ORDER BY at ASC, sample_seq ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![program_id], map_transition)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn latest(&self, program_id: &str) -> RepositoryResult<Option<DefenseTransition>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT transition_id, program_id, from_level, to_level, utilization, sample_seq, at
                FROM defense_transition_log
                WHERE program_id = ?1
                ORDER BY at DESC, sample_seq DESC
                LIMIT 1
                "#,
                params![program_id],
                map_transition,
            )
            .optional()?;
        Ok(row)
    }
}

fn parse_level(raw: String, idx: usize) -> rusqlite::Result<DefenseLevel> {
    DefenseLevel::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

fn map_transition(row: &Row<'_>) -> rusqlite::Result<DefenseTransition> {
    Ok(DefenseTransition {
        transition_id: row.get(0)?,
        program_id: row.get(1)?,
        from: parse_level(row.get(2)?, 2)?,
        to: parse_level(row.get(3)?, 3)?,
        utilization: row.get(4)?,
        sample_seq: row.get::<_, i64>(5)? as u64,
        at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::NaiveDate;

    #[test]
    fn test_append_and_read_back() {
        let repo = DefenseLogRepository::from_connection(Arc::new(Mutex::new(open_in_memory().unwrap())));
        let at = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let transition = DefenseTransition {
            transition_id: "t-1".to_string(),
            program_id: "IM".to_string(),
            from: DefenseLevel::Green,
            to: DefenseLevel::Yellow,
            utilization: 0.82,
            sample_seq: 7,
            at,
        };
        repo.append(&transition).unwrap();

        assert_eq!(repo.list_by_program("IM").unwrap(), vec![transition.clone()]);
        assert_eq!(repo.latest("IM").unwrap(), Some(transition));
        assert!(repo.latest("PEDS").unwrap().is_none());

        let conn = repo.get_conn().unwrap();
        assert!(conn.execute("DELETE FROM defense_transition_log", []).is_err());
    }
}
