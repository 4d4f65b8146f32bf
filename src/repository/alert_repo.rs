// ==========================================
// 住院医师排班系统 - 冲突告警仓储
// ==========================================
// 去重: (absence_id, assignment_id) 唯一,重复插入静默忽略
// ==========================================

use crate::domain::calendar::SlotKey;
use crate::domain::swap::ConflictAlert;
use crate::domain::types::{AlertStatus, SubPeriod};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

pub struct ConflictAlertRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = "alert_id, absence_id, assignment_id, person_id, slot_date, slot_period, \
     activity_id, status, created_at, resolved_at";

fn period_to_db(period: SubPeriod) -> &'static str {
    match period {
        SubPeriod::Am => "AM",
        SubPeriod::Pm => "PM",
    }
}

fn period_from_db(raw: &str) -> SubPeriod {
    if raw.eq_ignore_ascii_case("PM") {
        SubPeriod::Pm
    } else {
        SubPeriod::Am
    }
}

fn map_alert(row: &Row<'_>) -> rusqlite::Result<ConflictAlert> {
    let period: String = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(ConflictAlert {
        alert_id: row.get(0)?,
        absence_id: row.get(1)?,
        assignment_id: row.get(2)?,
        person_id: row.get(3)?,
        slot: SlotKey::new(row.get(4)?, period_from_db(&period)),
        activity_id: row.get(6)?,
        status: AlertStatus::from_str(&status),
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

impl ConflictAlertRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入告警（已存在则忽略）
    ///
    /// # 返回
    /// true = 新建, false = 重复
    pub fn insert_if_absent(&self, alert: &ConflictAlert) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            INSERT OR IGNORE INTO conflict_alert (
                alert_id, absence_id, assignment_id, person_id, slot_date, slot_period,
                activity_id, status, created_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                alert.alert_id,
                alert.absence_id,
                alert.assignment_id,
                alert.person_id,
                alert.slot.date,
                period_to_db(alert.slot.period),
                alert.activity_id,
                alert.status.to_db_str(),
                alert.created_at,
                alert.resolved_at,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn find_by_id(&self, alert_id: &str) -> RepositoryResult<Option<ConflictAlert>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM conflict_alert WHERE alert_id = ?1", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, params![alert_id], map_alert).optional()?)
    }

    pub fn list_for_absence(&self, absence_id: &str) -> RepositoryResult<Vec<ConflictAlert>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM conflict_alert WHERE absence_id = ?1 ORDER BY slot_date, slot_period",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![absence_id], map_alert)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_by_status(&self, status: AlertStatus) -> RepositoryResult<Vec<ConflictAlert>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM conflict_alert WHERE status = ?1 ORDER BY created_at, slot_date, slot_period",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.to_db_str()], map_alert)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 关闭告警（仅 OPEN → RESOLVED）
    ///
    /// # 返回
    /// true = 本次关闭, false = 已关闭
    pub fn resolve(&self, alert_id: &str, at: NaiveDateTime) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE conflict_alert SET status = ?1, resolved_at = ?2 WHERE alert_id = ?3 AND status = ?4",
            params![
                AlertStatus::Resolved.to_db_str(),
                at,
                alert_id,
                AlertStatus::Open.to_db_str()
            ],
        )?;
        if changed == 0 && self.exists_locked(&conn, alert_id)? {
            return Ok(false);
        }
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ConflictAlert".to_string(),
                id: alert_id.to_string(),
            });
        }
        Ok(true)
    }

    fn exists_locked(&self, conn: &Connection, alert_id: &str) -> RepositoryResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM conflict_alert WHERE alert_id = ?1",
                params![alert_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::NaiveDate;

    fn alert(alert_id: &str, assignment_id: &str) -> ConflictAlert {
        let date = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        ConflictAlert {
            alert_id: alert_id.to_string(),
            absence_id: "abs-1".to_string(),
            assignment_id: assignment_id.to_string(),
            person_id: "r1".to_string(),
            slot: SlotKey::pm(date),
            activity_id: "CLINIC".to_string(),
            status: AlertStatus::Open,
            created_at: date.and_hms_opt(7, 0, 0).unwrap(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_duplicate_alerts_are_ignored() {
        let repo = ConflictAlertRepository::from_connection(Arc::new(Mutex::new(open_in_memory().unwrap())));
        assert!(repo.insert_if_absent(&alert("a-1", "asg-1")).unwrap());
        assert!(!repo.insert_if_absent(&alert("a-2", "asg-1")).unwrap());
        assert!(repo.insert_if_absent(&alert("a-3", "asg-2")).unwrap());

        let alerts = repo.list_for_absence("abs-1").unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].slot.period, SubPeriod::Pm);
    }

    #[test]
    fn test_resolve_only_once() {
        let repo = ConflictAlertRepository::from_connection(Arc::new(Mutex::new(open_in_memory().unwrap())));
        repo.insert_if_absent(&alert("a-1", "asg-1")).unwrap();
        let at = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap().and_hms_opt(8, 0, 0).unwrap();

        assert!(repo.resolve("a-1", at).unwrap());
        assert!(!repo.resolve("a-1", at).unwrap());
        assert!(matches!(
            repo.resolve("missing", at),
            Err(RepositoryError::NotFound { .. })
        ));
        assert_eq!(repo.find_by_id("a-1").unwrap().unwrap().status, AlertStatus::Resolved);
        assert!(repo.list_by_status(AlertStatus::Open).unwrap().is_empty());
    }
}
