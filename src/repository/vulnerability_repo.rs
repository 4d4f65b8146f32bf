// ==========================================
// 住院医师排班系统 - 脆弱性报告仓储
// ==========================================
// 红线: 报告写入后不可修改,重新分析写入新报告
// ==========================================

use crate::domain::resilience::VulnerabilityReport;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct VulnerabilityReportRepository {
    conn: Arc<Mutex<Connection>>,
}

impl VulnerabilityReportRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, report: &VulnerabilityReport) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO vulnerability_report (report_id, program_id, scenario, generated_at, report_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                report.report_id,
                report.program_id,
                report.scenario,
                report.generated_at,
                serde_json::to_string(report)?,
            ],
        )?;
        Ok(())
    }

    /// 最新报告（按场景）
    pub fn find_latest(&self, program_id: &str, scenario: &str) -> RepositoryResult<Option<VulnerabilityReport>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                r#"
                SELECT report_json FROM vulnerability_report
                WHERE program_id = ?1 AND scenario = ?2
                ORDER BY generated_at DESC, rowid DESC
                LIMIT 1
                "#,
                params![program_id, scenario],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    pub fn list_by_program(&self, program_id: &str) -> RepositoryResult<Vec<VulnerabilityReport>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT report_json FROM vulnerability_report WHERE program_id = ?1 ORDER BY generated_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![program_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(RepositoryError::from))
            .collect()
    }
}
