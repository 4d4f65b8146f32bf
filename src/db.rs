// ==========================================
// 住院医师排班系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 审计表结构幂等创建,只追加表由触发器保护
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库并建表（测试与 CLI 临时运行）
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS config_override_log (
    log_id TEXT PRIMARY KEY,
    constraint_name TEXT NOT NULL,
    reason TEXT NOT NULL,
    overridden_by TEXT NOT NULL,
    logged_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedule_snapshot (
    snapshot_id TEXT PRIMARY KEY,
    program_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    status TEXT NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    algorithm TEXT NOT NULL,
    assignments_json TEXT NOT NULL,
    violations_json TEXT NOT NULL,
    config_snapshot_json TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (program_id, version)
);

CREATE TABLE IF NOT EXISTS defense_transition_log (
    transition_id TEXT PRIMARY KEY,
    program_id TEXT NOT NULL,
    from_level TEXT NOT NULL,
    to_level TEXT NOT NULL,
    utilization REAL NOT NULL,
    sample_seq INTEGER NOT NULL,
    at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS swap_audit (
    audit_id INTEGER PRIMARY KEY AUTOINCREMENT,
    swap_id TEXT NOT NULL,
    status TEXT NOT NULL,
    record_json TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_swap_audit_swap ON swap_audit (swap_id, audit_id);

CREATE TABLE IF NOT EXISTS swap_execution_snapshot (
    snapshot_id TEXT PRIMARY KEY,
    swap_id TEXT NOT NULL,
    before_json TEXT NOT NULL,
    after_json TEXT NOT NULL,
    taken_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vulnerability_report (
    report_id TEXT PRIMARY KEY,
    program_id TEXT NOT NULL,
    scenario TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    report_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conflict_alert (
    alert_id TEXT PRIMARY KEY,
    absence_id TEXT NOT NULL,
    assignment_id TEXT NOT NULL,
    person_id TEXT NOT NULL,
    slot_date TEXT NOT NULL,
    slot_period TEXT NOT NULL,
    activity_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    UNIQUE (absence_id, assignment_id)
);

CREATE TRIGGER IF NOT EXISTS trg_schedule_snapshot_no_update
BEFORE UPDATE ON schedule_snapshot
BEGIN SELECT RAISE(ABORT, 'schedule_snapshot is write-once'); END;

CREATE TRIGGER IF NOT EXISTS trg_defense_log_no_update
BEFORE UPDATE ON defense_transition_log
BEGIN SELECT RAISE(ABORT, 'defense_transition_log is append-only'); END;

CREATE TRIGGER IF NOT EXISTS trg_defense_log_no_delete
BEFORE DELETE ON defense_transition_log
BEGIN SELECT RAISE(ABORT, 'defense_transition_log is append-only'); END;

CREATE TRIGGER IF NOT EXISTS trg_swap_audit_no_update
BEFORE UPDATE ON swap_audit
BEGIN SELECT RAISE(ABORT, 'swap_audit is append-only'); END;

CREATE TRIGGER IF NOT EXISTS trg_swap_audit_no_delete
BEFORE DELETE ON swap_audit
BEGIN SELECT RAISE(ABORT, 'swap_audit is append-only'); END;

CREATE TRIGGER IF NOT EXISTS trg_vulnerability_report_no_update
BEFORE UPDATE ON vulnerability_report
BEGIN SELECT RAISE(ABORT, 'vulnerability_report is write-once'); END;
"#;

/// 创建审计表结构（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    if read_schema_version(conn)?.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [CURRENT_SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

/// 读取 schema_version（若表不存在或为空则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
