// ==========================================
// 住院医师排班系统 - 命令行入口
// ==========================================
// 用法: residency-aps <snapshot.json> [--start D --end D] [--algorithm A] [--db PATH]
// 输出: 生成结果 + 在线排班校验结果（JSON）
// ==========================================

use anyhow::{anyhow, bail, Context};
use chrono::NaiveDate;
use clap::Parser;
use residency_aps::app::AppState;
use residency_aps::domain::{DateRange, DomainSnapshot};
use residency_aps::logging;
use residency_aps::solver::SolverAlgorithm;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "residency-aps")]
#[command(about = "住院医师排班生成与合规校验", long_about = None)]
struct Cli {
    /// 领域快照 JSON 文件
    snapshot: PathBuf,

    /// 窗口起始日（YYYY-MM-DD,缺省为快照日历起始）
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,

    /// 窗口结束日（含）
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,

    /// 求解算法: GREEDY / CP / LP / HYBRID（缺省取配置）
    #[arg(long)]
    algorithm: Option<SolverAlgorithm>,

    /// 审计库路径（缺省使用内存库）
    #[arg(long)]
    db: Option<String>,

    /// 以 JSON 行输出日志
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.json_log {
        logging::init_json();
    } else {
        logging::init();
    }

    let raw = std::fs::read_to_string(&cli.snapshot)
        .with_context(|| format!("无法读取快照文件: {}", cli.snapshot.display()))?;
    let snapshot: DomainSnapshot = serde_json::from_str(&raw).context("快照 JSON 解析失败")?;

    let window = match (cli.start, cli.end) {
        (Some(start), Some(end)) => DateRange::new(start, end),
        (None, None) => snapshot
            .calendar_range()
            .ok_or_else(|| anyhow!("快照不含槽位，请显式指定窗口"))?,
        _ => bail!("--start 与 --end 需同时指定"),
    };

    tracing::info!("==================================================");
    tracing::info!("{} v{}", residency_aps::APP_NAME, residency_aps::VERSION);
    tracing::info!("==================================================");

    let state = match cli.db {
        Some(path) => AppState::new(path, None).await,
        None => AppState::in_memory(None).await,
    }
    .map_err(|e| anyhow!(e))?;
    let program_id = snapshot.program_id.clone();
    state.schedule_repo.put(snapshot);

    let api = &state.scheduling_api;
    let generation = api.generate_schedule(&program_id, window, cli.algorithm, None).await?;
    let validation = api.validate_schedule(&program_id, window).await?;

    let output = serde_json::json!({
        "program_id": program_id,
        "db_path": state.get_db_path(),
        "window": window,
        "generation": generation,
        "validation": validation,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
