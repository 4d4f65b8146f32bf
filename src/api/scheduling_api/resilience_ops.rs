use super::*;

use crate::api::error::ApiError;
use crate::api::validator::{require_non_empty, validate_window};
use crate::domain::calendar::DateRange;
use crate::domain::resilience::{CrisisScenario, DefenseStatus, VulnerabilityReport};
use crate::domain::types::DefenseLevel;
use crate::engine::events::{EngineEvent, EngineEventType};
use crate::resilience::PeriodicSampler;
use tracing::{info, warn};

/// 最近一次脆弱性报告（带过期标记）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityReportView {
    pub report: VulnerabilityReport,
    pub stale: bool,
}

impl SchedulingApi {
    // ==========================================
    // 防御等级接口
    // ==========================================

    /// 查询当前防御等级
    pub fn get_defense_level(&self, program_id: &str) -> ApiResult<DefenseStatus> {
        require_non_empty("program_id", program_id)?;
        Ok(self.defense.status(program_id))
    }

    /// 启动时由转换日志恢复防御等级
    pub fn restore_defense_level(&self, program_id: &str) -> ApiResult<Option<DefenseLevel>> {
        require_non_empty("program_id", program_id)?;
        Ok(self.defense.restore_from_log(program_id)?)
    }

    /// 采样一次利用率并驱动防御等级
    ///
    /// # 说明
    /// - 采样窗口: 今日起 defense.sample_window_days 天
    /// - 仅当本次样本把等级升到 ORANGE 及以上时触发危机响应
    pub async fn sample_utilization(&self, program_id: &str) -> ApiResult<UtilizationTick> {
        require_non_empty("program_id", program_id)?;

        let now = self.now();
        let window = DateRange::from_start(now.date(), self.config().defense.sample_window_days);
        let snapshot = self.schedule_repo.load_snapshot(program_id).await?;
        let sample = self.monitor.sample(&snapshot, window, self.config(), now);
        let transition = self.defense.evaluate(&sample)?;

        let escalated = transition
            .as_ref()
            .filter(|t| t.to > t.from && t.to >= DefenseLevel::Orange)
            .map(|t| t.to);
        let response = match escalated {
            Some(level) => self.coordinator.respond(program_id, window, level, now).await?,
            None => CrisisResponse::NoAction,
        };

        Ok(UtilizationTick {
            sample,
            transition,
            response,
        })
    }

    /// 在线排班变更提交后立即采样
    ///
    /// 变更已生效,采样失败只记录日志
    pub(super) async fn sample_after_mutation(&self, program_id: &str, cause: &str) {
        match self.sample_utilization(program_id).await {
            Ok(tick) => {
                if let Some(transition) = &tick.transition {
                    info!(
                        program_id = %program_id,
                        cause = %cause,
                        from = %transition.from,
                        to = %transition.to,
                        response = tick.response.name(),
                        "排班变更触发防御等级转换"
                    );
                }
            }
            Err(e) => warn!(program_id = %program_id, cause = %cause, error = %e, "排班变更后采样失败"),
        }
    }

    /// 启动周期采样（后台任务,错误仅记录日志）
    pub fn spawn_background(self: &Arc<Self>, program_id: &str) -> PeriodicSampler {
        let interval = std::time::Duration::from_secs(self.config().defense.sample_interval_secs.max(1));
        let api = Arc::clone(self);
        let program_id = program_id.to_string();
        info!(program_id = %program_id, interval_secs = interval.as_secs(), "启动周期采样");

        PeriodicSampler::spawn(interval, move || {
            let api = api.clone();
            let program_id = program_id.clone();
            async move {
                match api.sample_utilization(&program_id).await {
                    Ok(tick) if !matches!(tick.response, CrisisResponse::NoAction) => {
                        info!(
                            program_id = %program_id,
                            response = tick.response.name(),
                            "周期采样触发危机响应"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(program_id = %program_id, error = %e, "周期采样失败"),
                }
            }
        })
    }

    // ==========================================
    // 应急推演接口
    // ==========================================

    /// 运行 N-1/N-2 应急推演并存档报告
    pub async fn run_contingency_analysis(
        &self,
        program_id: &str,
        window: DateRange,
        scenario: CrisisScenario,
    ) -> ApiResult<VulnerabilityReport> {
        require_non_empty("program_id", program_id)?;
        require_non_empty("scenario", &scenario.name)?;
        validate_window(&window)?;

        let snapshot = self.schedule_repo.load_snapshot(program_id).await?;
        if let Some(unknown) = scenario
            .absent_person_ids
            .iter()
            .find(|id| snapshot.person(id).is_none())
        {
            return Err(ApiError::InvalidInput(format!("场景人员 {} 不存在", unknown)));
        }

        let at = self.now();
        let analyzer = self.contingency.clone();
        let report = tokio::task::spawn_blocking(move || analyzer.analyze(&snapshot, window, &scenario, at))
            .await
            .map_err(|e| ApiError::InternalError(format!("推演任务异常: {}", e)))?;

        self.vulnerability_repo.insert(&report)?;
        Ok(report)
    }

    /// 读取最近一次推演报告
    ///
    /// # 说明
    /// 报告超过 contingency.stale_after_hours 时标记 stale 并发布 StaleAnalysis 提示
    pub fn latest_vulnerability_report(
        &self,
        program_id: &str,
        scenario: &str,
    ) -> ApiResult<Option<VulnerabilityReportView>> {
        require_non_empty("program_id", program_id)?;
        let Some(report) = self.vulnerability_repo.find_latest(program_id, scenario)? else {
            return Ok(None);
        };

        let now = self.now();
        let stale = report.is_stale(now, self.config().contingency.stale_after());
        if stale {
            warn!(
                program_id = %program_id,
                scenario = %scenario,
                generated_at = %report.generated_at,
                "脆弱性报告已过期"
            );
            self.event_publisher.publish_best_effort(
                EngineEvent::new(
                    program_id,
                    EngineEventType::StaleAnalysis,
                    serde_json::json!({
                        "report_id": report.report_id,
                        "scenario": report.scenario,
                        "generated_at": report.generated_at,
                    }),
                    now,
                )
                .with_source("scheduling_api")
                .with_range(report.window),
            );
        }
        Ok(Some(VulnerabilityReportView { report, stale }))
    }
}
