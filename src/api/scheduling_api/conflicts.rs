use super::*;

use crate::api::error::ApiError;
use crate::api::validator::{require_non_empty, validate_absence};
use crate::domain::absence::Absence;
use crate::domain::swap::ConflictAlert;
use crate::domain::types::AlertStatus;
use crate::engine::error::EngineError;
use crate::swap::QueueDrainReport;
use tracing::{info, warn};

impl SchedulingApi {
    // ==========================================
    // 缺勤与冲突告警接口
    // ==========================================

    /// 登记（新建或修改）缺勤,并入队冲突检测
    ///
    /// 队列满时检测延后到下次处理队列,缺勤在此之前保持待检测
    pub async fn record_absence(&self, program_id: &str, absence: Absence) -> ApiResult<Absence> {
        require_non_empty("program_id", program_id)?;
        validate_absence(&absence)?;

        let snapshot = self.schedule_repo.load_snapshot(program_id).await?;
        if snapshot.person(&absence.person_id).is_none() {
            return Err(ApiError::NotFound(format!("Person(id={})不存在", absence.person_id)));
        }

        let stored = self.schedule_repo.upsert_absence(program_id, absence).await?;
        match self.conflict_queue.enqueue(program_id, stored.clone(), self.now()) {
            Ok(()) => {}
            // 缺勤已生效,检测延后到下次处理队列,期间保持待检测
            Err(EngineError::QueueUnavailable(reason)) => {
                warn!(absence_id = %stored.absence_id, reason = %reason, "冲突检测延后");
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            absence_id = %stored.absence_id,
            revision = stored.revision,
            "缺勤已登记，冲突检测已入队"
        );
        self.sample_after_mutation(program_id, "absence").await;
        Ok(stored)
    }

    /// 处理冲突检测队列（失败任务有限重试）
    pub async fn process_conflict_queue(&self) -> QueueDrainReport {
        let mut worker = self.conflict_worker.lock().await;
        worker.drain().await
    }

    /// 缺勤是否仍有未完成的冲突检测
    pub fn is_conflict_detection_pending(&self, absence_id: &str) -> bool {
        self.conflict_queue.is_pending(absence_id)
    }

    /// 手工关闭告警
    ///
    /// # 返回
    /// - Err(ConflictDetectionPending): 该缺勤的检测尚未完成
    pub fn resolve_conflict_alert(&self, alert_id: &str, actor: &str) -> ApiResult<ConflictAlert> {
        require_non_empty("alert_id", alert_id)?;
        require_non_empty("actor", actor)?;

        let alert = self
            .alert_repo
            .find_by_id(alert_id)?
            .ok_or_else(|| ApiError::NotFound(format!("ConflictAlert(id={})不存在", alert_id)))?;
        if self.conflict_queue.is_pending(&alert.absence_id) {
            return Err(ApiError::ConflictDetectionPending(format!(
                "缺勤 {} 的冲突检测尚未完成",
                alert.absence_id
            )));
        }
        if alert.status == AlertStatus::Resolved {
            return Ok(alert);
        }

        let now = self.now();
        self.alert_repo.resolve(alert_id, now)?;
        info!(alert_id = %alert_id, actor = %actor, "冲突告警已关闭");
        Ok(ConflictAlert {
            status: AlertStatus::Resolved,
            resolved_at: Some(now),
            ..alert
        })
    }

    /// 查询告警
    pub fn list_conflict_alerts(&self, status: AlertStatus) -> ApiResult<Vec<ConflictAlert>> {
        Ok(self.alert_repo.list_by_status(status)?)
    }

    /// 查询某缺勤的告警
    pub fn alerts_for_absence(&self, absence_id: &str) -> ApiResult<Vec<ConflictAlert>> {
        require_non_empty("absence_id", absence_id)?;
        Ok(self.alert_repo.list_for_absence(absence_id)?)
    }
}
