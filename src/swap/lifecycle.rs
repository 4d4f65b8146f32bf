// ==========================================
// 住院医师排班系统 - 换班状态流转
// ==========================================
// 职责: 状态推进 + 审计追加 + 事件发布
// 红线:
// - 非法转换 → InvalidStateTransition,记录不变
// - 审计先于事件; 审计失败则转换不生效
// ==========================================

use crate::domain::swap::SwapRecord;
use crate::domain::types::SwapStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EngineEvent, EngineEventType, OptionalEventPublisher};
use crate::repository::SwapRepository;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::info;

pub struct SwapLifecycle {
    repo: Arc<SwapRepository>,
    publisher: OptionalEventPublisher,
}

impl SwapLifecycle {
    pub fn new(repo: Arc<SwapRepository>, publisher: OptionalEventPublisher) -> Self {
        Self { repo, publisher }
    }

    pub fn repo(&self) -> &Arc<SwapRepository> {
        &self.repo
    }

    /// 读取当前记录（审计最新一行）
    pub fn load(&self, swap_id: &str) -> EngineResult<SwapRecord> {
        self.repo.find_latest(swap_id)?.ok_or_else(|| EngineError::NotFound {
            entity: "SwapRecord".to_string(),
            id: swap_id.to_string(),
        })
    }

    /// 新建申请（PENDING）
    pub fn record_proposal(&self, record: &SwapRecord) -> EngineResult<()> {
        if record.status != SwapStatus::Pending {
            return Err(EngineError::InvalidStateTransition {
                from: "NONE".to_string(),
                to: record.status.to_string(),
            });
        }
        if self.repo.find_latest(&record.swap_id)?.is_some() {
            return Err(EngineError::Internal(format!("换班 {} 已存在", record.swap_id)));
        }
        self.repo.append_audit(record)?;
        self.announce(record);
        Ok(())
    }

    /// 推进状态并追加审计
    pub fn advance(
        &self,
        swap_id: &str,
        to: SwapStatus,
        actor: &str,
        at: NaiveDateTime,
        note: Option<String>,
    ) -> EngineResult<SwapRecord> {
        let mut record = self.load(swap_id)?;
        Self::apply(&mut record, to, actor, at, note)?;
        self.repo.append_audit(&record)?;
        self.announce(&record);
        Ok(record)
    }

    /// 仅在内存中推进（执行器用: 审计由调用方在事务步骤中写入）
    pub fn apply(
        record: &mut SwapRecord,
        to: SwapStatus,
        actor: &str,
        at: NaiveDateTime,
        note: Option<String>,
    ) -> EngineResult<()> {
        let from = record.status;
        if !record.advance(to, actor, at, note) {
            return Err(EngineError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// 发布状态变更事件（尽力而为）
    pub fn announce(&self, record: &SwapRecord) {
        info!(
            swap_id = %record.swap_id,
            status = %record.status,
            "换班状态变更"
        );
        let at = record
            .transitions
            .last()
            .map(|t| t.at)
            .unwrap_or(record.created_at);
        self.publisher.publish_best_effort(
            EngineEvent::new(
                &record.program_id,
                EngineEventType::SwapStatusChanged,
                serde_json::json!({
                    "swap_id": record.swap_id,
                    "status": record.status,
                    "source_person_id": record.source_person_id,
                    "target_person_id": record.target_person_id,
                }),
                at,
            )
            .with_source("swap_lifecycle"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::types::SwapKind;
    use crate::engine::events::RecordingEventPublisher;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    fn lifecycle() -> (SwapLifecycle, Arc<RecordingEventPublisher>) {
        let conn = Arc::new(Mutex::new(open_in_memory().unwrap()));
        let recorder = Arc::new(RecordingEventPublisher::new());
        let lifecycle = SwapLifecycle::new(
            Arc::new(SwapRepository::from_connection(conn)),
            OptionalEventPublisher::with_publisher(recorder.clone()),
        );
        (lifecycle, recorder)
    }

    fn record() -> SwapRecord {
        let d = NaiveDate::from_ymd_opt(2026, 4, 6).unwrap();
        SwapRecord::new(
            "SW-1".to_string(),
            "IM",
            SwapKind::Absorb,
            "r1",
            d,
            "r2",
            None,
            "r1",
            d.and_hms_opt(8, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_cannot_skip_approval() {
        let (lifecycle, recorder) = lifecycle();
        let r = record();
        lifecycle.record_proposal(&r).unwrap();
        let at = r.created_at;

        let err = lifecycle
            .advance("SW-1", SwapStatus::Executed, "chief", at, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
        assert_eq!(lifecycle.load("SW-1").unwrap().status, SwapStatus::Pending);

        lifecycle.advance("SW-1", SwapStatus::Approved, "chief", at, None).unwrap();
        lifecycle.advance("SW-1", SwapStatus::Cancelled, "r1", at, None).unwrap();
        assert!(lifecycle
            .advance("SW-1", SwapStatus::Approved, "chief", at, None)
            .is_err());

        assert_eq!(lifecycle.repo().history("SW-1").unwrap().len(), 3);
        assert_eq!(recorder.count_of(EngineEventType::SwapStatusChanged), 3);
    }
}
