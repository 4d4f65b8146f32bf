// ==========================================
// 住院医师排班系统 - 缺勤冲突检测
// ==========================================
// 触发: 缺勤新建/修改 → 入队 → worker 异步检测
// 检测: 该人与缺勤重叠的分配 → 每条一个告警（absence_id + assignment_id 唯一）
//       不再重叠的 OPEN 告警自动关闭
// 红线:
// - 幂等: 重复检测不重复建告警
// - 缺勤存在未完成的检测任务时,其告警不可手工关闭
// - 队列满时任务延后,不丢失检测
// ==========================================

use crate::domain::absence::Absence;
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::swap::ConflictAlert;
use crate::domain::types::AlertStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EngineEvent, EngineEventType, OptionalEventPublisher};
use crate::repository::{ConflictAlertRepository, ScheduleRepository};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 单次检测结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub created: usize,
    pub existing: usize,
    pub resolved: usize,
}

// ==========================================
// ConflictDetector - 冲突检测器
// ==========================================
pub struct ConflictDetector {
    alerts: Arc<ConflictAlertRepository>,
    publisher: OptionalEventPublisher,
}

impl ConflictDetector {
    pub fn new(alerts: Arc<ConflictAlertRepository>, publisher: OptionalEventPublisher) -> Self {
        Self { alerts, publisher }
    }

    pub fn alerts(&self) -> &Arc<ConflictAlertRepository> {
        &self.alerts
    }

    #[instrument(skip(self, snapshot, absence), fields(absence_id = %absence.absence_id, person_id = %absence.person_id))]
    pub fn detect(&self, snapshot: &DomainSnapshot, absence: &Absence, at: NaiveDateTime) -> EngineResult<DetectionSummary> {
        let mut summary = DetectionSummary::default();

        let overlapping: Vec<_> = snapshot
            .assignments
            .iter()
            .filter(|a| absence.blocks(&a.person_id, &a.slot))
            .collect();
        let overlapping_ids: HashSet<&str> = overlapping.iter().map(|a| a.assignment_id.as_str()).collect();

        for assignment in overlapping {
            let alert = ConflictAlert {
                alert_id: Uuid::new_v4().to_string(),
                absence_id: absence.absence_id.clone(),
                assignment_id: assignment.assignment_id.clone(),
                person_id: assignment.person_id.clone(),
                slot: assignment.slot,
                activity_id: assignment.activity_id.clone(),
                status: AlertStatus::Open,
                created_at: at,
                resolved_at: None,
            };
            if self.alerts.insert_if_absent(&alert)? {
                summary.created += 1;
                self.publisher.publish_best_effort(
                    EngineEvent::new(
                        &snapshot.program_id,
                        EngineEventType::ConflictAlertCreated,
                        serde_json::json!({
                            "alert_id": alert.alert_id,
                            "absence_id": alert.absence_id,
                            "assignment_id": alert.assignment_id,
                            "person_id": alert.person_id,
                            "slot": alert.slot,
                            "activity_id": alert.activity_id,
                        }),
                        at,
                    )
                    .with_source("conflict_detector"),
                );
            } else {
                summary.existing += 1;
            }
        }

        for stale in self
            .alerts
            .list_for_absence(&absence.absence_id)?
            .into_iter()
            .filter(|a| a.status == AlertStatus::Open && !overlapping_ids.contains(a.assignment_id.as_str()))
        {
            if self.alerts.resolve(&stale.alert_id, at)? {
                summary.resolved += 1;
            }
        }

        info!(
            created = summary.created,
            existing = summary.existing,
            resolved = summary.resolved,
            "缺勤冲突检测完成"
        );
        Ok(summary)
    }
}

// ==========================================
// 检测队列
// ==========================================
#[derive(Debug, Clone)]
struct ConflictTask {
    program_id: String,
    absence: Absence,
    at: NaiveDateTime,
}

#[derive(Debug, Default)]
struct PendingState {
    queued: HashMap<String, u32>,
    /// 重试耗尽的缺勤,直到再次检测成功
    failed: HashSet<String>,
    /// 队列满时未能入队的任务,下次处理队列时补做（同一缺勤只留最新）
    deferred: HashMap<String, ConflictTask>,
}

/// 队列处理统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueDrainReport {
    pub processed: usize,
    pub failed: usize,
    pub retries: u32,
    pub alerts_created: usize,
    pub alerts_resolved: usize,
}

/// 入队端（可克隆）
#[derive(Clone)]
pub struct ConflictQueue {
    tx: mpsc::Sender<ConflictTask>,
    pending: Arc<Mutex<PendingState>>,
}

impl ConflictQueue {
    /// 创建队列与对应的 worker
    pub fn channel(
        capacity: usize,
        max_retries: u32,
        detector: Arc<ConflictDetector>,
        schedule_repo: Arc<dyn ScheduleRepository>,
    ) -> (ConflictQueue, ConflictWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Mutex::new(PendingState::default()));
        let queue = ConflictQueue {
            tx,
            pending: pending.clone(),
        };
        let worker = ConflictWorker {
            rx,
            pending,
            detector,
            schedule_repo,
            max_retries,
            backoff: Duration::from_millis(20),
        };
        (queue, worker)
    }

    /// 入队检测任务
    ///
    /// 队列满时任务转入延后集合,缺勤保持待检测,返回 QueueUnavailable
    pub fn enqueue(&self, program_id: &str, absence: Absence, at: NaiveDateTime) -> EngineResult<()> {
        let absence_id = absence.absence_id.clone();
        {
            let mut pending = self.pending.lock().map_err(|e| EngineError::Internal(e.to_string()))?;
            *pending.queued.entry(absence_id.clone()).or_insert(0) += 1;
        }
        let task = ConflictTask {
            program_id: program_id.to_string(),
            absence,
            at,
        };
        if let Err(e) = self.tx.try_send(task) {
            let reason = e.to_string();
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(count) = pending.queued.get_mut(&absence_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    pending.queued.remove(&absence_id);
                }
            }
            pending.deferred.insert(absence_id.clone(), e.into_inner());
            warn!(absence_id = %absence_id, reason = %reason, "冲突检测队列已满，任务延后处理");
            return Err(EngineError::QueueUnavailable(reason));
        }
        debug!(absence_id = %absence_id, "冲突检测任务入队");
        Ok(())
    }

    /// 缺勤是否仍有未完成的检测
    pub fn is_pending(&self, absence_id: &str) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.queued.get(absence_id).copied().unwrap_or(0) > 0
            || pending.failed.contains(absence_id)
            || pending.deferred.contains_key(absence_id)
    }
}

/// 完成一个任务的计数
fn release(pending: &Mutex<PendingState>, absence_id: &str, succeeded: bool) {
    let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(count) = pending.queued.get_mut(absence_id) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            pending.queued.remove(absence_id);
        }
    }
    if succeeded {
        pending.failed.remove(absence_id);
    } else {
        pending.failed.insert(absence_id.to_string());
    }
}

// ==========================================
// ConflictWorker - 检测 worker（有限重试）
// ==========================================
pub struct ConflictWorker {
    rx: mpsc::Receiver<ConflictTask>,
    pending: Arc<Mutex<PendingState>>,
    detector: Arc<ConflictDetector>,
    schedule_repo: Arc<dyn ScheduleRepository>,
    max_retries: u32,
    backoff: Duration,
}

impl ConflictWorker {
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn set_backoff(&mut self, backoff: Duration) {
        self.backoff = backoff;
    }

    /// 处理当前队列中的全部任务,以及此前因队列满而延后的任务
    pub async fn drain(&mut self) -> QueueDrainReport {
        let mut report = QueueDrainReport::default();
        while let Ok(task) = self.rx.try_recv() {
            self.process(task, &mut report).await;
        }
        let deferred: Vec<ConflictTask> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.deferred.drain().map(|(_, task)| task).collect()
        };
        for task in deferred {
            self.process(task, &mut report).await;
        }
        if report.processed + report.failed > 0 {
            info!(
                processed = report.processed,
                failed = report.failed,
                retries = report.retries,
                "冲突检测队列处理完成"
            );
        }
        report
    }

    async fn process(&self, task: ConflictTask, report: &mut QueueDrainReport) {
        let mut attempt = 0u32;
        loop {
            match self.run_once(&task).await {
                Ok(summary) => {
                    report.processed += 1;
                    report.alerts_created += summary.created;
                    report.alerts_resolved += summary.resolved;
                    release(&self.pending, &task.absence.absence_id, true);
                    return;
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    report.retries += 1;
                    warn!(
                        absence_id = %task.absence.absence_id,
                        attempt,
                        error = %e,
                        "冲突检测失败，准备重试"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        absence_id = %task.absence.absence_id,
                        error = %e,
                        "冲突检测重试耗尽"
                    );
                    release(&self.pending, &task.absence.absence_id, false);
                    return;
                }
            }
        }
    }

    async fn run_once(&self, task: &ConflictTask) -> EngineResult<DetectionSummary> {
        let snapshot = self.schedule_repo.load_snapshot(&task.program_id).await?;
        // 以在线版本为准（任务入队后缺勤可能再次修改）
        let absence = snapshot
            .absences
            .iter()
            .find(|a| a.absence_id == task.absence.absence_id)
            .cloned()
            .unwrap_or_else(|| task.absence.clone());
        self.detector.detect(&snapshot, &absence, task.at)
    }
}
