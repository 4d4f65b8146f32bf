// ==========================================
// 住院医师排班系统 - 换班执行器
// ==========================================
// 执行步骤（任一步失败 → 撤销已完成步骤,在线排班不变）:
// 1. revalidate        执行时重新校验
// 2. post_validate     工作副本上复核受影响人员与覆盖的新增硬违规
// 3. persist_snapshot  写入执行前后快照
// 4. commit            原子提交变更集
// 5. persist_transition 追加 EXECUTED 审计（失败则反向提交 + 删除快照）
// 回滚: 校验回滚窗口 → 确认在线排班仍为 after → 恢复 before
// ==========================================

use crate::domain::assignment::{Assignment, AssignmentChangeSet};
use crate::domain::calendar::DateRange;
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::swap::{ExecutionSnapshot, SwapRecord};
use crate::domain::types::SwapStatus;
use crate::domain::violation::Violation;
use crate::engine::compliance::{new_hard_violations, ComplianceValidator};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::window_lock::WindowLockRegistry;
use crate::repository::ScheduleRepository;
use crate::swap::lifecycle::SwapLifecycle;
use crate::swap::validator::SwapValidator;
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

fn step_failure(step: &str, reason: impl ToString) -> EngineError {
    EngineError::ExecutionFailure {
        step: step.to_string(),
        reason: reason.to_string(),
    }
}

pub struct SwapExecutor {
    schedule_repo: Arc<dyn ScheduleRepository>,
    lifecycle: Arc<SwapLifecycle>,
    validator: Arc<SwapValidator>,
    compliance: Arc<ComplianceValidator>,
    locks: WindowLockRegistry,
}

impl SwapExecutor {
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        lifecycle: Arc<SwapLifecycle>,
        validator: Arc<SwapValidator>,
        compliance: Arc<ComplianceValidator>,
        locks: WindowLockRegistry,
    ) -> Self {
        Self {
            schedule_repo,
            lifecycle,
            validator,
            compliance,
            locks,
        }
    }

    /// 执行已批准的换班
    #[instrument(skip(self), fields(swap_id = %swap_id))]
    pub async fn execute(&self, swap_id: &str, actor: &str, at: NaiveDateTime) -> EngineResult<SwapRecord> {
        let mut record = self.lifecycle.load(swap_id)?;
        if record.status != SwapStatus::Approved {
            return Err(EngineError::InvalidStateTransition {
                from: record.status.to_string(),
                to: SwapStatus::Executed.to_string(),
            });
        }

        let range = record.affected_range(self.validator.config().swap_block_days);
        let _guard = self.locks.acquire(&record.program_id, range).await;
        let snapshot = self.schedule_repo.load_snapshot(&record.program_id).await?;

        // ===== 1. revalidate =====
        let check = self.validator.validate(&snapshot, &record, at.date());
        if !check.valid {
            warn!(errors = check.errors.len(), "执行时校验未通过");
            return Err(EngineError::SwapValidation {
                swap_id: swap_id.to_string(),
                errors: check.error_messages(),
            });
        }
        let plan = self.validator.plan(&snapshot, &record);
        let change = plan.change_set(actor, at);

        // ===== 2. post_validate =====
        let introduced = self.introduced_violations(&snapshot, &change, range, &plan.people());
        if !introduced.is_empty() {
            let reason = introduced
                .iter()
                .map(|v| v.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            warn!(violations = introduced.len(), "换班将引入新的硬违规");
            return Err(step_failure("post_validate", reason));
        }

        let snapshot_id = Uuid::new_v4().to_string();
        SwapLifecycle::apply(&mut record, SwapStatus::Executed, actor, at, None)?;
        record.executed_at = Some(at);
        record.snapshot_id = Some(snapshot_id.clone());

        // ===== 3. persist_snapshot =====
        let exec_snapshot = ExecutionSnapshot {
            snapshot_id,
            swap_id: swap_id.to_string(),
            before: change.removed.clone(),
            after: change.added.clone(),
            taken_at: at,
        };
        let swaps = self.lifecycle.repo();
        swaps
            .insert_execution_snapshot(&exec_snapshot)
            .map_err(|e| step_failure("persist_snapshot", e))?;

        // ===== 4. commit =====
        if let Err(e) = self.schedule_repo.apply_change_set(&record.program_id, &change).await {
            self.discard_snapshot(&exec_snapshot.snapshot_id);
            return Err(step_failure("commit", e));
        }

        // ===== 5. persist_transition =====
        if let Err(e) = swaps.append_audit(&record) {
            self.compensate(&record.program_id, &change).await;
            self.discard_snapshot(&exec_snapshot.snapshot_id);
            return Err(step_failure("persist_transition", e));
        }

        info!(
            moves = change.added.len(),
            snapshot_id = %exec_snapshot.snapshot_id,
            "换班执行完成"
        );
        self.lifecycle.announce(&record);
        Ok(record)
    }

    /// 回滚已执行的换班
    #[instrument(skip(self), fields(swap_id = %swap_id))]
    pub async fn rollback(&self, swap_id: &str, actor: &str, at: NaiveDateTime) -> EngineResult<SwapRecord> {
        let mut record = self.lifecycle.load(swap_id)?;
        if record.status != SwapStatus::Executed {
            return Err(EngineError::InvalidStateTransition {
                from: record.status.to_string(),
                to: SwapStatus::RolledBack.to_string(),
            });
        }
        if !record.within_rollback_window(at, self.validator.config().rollback_window()) {
            return Err(EngineError::RollbackWindowExpired {
                swap_id: swap_id.to_string(),
            });
        }

        let snapshot_id = record.snapshot_id.clone().unwrap_or_default();
        let exec_snapshot = self
            .lifecycle
            .repo()
            .find_execution_snapshot(&snapshot_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "ExecutionSnapshot".to_string(),
                id: snapshot_id.clone(),
            })?;

        let range = record.affected_range(self.validator.config().swap_block_days);
        let _guard = self.locks.acquire(&record.program_id, range).await;
        let live = self.schedule_repo.load_snapshot(&record.program_id).await?;

        // ===== 1. verify_live_state =====
        let drifted = drifted_assignments(&live.assignments, &exec_snapshot.after);
        if !drifted.is_empty() {
            return Err(step_failure(
                "verify_live_state",
                format!("执行后分配已被修改: {}", drifted.join(", ")),
            ));
        }

        SwapLifecycle::apply(&mut record, SwapStatus::RolledBack, actor, at, None)?;

        // ===== 2. commit =====
        let change = AssignmentChangeSet {
            removed: exec_snapshot.after.clone(),
            added: exec_snapshot.before.clone(),
        };
        self.schedule_repo
            .apply_change_set(&record.program_id, &change)
            .await
            .map_err(|e| step_failure("commit", e))?;

        // ===== 3. persist_transition =====
        if let Err(e) = self.lifecycle.repo().append_audit(&record) {
            self.compensate(&record.program_id, &change).await;
            return Err(step_failure("persist_transition", e));
        }

        info!(restored = change.added.len(), "换班已回滚");
        self.lifecycle.announce(&record);
        Ok(record)
    }

    /// 变更后新增的硬违规（仅受影响人员与覆盖类违规）
    fn introduced_violations(
        &self,
        snapshot: &DomainSnapshot,
        change: &AssignmentChangeSet,
        range: DateRange,
        people: &[String],
    ) -> Vec<Violation> {
        let affected: HashSet<&str> = people.iter().map(String::as_str).collect();
        let relevant = |v: &Violation| match &v.person_id {
            Some(p) => affected.contains(p.as_str()),
            None => true,
        };
        let window = range.expand((self.compliance.config().compliance.rolling_window_days - 1).max(0));

        let mut after: Vec<Assignment> = snapshot.assignments.clone();
        change.apply_to(&mut after);

        let before: Vec<Violation> = self
            .compliance
            .hard_violations(snapshot, &snapshot.assignments, window)
            .into_iter()
            .filter(|v| relevant(v))
            .collect();
        let after: Vec<Violation> = self
            .compliance
            .hard_violations(snapshot, &after, window)
            .into_iter()
            .filter(|v| relevant(v))
            .collect();
        new_hard_violations(&before, &after)
    }

    async fn compensate(&self, program_id: &str, change: &AssignmentChangeSet) {
        if let Err(e) = self
            .schedule_repo
            .apply_change_set(program_id, &change.inverse())
            .await
        {
            error!(error = %e, "补偿提交失败，在线排班需人工核对");
        }
    }

    fn discard_snapshot(&self, snapshot_id: &str) {
        if let Err(e) = self.lifecycle.repo().delete_execution_snapshot(snapshot_id) {
            error!(error = %e, snapshot_id = %snapshot_id, "执行快照清理失败");
        }
    }
}

/// 在线排班中与期望不一致的分配 ID
fn drifted_assignments(live: &[Assignment], expected: &[Assignment]) -> Vec<String> {
    expected
        .iter()
        .filter(|e| !live.iter().any(|l| l == *e))
        .map(|e| e.assignment_id.clone())
        .collect()
}
