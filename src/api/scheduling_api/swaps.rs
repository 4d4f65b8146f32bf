use super::*;

use crate::api::error::ApiError;
use crate::api::validator::{require_non_empty, validate_swap_request, SwapRequest};
use crate::domain::types::SwapStatus;
use tracing::info;
use uuid::Uuid;

impl SchedulingApi {
    // ==========================================
    // 换班接口
    // ==========================================

    /// 提交换班申请
    ///
    /// # 返回
    /// - Ok(SwapProposal): PENDING 记录 + 警告（临近日期等）
    /// - Err(SwapValidationError): 校验不通过,不创建记录
    pub async fn propose_swap(&self, request: SwapRequest) -> ApiResult<SwapProposal> {
        validate_swap_request(&request)?;

        let now = self.now();
        let mut record = SwapRecord::new(
            Uuid::new_v4().to_string(),
            &request.program_id,
            request.kind,
            &request.source_person_id,
            request.source_period_start,
            &request.target_person_id,
            request.target_period_start,
            &request.requested_by,
            now,
        );
        record.activity_filter = request.activity_filter;
        record.reason = request.reason;

        let snapshot = self.schedule_repo.load_snapshot(&record.program_id).await?;
        let check = self.swap_validator.validate(&snapshot, &record, now.date());
        if !check.valid {
            info!(
                swap_id = %record.swap_id,
                errors = check.errors.len(),
                "换班申请校验未通过"
            );
            return Err(ApiError::SwapValidationError {
                swap_id: record.swap_id,
                errors: check.error_messages(),
            });
        }

        self.lifecycle.record_proposal(&record)?;
        Ok(SwapProposal {
            record,
            warnings: check.warnings,
        })
    }

    /// 审批通过
    pub fn approve_swap(&self, swap_id: &str, actor: &str) -> ApiResult<SwapRecord> {
        self.advance_swap(swap_id, SwapStatus::Approved, actor, None)
    }

    /// 驳回
    pub fn reject_swap(&self, swap_id: &str, actor: &str, reason: Option<String>) -> ApiResult<SwapRecord> {
        self.advance_swap(swap_id, SwapStatus::Rejected, actor, reason)
    }

    /// 撤销
    pub fn cancel_swap(&self, swap_id: &str, actor: &str) -> ApiResult<SwapRecord> {
        self.advance_swap(swap_id, SwapStatus::Cancelled, actor, None)
    }

    /// 执行已批准的换班（失败时在线排班不变）
    pub async fn execute_swap(&self, swap_id: &str, actor: &str) -> ApiResult<SwapRecord> {
        require_non_empty("swap_id", swap_id)?;
        require_non_empty("actor", actor)?;
        let record = self.executor.execute(swap_id, actor, self.now()).await?;
        self.sample_after_mutation(&record.program_id, "swap_execute").await;
        Ok(record)
    }

    /// 回滚已执行的换班（限回滚窗口内）
    pub async fn rollback_swap(&self, swap_id: &str, actor: &str) -> ApiResult<SwapRecord> {
        require_non_empty("swap_id", swap_id)?;
        require_non_empty("actor", actor)?;
        let record = self.executor.rollback(swap_id, actor, self.now()).await?;
        self.sample_after_mutation(&record.program_id, "swap_rollback").await;
        Ok(record)
    }

    /// 查询换班当前状态
    pub fn get_swap(&self, swap_id: &str) -> ApiResult<SwapRecord> {
        require_non_empty("swap_id", swap_id)?;
        Ok(self.lifecycle.load(swap_id)?)
    }

    /// 查询换班审计轨迹（按写入顺序）
    pub fn swap_history(&self, swap_id: &str) -> ApiResult<Vec<SwapRecord>> {
        require_non_empty("swap_id", swap_id)?;
        Ok(self.lifecycle.repo().history(swap_id)?)
    }

    /// 查询项目下全部换班（各取最新状态）
    pub fn list_swaps(&self, program_id: &str) -> ApiResult<Vec<SwapRecord>> {
        require_non_empty("program_id", program_id)?;
        Ok(self.lifecycle.repo().list_latest_by_program(program_id)?)
    }

    fn advance_swap(
        &self,
        swap_id: &str,
        to: SwapStatus,
        actor: &str,
        note: Option<String>,
    ) -> ApiResult<SwapRecord> {
        require_non_empty("swap_id", swap_id)?;
        require_non_empty("actor", actor)?;
        Ok(self.lifecycle.advance(swap_id, to, actor, self.now(), note)?)
    }
}
