// ==========================================
// 住院医师排班系统 - 请求参数校验
// ==========================================
// 职责: API 入口的参数校验（空字段、窗口、换班申请形态）
// 说明: 业务规则（资质、连班、过去日期）由换班校验器负责
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::absence::Absence;
use crate::domain::calendar::DateRange;
use crate::domain::types::SwapKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 单次生成/校验允许的最大窗口天数
pub const MAX_WINDOW_DAYS: i64 = 366;

// ==========================================
// SwapRequest - 换班申请参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub program_id: String,
    pub kind: SwapKind,
    pub source_person_id: String,
    pub source_period_start: NaiveDate,
    pub target_person_id: String,
    /// ABSORB 时为 None
    #[serde(default)]
    pub target_period_start: Option<NaiveDate>,
    #[serde(default)]
    pub activity_filter: Option<String>,
    pub requested_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// 校验必填字段
pub fn require_non_empty(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{}不能为空", field)));
    }
    Ok(())
}

/// 校验时间窗口
///
/// # 返回
/// - Err(InvalidInput): 起止颠倒或超过 MAX_WINDOW_DAYS
pub fn validate_window(window: &DateRange) -> ApiResult<()> {
    if !window.is_valid() {
        return Err(ApiError::InvalidInput(format!("时间窗口非法: {}", window)));
    }
    if window.days() > MAX_WINDOW_DAYS {
        return Err(ApiError::InvalidInput(format!(
            "时间窗口过长: {} 天（上限 {} 天）",
            window.days(),
            MAX_WINDOW_DAYS
        )));
    }
    Ok(())
}

/// 校验换班申请形态
pub fn validate_swap_request(request: &SwapRequest) -> ApiResult<()> {
    require_non_empty("program_id", &request.program_id)?;
    require_non_empty("source_person_id", &request.source_person_id)?;
    require_non_empty("target_person_id", &request.target_person_id)?;
    require_non_empty("requested_by", &request.requested_by)?;

    match (request.kind, request.target_period_start) {
        (SwapKind::OneToOne, None) => Err(ApiError::InvalidInput(
            "一换一换班必须指定目标周期".to_string(),
        )),
        (SwapKind::Absorb, Some(_)) => Err(ApiError::InvalidInput(
            "单向接收换班不能指定目标周期".to_string(),
        )),
        _ => Ok(()),
    }
}

/// 校验缺勤记录
pub fn validate_absence(absence: &Absence) -> ApiResult<()> {
    require_non_empty("absence_id", &absence.absence_id)?;
    require_non_empty("person_id", &absence.person_id)?;
    require_non_empty("absence_type", &absence.absence_type)?;
    if absence.end_date < absence.start_date {
        return Err(ApiError::InvalidInput(format!(
            "缺勤结束日期 {} 早于开始日期 {}",
            absence.end_date, absence.start_date
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, day).unwrap()
    }

    fn request(kind: SwapKind, target: Option<NaiveDate>) -> SwapRequest {
        SwapRequest {
            program_id: "IM".to_string(),
            kind,
            source_person_id: "r1".to_string(),
            source_period_start: d(6),
            target_person_id: "r2".to_string(),
            target_period_start: target,
            activity_filter: None,
            requested_by: "r1".to_string(),
            reason: None,
        }
    }

    #[test]
    fn test_window_checks() {
        assert!(validate_window(&DateRange::new(d(1), d(28))).is_ok());
        assert!(matches!(
            validate_window(&DateRange::new(d(10), d(1))),
            Err(ApiError::InvalidInput(_))
        ));
        let long = DateRange::from_start(d(1), MAX_WINDOW_DAYS + 1);
        assert!(validate_window(&long).is_err());
    }

    #[test]
    fn test_swap_request_shape() {
        assert!(validate_swap_request(&request(SwapKind::OneToOne, Some(d(13)))).is_ok());
        assert!(validate_swap_request(&request(SwapKind::Absorb, None)).is_ok());
        assert!(validate_swap_request(&request(SwapKind::OneToOne, None)).is_err());
        assert!(validate_swap_request(&request(SwapKind::Absorb, Some(d(13)))).is_err());

        let mut blank = request(SwapKind::Absorb, None);
        blank.requested_by = "  ".to_string();
        assert!(matches!(
            validate_swap_request(&blank),
            Err(ApiError::InvalidInput(msg)) if msg.contains("requested_by")
        ));
    }
}
