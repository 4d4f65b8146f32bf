// ==========================================
// 住院医师排班系统 - 换班与冲突领域模型
// ==========================================
// 状态机: PENDING → APPROVED → EXECUTED → ROLLED_BACK
// 红线: 状态单调推进,不得跳过 APPROVED
// ==========================================

use crate::domain::assignment::Assignment;
use crate::domain::calendar::{DateRange, SlotKey};
use crate::domain::types::{AlertStatus, SwapKind, SwapStatus};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// SwapTransition - 状态转换审计
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapTransition {
    pub from: Option<SwapStatus>,
    pub to: SwapStatus,
    pub actor: String,
    pub at: NaiveDateTime,
    pub note: Option<String>,
}

// ==========================================
// SwapRecord - 换班申请
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: String,
    pub program_id: String,
    pub kind: SwapKind,

    // ===== 源 =====
    pub source_person_id: String,
    pub source_period_start: NaiveDate,

    // ===== 目标 =====
    pub target_person_id: String,
    /// ABSORB 时为 None（目标单向接收）
    pub target_period_start: Option<NaiveDate>,

    /// 仅交换指定活动（None = 该周期全部分配）
    #[serde(default)]
    pub activity_filter: Option<String>,

    pub status: SwapStatus,
    pub transitions: Vec<SwapTransition>,
    pub requested_by: String,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub executed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

impl SwapRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        swap_id: String,
        program_id: &str,
        kind: SwapKind,
        source_person_id: &str,
        source_period_start: NaiveDate,
        target_person_id: &str,
        target_period_start: Option<NaiveDate>,
        requested_by: &str,
        at: NaiveDateTime,
    ) -> Self {
        Self {
            swap_id,
            program_id: program_id.to_string(),
            kind,
            source_person_id: source_person_id.to_string(),
            source_period_start,
            target_person_id: target_person_id.to_string(),
            target_period_start,
            activity_filter: None,
            status: SwapStatus::Pending,
            transitions: vec![SwapTransition {
                from: None,
                to: SwapStatus::Pending,
                actor: requested_by.to_string(),
                at,
                note: None,
            }],
            requested_by: requested_by.to_string(),
            reason: None,
            created_at: at,
            executed_at: None,
            snapshot_id: None,
        }
    }

    pub fn source_period(&self, block_days: i64) -> DateRange {
        DateRange::from_start(self.source_period_start, block_days)
    }

    pub fn target_period(&self, block_days: i64) -> Option<DateRange> {
        self.target_period_start
            .map(|start| DateRange::from_start(start, block_days))
    }

    /// 受影响的日期窗口（源 ∪ 目标）
    pub fn affected_range(&self, block_days: i64) -> DateRange {
        let source = self.source_period(block_days);
        match self.target_period(block_days) {
            Some(target) => DateRange::new(source.start.min(target.start), source.end.max(target.end)),
            None => source,
        }
    }

    /// 推进状态（非法转换返回 false 且不修改记录）
    pub fn advance(&mut self, to: SwapStatus, actor: &str, at: NaiveDateTime, note: Option<String>) -> bool {
        if !self.status.can_transition_to(to) {
            return false;
        }
        self.transitions.push(SwapTransition {
            from: Some(self.status),
            to,
            actor: actor.to_string(),
            at,
            note,
        });
        self.status = to;
        true
    }

    /// 是否仍在回滚窗口内
    pub fn within_rollback_window(&self, now: NaiveDateTime, window: Duration) -> bool {
        match self.executed_at {
            Some(executed_at) => now - executed_at <= window,
            None => false,
        }
    }
}

// ==========================================
// ExecutionSnapshot - 执行前后快照（只写一次）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub snapshot_id: String,
    pub swap_id: String,
    pub before: Vec<Assignment>,
    pub after: Vec<Assignment>,
    pub taken_at: NaiveDateTime,
}

// ==========================================
// ConflictAlert - 缺勤冲突告警
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictAlert {
    pub alert_id: String,
    pub absence_id: String,
    pub assignment_id: String,
    pub person_id: String,
    pub slot: SlotKey,
    pub activity_id: String,
    pub status: AlertStatus,
    pub created_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn record() -> SwapRecord {
        SwapRecord::new(
            "S1".to_string(),
            "IM",
            SwapKind::OneToOne,
            "R1",
            at(9, 0).date(),
            "R2",
            Some(at(16, 0).date()),
            "R1",
            at(1, 8),
        )
    }

    #[test]
    fn test_advance_records_transitions() {
        let mut swap = record();
        assert!(swap.advance(SwapStatus::Approved, "chief", at(1, 9), None));
        assert!(!swap.advance(SwapStatus::Pending, "chief", at(1, 10), None));
        assert_eq!(swap.status, SwapStatus::Approved);
        assert_eq!(swap.transitions.len(), 2);
        assert_eq!(swap.transitions[1].from, Some(SwapStatus::Pending));
    }

    #[test]
    fn test_affected_range_spans_both_periods() {
        let swap = record();
        let range = swap.affected_range(7);
        assert_eq!(range.start, at(9, 0).date());
        assert_eq!(range.end, at(22, 0).date());
    }

    #[test]
    fn test_rollback_window() {
        let mut swap = record();
        swap.executed_at = Some(at(2, 8));
        assert!(swap.within_rollback_window(at(3, 8), Duration::hours(24)));
        assert!(!swap.within_rollback_window(at(3, 9), Duration::hours(24)));
    }
}
