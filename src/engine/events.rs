// ==========================================
// 住院医师排班系统 - 引擎层事件发布
// ==========================================
// 职责: 定义引擎事件发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，通知投递由外部协作方实现
// 红线: 发布失败只记录日志，不影响主流程（至少一次,尽力而为）
// ==========================================

use crate::domain::calendar::DateRange;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ==========================================
// 引擎事件类型
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEventType {
    /// 防御等级变更
    DefenseLevelChanged,
    /// 换班状态变更
    SwapStatusChanged,
    /// 缺勤冲突告警创建
    ConflictAlertCreated,
    /// 排班生成完成
    ScheduleGenerated,
    /// 减载执行
    LoadShed,
    /// 兜底方案启用
    FallbackActivated,
    /// 容量耗尽（需人工决策）
    CapacityExhausted,
    /// 脆弱性分析过期（提示）
    StaleAnalysis,
}

impl EngineEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            EngineEventType::DefenseLevelChanged => "DefenseLevelChanged",
            EngineEventType::SwapStatusChanged => "SwapStatusChanged",
            EngineEventType::ConflictAlertCreated => "ConflictAlertCreated",
            EngineEventType::ScheduleGenerated => "ScheduleGenerated",
            EngineEventType::LoadShed => "LoadShed",
            EngineEventType::FallbackActivated => "FallbackActivated",
            EngineEventType::CapacityExhausted => "CapacityExhausted",
            EngineEventType::StaleAnalysis => "StaleAnalysis",
        }
    }
}

/// 引擎事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_id: String,
    pub program_id: String,
    pub event_type: EngineEventType,
    /// 事件来源描述
    pub source: Option<String>,
    /// 受影响的日期范围
    pub affected_range: Option<DateRange>,
    /// 事件负载（JSON）
    pub payload: serde_json::Value,
    pub occurred_at: NaiveDateTime,
}

impl EngineEvent {
    pub fn new(
        program_id: &str,
        event_type: EngineEventType,
        payload: serde_json::Value,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            program_id: program_id.to_string(),
            event_type,
            source: None,
            affected_range: None,
            payload,
            occurred_at,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.affected_range = Some(range);
        self
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 引擎事件发布者 Trait
///
/// # 实现说明
/// - 通知投递方实现此 trait
/// - 返回的任务 ID 仅用于日志关联
pub trait EngineEventPublisher: Send + Sync {
    /// 发布引擎事件
    ///
    /// # 返回
    /// - `Ok(task_id)`: 任务 ID（如果支持）或空字符串
    /// - `Err`: 发布失败
    fn publish(&self, event: EngineEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl EngineEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: EngineEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - program_id={}, event_type={}",
            event.program_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 内存记录发布者（测试与 CLI 回显）
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count_of(&self, event_type: EngineEventType) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| ev.event_type == event_type).count())
            .unwrap_or(0)
    }
}

impl EngineEventPublisher for RecordingEventPublisher {
    fn publish(&self, event: EngineEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let id = event.event_id.clone();
        self.events
            .lock()
            .map_err(|e| format!("锁获取失败: {}", e))?
            .push(event);
        Ok(id)
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn EngineEventPublisher>> 的使用
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn EngineEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn EngineEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    pub fn publish(&self, event: EngineEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - program_id={}, event_type={}",
                    event.program_id,
                    event.event_type.as_str()
                );
                Ok(String::new())
            }
        }
    }

    /// 发布事件,失败仅记录告警
    pub fn publish_best_effort(&self, event: EngineEvent) {
        let event_type = event.event_type;
        let program_id = event.program_id.clone();
        if let Err(e) = self.publish(event) {
            tracing::warn!(
                program_id = %program_id,
                event_type = event_type.as_str(),
                error = %e,
                "事件发布失败（已忽略）"
            );
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    struct FailingPublisher;

    impl EngineEventPublisher for FailingPublisher {
        fn publish(&self, _event: EngineEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
            Err("下游不可用".into())
        }
    }

    #[test]
    fn test_noop_publisher() {
        let publisher = NoOpEventPublisher;
        let event = EngineEvent::new("IM", EngineEventType::ScheduleGenerated, json!({}), at());
        let result = publisher.publish(event);
        assert!(result.is_ok());
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_optional_publisher_none() {
        let publisher = OptionalEventPublisher::none();
        assert!(!publisher.is_configured());
        let event = EngineEvent::new("IM", EngineEventType::LoadShed, json!({}), at());
        assert!(publisher.publish(event).is_ok());
    }

    #[test]
    fn test_recording_publisher_counts() {
        let recorder = Arc::new(RecordingEventPublisher::new());
        let publisher = OptionalEventPublisher::with_publisher(recorder.clone());
        publisher.publish_best_effort(EngineEvent::new(
            "IM",
            EngineEventType::DefenseLevelChanged,
            json!({"from": "GREEN", "to": "YELLOW"}),
            at(),
        ));
        assert_eq!(recorder.count_of(EngineEventType::DefenseLevelChanged), 1);
        assert_eq!(recorder.count_of(EngineEventType::LoadShed), 0);
    }

    #[test]
    fn test_best_effort_swallows_failure() {
        let publisher = OptionalEventPublisher::with_publisher(Arc::new(FailingPublisher));
        let event = EngineEvent::new("IM", EngineEventType::CapacityExhausted, json!({}), at());
        assert!(publisher.publish(event.clone()).is_err());
        publisher.publish_best_effort(event);
    }
}
