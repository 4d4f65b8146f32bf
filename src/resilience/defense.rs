// ==========================================
// 住院医师排班系统 - 防御等级控制器
// ==========================================
// 状态机: GREEN → YELLOW → ORANGE → RED → BLACK → CRITICAL
// 红线:
// - 等级只由新样本驱动,不提供直接写入接口
// - 每个样本最多移动一级
// - 样本序号不新于上次已评估样本 → StaleSample
// - 每次转换: 追加日志 + 发布一次 DefenseLevelChanged
// ==========================================

use crate::config::DefenseConfig;
use crate::domain::resilience::{DefenseStatus, DefenseTransition, UtilizationSample};
use crate::domain::types::DefenseLevel;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EngineEvent, EngineEventType, OptionalEventPublisher};
use crate::repository::DefenseLogRepository;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ProgramDefense {
    level: DefenseLevel,
    utilization: f64,
    since: NaiveDateTime,
    last_seq: Option<u64>,
}

impl Default for ProgramDefense {
    fn default() -> Self {
        Self {
            level: DefenseLevel::Green,
            utilization: 0.0,
            since: NaiveDateTime::default(),
            last_seq: None,
        }
    }
}

// ==========================================
// DefenseController - 防御等级控制器
// ==========================================
pub struct DefenseController {
    config: DefenseConfig,
    programs: Mutex<HashMap<String, ProgramDefense>>,
    log: Option<Arc<DefenseLogRepository>>,
    publisher: OptionalEventPublisher,
}

impl DefenseController {
    pub fn new(config: DefenseConfig) -> Self {
        Self {
            config,
            programs: Mutex::new(HashMap::new()),
            log: None,
            publisher: OptionalEventPublisher::none(),
        }
    }

    pub fn with_log(mut self, log: Arc<DefenseLogRepository>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_publisher(mut self, publisher: OptionalEventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(&self) -> &DefenseConfig {
        &self.config
    }

    /// 当前状态（未采样过的 program 为 GREEN）
    pub fn status(&self, program_id: &str) -> DefenseStatus {
        let programs = self.programs.lock().unwrap_or_else(|e| e.into_inner());
        let state = programs.get(program_id).cloned().unwrap_or_default();
        DefenseStatus {
            level: state.level,
            utilization: state.utilization,
            since: state.since,
        }
    }

    /// 由持久化日志恢复等级（启动时调用）
    pub fn restore_from_log(&self, program_id: &str) -> EngineResult<Option<DefenseLevel>> {
        let Some(log) = &self.log else {
            return Ok(None);
        };
        let Some(latest) = log.latest(program_id)? else {
            return Ok(None);
        };
        let mut programs = self.programs.lock().map_err(|e| EngineError::Internal(e.to_string()))?;
        programs.insert(
            program_id.to_string(),
            ProgramDefense {
                level: latest.to,
                utilization: latest.utilization,
                since: latest.at,
                last_seq: None,
            },
        );
        Ok(Some(latest.to))
    }

    /// 评估样本
    ///
    /// # 返回
    /// - Ok(Some(transition)): 发生一级转换
    /// - Ok(None): 等级不变
    /// - Err(StaleSample): 样本过期,状态不变
    #[instrument(skip(self, sample), fields(program_id = %sample.program_id, seq = sample.seq))]
    pub fn evaluate(&self, sample: &UtilizationSample) -> EngineResult<Option<DefenseTransition>> {
        let transition = {
            let mut programs = self.programs.lock().map_err(|e| EngineError::Internal(e.to_string()))?;
            let state = programs.entry(sample.program_id.clone()).or_default();

            if let Some(last_seq) = state.last_seq {
                if sample.seq <= last_seq {
                    return Err(EngineError::StaleSample {
                        seq: sample.seq,
                        last_seq,
                    });
                }
            }

            let target = self.config.target_level(sample.utilization, sample.critical_gaps);
            let next = state.level.step_toward(target);

            let transition = (next != state.level).then(|| DefenseTransition {
                transition_id: Uuid::new_v4().to_string(),
                program_id: sample.program_id.clone(),
                from: state.level,
                to: next,
                utilization: sample.utilization,
                sample_seq: sample.seq,
                at: sample.sampled_at,
            });

            // 先落日志,失败则状态不变
            if let (Some(t), Some(log)) = (&transition, &self.log) {
                log.append(t)?;
            }

            state.last_seq = Some(sample.seq);
            state.utilization = sample.utilization;
            if let Some(t) = &transition {
                state.level = t.to;
                state.since = t.at;
            }
            transition
        };

        if let Some(t) = &transition {
            info!(
                from = %t.from,
                to = %t.to,
                utilization = t.utilization,
                "防御等级变更"
            );
            self.publisher.publish_best_effort(
                EngineEvent::new(
                    &t.program_id,
                    EngineEventType::DefenseLevelChanged,
                    serde_json::json!({
                        "from": t.from,
                        "to": t.to,
                        "utilization": t.utilization,
                        "sample_seq": t.sample_seq,
                    }),
                    t.at,
                )
                .with_source("defense_controller")
                .with_range(sample.window),
            );
        }
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::DateRange;
    use crate::engine::events::RecordingEventPublisher;
    use chrono::NaiveDate;

    fn sample(seq: u64, utilization: f64) -> UtilizationSample {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        UtilizationSample {
            seq,
            program_id: "IM".to_string(),
            window: DateRange::from_start(start, 28),
            load_hours: utilization * 100.0,
            capacity_hours: 100.0,
            utilization,
            critical_gaps: 0,
            sampled_at: start.and_hms_opt(8, seq as u32 % 24, 0).unwrap(),
        }
    }

    #[test]
    fn test_rising_utilization_moves_one_level_per_sample() {
        let controller = DefenseController::new(DefenseConfig::default());
        let mut levels = Vec::new();
        for (seq, util) in [(1, 0.97), (2, 0.97), (3, 0.97), (4, 0.97), (5, 0.97)] {
            controller.evaluate(&sample(seq, util)).unwrap();
            levels.push(controller.status("IM").level);
        }
        assert_eq!(
            levels,
            vec![
                DefenseLevel::Yellow,
                DefenseLevel::Orange,
                DefenseLevel::Red,
                DefenseLevel::Black,
                DefenseLevel::Black
            ]
        );
    }

    #[test]
    fn test_stale_sample_is_rejected_without_state_change() {
        let controller = DefenseController::new(DefenseConfig::default());
        controller.evaluate(&sample(5, 0.75)).unwrap();
        let err = controller.evaluate(&sample(5, 0.99)).unwrap_err();
        assert!(matches!(err, EngineError::StaleSample { seq: 5, last_seq: 5 }));
        assert_eq!(controller.status("IM").level, DefenseLevel::Yellow);
    }

    #[test]
    fn test_each_transition_publishes_once() {
        let recorder = Arc::new(RecordingEventPublisher::new());
        let controller = DefenseController::new(DefenseConfig::default())
            .with_publisher(OptionalEventPublisher::with_publisher(recorder.clone()));

        controller.evaluate(&sample(1, 0.65)).unwrap();
        assert!(controller.evaluate(&sample(2, 0.82)).unwrap().is_some());
        assert!(controller.evaluate(&sample(3, 0.75)).unwrap().is_none());
        assert_eq!(recorder.count_of(EngineEventType::DefenseLevelChanged), 1);
    }

    proptest::proptest! {
        #[test]
        fn prop_level_moves_at_most_one_step_per_sample(
            utilizations in proptest::collection::vec(0.0f64..1.2, 1..40)
        ) {
            let controller = DefenseController::new(DefenseConfig::default());
            let mut previous = controller.status("IM").level;
            for (i, util) in utilizations.iter().enumerate() {
                controller.evaluate(&sample(i as u64 + 1, *util)).unwrap();
                let current = controller.status("IM").level;
                proptest::prop_assert!((current.rank() as i16 - previous.rank() as i16).abs() <= 1);
                previous = current;
            }
        }

        #[test]
        fn prop_rising_utilization_never_lowers_level(
            mut utilizations in proptest::collection::vec(0.0f64..1.2, 1..40)
        ) {
            utilizations.sort_by(|a, b| a.total_cmp(b));
            let controller = DefenseController::new(DefenseConfig::default());
            let mut previous = controller.status("IM").level;
            for (i, util) in utilizations.iter().enumerate() {
                controller.evaluate(&sample(i as u64 + 1, *util)).unwrap();
                let current = controller.status("IM").level;
                proptest::prop_assert!(current.rank() >= previous.rank());
                previous = current;
            }
        }
    }
}
