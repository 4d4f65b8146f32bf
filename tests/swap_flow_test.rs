// ==========================================
// 换班全流程集成测试
// ==========================================
// 目标: 申请校验收集全部错误且不建记录、
//       申请 → 审批 → 执行 → 回滚（分配 ID 不变）、
//       回滚窗口过期、执行中途失败时在线排班不变、
//       联动职责随主活动执行并随回滚精确恢复
// ==========================================


#[cfg(test)]
mod swap_flow_test {
    use crate::test_helpers::*;
    use residency_aps::api::{ApiError, SwapRequest};
    use residency_aps::config::{CouplingRule, EngineConfig};
    use residency_aps::domain::{
        ActivityCategory, ActivityTemplate, Assignment, SlotKey, SubPeriod, SwapKind, SwapStatus,
    };
    use residency_aps::engine::EngineEventType;
    use residency_aps::repository::ScheduleRepository;
    use chrono::Duration;

    fn request(
        kind: SwapKind,
        source: &str,
        source_start: chrono::NaiveDate,
        target: &str,
        target_start: Option<chrono::NaiveDate>,
    ) -> SwapRequest {
        SwapRequest {
            program_id: PROGRAM_ID.to_string(),
            kind,
            source_person_id: source.to_string(),
            source_period_start: source_start,
            target_person_id: target.to_string(),
            target_period_start: target_start,
            activity_filter: None,
            requested_by: source.to_string(),
            reason: Some("family event".to_string()),
        }
    }

    async fn live_assignments(env: &TestEnv) -> Vec<Assignment> {
        let mut list = env.repo.load_snapshot(PROGRAM_ID).await.unwrap().assignments;
        list.sort_by(|a, b| a.assignment_id.cmp(&b.assignment_id));
        list
    }

    fn owner_of<'a>(list: &'a [Assignment], assignment_id: &str) -> &'a str {
        list.iter()
            .find(|a| a.assignment_id == assignment_id)
            .map(|a| a.person_id.as_str())
            .unwrap()
    }

    /// R1 周二门诊（03-10）与 R2 下周二门诊（03-17）
    fn clinic_pair_env() -> TestEnv {
        let snapshot = swap_snapshot(vec![
            assignment("A-1", "R1", SlotKey::am(d(10)), "clinic"),
            assignment("A-2", "R2", SlotKey::am(d(17)), "clinic"),
        ]);
        setup_env(snapshot, at(1, 8))
    }

    #[tokio::test]
    async fn test_invalid_proposal_reports_every_error_and_creates_nothing() {
        // 今天 03-10; R1 已在 03-09 与 03-16 值病房,吸收 R2 03-02 周的病房
        let snapshot = swap_snapshot(vec![
            assignment("W-1", "R1", SlotKey::am(d(9)), "ward"),
            assignment("W-2", "R1", SlotKey::am(d(16)), "ward"),
            assignment("W-3", "R2", SlotKey::am(d(2)), "ward"),
        ]);
        let env = setup_env(snapshot, at(10, 9));

        let err = env
            .api
            .propose_swap(request(SwapKind::Absorb, "R2", d(2), "R1", None))
            .await
            .unwrap_err();

        match err {
            ApiError::SwapValidationError { errors, .. } => {
                assert!(errors.len() >= 2, "{:?}", errors);
                assert!(errors.iter().any(|e| e.contains("已过")));
                assert!(errors.iter().any(|e| e.contains("间隔不足")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(env.api.list_swaps(PROGRAM_ID).unwrap().is_empty());
        assert_eq!(env.events.count_of(EngineEventType::SwapStatusChanged), 0);
    }

    #[tokio::test]
    async fn test_malformed_request_is_invalid_input() {
        let env = clinic_pair_env();
        let err = env
            .api
            .propose_swap(request(SwapKind::OneToOne, "R1", d(9), "R2", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_one_to_one_execute_and_rollback_round_trip() {
        let env = clinic_pair_env();
        let before = live_assignments(&env).await;

        let proposal = env
            .api
            .propose_swap(request(SwapKind::OneToOne, "R1", d(9), "R2", Some(d(16))))
            .await
            .unwrap();
        assert_eq!(proposal.record.status, SwapStatus::Pending);
        assert!(proposal.warnings.is_empty());
        let swap_id = proposal.record.swap_id.clone();

        let approved = env.api.approve_swap(&swap_id, "chief").unwrap();
        assert_eq!(approved.status, SwapStatus::Approved);

        let executed = env.api.execute_swap(&swap_id, "chief").await.unwrap();
        assert_eq!(executed.status, SwapStatus::Executed);
        assert!(executed.snapshot_id.is_some());

        // 分配 ID 保持不变,人员互换
        let after = live_assignments(&env).await;
        assert_eq!(after.len(), 2);
        assert_eq!(owner_of(&after, "A-1"), "R2");
        assert_eq!(owner_of(&after, "A-2"), "R1");

        env.clock.advance(Duration::hours(1));
        let rolled = env.api.rollback_swap(&swap_id, "chief").await.unwrap();
        assert_eq!(rolled.status, SwapStatus::RolledBack);

        let restored = live_assignments(&env).await;
        assert_eq!(owner_of(&restored, "A-1"), "R1");
        assert_eq!(owner_of(&restored, "A-2"), "R2");
        assert_eq!(restored, before);

        let history: Vec<SwapStatus> = env
            .api
            .swap_history(&swap_id)
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            history,
            vec![
                SwapStatus::Pending,
                SwapStatus::Approved,
                SwapStatus::Executed,
                SwapStatus::RolledBack
            ]
        );
        assert_eq!(env.events.count_of(EngineEventType::SwapStatusChanged), 4);
    }

    #[tokio::test]
    async fn test_rollback_after_window_is_rejected() {
        let env = clinic_pair_env();
        let proposal = env
            .api
            .propose_swap(request(SwapKind::OneToOne, "R1", d(9), "R2", Some(d(16))))
            .await
            .unwrap();
        let swap_id = proposal.record.swap_id;
        env.api.approve_swap(&swap_id, "chief").unwrap();
        env.api.execute_swap(&swap_id, "chief").await.unwrap();

        env.clock.advance(Duration::hours(25));
        let err = env.api.rollback_swap(&swap_id, "chief").await.unwrap_err();
        assert!(matches!(err, ApiError::RollbackWindowExpired(_)));
        assert_eq!(env.api.get_swap(&swap_id).unwrap().status, SwapStatus::Executed);

        let live = live_assignments(&env).await;
        assert_eq!(owner_of(&live, "A-1"), "R2");
    }

    #[tokio::test]
    async fn test_execute_requires_approval() {
        let env = clinic_pair_env();
        let proposal = env
            .api
            .propose_swap(request(SwapKind::OneToOne, "R1", d(9), "R2", Some(d(16))))
            .await
            .unwrap();

        let err = env.api.execute_swap(&proposal.record.swap_id, "chief").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

        env.api.reject_swap(&proposal.record.swap_id, "chief", Some("短缺".to_string())).unwrap();
        let err = env.api.approve_swap(&proposal.record.swap_id, "chief").unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_failed_snapshot_step_leaves_schedule_untouched() {
        let env = clinic_pair_env();
        let before = live_assignments(&env).await;

        let proposal = env
            .api
            .propose_swap(request(SwapKind::OneToOne, "R1", d(9), "R2", Some(d(16))))
            .await
            .unwrap();
        let swap_id = proposal.record.swap_id;
        env.api.approve_swap(&swap_id, "chief").unwrap();

        env.conn
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE swap_execution_snapshot;")
            .unwrap();

        let err = env.api.execute_swap(&swap_id, "chief").await.unwrap_err();
        match err {
            ApiError::ExecutionFailure { step, .. } => assert_eq!(step, "persist_snapshot"),
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(live_assignments(&env).await, before);
        assert_eq!(env.api.get_swap(&swap_id).unwrap().status, SwapStatus::Approved);
    }

    /// R1 03-10 病房 + 当日下午交接; 03-12 单独交接; 03-11 门诊
    fn coupled_ward_env() -> TestEnv {
        let mut snapshot = swap_snapshot(vec![
            assignment("W-1", "R1", SlotKey::am(d(10)), "ward"),
            assignment("H-1", "R1", SlotKey::pm(d(10)), "handoff"),
            assignment("H-2", "R1", SlotKey::pm(d(12)), "handoff"),
            assignment("C-1", "R1", SlotKey::am(d(11)), "clinic"),
        ]);
        snapshot.activities.push(ActivityTemplate {
            periods: vec![SubPeriod::Pm],
            ..activity("handoff", ActivityCategory::ContinuityOfCare, 1.0, 0)
        });
        let config = EngineConfig {
            coupling_rules: vec![CouplingRule {
                primary_activity: "ward".to_string(),
                coupled_activity: "handoff".to_string(),
            }],
            ..EngineConfig::default()
        };
        setup_env_with_config(snapshot, at(1, 8), config)
    }

    #[tokio::test]
    async fn test_coupled_duty_moves_with_primary_and_rolls_back_exactly() {
        let env = coupled_ward_env();
        let before = live_assignments(&env).await;

        let mut req = request(SwapKind::Absorb, "R1", d(9), "R2", None);
        req.activity_filter = Some("ward".to_string());
        let proposal = env.api.propose_swap(req).await.unwrap();
        let swap_id = proposal.record.swap_id.clone();
        env.api.approve_swap(&swap_id, "chief").unwrap();

        let executed = env.api.execute_swap(&swap_id, "chief").await.unwrap();
        assert_eq!(executed.status, SwapStatus::Executed);

        // 当日交接随病房转出,其余分配不动
        let after = live_assignments(&env).await;
        assert_eq!(after.len(), 4);
        assert_eq!(owner_of(&after, "W-1"), "R2");
        assert_eq!(owner_of(&after, "H-1"), "R2");
        assert_eq!(owner_of(&after, "H-2"), "R1");
        assert_eq!(owner_of(&after, "C-1"), "R1");

        env.clock.advance(Duration::hours(2));
        let rolled = env.api.rollback_swap(&swap_id, "chief").await.unwrap();
        assert_eq!(rolled.status, SwapStatus::RolledBack);

        let restored = live_assignments(&env).await;
        assert_eq!(restored, before);
    }
}
