// ==========================================
// 排班 API 端到端测试
// ==========================================
// 目标: 生成 → 存档 → 替换在线排班 → 校验的完整链路;
//       PARTIAL 只存档不上线; 不合法模型与非法窗口的错误映射;
//       兜底方案并发预计算; 同一窗口串行生成
// ==========================================


#[cfg(test)]
mod api_e2e_test {
    use crate::test_helpers::*;
    use residency_aps::api::ApiError;
    use residency_aps::app::AppState;
    use residency_aps::domain::{CrisisScenario, DateRange, SnapshotStatus, SolveStatus};
    use residency_aps::engine::EngineEventType;
    use residency_aps::repository::ScheduleRepository;
    use residency_aps::solver::SolverAlgorithm;

    #[tokio::test]
    async fn test_generate_archive_apply_and_validate() {
        let env = setup_env(generation_snapshot(), at(1, 8));

        let result = env
            .api
            .generate_schedule(PROGRAM_ID, first_week(), Some(SolverAlgorithm::Greedy), None)
            .await
            .unwrap();
        assert_eq!(result.status, SolveStatus::Success);
        assert!(result.applied);
        assert_eq!(result.version, Some(1));
        assert!(result.assignments.iter().all(|a| first_week().contains(a.slot.date)));

        // 在线排班已替换,校验结果合规
        let live = env.repo.load_snapshot(PROGRAM_ID).await.unwrap();
        assert_eq!(live.assignments.len(), result.assignments.len());
        let report = env.api.validate_schedule(PROGRAM_ID, first_week()).await.unwrap();
        assert_eq!(report.hard_count, 0);
        assert_eq!(report.coverage_rate, 1.0);

        let versions = env.api.list_schedule_versions(PROGRAM_ID).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].status, SnapshotStatus::Accepted);
        assert_eq!(versions[0].algorithm, "GREEDY");
        assert_eq!(versions[0].assignments.len(), result.assignments.len());
        assert!(versions[0].config_snapshot_json.is_some());

        assert_eq!(env.events.count_of(EngineEventType::ScheduleGenerated), 1);
    }

    #[tokio::test]
    async fn test_partial_result_is_archived_but_not_applied() {
        let mut snapshot = generation_snapshot();
        snapshot.people.retain(|p| p.person_id == "R2" || p.person_id.starts_with('F'));
        let env = setup_env(snapshot, at(1, 8));

        let result = env
            .api
            .generate_schedule(PROGRAM_ID, first_week(), None, None)
            .await
            .unwrap();
        assert_eq!(result.status, SolveStatus::Partial);
        assert!(!result.applied);
        assert!(result.version.is_some());
        assert!(!result.violations.is_empty());

        let live = env.repo.load_snapshot(PROGRAM_ID).await.unwrap();
        assert!(live.assignments.is_empty());

        let versions = env.api.list_schedule_versions(PROGRAM_ID).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].status, SnapshotStatus::Partial);
        assert!(!versions[0].violations.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_model_and_bad_window_are_rejected() {
        let mut snapshot = generation_snapshot();
        snapshot.assignments.push(assignment("GHOST", "NOBODY", residency_aps::domain::SlotKey::am(d(2)), "ward"));
        let env = setup_env(snapshot, at(1, 8));

        let err = env.api.validate_schedule(PROGRAM_ID, first_week()).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(msg) if msg.contains("NOBODY")));

        let result = env
            .api
            .generate_schedule(PROGRAM_ID, first_week(), None, None)
            .await
            .unwrap();
        assert_eq!(result.status, SolveStatus::Failed);
        assert!(result.version.is_none());
        assert!(env.api.list_schedule_versions(PROGRAM_ID).unwrap().is_empty());

        let err = env
            .api
            .generate_schedule(PROGRAM_ID, DateRange::new(d(8), d(2)), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = env
            .api
            .generate_schedule("UNKNOWN", first_week(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_generation_on_same_window_is_serialized() {
        let env = setup_env(generation_snapshot(), at(1, 8));
        let api = env.api.clone();

        let (a, b) = tokio::join!(
            api.generate_schedule(PROGRAM_ID, first_week(), Some(SolverAlgorithm::Greedy), None),
            api.generate_schedule(PROGRAM_ID, first_week(), Some(SolverAlgorithm::Hybrid), None),
        );
        let mut versions = vec![a.unwrap().version.unwrap(), b.unwrap().version.unwrap()];
        versions.sort();
        assert_eq!(versions, vec![1, 2]);

        let report = env.api.validate_schedule(PROGRAM_ID, first_week()).await.unwrap();
        assert_eq!(report.hard_count, 0);
    }

    #[tokio::test]
    async fn test_precompute_fallbacks_for_several_scenarios() {
        let env = setup_env(generation_snapshot(), at(1, 8));
        let results = env
            .api
            .precompute_fallbacks(
                PROGRAM_ID,
                first_week(),
                vec![
                    CrisisScenario::baseline(),
                    CrisisScenario {
                        name: "r1-out".to_string(),
                        absent_person_ids: vec!["R1".to_string()],
                    },
                ],
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, CrisisScenario::BASELINE);
        let r1_out = results[1].1.as_ref().unwrap();
        assert!(!r1_out.assignments.is_empty());
        assert!(r1_out.assignments.iter().all(|a| a.person_id != "R1"));
        assert!(results[0].1.is_ok());

        assert_eq!(
            env.api.fallback_scenarios(PROGRAM_ID),
            vec!["baseline".to_string(), "r1-out".to_string()]
        );
    }

    #[tokio::test]
    async fn test_app_state_wires_default_config() {
        let state = AppState::in_memory(None).await.unwrap();
        state.schedule_repo.put(generation_snapshot());

        let result = state
            .scheduling_api
            .generate_schedule(PROGRAM_ID, first_week(), None, None)
            .await
            .unwrap();
        assert_eq!(result.status, SolveStatus::Success);
        assert_eq!(state.get_db_path(), ":memory:");
    }
}
