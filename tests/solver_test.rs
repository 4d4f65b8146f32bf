// ==========================================
// 排班求解器集成测试
// ==========================================
// 目标: 四种算法在可行实例上的结果、状态由校验器判定、
//       不合法模型 FAILED、不可行实例 PARTIAL、预算耗尽返回部分解
// ==========================================


#[cfg(test)]
mod solver_test {
    use crate::test_helpers::*;
    use residency_aps::config::EngineConfig;
    use residency_aps::domain::{
        ActivityCategory, ActivityTemplate, DateRange, DomainSnapshot, Slot, SlotKey, SolveStatus,
        SubPeriod, ViolationKind,
    };
    use residency_aps::engine::ComplianceValidator;
    use residency_aps::solver::{ScheduleSolver, SolveBudget, SolverAlgorithm};

    const ALL: [SolverAlgorithm; 4] = [
        SolverAlgorithm::Greedy,
        SolverAlgorithm::ConstraintProgramming,
        SolverAlgorithm::LinearProgramming,
        SolverAlgorithm::Hybrid,
    ];

    fn budget() -> SolveBudget {
        SolveBudget::from_millis(10_000, 200_000)
    }

    #[test]
    fn test_feasible_instance_solved_by_search_strategies() {
        let snapshot = generation_snapshot();
        let validator = ComplianceValidator::new(EngineConfig::default());

        for algorithm in [
            SolverAlgorithm::Greedy,
            SolverAlgorithm::ConstraintProgramming,
            SolverAlgorithm::Hybrid,
        ] {
            let outcome = ScheduleSolver::new().generate(algorithm, &snapshot, &validator, first_week(), &budget());
            assert_eq!(outcome.status, SolveStatus::Success, "{} 应得到可行解", algorithm);
            assert_eq!(outcome.hard_violation_count(), 0);
            // 病房 14 + 门诊 5
            assert_eq!(outcome.diagnostics.seats_required, 19);
            assert_eq!(outcome.diagnostics.seats_filled, 19);
            assert_eq!(outcome.diagnostics.algorithm, algorithm);

            // 结果经独立校验同样合规
            let report = validator.validate_assignments(&snapshot, &outcome.assignments, first_week());
            assert!(report.is_compliant(), "{}: {:?}", algorithm, report.hard_violations());
            assert_eq!(report.coverage_rate, 1.0);
        }
    }

    #[test]
    fn test_status_always_matches_hard_violations() {
        let snapshot = generation_snapshot();
        let validator = ComplianceValidator::new(EngineConfig::default());

        for algorithm in ALL {
            let outcome = ScheduleSolver::new().generate(algorithm, &snapshot, &validator, first_week(), &budget());
            assert_ne!(outcome.status, SolveStatus::Failed);
            assert_eq!(
                outcome.status == SolveStatus::Success,
                outcome.hard_violation_count() == 0,
                "{} 的状态必须由硬违规决定",
                algorithm
            );
        }
    }

    #[test]
    fn test_malformed_snapshot_fails_without_assignments() {
        let mut snapshot = generation_snapshot();
        snapshot.people.push(trainee("R1", 2, &["im"]));
        let validator = ComplianceValidator::new(EngineConfig::default());

        for algorithm in ALL {
            let outcome = ScheduleSolver::new().generate(algorithm, &snapshot, &validator, first_week(), &budget());
            assert_eq!(outcome.status, SolveStatus::Failed);
            assert!(outcome.assignments.is_empty());
            assert!(outcome.diagnostics.notes.iter().any(|n| n.contains("R1")));
        }
    }

    #[test]
    fn test_inverted_window_fails() {
        let snapshot = generation_snapshot();
        let validator = ComplianceValidator::new(EngineConfig::default());
        let window = residency_aps::domain::DateRange::new(d(8), d(2));

        let outcome = ScheduleSolver::new().generate(SolverAlgorithm::Greedy, &snapshot, &validator, window, &budget());
        assert_eq!(outcome.status, SolveStatus::Failed);
    }

    #[test]
    fn test_understaffed_instance_returns_partial_with_gaps() {
        // 仅 1 名住院医师: 每周至少休息 1 天,病房无法全覆盖
        let mut snapshot = generation_snapshot();
        snapshot.people.retain(|p| p.person_id == "R2" || p.person_id.starts_with('F'));
        let validator = ComplianceValidator::new(EngineConfig::default());

        for algorithm in ALL {
            let outcome = ScheduleSolver::new().generate(algorithm, &snapshot, &validator, first_week(), &budget());
            assert_eq!(outcome.status, SolveStatus::Partial, "{}", algorithm);
            assert!(outcome.hard_violation_count() > 0);
            assert!(outcome.violations.iter().any(|v| v.kind == ViolationKind::CoverageGap));
            assert!(outcome.diagnostics.seats_filled < outcome.diagnostics.seats_required);
            assert!(!outcome.assignments.is_empty());
        }
    }

    #[test]
    fn test_exhausted_budget_returns_best_effort_result() {
        let snapshot = generation_snapshot();
        let validator = ComplianceValidator::new(EngineConfig::default());
        let budget = SolveBudget::from_millis(10_000, 1);
        budget.cancel();

        let outcome = ScheduleSolver::new().generate(
            SolverAlgorithm::ConstraintProgramming,
            &snapshot,
            &validator,
            first_week(),
            &budget,
        );
        assert!(outcome.diagnostics.budget_exhausted);
        assert_ne!(outcome.status, SolveStatus::Failed);
        assert_eq!(
            outcome.status == SolveStatus::Success,
            outcome.hard_violation_count() == 0
        );
    }

    #[test]
    fn test_fixed_assignments_are_preserved() {
        let mut snapshot = generation_snapshot();
        let mut manual = assignment("MANUAL", "R3", SlotKey::am(d(2)), "clinic");
        manual.is_override = true;
        let outside = assignment("OUTSIDE", "R4", SlotKey::am(d(10)), "clinic");
        snapshot.assignments = vec![manual, outside];
        let validator = ComplianceValidator::new(EngineConfig::default());

        let outcome = ScheduleSolver::new().generate(SolverAlgorithm::Greedy, &snapshot, &validator, first_week(), &budget());
        assert_eq!(outcome.status, SolveStatus::Success);
        assert!(outcome.assignments.iter().any(|a| a.assignment_id == "MANUAL"));
        assert!(outcome.assignments.iter().any(|a| a.assignment_id == "OUTSIDE"));
        // 人工覆写已占用周一上午门诊席位
        assert_eq!(outcome.diagnostics.seats_required, 18);
        let monday_clinic = outcome
            .assignments
            .iter()
            .filter(|a| a.slot == SlotKey::am(d(2)) && a.activity_id == "clinic")
            .count();
        assert_eq!(monday_clinic, 1);
    }

    /// 全年窗口: 80 名住院医师,4 项活动 × 上下午 × 3 席
    fn year_long_snapshot(window: DateRange) -> DomainSnapshot {
        let people = (1..=80).map(|i| trainee(&format!("Y{:02}", i), 1 + (i % 3) as u8, &["im"])).collect();
        let activities = (1..=4)
            .map(|i| ActivityTemplate {
                max_per_slot: 3,
                periods: vec![SubPeriod::Am, SubPeriod::Pm],
                ..activity(&format!("duty{}", i), ActivityCategory::CoreEducation, 4.0, 3)
            })
            .collect();
        DomainSnapshot {
            program_id: PROGRAM_ID.to_string(),
            people,
            slots: Slot::generate(&window, &[]),
            activities,
            assignments: vec![],
            absences: vec![],
        }
    }

    #[test]
    fn test_constraint_search_handles_year_long_window_on_small_stack() {
        let window = DateRange::new(d(2), d(2) + chrono::Duration::days(364));
        let snapshot = year_long_snapshot(window);
        let validator = ComplianceValidator::new(EngineConfig::default());

        // 2 MB 栈: 搜索深度不得随席位数占用调用栈
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                ScheduleSolver::new().generate(
                    SolverAlgorithm::ConstraintProgramming,
                    &snapshot,
                    &validator,
                    window,
                    &SolveBudget::from_millis(20_000, 200_000),
                )
            })
            .unwrap();
        let outcome = handle.join().expect("求解线程不应崩溃");

        assert_ne!(outcome.status, SolveStatus::Failed);
        assert_eq!(outcome.diagnostics.seats_required, 365 * 24);
        assert!(outcome.diagnostics.seats_filled > 0);
        assert_eq!(
            outcome.status == SolveStatus::Success,
            outcome.hard_violation_count() == 0
        );
    }
}
