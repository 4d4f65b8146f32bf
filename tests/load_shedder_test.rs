// ==========================================
// 负载削减集成测试
// ==========================================
// 目标: 按牺牲层级从最末层逐层削减,利用率低于阈值即停止;
//       受保护层级永不削减; 手工覆盖分配默认保留
// ==========================================


#[cfg(test)]
mod load_shedder_test {
    use crate::test_helpers::*;
    use residency_aps::config::{DefenseConfig, EngineConfig, SheddingConfig};
    use residency_aps::domain::{
        ActivityCategory, ActivityTemplate, DefenseLevel, DomainSnapshot, Slot, SlotKey,
    };
    use residency_aps::engine::ComplianceValidator;
    use residency_aps::resilience::{LoadShedder, SacrificeHierarchy};
    use residency_aps::solver::SolveBudget;

    /// R1 每周 10h 容量; icu（患者安全,周一上午）+ research（科研,周二上午）
    fn overloaded_snapshot(icu_hours: f64, research_hours: f64, research_override: bool) -> DomainSnapshot {
        let mut r1 = trainee("R1", 2, &["im"]);
        r1.max_hours_per_week = Some(10.0);

        let icu = ActivityTemplate {
            active_weekdays: vec![0],
            ..activity("icu", ActivityCategory::PatientSafety, icu_hours, 1)
        };
        let research = ActivityTemplate {
            active_weekdays: vec![1],
            ..activity("research", ActivityCategory::Research, research_hours, 1)
        };

        let mut research_assignment = assignment("A-research", "R1", SlotKey::am(d(3)), "research");
        research_assignment.is_override = research_override;

        DomainSnapshot {
            program_id: PROGRAM_ID.to_string(),
            people: vec![r1],
            slots: Slot::generate(&first_week(), &[]),
            activities: vec![icu, research],
            assignments: vec![
                assignment("A-icu", "R1", SlotKey::am(d(2)), "icu"),
                research_assignment,
            ],
            absences: vec![],
        }
    }

    fn shedder() -> LoadShedder {
        let hierarchy = SacrificeHierarchy::from_config(&SheddingConfig::default()).unwrap();
        LoadShedder::new(hierarchy, DefenseConfig::default())
    }

    fn budget() -> SolveBudget {
        SolveBudget::from_millis(5_000, 50_000)
    }

    #[test]
    fn test_orange_sheds_lowest_tiers_until_below_threshold() {
        let snapshot = overloaded_snapshot(4.0, 5.0, false);
        let validator = ComplianceValidator::new(EngineConfig::default());

        let outcome = shedder().shed(&snapshot, first_week(), DefenseLevel::Orange, &validator, &budget(), at(2, 8));

        assert!((outcome.utilization_before - 0.9).abs() < 1e-9);
        assert!((outcome.utilization_after - 0.4).abs() < 1e-9);
        assert!((outcome.target_utilization - 0.80).abs() < 1e-9);
        assert!(outcome.resolved);

        // 最末两层无分配也记为已削减,科研之后即停止
        assert_eq!(
            outcome.shed_categories,
            vec![
                ActivityCategory::OptionalEducation,
                ActivityCategory::Administration,
                ActivityCategory::Research
            ]
        );
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].category, ActivityCategory::Research);
        assert_eq!(outcome.steps[0].removed, 1);

        let removed: Vec<&str> = outcome
            .change_set
            .removed
            .iter()
            .map(|a| a.assignment_id.as_str())
            .collect();
        assert_eq!(removed, vec!["A-research"]);
        assert!(outcome.change_set.added.is_empty());
    }

    #[test]
    fn test_patient_safety_is_never_shed() {
        let snapshot = overloaded_snapshot(9.0, 1.0, false);
        let validator = ComplianceValidator::new(EngineConfig::default());

        let outcome = shedder().shed(&snapshot, first_week(), DefenseLevel::Orange, &validator, &budget(), at(2, 8));

        assert!(!outcome.resolved);
        assert!((outcome.utilization_after - 0.9).abs() < 1e-9);
        assert!(!outcome.shed_categories.contains(&ActivityCategory::PatientSafety));
        assert_eq!(outcome.shed_categories.len(), 6);
        assert!(outcome
            .change_set
            .removed
            .iter()
            .all(|a| a.activity_id != "icu"));
    }

    #[test]
    fn test_manual_overrides_are_kept() {
        let snapshot = overloaded_snapshot(4.0, 5.0, true);
        let validator = ComplianceValidator::new(EngineConfig::default());

        let outcome = shedder().shed(&snapshot, first_week(), DefenseLevel::Orange, &validator, &budget(), at(2, 8));

        assert!(outcome.change_set.is_empty());
        assert!(outcome.steps.is_empty());
        assert!(!outcome.resolved);
    }

    #[test]
    fn test_below_target_sheds_nothing() {
        let snapshot = overloaded_snapshot(4.0, 1.0, false);
        let validator = ComplianceValidator::new(EngineConfig::default());

        let outcome = shedder().shed(&snapshot, first_week(), DefenseLevel::Orange, &validator, &budget(), at(2, 8));

        assert!(outcome.resolved);
        assert!(outcome.shed_categories.is_empty());
        assert!(outcome.change_set.is_empty());
    }
}
