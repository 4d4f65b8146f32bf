// ==========================================
// 合规校验器集成测试
// ==========================================
// 目标: 完整违规集合（不截断）、重复校验结果一致、
//       唯一合格人员被阻断型活动占用时报告覆盖缺口
// ==========================================


#[cfg(test)]
mod compliance_validator_test {
    use crate::test_helpers::*;
    use residency_aps::config::EngineConfig;
    use residency_aps::domain::{ActivityCategory, ActivityTemplate, SlotKey, ViolationKind};
    use residency_aps::engine::ComplianceValidator;

    fn full_week_for(person_id: &str, ward_period_pm: bool) -> Vec<residency_aps::domain::Assignment> {
        let mut list = Vec::new();
        for day in 2..=6 {
            list.push(assignment(
                &format!("{}-clinic-{}", person_id, day),
                person_id,
                SlotKey::am(d(day)),
                "clinic",
            ));
        }
        for day in 7..=8 {
            let slot = if ward_period_pm {
                SlotKey::pm(d(day))
            } else {
                SlotKey::am(d(day))
            };
            list.push(assignment(&format!("{}-ward-{}", person_id, day), person_id, slot, "ward"));
        }
        list
    }

    #[test]
    fn test_reports_every_violation_for_every_person() {
        let mut snapshot = generation_snapshot();
        snapshot.assignments.extend(full_week_for("R1", false));
        snapshot.assignments.extend(full_week_for("R2", true));

        let validator = ComplianceValidator::new(EngineConfig::default());
        let report = validator.validate(&snapshot, first_week());

        // 两人连续工作 7 天,各报告一次休息日不足
        assert_eq!(report.count_of(ViolationKind::RestDayFrequency), 2);
        let rest_people: Vec<_> = report
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::RestDayFrequency)
            .filter_map(|v| v.person_id.clone())
            .collect();
        assert!(rest_people.contains(&"R1".to_string()));
        assert!(rest_people.contains(&"R2".to_string()));

        // 周末 4 个病房单元均无带教
        assert_eq!(report.count_of(ViolationKind::SupervisionRatio), 4);

        // 计数与明细一致
        assert_eq!(report.hard_count, report.hard_violations().len());
        assert_eq!(report.hard_count + report.soft_count, report.violations.len());
        assert!(!report.is_compliant());
        assert!(report.violations.iter().all(|v| !v.message.is_empty()));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut snapshot = generation_snapshot();
        snapshot.assignments.extend(full_week_for("R1", false));

        let validator = ComplianceValidator::new(EngineConfig::default());
        let first = validator.validate(&snapshot, first_week());
        let second = validator.validate(&snapshot, first_week());

        let fingerprint = |report: &residency_aps::engine::ValidationReport| {
            let mut items: Vec<(String, String)> = report
                .violations
                .iter()
                .map(|v| (v.kind.to_string(), v.message.clone()))
                .collect();
            items.sort();
            items
        };
        assert_eq!(fingerprint(&first), fingerprint(&second));
        assert_eq!(first.hard_count, second.hard_count);
        assert_eq!(first.soft_count, second.soft_count);
        assert_eq!(first.coverage_rate, second.coverage_rate);
        assert!((first.objective - second.objective).abs() < 1e-9);
    }

    #[test]
    fn test_sole_provider_on_blocking_duty_leaves_coverage_gap() {
        // 心脏超声仅 R1 具备资格,而 R1 同一时段在阻断型病房值班
        let echo = ActivityTemplate {
            required_specialties: vec!["cards".to_string()],
            active_weekdays: vec![0],
            ..activity("echo", ActivityCategory::CoreEducation, 4.0, 1)
        };
        let mut snapshot = generation_snapshot();
        snapshot.people[0].specialties.insert("cards".to_string());
        snapshot.activities.push(echo);
        snapshot.assignments = vec![
            assignment("A-echo", "R1", SlotKey::am(d(2)), "echo"),
            assignment("A-ward", "R1", SlotKey::am(d(2)), "ward"),
        ];

        let validator = ComplianceValidator::new(EngineConfig::default());
        let report = validator.validate(&snapshot, first_week());

        let gap = report.violations.iter().find(|v| {
            v.kind == ViolationKind::CoverageGap
                && v.activity_id.as_deref() == Some("echo")
                && v.slot == Some(SlotKey::am(d(2)))
        });
        assert!(gap.is_some(), "echo 周一上午应报告覆盖缺口");
        assert!(gap.unwrap().is_hard());
        assert!(report.count_of(ViolationKind::DoubleBooking) >= 1);
        assert!(report.coverage_rate < 1.0);
    }

    #[test]
    fn test_clean_roster_has_full_coverage() {
        let echo = ActivityTemplate {
            active_weekdays: vec![0],
            ..activity("echo", ActivityCategory::CoreEducation, 4.0, 1)
        };
        let snapshot = residency_aps::domain::DomainSnapshot {
            activities: vec![echo],
            assignments: vec![assignment("A1", "R1", SlotKey::am(d(2)), "echo")],
            ..generation_snapshot()
        };

        let validator = ComplianceValidator::new(EngineConfig::default());
        let report = validator.validate(&snapshot, first_week());
        assert_eq!(report.hard_count, 0);
        assert_eq!(report.coverage_rate, 1.0);
    }
}
