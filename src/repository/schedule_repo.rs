// ==========================================
// 住院医师排班系统 - 在线排班仓储
// ==========================================
// 职责: 读取 / 原子更新某 program 的在线排班
// 红线: 变更集整体生效或整体拒绝,不存在半提交
// ==========================================

use crate::domain::absence::Absence;
use crate::domain::assignment::{Assignment, AssignmentChangeSet};
use crate::domain::calendar::DateRange;
use crate::domain::snapshot::DomainSnapshot;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// 在线排班仓储接口
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// 读取 program 当前快照（人员/槽位/活动/分配/缺勤）
    async fn load_snapshot(&self, program_id: &str) -> RepositoryResult<DomainSnapshot>;

    /// 原子应用变更集
    ///
    /// 规则:
    /// - removed 中每项必须在在线排班中存在且内容一致
    /// - added 中的 assignment_id 在移除后必须不存在
    /// - 任一条件不满足: ChangeSetConflict,在线排班不变
    async fn apply_change_set(&self, program_id: &str, change: &AssignmentChangeSet) -> RepositoryResult<()>;

    /// 整体替换窗口内的分配（窗口外分配不变）
    async fn replace_window(
        &self,
        program_id: &str,
        window: DateRange,
        assignments: Vec<Assignment>,
    ) -> RepositoryResult<()>;

    /// 新增或更新缺勤（按 absence_id）
    async fn upsert_absence(&self, program_id: &str, absence: Absence) -> RepositoryResult<Absence>;
}

// ==========================================
// InMemoryScheduleRepository - 内存实现
// ==========================================
#[derive(Debug, Default)]
pub struct InMemoryScheduleRepository {
    programs: Mutex<HashMap<String, DomainSnapshot>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 载入（或覆盖）一个 program 的快照
    pub fn with_snapshot(self, snapshot: DomainSnapshot) -> Self {
        self.put(snapshot);
        self
    }

    pub fn put(&self, snapshot: DomainSnapshot) {
        let mut programs = self.programs.lock().unwrap_or_else(|e| e.into_inner());
        programs.insert(snapshot.program_id.clone(), snapshot);
    }

    fn with_program<T>(
        &self,
        program_id: &str,
        f: impl FnOnce(&mut DomainSnapshot) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let mut programs = self
            .programs
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let snapshot = programs.get_mut(program_id).ok_or_else(|| RepositoryError::NotFound {
            entity: "Program".to_string(),
            id: program_id.to_string(),
        })?;
        f(snapshot)
    }
}

/// 校验变更集可应用到当前分配
fn check_change_set(current: &[Assignment], change: &AssignmentChangeSet) -> RepositoryResult<()> {
    let by_id: HashMap<&str, &Assignment> = current.iter().map(|a| (a.assignment_id.as_str(), a)).collect();
    for removed in &change.removed {
        match by_id.get(removed.assignment_id.as_str()) {
            Some(live) if *live == removed => {}
            Some(_) => {
                return Err(RepositoryError::ChangeSetConflict(format!(
                    "分配 {} 已被修改",
                    removed.assignment_id
                )))
            }
            None => {
                return Err(RepositoryError::ChangeSetConflict(format!(
                    "分配 {} 不存在",
                    removed.assignment_id
                )))
            }
        }
    }

    let removed_ids: HashSet<&str> = change.removed.iter().map(|a| a.assignment_id.as_str()).collect();
    let mut added_ids = HashSet::new();
    for added in &change.added {
        let id = added.assignment_id.as_str();
        if !added_ids.insert(id) || (by_id.contains_key(id) && !removed_ids.contains(id)) {
            return Err(RepositoryError::ChangeSetConflict(format!("分配 {} 重复", id)));
        }
    }
    Ok(())
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn load_snapshot(&self, program_id: &str) -> RepositoryResult<DomainSnapshot> {
        self.with_program(program_id, |s| Ok(s.clone()))
    }

    async fn apply_change_set(&self, program_id: &str, change: &AssignmentChangeSet) -> RepositoryResult<()> {
        self.with_program(program_id, |s| {
            check_change_set(&s.assignments, change)?;
            change.apply_to(&mut s.assignments);
            Ok(())
        })
    }

    async fn replace_window(
        &self,
        program_id: &str,
        window: DateRange,
        assignments: Vec<Assignment>,
    ) -> RepositoryResult<()> {
        self.with_program(program_id, |s| {
            if let Some(outside) = assignments.iter().find(|a| !window.contains(a.slot.date)) {
                return Err(RepositoryError::FieldValueError {
                    field: "assignments".to_string(),
                    message: format!("分配 {} 不在窗口 {} 内", outside.assignment_id, window),
                });
            }
            s.assignments.retain(|a| !window.contains(a.slot.date));
            s.assignments.extend(assignments);
            Ok(())
        })
    }

    async fn upsert_absence(&self, program_id: &str, absence: Absence) -> RepositoryResult<Absence> {
        self.with_program(program_id, |s| {
            let stored = match s.absences.iter_mut().find(|a| a.absence_id == absence.absence_id) {
                Some(existing) => {
                    let revision = existing.revision + 1;
                    *existing = Absence { revision, ..absence };
                    existing.clone()
                }
                None => {
                    s.absences.push(absence.clone());
                    absence
                }
            };
            Ok(stored)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::SlotKey;
    use crate::domain::types::AssignmentRole;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn repo_with(assignments: Vec<Assignment>) -> InMemoryScheduleRepository {
        InMemoryScheduleRepository::new().with_snapshot(DomainSnapshot {
            program_id: "IM".to_string(),
            assignments,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_change_set_is_all_or_nothing() {
        let a = Assignment::new("r1", SlotKey::am(d(2)), "CLINIC", AssignmentRole::Primary, "seed");
        let repo = repo_with(vec![a.clone()]);

        let ghost = Assignment::new("r2", SlotKey::am(d(3)), "CLINIC", AssignmentRole::Primary, "seed");
        let bad = AssignmentChangeSet {
            removed: vec![a.clone(), ghost],
            added: vec![],
        };
        let err = repo.apply_change_set("IM", &bad).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ChangeSetConflict(_)));
        assert_eq!(repo.load_snapshot("IM").await.unwrap().assignments, vec![a.clone()]);

        let moved = a.reassigned_to("r2", "swap", a.created_at);
        let good = AssignmentChangeSet {
            removed: vec![a.clone()],
            added: vec![moved.clone()],
        };
        repo.apply_change_set("IM", &good).await.unwrap();
        assert_eq!(repo.load_snapshot("IM").await.unwrap().assignments, vec![moved]);
    }

    #[tokio::test]
    async fn test_upsert_absence_bumps_revision() {
        let repo = repo_with(vec![]);
        let absence = Absence {
            absence_id: "abs-1".to_string(),
            person_id: "r1".to_string(),
            start_date: d(2),
            end_date: d(4),
            absence_type: "VACATION".to_string(),
            blocking: true,
            revision: 0,
        };
        let first = repo.upsert_absence("IM", absence.clone()).await.unwrap();
        assert_eq!(first.revision, 0);
        let second = repo
            .upsert_absence("IM", Absence { end_date: d(6), ..absence })
            .await
            .unwrap();
        assert_eq!(second.revision, 1);
        assert_eq!(second.end_date, d(6));
    }

    #[tokio::test]
    async fn test_unknown_program_is_not_found() {
        let repo = InMemoryScheduleRepository::new();
        let err = repo.load_snapshot("NOPE").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
