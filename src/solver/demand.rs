// ==========================================
// 住院医师排班系统 - 求解需求与增量可行性状态
// ==========================================
// 职责:
// - 由领域快照构建需求单元 (槽位 × 活动 → 席位数)
// - 区分固定分配（窗口外 / 人工覆写）与待生成分配
// - 增量维护硬约束状态,供各求解策略共享
// ==========================================
// 红线: 求解器放置的每一项分配都必须通过 can_assign
// ==========================================

use crate::config::EngineConfig;
use crate::constraints::WorkloadCap;
use crate::domain::activity::ActivityTemplate;
use crate::domain::assignment::Assignment;
use crate::domain::calendar::{DateRange, Slot, SlotKey};
use crate::domain::person::Person;
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::types::AssignmentRole;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;

// ==========================================
// DemandCell - 需求单元
// ==========================================
#[derive(Debug, Clone)]
pub struct DemandCell {
    pub slot: SlotKey,
    pub activity_idx: usize,
    /// 待填补的 PRIMARY 席位（已扣除固定分配）
    pub seats: u32,
    /// 合格且未被阻断的人员索引
    pub candidates: Vec<usize>,
}

// ==========================================
// SolveProblem - 求解问题
// ==========================================
pub struct SolveProblem<'a> {
    pub snapshot: &'a DomainSnapshot,
    pub window: DateRange,
    pub config: &'a EngineConfig,
    pub people: Vec<&'a Person>,
    pub activities: Vec<&'a ActivityTemplate>,
    pub person_idx: HashMap<&'a str, usize>,
    pub activity_idx: HashMap<&'a str, usize>,
    pub slots: Vec<&'a Slot>,
    /// 固定分配: 窗口外分配 + 窗口内人工覆写
    pub fixed: Vec<Assignment>,
    pub cells: Vec<DemandCell>,
    /// 合规滚动窗口（与校验器一致）
    pub windows: Vec<DateRange>,
    pub blocks: Vec<DateRange>,
}

impl<'a> SolveProblem<'a> {
    pub fn build(snapshot: &'a DomainSnapshot, window: DateRange, config: &'a EngineConfig) -> Self {
        let people: Vec<&Person> = snapshot.people.iter().collect();
        let activities: Vec<&ActivityTemplate> = snapshot.activities.iter().collect();
        let person_idx = people
            .iter()
            .enumerate()
            .map(|(i, p)| (p.person_id.as_str(), i))
            .collect::<HashMap<_, _>>();
        let activity_idx = activities
            .iter()
            .enumerate()
            .map(|(i, a)| (a.activity_id.as_str(), i))
            .collect::<HashMap<_, _>>();

        let mut slots: Vec<&Slot> = snapshot.slots.iter().filter(|s| window.contains(s.date)).collect();
        slots.sort_by_key(|s| s.key());

        let fixed: Vec<Assignment> = snapshot
            .assignments
            .iter()
            .filter(|a| !window.contains(a.slot.date) || a.is_override)
            .cloned()
            .collect();

        // 固定分配已占用的 PRIMARY 席位
        let mut fixed_primary: HashMap<(SlotKey, &str), u32> = HashMap::new();
        for a in fixed.iter().filter(|a| a.role == AssignmentRole::Primary) {
            *fixed_primary.entry((a.slot, a.activity_id.as_str())).or_insert(0) += 1;
        }

        let mut cells = Vec::new();
        for slot in &slots {
            let key = slot.key();
            for (ai, activity) in activities.iter().enumerate() {
                if activity.required_per_slot == 0 || !activity.is_active_on(slot) {
                    continue;
                }
                let already = fixed_primary
                    .get(&(key, activity.activity_id.as_str()))
                    .copied()
                    .unwrap_or(0);
                let seats = activity.required_per_slot.saturating_sub(already);
                let candidates = people
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| activity.is_qualified(p))
                    .filter(|(_, p)| snapshot.blocking_absence(&p.person_id, &key).is_none())
                    .map(|(i, _)| i)
                    .collect();
                cells.push(DemandCell {
                    slot: key,
                    activity_idx: ai,
                    seats,
                    candidates,
                });
            }
        }

        Self {
            snapshot,
            window,
            config,
            people,
            activities,
            person_idx,
            activity_idx,
            slots,
            fixed,
            cells,
            windows: window.rolling_windows(config.compliance.rolling_window_days),
            blocks: WorkloadCap::week_blocks(&window),
        }
    }

    pub fn total_seats(&self) -> u32 {
        self.cells.iter().map(|c| c.seats).sum()
    }

    /// 席位序列（稀缺优先,其次按时间）
    ///
    /// 每个元素为 cell 索引,席位数为几则出现几次
    pub fn seat_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.cells.len()).filter(|&i| self.cells[i].seats > 0).collect();
        order.sort_by(|&a, &b| {
            let (ca, cb) = (&self.cells[a], &self.cells[b]);
            let ra = ca.candidates.len() as f64 / ca.seats as f64;
            let rb = cb.candidates.len() as f64 / cb.seats as f64;
            ra.partial_cmp(&rb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ca.slot.cmp(&cb.slot))
                .then_with(|| ca.activity_idx.cmp(&cb.activity_idx))
        });
        order
            .into_iter()
            .flat_map(|i| std::iter::repeat(i).take(self.cells[i].seats as usize))
            .collect()
    }

    /// 建立初始状态（载入固定分配）
    pub fn initial_state(&self) -> FeasibilityState {
        let mut state = FeasibilityState::empty(self);
        for a in &self.fixed {
            state.record(self, a, true);
        }
        state
    }

    /// 某日期在窗口内的天偏移
    fn day_offset(&self, date: NaiveDate) -> Option<i64> {
        if self.window.contains(date) {
            Some((date - self.window.start).num_days())
        } else {
            None
        }
    }

    /// 包含某日期的滚动窗口索引区间
    fn windows_containing(&self, date: NaiveDate) -> Range<usize> {
        let Some(d) = self.day_offset(date) else {
            return 0..0;
        };
        let w = self.config.compliance.rolling_window_days.max(1);
        if self.windows.len() == 1 && self.window.days() < w {
            return 0..1;
        }
        let first = (d - w + 1).max(0) as usize;
        let last = (d as usize).min(self.windows.len().saturating_sub(1));
        first..last + 1
    }

    fn block_of(&self, date: NaiveDate) -> Option<usize> {
        self.day_offset(date).map(|d| (d / 7) as usize)
    }

    pub fn activity(&self, idx: usize) -> &'a ActivityTemplate {
        self.activities[idx]
    }

    pub fn person(&self, idx: usize) -> &'a Person {
        self.people[idx]
    }

    /// 带教候选（角色 + 专科 + 未阻断）
    pub fn supervisor_candidates(&self, slot: &SlotKey, activity_idx: usize) -> Vec<usize> {
        let activity = self.activities[activity_idx];
        self.people
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_supervisor() && p.has_specialties(&activity.required_specialties))
            .filter(|(_, p)| self.snapshot.blocking_absence(&p.person_id, slot).is_none())
            .map(|(i, _)| i)
            .collect()
    }
}

// ==========================================
// FeasibilityState - 增量可行性状态
// ==========================================
#[derive(Debug, Clone)]
pub struct FeasibilityState {
    occupied: HashSet<(usize, SlotKey)>,
    ordinals: Vec<BTreeSet<i64>>,
    extended: Vec<BTreeSet<i64>>,
    window_hours: Vec<Vec<f64>>,
    window_worked_days: Vec<Vec<u32>>,
    date_count: Vec<HashMap<NaiveDate, u32>>,
    block_hours: Vec<Vec<f64>>,
    block_slots: Vec<Vec<u32>>,
    /// (槽位, 活动) → (PRIMARY 数, PGY-1 数, PGY-2+ 数, 带教数)
    cell_counts: HashMap<(SlotKey, usize), CellCounts>,
    load_hours: Vec<f64>,
    /// 求解器新放置的分配
    pub placed: Vec<Assignment>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellCounts {
    pub primary: u32,
    pub juniors: u32,
    pub seniors: u32,
    pub supervisors: u32,
}

impl FeasibilityState {
    fn empty(problem: &SolveProblem) -> Self {
        let n = problem.people.len();
        Self {
            occupied: HashSet::new(),
            ordinals: vec![BTreeSet::new(); n],
            extended: vec![BTreeSet::new(); n],
            window_hours: vec![vec![0.0; problem.windows.len()]; n],
            window_worked_days: vec![vec![0; problem.windows.len()]; n],
            date_count: vec![HashMap::new(); n],
            block_hours: vec![vec![0.0; problem.blocks.len()]; n],
            block_slots: vec![vec![0; problem.blocks.len()]; n],
            cell_counts: HashMap::new(),
            load_hours: vec![0.0; n],
            placed: Vec::new(),
        }
    }

    pub fn load_hours(&self, person: usize) -> f64 {
        self.load_hours[person]
    }

    pub fn cell_counts(&self, slot: SlotKey, activity_idx: usize) -> CellCounts {
        self.cell_counts.get(&(slot, activity_idx)).copied().unwrap_or_default()
    }

    pub fn is_free(&self, person: usize, slot: SlotKey) -> bool {
        !self.occupied.contains(&(person, slot))
    }

    /// 硬约束检查（不修改状态）
    pub fn can_assign(
        &self,
        problem: &SolveProblem,
        person: usize,
        slot: SlotKey,
        activity_idx: usize,
        role: AssignmentRole,
    ) -> bool {
        let p = problem.person(person);
        let activity = problem.activity(activity_idx);
        let compliance = &problem.config.compliance;

        // 可用性
        if problem.snapshot.blocking_absence(&p.person_id, &slot).is_some() {
            return false;
        }
        // 同槽位唯一
        if !self.is_free(person, slot) {
            return false;
        }
        // 资格与容量
        match role {
            AssignmentRole::Supervising => {
                if !p.is_supervisor() || !p.has_specialties(&activity.required_specialties) {
                    return false;
                }
            }
            _ => {
                if !activity.is_qualified(p) {
                    return false;
                }
                if self.cell_counts(slot, activity_idx).primary >= activity.max_per_slot {
                    return false;
                }
            }
        }

        // 延长值班后休息（前后两个方向）
        let ord = slot.ordinal();
        let rest = compliance.post_extended_rest_periods as i64;
        if rest > 0 {
            if self.extended[person].range(ord - rest..ord).next().is_some() {
                return false;
            }
            if activity.extended_duty && self.ordinals[person].range(ord + 1..=ord + rest).next().is_some() {
                return false;
            }
        }

        let hours = activity.duty_hours;
        let new_day = self.date_count[person].get(&slot.date).copied().unwrap_or(0) == 0;

        // 滚动窗口工时与休息日（仅住院医师）
        if p.is_trainee() {
            for w in problem.windows_containing(slot.date) {
                let window = &problem.windows[w];
                if self.window_hours[person][w] + hours > compliance.hour_limit_for(window.days()) + 1e-6 {
                    return false;
                }
                if new_day {
                    let max_worked = window.days() - compliance.days_off_for(window.days()) as i64;
                    if self.window_worked_days[person][w] as i64 + 1 > max_worked {
                        return false;
                    }
                }
            }
        }

        // 个人周工作量上限
        if let Some(b) = problem.block_of(slot.date) {
            let scale = problem.blocks[b].days() as f64 / 7.0;
            if let Some(cap) = p.max_hours_per_week {
                if self.block_hours[person][b] + hours > cap * scale + 1e-6 {
                    return false;
                }
            }
            if let Some(cap) = p.max_slots_per_week {
                if self.block_slots[person][b] + 1 > (cap as f64 * scale).ceil() as u32 {
                    return false;
                }
            }
        }

        true
    }

    /// 放置分配（调用方需先 can_assign）
    pub fn place(
        &mut self,
        problem: &SolveProblem,
        person: usize,
        slot: SlotKey,
        activity_idx: usize,
        role: AssignmentRole,
        created_by: &str,
    ) -> Assignment {
        let assignment = Assignment::new(
            &problem.person(person).person_id,
            slot,
            &problem.activity(activity_idx).activity_id,
            role,
            created_by,
        );
        self.record(problem, &assignment, true);
        self.placed.push(assignment.clone());
        assignment
    }

    /// 撤销最近一次放置（回溯）
    pub fn undo_last(&mut self, problem: &SolveProblem) -> Option<Assignment> {
        let last = self.placed.pop()?;
        self.record(problem, &last, false);
        Some(last)
    }

    /// 撤销指定放置
    pub fn remove_placed(&mut self, problem: &SolveProblem, assignment_id: &str) -> Option<Assignment> {
        let pos = self.placed.iter().position(|a| a.assignment_id == assignment_id)?;
        let removed = self.placed.remove(pos);
        self.record(problem, &removed, false);
        Some(removed)
    }

    /// 更新计数（add=false 为撤销）
    fn record(&mut self, problem: &SolveProblem, a: &Assignment, add: bool) {
        let (Some(&person), Some(&activity_idx)) = (
            problem.person_idx.get(a.person_id.as_str()),
            problem.activity_idx.get(a.activity_id.as_str()),
        ) else {
            return;
        };
        let activity = problem.activity(activity_idx);
        let p = problem.person(person);

        if add {
            self.occupied.insert((person, a.slot));
        } else {
            self.occupied.remove(&(person, a.slot));
        }

        let counts = self.cell_counts.entry((a.slot, activity_idx)).or_default();
        let delta: i64 = if add { 1 } else { -1 };
        let bump = |v: &mut u32| *v = (*v as i64 + delta).max(0) as u32;
        match a.role {
            AssignmentRole::Primary => {
                bump(&mut counts.primary);
                if p.is_trainee() {
                    if p.is_junior() {
                        bump(&mut counts.juniors);
                    } else {
                        bump(&mut counts.seniors);
                    }
                }
            }
            AssignmentRole::Supervising => {
                if p.is_supervisor() {
                    bump(&mut counts.supervisors);
                }
            }
            AssignmentRole::Backup => {}
        }

        if a.role == AssignmentRole::Backup {
            return;
        }

        let ord = a.slot.ordinal();
        if add {
            self.ordinals[person].insert(ord);
            if activity.extended_duty {
                self.extended[person].insert(ord);
            }
        } else {
            self.ordinals[person].remove(&ord);
            self.extended[person].remove(&ord);
        }

        if !problem.window.contains(a.slot.date) {
            return;
        }
        let hours = if add { activity.duty_hours } else { -activity.duty_hours };
        self.load_hours[person] += hours;

        let day_count = self.date_count[person].entry(a.slot.date).or_insert(0);
        let day_changed = if add {
            *day_count += 1;
            *day_count == 1
        } else {
            *day_count = day_count.saturating_sub(1);
            *day_count == 0
        };

        for w in problem.windows_containing(a.slot.date) {
            self.window_hours[person][w] += hours;
            if day_changed {
                bump(&mut self.window_worked_days[person][w]);
            }
        }
        if let Some(b) = problem.block_of(a.slot.date) {
            self.block_hours[person][b] += hours;
            bump(&mut self.block_slots[person][b]);
        }
    }
}

/// 按负载挑选可放置的候选（负载最低优先,同负载按人员 ID）
pub fn pick_least_loaded(
    state: &FeasibilityState,
    problem: &SolveProblem,
    candidates: &[usize],
    slot: SlotKey,
    activity_idx: usize,
    role: AssignmentRole,
) -> Option<usize> {
    candidates
        .iter()
        .copied()
        .filter(|&p| state.can_assign(problem, p, slot, activity_idx, role))
        .min_by(|&a, &b| {
            state
                .load_hours(a)
                .partial_cmp(&state.load_hours(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| problem.person(a).person_id.cmp(&problem.person(b).person_id))
        })
}

/// 按监督比例补齐带教（各策略共用的收尾步骤）
///
/// # 返回
/// 仍缺带教的单元数
pub fn fill_supervision(state: &mut FeasibilityState, problem: &SolveProblem, created_by: &str) -> usize {
    let mut shortfalls = 0;
    let mut keys: Vec<(SlotKey, usize)> = problem
        .cells
        .iter()
        .map(|c| (c.slot, c.activity_idx))
        .filter(|(_, ai)| problem.activity(*ai).supervision.is_some())
        .collect();
    keys.sort();
    keys.dedup();

    for (slot, ai) in keys {
        let Some(requirement) = problem.activity(ai).supervision else {
            continue;
        };
        let candidates = problem.supervisor_candidates(&slot, ai);
        loop {
            let counts = state.cell_counts(slot, ai);
            let required = requirement.required_supervisors(counts.juniors, counts.seniors);
            if counts.supervisors >= required {
                break;
            }
            match pick_least_loaded(state, problem, &candidates, slot, ai, AssignmentRole::Supervising) {
                Some(p) => {
                    state.place(problem, p, slot, ai, AssignmentRole::Supervising, created_by);
                }
                None => {
                    shortfalls += 1;
                    break;
                }
            }
        }
    }
    shortfalls
}

/// 已填补的 PRIMARY 席位数（不含固定分配）
pub fn placed_primary(state: &FeasibilityState) -> u32 {
    state
        .placed
        .iter()
        .filter(|a| a.role == AssignmentRole::Primary)
        .count() as u32
}

/// 单元剩余未填席位
pub fn open_seats(state: &FeasibilityState, problem: &SolveProblem, cell: &DemandCell) -> u32 {
    let activity = problem.activity(cell.activity_idx);
    let filled = state.cell_counts(cell.slot, cell.activity_idx).primary;
    activity.required_per_slot.saturating_sub(filled)
}
