// ==========================================
// 住院医师排班系统 - 约束规划求解
// ==========================================
// 方法: 深度优先回溯（显式栈） + 增量可行性检查
// - 变量: 席位（稀缺优先的静态顺序）
// - 取值: 可放置候选,负载最低优先
// - 同单元席位按人员索引递增（消除排列对称）
// - 前向检查: 同槽位剩余单元的可放置候选数 >= 剩余席位
// 预算: 节点上限 / 时限 / 取消标志,耗尽即返回最佳前缀
// ==========================================

use crate::domain::calendar::SlotKey;
use crate::domain::types::AssignmentRole;
use crate::solver::demand::{FeasibilityState, SolveProblem};
use crate::solver::greedy::GreedySolver;
use crate::solver::{SolveBudget, SolverAlgorithm, SolverDraft, SolverStrategy};
use std::collections::HashMap;

const CREATED_BY: &str = "solver:constraint_programming";
const BUDGET_POLL_INTERVAL: u64 = 64;

pub struct CpSolver;

impl Default for CpSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// 回溯结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    /// 全部席位已填补
    Complete,
    /// 搜索空间穷尽,无完整解
    Infeasible,
    /// 预算耗尽
    BudgetExhausted,
}

/// 回溯栈帧: 某一深度的候选序列与下一个待尝试位置
struct Frame {
    depth: usize,
    options: Vec<usize>,
    next: usize,
    /// options[next - 1] 当前已放置
    placed: bool,
}

struct Search<'p, 'a> {
    problem: &'p SolveProblem<'a>,
    budget: &'p SolveBudget,
    seats: &'p [usize],
    /// 每个槽位上的单元索引（前向检查用）
    slot_cells: HashMap<SlotKey, Vec<usize>>,
    /// 每个单元在席位序列中的位置（升序）
    cell_positions: HashMap<usize, Vec<usize>>,
    nodes: u64,
    chosen: Vec<usize>,
    best: Vec<usize>,
    created_by: &'p str,
}

impl<'p, 'a> Search<'p, 'a> {
    fn new(problem: &'p SolveProblem<'a>, budget: &'p SolveBudget, seats: &'p [usize], created_by: &'p str) -> Self {
        let mut slot_cells: HashMap<_, Vec<usize>> = HashMap::new();
        let mut cell_positions: HashMap<usize, Vec<usize>> = HashMap::new();
        for (pos, &c) in seats.iter().enumerate() {
            let entry = slot_cells.entry(problem.cells[c].slot).or_default();
            if !entry.contains(&c) {
                entry.push(c);
            }
            cell_positions.entry(c).or_default().push(pos);
        }
        Self {
            problem,
            budget,
            seats,
            slot_cells,
            cell_positions,
            nodes: 0,
            chosen: Vec::with_capacity(seats.len()),
            best: Vec::new(),
            created_by,
        }
    }

    /// 显式栈上的深度优先回溯
    ///
    /// 返回时状态与 chosen 均已回退到搜索前（Complete 除外）
    fn run(&mut self, state: &mut FeasibilityState) -> SearchResult {
        if self.seats.is_empty() {
            return SearchResult::Complete;
        }
        let problem = self.problem;
        let mut stack = match self.enter(state, 0) {
            Some(frame) => vec![frame],
            None => return SearchResult::BudgetExhausted,
        };

        while let Some(frame) = stack.last_mut() {
            if frame.placed {
                self.chosen.pop();
                state.undo_last(problem);
                frame.placed = false;
            }
            if frame.next >= frame.options.len() {
                stack.pop();
                continue;
            }

            let depth = frame.depth;
            let person = frame.options[frame.next];
            frame.next += 1;
            frame.placed = true;

            let cell = &problem.cells[self.seats[depth]];
            state.place(
                problem,
                person,
                cell.slot,
                cell.activity_idx,
                AssignmentRole::Primary,
                self.created_by,
            );
            self.chosen.push(person);
            if self.chosen.len() > self.best.len() {
                self.best = self.chosen.clone();
            }

            if !self.forward_check(state, depth + 1) {
                continue;
            }
            if depth + 1 == self.seats.len() {
                return SearchResult::Complete;
            }
            match self.enter(state, depth + 1) {
                Some(child) => stack.push(child),
                None => {
                    // 预算耗尽: 逐层撤销已放置的候选
                    for frame in stack.iter().rev() {
                        if frame.placed {
                            self.chosen.pop();
                            state.undo_last(problem);
                        }
                    }
                    return SearchResult::BudgetExhausted;
                }
            }
        }

        SearchResult::Infeasible
    }

    /// 进入某一深度: 计节点、查预算、生成按负载排序的候选
    ///
    /// 预算耗尽时返回 None
    fn enter(&mut self, state: &FeasibilityState, depth: usize) -> Option<Frame> {
        self.nodes += 1;
        if self.nodes >= self.budget.node_limit()
            || (self.nodes % BUDGET_POLL_INTERVAL == 0 && self.budget.is_exhausted(self.nodes))
        {
            return None;
        }

        let problem = self.problem;
        let cell_idx = self.seats[depth];
        let cell = &problem.cells[cell_idx];
        let min_person = if depth > 0 && self.seats[depth - 1] == cell_idx {
            self.chosen[depth - 1] + 1
        } else {
            0
        };

        let mut options: Vec<usize> = cell
            .candidates
            .iter()
            .copied()
            .filter(|&p| p >= min_person)
            .filter(|&p| state.can_assign(problem, p, cell.slot, cell.activity_idx, AssignmentRole::Primary))
            .collect();
        options.sort_by(|&a, &b| {
            state
                .load_hours(a)
                .partial_cmp(&state.load_hours(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });

        Some(Frame {
            depth,
            options,
            next: 0,
            placed: false,
        })
    }

    /// 同槽位后续单元仍有足够可放置候选
    fn forward_check(&self, state: &FeasibilityState, next_depth: usize) -> bool {
        let Some(&next_cell) = self.seats.get(next_depth) else {
            return true;
        };
        let slot = self.problem.cells[next_cell].slot;
        let Some(cells) = self.slot_cells.get(&slot) else {
            return true;
        };
        cells.iter().all(|&c| {
            let needed = self
                .cell_positions
                .get(&c)
                .map(|positions| positions.len() - positions.partition_point(|&p| p < next_depth))
                .unwrap_or(0);
            if needed == 0 {
                return true;
            }
            let cell = &self.problem.cells[c];
            let available = cell
                .candidates
                .iter()
                .filter(|&&p| state.can_assign(self.problem, p, cell.slot, cell.activity_idx, AssignmentRole::Primary))
                .count();
            available >= needed
        })
    }
}

impl CpSolver {
    pub fn new() -> Self {
        Self
    }

    /// 在给定状态上回溯填补指定席位
    ///
    /// 未得到完整解时,状态回退到最佳前缀并由贪心补齐剩余席位
    pub fn search(
        &self,
        problem: &SolveProblem,
        state: &mut FeasibilityState,
        seats: &[usize],
        budget: &SolveBudget,
        created_by: &str,
    ) -> (SearchResult, u64) {
        // 候选不足的席位无论如何无法填补,先行剔除
        let mut searchable = Vec::with_capacity(seats.len());
        let mut hopeless = Vec::new();
        let mut per_cell: HashMap<usize, usize> = HashMap::new();
        for &c in seats {
            let k = per_cell.entry(c).or_insert(0);
            *k += 1;
            if *k > problem.cells[c].candidates.len() {
                hopeless.push(c);
            } else {
                searchable.push(c);
            }
        }

        let mut search = Search::new(problem, budget, &searchable, created_by);
        let result = search.run(state);
        let nodes = search.nodes;

        if result == SearchResult::Complete {
            if !hopeless.is_empty() {
                return (SearchResult::Infeasible, nodes);
            }
            return (result, nodes);
        }

        // 回放最佳前缀,再贪心补齐
        let best = std::mem::take(&mut search.best);
        for (depth, &person) in best.iter().enumerate() {
            let cell = &problem.cells[searchable[depth]];
            if state.can_assign(problem, person, cell.slot, cell.activity_idx, AssignmentRole::Primary) {
                state.place(problem, person, cell.slot, cell.activity_idx, AssignmentRole::Primary, created_by);
            }
        }
        let rest: Vec<usize> = searchable[best.len()..].to_vec();
        GreedySolver::new().fill(problem, state, &rest, created_by);

        (result, nodes)
    }
}

impl SolverStrategy for CpSolver {
    fn algorithm(&self) -> SolverAlgorithm {
        SolverAlgorithm::ConstraintProgramming
    }

    fn solve(&self, problem: &SolveProblem, budget: &SolveBudget) -> SolverDraft {
        let mut state = problem.initial_state();
        let seats = problem.seat_order();
        let (result, nodes) = self.search(problem, &mut state, &seats, budget, CREATED_BY);

        let mut draft = SolverDraft::from_state(state);
        draft.nodes_explored = nodes;
        match result {
            SearchResult::Complete => {}
            SearchResult::Infeasible => draft.notes.push("搜索空间穷尽，不存在全覆盖解".to_string()),
            SearchResult::BudgetExhausted => {
                draft.budget_exhausted = true;
                draft.notes.push(format!("预算耗尽，已探索 {} 个节点，返回最佳部分解", nodes));
            }
        }
        tracing::debug!(nodes, result = ?result, "约束规划求解完成");
        draft
    }
}
