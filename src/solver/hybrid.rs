// ==========================================
// 住院医师排班系统 - 混合求解
// ==========================================
// 流程:
// 1. 贪心生成种子排班
// 2. 找出仍有缺口的单元
// 3. 缺口日期 ± repair_radius_days 为修复邻域,撤销邻域内的贪心分配
// 4. 在邻域内做约束规划回溯
// 5. 修复结果不优于种子时保留种子
// ==========================================

use crate::domain::calendar::DateRange;
use crate::solver::cp::{CpSolver, SearchResult};
use crate::solver::demand::{open_seats, placed_primary, SolveProblem};
use crate::solver::greedy::GreedySolver;
use crate::solver::{SolveBudget, SolverAlgorithm, SolverDraft, SolverStrategy};
use chrono::NaiveDate;
use std::collections::BTreeSet;

const CREATED_BY: &str = "solver:hybrid";

pub struct HybridSolver;

impl Default for HybridSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridSolver {
    pub fn new() -> Self {
        Self
    }
}

impl SolverStrategy for HybridSolver {
    fn algorithm(&self) -> SolverAlgorithm {
        SolverAlgorithm::Hybrid
    }

    fn solve(&self, problem: &SolveProblem, budget: &SolveBudget) -> SolverDraft {
        let greedy = GreedySolver::new();
        let mut state = problem.initial_state();
        let seats = problem.seat_order();
        let unfilled = greedy.fill(problem, &mut state, &seats, CREATED_BY);

        if unfilled == 0 {
            let mut draft = SolverDraft::from_state(state);
            draft.nodes_explored = seats.len() as u64;
            return draft;
        }

        // 修复邻域
        let radius = problem.config.solver.repair_radius_days.max(0);
        let gap_dates: BTreeSet<NaiveDate> = problem
            .cells
            .iter()
            .filter(|c| open_seats(&state, problem, c) > 0)
            .map(|c| c.slot.date)
            .collect();
        let neighborhoods: Vec<DateRange> = gap_dates
            .iter()
            .map(|d| DateRange::new(*d, *d).expand(radius))
            .collect();
        let in_neighborhood = |date: NaiveDate| neighborhoods.iter().any(|r| r.contains(date));

        let seed = state.clone();
        let seed_filled = placed_primary(&seed);

        let released: Vec<String> = state
            .placed
            .iter()
            .filter(|a| in_neighborhood(a.slot.date))
            .map(|a| a.assignment_id.clone())
            .collect();
        for id in &released {
            state.remove_placed(problem, id);
        }

        let mut local = Vec::new();
        let mut seen = std::collections::HashMap::new();
        for &c in &seats {
            let cell = &problem.cells[c];
            if !in_neighborhood(cell.slot.date) {
                continue;
            }
            let k = seen.entry(c).or_insert(0u32);
            *k += 1;
            if *k <= open_seats(&state, problem, cell) {
                local.push(c);
            }
        }

        let (result, nodes) = CpSolver::new().search(problem, &mut state, &local, &budget.child(0.9), CREATED_BY);
        let repaired_filled = placed_primary(&state);

        let mut draft = if repaired_filled >= seed_filled {
            let mut d = SolverDraft::from_state(state);
            d.notes.push(format!(
                "邻域修复: 释放 {} 项,席位 {} → {}",
                released.len(),
                seed_filled,
                repaired_filled
            ));
            d
        } else {
            let mut d = SolverDraft::from_state(seed);
            d.notes.push("邻域修复未改进，保留贪心种子".to_string());
            d
        };
        draft.nodes_explored = seats.len() as u64 + nodes;
        if result == SearchResult::BudgetExhausted {
            draft.budget_exhausted = true;
        }
        tracing::debug!(
            gap_dates = gap_dates.len(),
            released = released.len(),
            nodes,
            "混合求解完成"
        );
        draft
    }
}
