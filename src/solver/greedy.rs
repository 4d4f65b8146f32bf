// ==========================================
// 住院医师排班系统 - 贪心求解
// ==========================================
// 规则: 稀缺单元优先（候选/席位比最小）,席位内负载最低者优先
// 特点: 单遍完成,必定终止
// ==========================================

use crate::domain::types::AssignmentRole;
use crate::solver::demand::{pick_least_loaded, FeasibilityState, SolveProblem};
use crate::solver::{SolveBudget, SolverAlgorithm, SolverDraft, SolverStrategy};

pub struct GreedySolver;

impl Default for GreedySolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GreedySolver {
    pub fn new() -> Self {
        Self
    }

    /// 在已有状态上按席位序列补位
    ///
    /// # 返回
    /// 未能填补的席位数
    pub fn fill(
        &self,
        problem: &SolveProblem,
        state: &mut FeasibilityState,
        seats: &[usize],
        created_by: &str,
    ) -> u32 {
        let mut unfilled = 0;
        for &cell_idx in seats {
            let cell = &problem.cells[cell_idx];
            match pick_least_loaded(
                state,
                problem,
                &cell.candidates,
                cell.slot,
                cell.activity_idx,
                AssignmentRole::Primary,
            ) {
                Some(person) => {
                    state.place(
                        problem,
                        person,
                        cell.slot,
                        cell.activity_idx,
                        AssignmentRole::Primary,
                        created_by,
                    );
                }
                None => unfilled += 1,
            }
        }
        unfilled
    }
}

impl SolverStrategy for GreedySolver {
    fn algorithm(&self) -> SolverAlgorithm {
        SolverAlgorithm::Greedy
    }

    fn solve(&self, problem: &SolveProblem, _budget: &SolveBudget) -> SolverDraft {
        let mut state = problem.initial_state();
        let seats = problem.seat_order();
        let unfilled = self.fill(problem, &mut state, &seats, "solver:greedy");

        let mut draft = SolverDraft::from_state(state);
        draft.nodes_explored = seats.len() as u64;
        if unfilled > 0 {
            draft.notes.push(format!("贪心未能填补 {} 个席位", unfilled));
        }
        tracing::debug!(seats = seats.len(), unfilled, "贪心求解完成");
        draft
    }
}
