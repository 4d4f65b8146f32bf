// ==========================================
// 住院医师排班系统 - 线性规划求解（最小费用流）
// ==========================================
// 网络:
//   源点 → 人员          （分段凸费用弧,实现工作量均衡）
//   人员 → 人员×槽位      （容量 1,同槽位不重复排班）
//   人员×槽位 → 需求单元  （容量 1,费用 = 偏好惩罚）
//   需求单元 → 汇点       （容量 = 席位数）
// 求解: 逐次最短路（SPFA）得到最小费用最大流,其解是整数解
// 修复: 流中不可线性化的约束（滚动工时/休息/延长值班）按时间顺序复核,
//       被拒绝的席位由贪心重新补位
// ==========================================

use crate::domain::calendar::SlotKey;
use crate::domain::types::AssignmentRole;
use crate::solver::demand::{FeasibilityState, SolveProblem};
use crate::solver::greedy::GreedySolver;
use crate::solver::{SolveBudget, SolverAlgorithm, SolverDraft, SolverStrategy};
use std::collections::{HashMap, VecDeque};

const CREATED_BY: &str = "solver:linear_programming";
const FAIRNESS_UNIT_COST: i64 = 10;
const AVOID_DATE_COST: i64 = 50;
const NON_PREFERRED_COST: i64 = 5;

// ==========================================
// FlowNetwork - 残量网络
// ==========================================
#[derive(Debug, Clone)]
struct FlowEdge {
    to: usize,
    rev: usize,
    cap: i64,
    cost: i64,
}

#[derive(Debug, Default)]
pub struct FlowNetwork {
    graph: Vec<Vec<FlowEdge>>,
}

/// 最小费用流结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowResult {
    pub flow: i64,
    pub cost: i64,
    pub augmentations: u64,
    pub budget_exhausted: bool,
}

impl FlowNetwork {
    pub fn new(nodes: usize) -> Self {
        Self {
            graph: vec![Vec::new(); nodes],
        }
    }

    pub fn add_node(&mut self) -> usize {
        self.graph.push(Vec::new());
        self.graph.len() - 1
    }

    /// 添加弧,返回 (起点, 弧序号) 供读取流量
    pub fn add_edge(&mut self, from: usize, to: usize, cap: i64, cost: i64) -> (usize, usize) {
        let forward_idx = self.graph[from].len();
        let backward_idx = self.graph[to].len() + usize::from(from == to);
        self.graph[from].push(FlowEdge {
            to,
            rev: backward_idx,
            cap,
            cost,
        });
        self.graph[to].push(FlowEdge {
            to: from,
            rev: forward_idx,
            cap: 0,
            cost: -cost,
        });
        (from, forward_idx)
    }

    /// 弧上已通过的流量（反向弧残量）
    pub fn flow_on(&self, edge: (usize, usize)) -> i64 {
        let e = &self.graph[edge.0][edge.1];
        self.graph[e.to][e.rev].cap
    }

    /// 逐次最短路求最小费用最大流
    pub fn min_cost_max_flow(&mut self, source: usize, sink: usize, budget: &SolveBudget) -> FlowResult {
        let n = self.graph.len();
        let mut result = FlowResult {
            flow: 0,
            cost: 0,
            augmentations: 0,
            budget_exhausted: false,
        };

        loop {
            if budget.is_expired() {
                result.budget_exhausted = true;
                break;
            }

            // SPFA（残量网络含负费用反向弧）
            let mut dist = vec![i64::MAX; n];
            let mut in_queue = vec![false; n];
            let mut prev: Vec<Option<(usize, usize)>> = vec![None; n];
            let mut queue = VecDeque::new();
            dist[source] = 0;
            queue.push_back(source);
            in_queue[source] = true;

            while let Some(u) = queue.pop_front() {
                in_queue[u] = false;
                for (i, e) in self.graph[u].iter().enumerate() {
                    if e.cap > 0 && dist[u] != i64::MAX && dist[u] + e.cost < dist[e.to] {
                        dist[e.to] = dist[u] + e.cost;
                        prev[e.to] = Some((u, i));
                        if !in_queue[e.to] {
                            in_queue[e.to] = true;
                            queue.push_back(e.to);
                        }
                    }
                }
            }

            if dist[sink] == i64::MAX {
                break;
            }

            // 瓶颈容量
            let mut push = i64::MAX;
            let mut v = sink;
            while let Some((u, i)) = prev[v] {
                push = push.min(self.graph[u][i].cap);
                v = u;
            }

            let mut v = sink;
            while let Some((u, i)) = prev[v] {
                let rev = self.graph[u][i].rev;
                self.graph[u][i].cap -= push;
                self.graph[v][rev].cap += push;
                v = u;
            }

            result.flow += push;
            result.cost += push * dist[sink];
            result.augmentations += 1;
        }

        result
    }
}

pub struct LpSolver;

impl Default for LpSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LpSolver {
    pub fn new() -> Self {
        Self
    }

    fn preference_cost(problem: &SolveProblem, person: usize, slot: SlotKey, activity_idx: usize) -> i64 {
        let prefs = &problem.person(person).preferences;
        let activity = problem.activity(activity_idx);
        if prefs.avoid_dates.contains(&slot.date) {
            AVOID_DATE_COST
        } else if !prefs.preferred_activities.is_empty()
            && !prefs.preferred_activities.contains(&activity.activity_id)
        {
            NON_PREFERRED_COST
        } else {
            0
        }
    }

    /// 每档公平性弧的席位数
    fn fairness_step_slots(problem: &SolveProblem) -> i64 {
        let demanded: Vec<f64> = problem
            .cells
            .iter()
            .filter(|c| c.seats > 0)
            .map(|c| problem.activity(c.activity_idx).duty_hours)
            .filter(|h| *h > 0.0)
            .collect();
        if demanded.is_empty() {
            return 1;
        }
        let mean_hours = demanded.iter().sum::<f64>() / demanded.len() as f64;
        ((problem.config.solver.fairness_step_hours / mean_hours).round() as i64).max(1)
    }

    /// 构建网络并求解,返回 (人员, 单元) 分配建议
    fn flow_assignments(
        &self,
        problem: &SolveProblem,
        state: &FeasibilityState,
        budget: &SolveBudget,
    ) -> (Vec<(usize, usize)>, FlowResult) {
        let people = problem.people.len();
        let source = 0;
        let sink = 1;
        let mut network = FlowNetwork::new(2 + people);
        let person_node = |p: usize| 2 + p;

        let mut person_slot_nodes: HashMap<(usize, SlotKey), usize> = HashMap::new();
        let mut link_edges: Vec<((usize, usize), usize, usize)> = Vec::new();

        for (cell_idx, cell) in problem.cells.iter().enumerate() {
            if cell.seats == 0 {
                continue;
            }
            let cell_node = network.add_node();
            network.add_edge(cell_node, sink, cell.seats as i64, 0);
            for &p in &cell.candidates {
                if !state.is_free(p, cell.slot) {
                    continue;
                }
                let ps_node = match person_slot_nodes.get(&(p, cell.slot)) {
                    Some(&node) => node,
                    None => {
                        let node = network.add_node();
                        network.add_edge(person_node(p), node, 1, 0);
                        person_slot_nodes.insert((p, cell.slot), node);
                        node
                    }
                };
                let cost = Self::preference_cost(problem, p, cell.slot, cell.activity_idx);
                let edge = network.add_edge(ps_node, cell_node, 1, cost);
                link_edges.push((edge, p, cell_idx));
            }
        }

        // 分段凸费用: 第 k 档单位费用 (k+1)^2
        let step = Self::fairness_step_slots(problem);
        let mut reachable_slots: HashMap<usize, i64> = HashMap::new();
        for (p, _) in person_slot_nodes.keys() {
            *reachable_slots.entry(*p).or_insert(0) += 1;
        }
        for (&p, &slots) in &reachable_slots {
            let tiers = (slots + step - 1) / step;
            for k in 0..tiers {
                let cap = step.min(slots - k * step);
                network.add_edge(source, person_node(p), cap, (k + 1) * (k + 1) * FAIRNESS_UNIT_COST);
            }
        }

        let result = network.min_cost_max_flow(source, sink, budget);
        let chosen = link_edges
            .into_iter()
            .filter(|(edge, _, _)| network.flow_on(*edge) > 0)
            .map(|(_, p, c)| (p, c))
            .collect();
        (chosen, result)
    }
}

impl SolverStrategy for LpSolver {
    fn algorithm(&self) -> SolverAlgorithm {
        SolverAlgorithm::LinearProgramming
    }

    fn solve(&self, problem: &SolveProblem, budget: &SolveBudget) -> SolverDraft {
        let mut state = problem.initial_state();
        let (mut chosen, flow) = self.flow_assignments(problem, &state, budget);

        // 按时间顺序复核不可线性化约束
        chosen.sort_by_key(|&(p, c)| (problem.cells[c].slot, c, p));
        let mut rejected = 0u32;
        let mut filled: HashMap<usize, u32> = HashMap::new();
        for (p, c) in chosen {
            let cell = &problem.cells[c];
            if state.can_assign(problem, p, cell.slot, cell.activity_idx, AssignmentRole::Primary) {
                state.place(problem, p, cell.slot, cell.activity_idx, AssignmentRole::Primary, CREATED_BY);
                *filled.entry(c).or_insert(0) += 1;
            } else {
                rejected += 1;
            }
        }

        // 贪心补位
        let mut seen: HashMap<usize, u32> = HashMap::new();
        let rest: Vec<usize> = problem
            .seat_order()
            .into_iter()
            .filter(|&c| {
                let k = seen.entry(c).or_insert(0);
                *k += 1;
                *k > filled.get(&c).copied().unwrap_or(0)
            })
            .collect();
        let unfilled = GreedySolver::new().fill(problem, &mut state, &rest, CREATED_BY);

        let mut draft = SolverDraft::from_state(state);
        draft.nodes_explored = flow.augmentations;
        draft.budget_exhausted = flow.budget_exhausted;
        draft.notes.push(format!(
            "最小费用流: flow={}, cost={}, 修复剔除 {} 项",
            flow.flow, flow.cost, rejected
        ));
        if unfilled > 0 {
            draft.notes.push(format!("补位后仍有 {} 个席位未填补", unfilled));
        }
        tracing::debug!(flow = flow.flow, cost = flow.cost, rejected, unfilled, "线性规划求解完成");
        draft
    }
}
