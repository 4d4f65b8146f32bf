// ==========================================
// 住院医师排班系统 - 求解器层
// ==========================================
// 职责: 在时间窗口内生成满足硬约束的排班
// 策略: GREEDY / CONSTRAINT_PROGRAMMING / LINEAR_PROGRAMMING / HYBRID
// 红线: 状态由合规校验器判定,而不是由策略自报
//       预算耗尽返回最佳部分结果 + 完整违规,而不是错误
// ==========================================

pub mod cp;
pub mod demand;
pub mod greedy;
pub mod hybrid;
pub mod lp;

use crate::domain::assignment::Assignment;
use crate::domain::calendar::DateRange;
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::types::SolveStatus;
use crate::domain::violation::Violation;
use crate::engine::compliance::ComplianceValidator;
use demand::{fill_supervision, placed_primary, FeasibilityState, SolveProblem};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

pub use cp::CpSolver;
pub use greedy::GreedySolver;
pub use hybrid::HybridSolver;
pub use lp::LpSolver;

// ==========================================
// SolverAlgorithm - 求解算法
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolverAlgorithm {
    Greedy,
    ConstraintProgramming,
    LinearProgramming,
    Hybrid,
}

impl SolverAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverAlgorithm::Greedy => "GREEDY",
            SolverAlgorithm::ConstraintProgramming => "CONSTRAINT_PROGRAMMING",
            SolverAlgorithm::LinearProgramming => "LINEAR_PROGRAMMING",
            SolverAlgorithm::Hybrid => "HYBRID",
        }
    }
}

impl fmt::Display for SolverAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SolverAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GREEDY" => Ok(SolverAlgorithm::Greedy),
            "CP" | "CONSTRAINT_PROGRAMMING" => Ok(SolverAlgorithm::ConstraintProgramming),
            "LP" | "LINEAR_PROGRAMMING" => Ok(SolverAlgorithm::LinearProgramming),
            "HYBRID" => Ok(SolverAlgorithm::Hybrid),
            other => Err(format!("未知求解算法: {}", other)),
        }
    }
}

// ==========================================
// SolveBudget - 求解预算（时限 + 取消 + 节点上限）
// ==========================================
#[derive(Debug, Clone)]
pub struct SolveBudget {
    deadline: Instant,
    cancel: Arc<AtomicBool>,
    node_limit: u64,
}

impl SolveBudget {
    pub fn new(timeout: Duration, node_limit: u64) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: Arc::new(AtomicBool::new(false)),
            node_limit,
        }
    }

    pub fn from_millis(timeout_ms: u64, node_limit: u64) -> Self {
        Self::new(Duration::from_millis(timeout_ms), node_limit)
    }

    /// 共享外部取消标志
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.deadline
    }

    /// 节点数超限或时限到期
    pub fn is_exhausted(&self, nodes: u64) -> bool {
        nodes >= self.node_limit || self.is_expired()
    }

    pub fn node_limit(&self) -> u64 {
        self.node_limit
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// 切分子预算（共享取消标志）
    pub fn child(&self, fraction: f64) -> SolveBudget {
        let slice = self.remaining().mul_f64(fraction.clamp(0.0, 1.0));
        Self {
            deadline: Instant::now() + slice,
            cancel: self.cancel.clone(),
            node_limit: self.node_limit,
        }
    }
}

// ==========================================
// SolveDiagnostics - 求解诊断
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveDiagnostics {
    pub algorithm: SolverAlgorithm,
    pub elapsed_ms: u64,
    pub seats_required: u32,
    pub seats_filled: u32,
    pub nodes_explored: u64,
    pub budget_exhausted: bool,
    pub objective: f64,
    pub notes: Vec<String>,
}

// ==========================================
// SolveOutcome - 求解结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// 完整排班（固定分配 + 新生成分配）
    pub assignments: Vec<Assignment>,
    /// 未解决的违规（硬 + 软）
    pub violations: Vec<Violation>,
    pub diagnostics: SolveDiagnostics,
}

impl SolveOutcome {
    pub fn hard_violation_count(&self) -> usize {
        self.violations.iter().filter(|v| v.is_hard()).count()
    }
}

// ==========================================
// SolverDraft - 策略输出（校验前）
// ==========================================
#[derive(Debug)]
pub struct SolverDraft {
    pub state: FeasibilityState,
    pub nodes_explored: u64,
    pub budget_exhausted: bool,
    pub notes: Vec<String>,
}

impl SolverDraft {
    pub fn from_state(state: FeasibilityState) -> Self {
        Self {
            state,
            nodes_explored: 0,
            budget_exhausted: false,
            notes: Vec::new(),
        }
    }
}

/// 求解策略
pub trait SolverStrategy {
    fn algorithm(&self) -> SolverAlgorithm;

    /// 填补 PRIMARY 席位（带教由 ScheduleSolver 统一补齐）
    fn solve(&self, problem: &SolveProblem, budget: &SolveBudget) -> SolverDraft;
}

fn strategy_for(algorithm: SolverAlgorithm) -> Box<dyn SolverStrategy> {
    match algorithm {
        SolverAlgorithm::Greedy => Box::new(GreedySolver::new()),
        SolverAlgorithm::ConstraintProgramming => Box::new(CpSolver::new()),
        SolverAlgorithm::LinearProgramming => Box::new(LpSolver::new()),
        SolverAlgorithm::Hybrid => Box::new(HybridSolver::new()),
    }
}

// ==========================================
// ScheduleSolver - 排班求解入口
// ==========================================
pub struct ScheduleSolver;

impl Default for ScheduleSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleSolver {
    pub fn new() -> Self {
        Self
    }

    /// 生成排班
    ///
    /// # 返回
    /// - FAILED: 领域模型不合法或窗口非法（不产生排班）
    /// - SUCCESS: 零硬违规
    /// - PARTIAL: 最佳部分结果 + 完整未解决违规
    #[instrument(skip(self, snapshot, validator, window, budget), fields(
        program_id = %snapshot.program_id,
        window = %window,
        algorithm = %algorithm
    ))]
    pub fn generate(
        &self,
        algorithm: SolverAlgorithm,
        snapshot: &DomainSnapshot,
        validator: &ComplianceValidator,
        window: DateRange,
        budget: &SolveBudget,
    ) -> SolveOutcome {
        let started = Instant::now();

        let mut problems = Vec::new();
        if !window.is_valid() {
            problems.push(format!("时间窗口非法: {}", window));
        }
        if let Err(errors) = snapshot.check_integrity() {
            problems.extend(errors);
        }
        if !problems.is_empty() {
            warn!(problems = problems.len(), "领域模型不合法，拒绝求解");
            return SolveOutcome {
                status: SolveStatus::Failed,
                assignments: Vec::new(),
                violations: Vec::new(),
                diagnostics: SolveDiagnostics {
                    algorithm,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    seats_required: 0,
                    seats_filled: 0,
                    nodes_explored: 0,
                    budget_exhausted: false,
                    objective: 0.0,
                    notes: problems,
                },
            };
        }

        let problem = SolveProblem::build(snapshot, window, validator.config());
        let strategy = strategy_for(algorithm);
        let mut draft = strategy.solve(&problem, budget);

        let created_by = format!("solver:{}", algorithm.as_str().to_ascii_lowercase());
        let supervision_gaps = fill_supervision(&mut draft.state, &problem, &created_by);
        if supervision_gaps > 0 {
            draft.notes.push(format!("{} 个单元带教不足", supervision_gaps));
        }

        let seats_filled = placed_primary(&draft.state);
        let mut assignments = problem.fixed.clone();
        assignments.extend(draft.state.placed);

        let report = validator.validate_assignments(snapshot, &assignments, window);
        let status = if report.is_compliant() {
            SolveStatus::Success
        } else {
            SolveStatus::Partial
        };

        let diagnostics = SolveDiagnostics {
            algorithm,
            elapsed_ms: started.elapsed().as_millis() as u64,
            seats_required: problem.total_seats(),
            seats_filled,
            nodes_explored: draft.nodes_explored,
            budget_exhausted: draft.budget_exhausted,
            objective: report.objective,
            notes: draft.notes,
        };

        info!(
            status = %status,
            seats_required = diagnostics.seats_required,
            seats_filled = diagnostics.seats_filled,
            hard = report.hard_count,
            soft = report.soft_count,
            elapsed_ms = diagnostics.elapsed_ms,
            "排班求解完成"
        );

        SolveOutcome {
            status,
            assignments,
            violations: report.violations,
            diagnostics,
        }
    }
}
