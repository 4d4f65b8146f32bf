// ==========================================
// 住院医师排班系统 - N-1/N-2 应急推演
// ==========================================
// 覆盖图: 节点 = 人员 + 关键 (槽位, 活动) 单元
//         边 = 当前分配（主责/带教）+ 空闲合格替补
// 中心性: 介数（rustworkx-core）+ 度 + 唯一供给数
// 可排性: 每槽位关键席位与剩余合格人员的二分匹配
// 红线: 只读,不修改排班; 图为单次调用内的临时结构
// ==========================================

use crate::config::ContingencyConfig;
use crate::constraints::ScheduleIndex;
use crate::domain::activity::ActivityTemplate;
use crate::domain::calendar::{DateRange, SlotKey};
use crate::domain::person::Person;
use crate::domain::resilience::{
    ContingencyOutcome, CrisisScenario, PersonCentrality, UncoveredActivity, VulnerabilityReport,
};
use crate::domain::snapshot::DomainSnapshot;
use crate::domain::types::AssignmentRole;
use chrono::NaiveDateTime;
use rustworkx_core::centrality::betweenness_centrality;
use rustworkx_core::petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, instrument};
use uuid::Uuid;

// ==========================================
// CoverageGraph - 覆盖图（临时结构）
// ==========================================
struct CriticalCell<'a> {
    slot: SlotKey,
    activity: &'a ActivityTemplate,
}

struct CoverageGraph<'a> {
    people: Vec<&'a Person>,
    cells: Vec<CriticalCell<'a>>,
    /// 前 people.len() 个节点为人员,其后为单元
    adjacency: Vec<Vec<usize>>,
}

impl<'a> CoverageGraph<'a> {
    fn build(snapshot: &'a DomainSnapshot, window: DateRange, absent: &HashSet<&str>) -> Self {
        let index = ScheduleIndex::build(snapshot, &snapshot.assignments);
        let people: Vec<&Person> = snapshot
            .people
            .iter()
            .filter(|p| !absent.contains(p.person_id.as_str()))
            .collect();
        let person_index: HashMap<&str, usize> = people
            .iter()
            .enumerate()
            .map(|(i, p)| (p.person_id.as_str(), i))
            .collect();

        let cells = critical_cells(snapshot, window);
        let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();

        for (ci, cell) in cells.iter().enumerate() {
            let node = people.len() + ci;
            let available =
                |person_id: &str| snapshot.blocking_absence(person_id, &cell.slot).is_none();

            for a in index.cell_assignments(cell.slot, &cell.activity.activity_id) {
                if a.role == AssignmentRole::Backup || !available(&a.person_id) {
                    continue;
                }
                if let Some(&pi) = person_index.get(a.person_id.as_str()) {
                    edges.insert((pi, node));
                }
            }

            for (pi, person) in people.iter().enumerate() {
                let spare = index
                    .person_slot_assignments(cell.slot, &person.person_id)
                    .iter()
                    .all(|a| a.role == AssignmentRole::Backup);
                if spare && cell.activity.is_qualified(person) && available(&person.person_id) {
                    edges.insert((pi, node));
                }
            }
        }

        let mut adjacency = vec![Vec::new(); people.len() + cells.len()];
        for (u, v) in edges {
            adjacency[u].push(v);
            adjacency[v].push(u);
        }

        Self {
            people,
            cells,
            adjacency,
        }
    }

    /// 人员中心性排名（1 = 最关键）
    fn centrality(&self) -> Vec<PersonCentrality> {
        let scores = betweenness(&self.adjacency);
        let offset = self.people.len();

        let mut sole = vec![0u32; self.people.len()];
        for ci in 0..self.cells.len() {
            if let [only] = self.adjacency[offset + ci].as_slice() {
                sole[*only] += 1;
            }
        }

        let mut ranked: Vec<PersonCentrality> = self
            .people
            .iter()
            .enumerate()
            .map(|(i, p)| PersonCentrality {
                person_id: p.person_id.clone(),
                betweenness: scores[i],
                degree: self.adjacency[i].len() as u32,
                sole_provider_count: sole[i],
                rank: 0,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.betweenness
                .total_cmp(&a.betweenness)
                .then_with(|| b.sole_provider_count.cmp(&a.sole_provider_count))
                .then_with(|| b.degree.cmp(&a.degree))
                .then_with(|| a.person_id.cmp(&b.person_id))
        });
        for (i, c) in ranked.iter_mut().enumerate() {
            c.rank = i as u32 + 1;
        }
        ranked
    }
}

fn critical_cells(snapshot: &DomainSnapshot, window: DateRange) -> Vec<CriticalCell<'_>> {
    let mut slots: Vec<_> = snapshot.slots.iter().filter(|s| window.contains(s.date)).collect();
    slots.sort_by_key(|s| s.key());

    let mut cells = Vec::new();
    for slot in slots {
        for activity in snapshot
            .activities
            .iter()
            .filter(|a| a.is_critical() && a.required_per_slot > 0 && a.is_active_on(slot))
        {
            cells.push(CriticalCell {
                slot: slot.key(),
                activity,
            });
        }
    }
    cells
}

/// 介数中心性（无向无权图,不归一化）
fn betweenness(adjacency: &[Vec<usize>]) -> Vec<f64> {
    let mut graph: UnGraph<(), ()> = UnGraph::with_capacity(adjacency.len(), 0);
    let nodes: Vec<NodeIndex> = adjacency.iter().map(|_| graph.add_node(())).collect();
    for (u, neighbours) in adjacency.iter().enumerate() {
        for &v in neighbours.iter().filter(|&&v| u < v) {
            graph.add_edge(nodes[u], nodes[v], ());
        }
    }

    betweenness_centrality(&graph, false, false, 200)
        .into_iter()
        .map(|c| c.unwrap_or(0.0))
        .collect()
}

/// Kuhn 增广路最大匹配
///
/// # 返回
/// 每个席位是否匹配成功
fn max_matching(seat_candidates: &[Vec<usize>], people: usize) -> Vec<bool> {
    fn augment(
        seat: usize,
        seat_candidates: &[Vec<usize>],
        owner: &mut [Option<usize>],
        visited: &mut [bool],
    ) -> bool {
        for &p in &seat_candidates[seat] {
            if visited[p] {
                continue;
            }
            visited[p] = true;
            let free = match owner[p] {
                None => true,
                Some(other) => augment(other, seat_candidates, owner, visited),
            };
            if free {
                owner[p] = Some(seat);
                return true;
            }
        }
        false
    }

    let mut owner: Vec<Option<usize>> = vec![None; people];
    for seat in 0..seat_candidates.len() {
        let mut visited = vec![false; people];
        augment(seat, seat_candidates, &mut owner, &mut visited);
    }

    let mut matched = vec![false; seat_candidates.len()];
    for seat in owner.into_iter().flatten() {
        matched[seat] = true;
    }
    matched
}

// ==========================================
// ContingencyAnalyzer - 应急推演器
// ==========================================
pub struct ContingencyAnalyzer {
    config: ContingencyConfig,
}

impl ContingencyAnalyzer {
    pub fn new(config: ContingencyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContingencyConfig {
        &self.config
    }

    /// 生成脆弱性报告
    ///
    /// 场景中的缺岗人员先行移除,再在剩余人员上做 N-1/N-2 推演
    #[instrument(skip(self, snapshot, scenario), fields(program_id = %snapshot.program_id, scenario = %scenario.name))]
    pub fn analyze(
        &self,
        snapshot: &DomainSnapshot,
        window: DateRange,
        scenario: &CrisisScenario,
        at: NaiveDateTime,
    ) -> VulnerabilityReport {
        let absent: HashSet<&str> = scenario.absent_person_ids.iter().map(String::as_str).collect();
        let graph = CoverageGraph::build(snapshot, window, &absent);
        let centrality = graph.centrality();

        let baseline_uncovered = current_gaps(snapshot, window, &absent);

        let n1: Vec<ContingencyOutcome> = centrality
            .iter()
            .take(self.config.n1_candidates)
            .map(|c| self.simulate(snapshot, window, &absent, &[c.person_id.as_str()]))
            .collect();

        let n2 = match centrality.as_slice() {
            [first, second, ..] => Some(self.simulate(
                snapshot,
                window,
                &absent,
                &[first.person_id.as_str(), second.person_id.as_str()],
            )),
            _ => None,
        };

        let report = VulnerabilityReport {
            report_id: Uuid::new_v4().to_string(),
            program_id: snapshot.program_id.clone(),
            scenario: scenario.name.clone(),
            window,
            generated_at: at,
            centrality,
            baseline_uncovered,
            n1,
            n2,
        };

        info!(
            critical_cells = graph.cells.len(),
            people = graph.people.len(),
            n1_failures = report.n1.iter().filter(|o| !o.feasible).count(),
            n2_feasible = report.n2.as_ref().map(|o| o.feasible),
            "应急推演完成"
        );
        report
    }

    /// 移除指定人员后检查每个关键活动是否仍可排
    pub fn simulate(
        &self,
        snapshot: &DomainSnapshot,
        window: DateRange,
        absent: &HashSet<&str>,
        removed: &[&str],
    ) -> ContingencyOutcome {
        let excluded: HashSet<&str> = absent.iter().copied().chain(removed.iter().copied()).collect();
        let uncovered = staffability_gaps(snapshot, window, &excluded);
        ContingencyOutcome {
            removed_person_ids: removed.iter().map(|s| s.to_string()).collect(),
            feasible: uncovered.is_empty(),
            uncovered,
        }
    }
}

/// 当前排班下（扣除缺岗人员）关键单元的实际缺口
fn current_gaps(snapshot: &DomainSnapshot, window: DateRange, absent: &HashSet<&str>) -> Vec<UncoveredActivity> {
    let index = ScheduleIndex::build(snapshot, &snapshot.assignments);
    critical_cells(snapshot, window)
        .into_iter()
        .filter_map(|cell| {
            let effective = index
                .cell_assignments(cell.slot, &cell.activity.activity_id)
                .iter()
                .filter(|a| a.role == AssignmentRole::Primary)
                .filter(|a| !absent.contains(a.person_id.as_str()))
                .filter(|a| snapshot.blocking_absence(&a.person_id, &cell.slot).is_none())
                .count() as u32;
            let shortfall = cell.activity.required_per_slot.saturating_sub(effective);
            (shortfall > 0).then(|| UncoveredActivity {
                activity_id: cell.activity.activity_id.clone(),
                slot: cell.slot,
                shortfall,
            })
        })
        .collect()
}

/// 每槽位关键席位的最大匹配缺口
fn staffability_gaps(
    snapshot: &DomainSnapshot,
    window: DateRange,
    excluded: &HashSet<&str>,
) -> Vec<UncoveredActivity> {
    let people: Vec<&Person> = snapshot
        .people
        .iter()
        .filter(|p| !excluded.contains(p.person_id.as_str()))
        .collect();

    let mut by_slot: Vec<(SlotKey, Vec<&ActivityTemplate>)> = Vec::new();
    for cell in critical_cells(snapshot, window) {
        match by_slot.last_mut() {
            Some((slot, activities)) if *slot == cell.slot => activities.push(cell.activity),
            _ => by_slot.push((cell.slot, vec![cell.activity])),
        }
    }

    let mut uncovered = Vec::new();
    for (slot, activities) in by_slot {
        let available: Vec<bool> = people
            .iter()
            .map(|p| snapshot.blocking_absence(&p.person_id, &slot).is_none())
            .collect();

        let mut seat_activity = Vec::new();
        let mut seat_candidates = Vec::new();
        for (ai, activity) in activities.iter().enumerate() {
            let candidates: Vec<usize> = people
                .iter()
                .enumerate()
                .filter(|(pi, p)| available[*pi] && activity.is_qualified(p))
                .map(|(pi, _)| pi)
                .collect();
            for _ in 0..activity.required_per_slot {
                seat_activity.push(ai);
                seat_candidates.push(candidates.clone());
            }
        }

        let matched = max_matching(&seat_candidates, people.len());
        let mut shortfall = vec![0u32; activities.len()];
        for (seat, ok) in matched.iter().enumerate() {
            if !ok {
                shortfall[seat_activity[seat]] += 1;
            }
        }
        for (ai, gap) in shortfall.into_iter().enumerate() {
            if gap > 0 {
                uncovered.push(UncoveredActivity {
                    activity_id: activities[ai].activity_id.clone(),
                    slot,
                    shortfall: gap,
                });
            }
        }
    }
    uncovered
}
