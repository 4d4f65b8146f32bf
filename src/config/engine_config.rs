// ==========================================
// 住院医师排班系统 - 引擎配置
// ==========================================
// 职责: 合规阈值、防御等级区间、换班窗口、求解预算、牺牲层级
// 红线: 软约束默认全部启用,禁用必须带审计信息
// ==========================================

use crate::domain::types::{ActivityCategory, DefenseLevel};
use crate::engine::error::EngineError;
use crate::solver::SolverAlgorithm;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ==========================================
// ComplianceConfig - 合规阈值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// 周平均工时上限（滚动窗口内平均）
    pub max_weekly_hours: f64,
    pub rolling_window_days: i64,
    /// 滚动窗口内最少休息日
    pub min_days_off: u32,
    /// 延长值班后强制休息的时段数
    pub post_extended_rest_periods: u32,
    /// 人员未配置周工时上限时的默认可用工时
    pub default_weekly_capacity_hours: f64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            max_weekly_hours: 80.0,
            rolling_window_days: 28,
            min_days_off: 4,
            post_extended_rest_periods: 2,
            default_weekly_capacity_hours: 80.0,
        }
    }
}

impl ComplianceConfig {
    /// 窗口工时上限（按窗口天数折算）
    pub fn hour_limit_for(&self, window_days: i64) -> f64 {
        self.max_weekly_hours * window_days as f64 / 7.0
    }

    /// 窗口最少休息日（不足完整窗口时向下取整）
    pub fn days_off_for(&self, window_days: i64) -> u32 {
        if window_days >= self.rolling_window_days {
            self.min_days_off
        } else {
            (window_days as u64 * self.min_days_off as u64 / self.rolling_window_days.max(1) as u64) as u32
        }
    }
}

// ==========================================
// DefenseConfig - 防御等级阈值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenseConfig {
    pub yellow_threshold: f64,
    pub orange_threshold: f64,
    pub red_threshold: f64,
    pub black_threshold: f64,
    /// 周期采样间隔（秒）
    pub sample_interval_secs: u64,
    /// 采样窗口天数（自采样日起）
    pub sample_window_days: i64,
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            yellow_threshold: 0.70,
            orange_threshold: 0.80,
            red_threshold: 0.90,
            black_threshold: 0.95,
            sample_interval_secs: 300,
            sample_window_days: 28,
        }
    }
}

impl DefenseConfig {
    /// 由利用率推导目标等级
    ///
    /// 规则:
    /// - >= black 且存在关键缺口 → CRITICAL（级联不可行）
    /// - 其余按区间映射
    pub fn target_level(&self, utilization: f64, critical_gaps: u32) -> DefenseLevel {
        if utilization >= self.black_threshold {
            if critical_gaps > 0 {
                DefenseLevel::Critical
            } else {
                DefenseLevel::Black
            }
        } else if utilization >= self.red_threshold {
            DefenseLevel::Red
        } else if utilization >= self.orange_threshold {
            DefenseLevel::Orange
        } else if utilization >= self.yellow_threshold {
            DefenseLevel::Yellow
        } else {
            DefenseLevel::Green
        }
    }

    /// 等级区间下界（减载目标: 利用率降到此值以下）
    pub fn lower_bound(&self, level: DefenseLevel) -> f64 {
        match level {
            DefenseLevel::Green => 0.0,
            DefenseLevel::Yellow => self.yellow_threshold,
            DefenseLevel::Orange => self.orange_threshold,
            DefenseLevel::Red => self.red_threshold,
            DefenseLevel::Black | DefenseLevel::Critical => self.black_threshold,
        }
    }
}

// ==========================================
// SwapConfig - 换班窗口
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    /// 换班周期长度（周块）
    pub swap_block_days: i64,
    /// 背靠背检测窗口（天）
    pub adjacency_window_days: i64,
    pub rollback_window_hours: i64,
    /// 距今不足此天数给出临近警告
    pub imminent_days: i64,
    /// 冲突检测任务最大重试次数
    pub conflict_max_retries: u32,
    pub conflict_queue_capacity: usize,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            swap_block_days: 7,
            adjacency_window_days: 7,
            rollback_window_hours: 24,
            imminent_days: 3,
            conflict_max_retries: 3,
            conflict_queue_capacity: 256,
        }
    }
}

impl SwapConfig {
    pub fn rollback_window(&self) -> Duration {
        Duration::hours(self.rollback_window_hours)
    }
}

// ==========================================
// SolverConfig - 求解预算
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub default_algorithm: SolverAlgorithm,
    pub default_timeout_ms: u64,
    /// CP 搜索节点上限
    pub cp_node_limit: u64,
    /// Hybrid 局部修复邻域半径（天）
    pub repair_radius_days: i64,
    /// LP 公平性分段步长（工时）
    pub fairness_step_hours: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            default_algorithm: SolverAlgorithm::Hybrid,
            default_timeout_ms: 30_000,
            cp_node_limit: 2_000_000,
            repair_radius_days: 2,
            fairness_step_hours: 8.0,
        }
    }
}

// ==========================================
// SheddingConfig - 牺牲层级
// ==========================================
// sacrifice_order: 从"永不牺牲"到"最先削减"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheddingConfig {
    pub sacrifice_order: Vec<ActivityCategory>,
    /// 前 N 层永不削减
    pub protected_tiers: usize,
    pub shed_manual_overrides: bool,
}

impl Default for SheddingConfig {
    fn default() -> Self {
        Self {
            sacrifice_order: ActivityCategory::all().to_vec(),
            protected_tiers: 1,
            shed_manual_overrides: false,
        }
    }
}

// ==========================================
// ContingencyConfig - N-1/N-2 推演
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContingencyConfig {
    /// N-1 推演候选人数（按中心性排名）
    pub n1_candidates: usize,
    pub stale_after_hours: i64,
}

impl Default for ContingencyConfig {
    fn default() -> Self {
        Self {
            n1_candidates: 3,
            stale_after_hours: 24,
        }
    }
}

impl ContingencyConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::hours(self.stale_after_hours)
    }
}

// ==========================================
// CrisisConfig - 危机响应
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrisisConfig {
    pub crisis_algorithm: SolverAlgorithm,
    pub regeneration_budget_ms: u64,
    /// RED 及以上且重算失败时启用的兜底场景
    pub fallback_scenario: Option<String>,
}

impl Default for CrisisConfig {
    fn default() -> Self {
        Self {
            crisis_algorithm: SolverAlgorithm::Greedy,
            regeneration_budget_ms: 5_000,
            fallback_scenario: None,
        }
    }
}

// ==========================================
// 软约束设置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftConstraintSetting {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub weight: f64,
    #[serde(default)]
    pub override_reason: Option<String>,
    #[serde(default)]
    pub override_by: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SoftConstraintSetting {
    pub fn enabled(weight: f64) -> Self {
        Self {
            enabled: true,
            weight,
            override_reason: None,
            override_by: None,
        }
    }

    /// 禁用时是否附带了完整审计信息
    pub fn has_override_audit(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        filled(&self.override_reason) && filled(&self.override_by)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftConstraintSettings {
    pub hub_protection: SoftConstraintSetting,
    pub utilization_buffer: SoftConstraintSetting,
    pub zone_boundary: SoftConstraintSetting,
    pub preference_trail: SoftConstraintSetting,
    pub n1_vulnerability: SoftConstraintSetting,

    // ===== 参数 =====
    /// 枢纽人员数（按关键活动资格数排名）
    pub hub_top_k: usize,
    /// 枢纽人员工时占可用工时的上限比例
    pub hub_load_cap: f64,
    /// 个人利用率缓冲目标
    pub buffer_target: f64,
}

impl Default for SoftConstraintSettings {
    fn default() -> Self {
        Self {
            hub_protection: SoftConstraintSetting::enabled(5.0),
            utilization_buffer: SoftConstraintSetting::enabled(3.0),
            zone_boundary: SoftConstraintSetting::enabled(1.0),
            preference_trail: SoftConstraintSetting::enabled(1.0),
            n1_vulnerability: SoftConstraintSetting::enabled(4.0),
            hub_top_k: 3,
            hub_load_cap: 0.75,
            buffer_target: 0.80,
        }
    }
}

impl SoftConstraintSettings {
    /// (约束名, 设置) 列表
    pub fn entries(&self) -> [(&'static str, &SoftConstraintSetting); 5] {
        [
            ("HUB_PROTECTION", &self.hub_protection),
            ("UTILIZATION_BUFFER", &self.utilization_buffer),
            ("ZONE_BOUNDARY", &self.zone_boundary),
            ("PREFERENCE_TRAIL", &self.preference_trail),
            ("N1_VULNERABILITY", &self.n1_vulnerability),
        ]
    }
}

// ==========================================
// CouplingRule - 联动职责
// ==========================================
// 换班主活动时,同周期内的联动活动随之转移
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingRule {
    pub primary_activity: String,
    pub coupled_activity: String,
}

// ==========================================
// EngineConfig - 引擎总配置
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub compliance: ComplianceConfig,
    pub defense: DefenseConfig,
    pub swap: SwapConfig,
    pub solver: SolverConfig,
    pub shedding: SheddingConfig,
    pub contingency: ContingencyConfig,
    pub crisis: CrisisConfig,
    pub soft_constraints: SoftConstraintSettings,
    pub coupling_rules: Vec<CouplingRule>,
}

impl EngineConfig {
    /// 从 JSON 字符串加载（加载后立即校验）
    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(raw)
            .map_err(|e| EngineError::Config(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("读取配置文件失败 {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// 配置校验
    pub fn validate(&self) -> Result<(), EngineError> {
        let c = &self.compliance;
        if c.max_weekly_hours <= 0.0 || c.rolling_window_days <= 0 {
            return Err(EngineError::Config("工时上限与滚动窗口必须为正".to_string()));
        }
        if c.default_weekly_capacity_hours <= 0.0 {
            return Err(EngineError::Config("默认周可用工时必须为正".to_string()));
        }

        let d = &self.defense;
        let thresholds = [d.yellow_threshold, d.orange_threshold, d.red_threshold, d.black_threshold];
        if thresholds[0] <= 0.0 || thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::Config(format!(
                "防御阈值必须为正且严格递增: {:?}",
                thresholds
            )));
        }
        if d.sample_window_days <= 0 {
            return Err(EngineError::Config("采样窗口必须为正".to_string()));
        }

        if self.swap.swap_block_days <= 0 || self.swap.rollback_window_hours < 0 {
            return Err(EngineError::Config("换班周期/回滚窗口配置非法".to_string()));
        }

        let mut seen = HashSet::new();
        for cat in &self.shedding.sacrifice_order {
            if !seen.insert(*cat) {
                return Err(EngineError::Config(format!("牺牲层级重复类别: {}", cat)));
            }
        }
        if seen.len() != ActivityCategory::all().len() {
            return Err(EngineError::Config("牺牲层级必须包含全部活动类别".to_string()));
        }
        if self.shedding.protected_tiers > self.shedding.sacrifice_order.len() {
            return Err(EngineError::Config("受保护层数超过层级总数".to_string()));
        }

        if self.contingency.n1_candidates == 0 {
            return Err(EngineError::Config("N-1 候选人数必须 >= 1".to_string()));
        }

        for (name, setting) in self.soft_constraints.entries() {
            if setting.weight < 0.0 {
                return Err(EngineError::Config(format!("软约束 {} 权重为负", name)));
            }
            if !setting.enabled && !setting.has_override_audit() {
                return Err(EngineError::Config(format!(
                    "软约束 {} 被禁用但缺少 override_reason/override_by",
                    name
                )));
            }
        }

        for rule in &self.coupling_rules {
            if rule.primary_activity.trim().is_empty() || rule.coupled_activity.trim().is_empty() {
                return Err(EngineError::Config("联动规则活动 ID 不能为空".to_string()));
            }
            if rule.primary_activity == rule.coupled_activity {
                return Err(EngineError::Config(format!(
                    "联动规则不能自联动: {}",
                    rule.primary_activity
                )));
            }
        }

        Ok(())
    }

    /// 已禁用的软约束（附审计信息）
    pub fn disabled_soft_constraints(&self) -> Vec<(&'static str, &SoftConstraintSetting)> {
        self.soft_constraints
            .entries()
            .into_iter()
            .filter(|(_, s)| !s.enabled)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.soft_constraints.entries().iter().all(|(_, s)| s.enabled));
    }

    #[test]
    fn test_disabled_soft_constraint_requires_audit() {
        let mut config = EngineConfig::default();
        config.soft_constraints.zone_boundary.enabled = false;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        config.soft_constraints.zone_boundary.override_reason = Some("单院区".to_string());
        config.soft_constraints.zone_boundary.override_by = Some("chief".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.disabled_soft_constraints().len(), 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{"swap": {"adjacency_window_days": 14}}"#).unwrap();
        assert_eq!(config.swap.adjacency_window_days, 14);
        assert_eq!(config.swap.swap_block_days, 7);
        assert_eq!(config.compliance.max_weekly_hours, 80.0);
    }

    #[test]
    fn test_duplicate_sacrifice_category_rejected() {
        let mut config = EngineConfig::default();
        config.shedding.sacrifice_order[6] = ActivityCategory::Research;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_target_level_mapping() {
        let d = DefenseConfig::default();
        assert_eq!(d.target_level(0.65, 0), DefenseLevel::Green);
        assert_eq!(d.target_level(0.70, 0), DefenseLevel::Yellow);
        assert_eq!(d.target_level(0.82, 0), DefenseLevel::Orange);
        assert_eq!(d.target_level(0.93, 5), DefenseLevel::Red);
        assert_eq!(d.target_level(0.97, 0), DefenseLevel::Black);
        assert_eq!(d.target_level(0.97, 1), DefenseLevel::Critical);
    }

    #[test]
    fn test_scaled_limits_for_short_range() {
        let c = ComplianceConfig::default();
        assert_eq!(c.hour_limit_for(7), 80.0);
        assert_eq!(c.days_off_for(7), 1);
        assert_eq!(c.days_off_for(6), 0);
        assert_eq!(c.days_off_for(28), 4);
    }
}
