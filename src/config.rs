//! Engine configuration
//!
//! Every weight, threshold, window and tier bound is policy supplied here.
//! [`EngineConfig::default`] carries the documented defaults; JSON files may
//! override any subset of fields.

use crate::aggregation::RiskTier;
use crate::geographic_risk::CountryRiskList;
use crate::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Per-indicator override
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndicatorSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub weight: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: None,
        }
    }
}

/// Numeric and textual parameters shared by the indicators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorThresholds {
    pub reporting_threshold: f64,
    /// Fraction below the reporting threshold still considered avoidance
    pub threshold_margin: f64,
    pub round_unit: f64,
    pub round_amount_floor: f64,
    pub high_risk_channels: Vec<String>,
    pub document_pattern: String,
    /// Verify the national ID check letter on documents matching the pattern
    pub verify_document_check_letter: bool,
    pub min_customer_age: u32,
    pub max_customer_age: u32,
    pub min_name_length: usize,
    pub business_hours_start: u32,
    pub business_hours_end: u32,
    pub structuring_window_days: i64,
    pub structuring_min_count: usize,
    pub velocity_window_hours: i64,
    pub velocity_min_count: usize,
    pub fan_in_window_days: i64,
    pub fan_in_min_senders: usize,
    pub reference_min_senders: usize,
    pub reference_min_length: usize,
    /// Distinct senders entering the same beneficiary name and destination
    pub beneficiary_key_min_senders: usize,
    pub cancellation_min_count: usize,
    pub cancellation_near_threshold_count: usize,
    /// Absolute distance from the reporting threshold counted as "near"
    pub cancellation_near_band: f64,
    pub profile_min_history: usize,
    pub profile_std_multiplier: f64,
    pub habitual_destination_min_count: usize,
    /// Distinct destinations or beneficiaries that make an agent sender suspicious
    pub agent_sender_min_targets: usize,
    pub agent_volume_factor: f64,
    pub city_amount_factor: f64,
    pub city_min_transactions: usize,
    pub surge_growth_pct: f64,
    pub surge_min_transactions: usize,
    /// Month-over-month rise, in percentage points, of an agent's high-risk volume share
    pub corridor_shift_points: f64,
    pub concentration_share: f64,
    pub concentration_min_transactions: usize,
}

impl Default for IndicatorThresholds {
    fn default() -> Self {
        Self {
            reporting_threshold: 10_000.0,
            threshold_margin: 0.15,
            round_unit: 100.0,
            round_amount_floor: 1_000.0,
            high_risk_channels: vec![
                "CASH".to_string(),
                "CRYPTO".to_string(),
                "PREPAID_CARD".to_string(),
            ],
            document_pattern: r"^[XYZ0-9][0-9]{7}[A-Z]$".to_string(),
            verify_document_check_letter: true,
            min_customer_age: 12,
            max_customer_age: 100,
            min_name_length: 3,
            business_hours_start: 9,
            business_hours_end: 22,
            structuring_window_days: 7,
            structuring_min_count: 3,
            velocity_window_hours: 24,
            velocity_min_count: 5,
            fan_in_window_days: 30,
            fan_in_min_senders: 3,
            reference_min_senders: 2,
            reference_min_length: 4,
            beneficiary_key_min_senders: 2,
            cancellation_min_count: 3,
            cancellation_near_threshold_count: 2,
            cancellation_near_band: 1_500.0,
            profile_min_history: 3,
            profile_std_multiplier: 2.0,
            habitual_destination_min_count: 4,
            agent_sender_min_targets: 3,
            agent_volume_factor: 2.0,
            city_amount_factor: 1.5,
            city_min_transactions: 3,
            surge_growth_pct: 50.0,
            surge_min_transactions: 3,
            corridor_shift_points: 20.0,
            concentration_share: 0.7,
            concentration_min_transactions: 3,
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidThreshold {
        name,
        reason: reason.into(),
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("must be a positive number, got {}", value)))
    }
}

fn require_count(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(invalid(name, "must be at least 1"))
    }
}

impl IndicatorThresholds {
    /// Compile the document pattern
    pub fn document_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.document_pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: self.document_pattern.clone(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("reporting_threshold", self.reporting_threshold)?;
        if !(0.0..1.0).contains(&self.threshold_margin) {
            return Err(invalid("threshold_margin", "must be within [0, 1)"));
        }
        require_positive("round_unit", self.round_unit)?;
        if !(self.round_amount_floor >= 0.0) {
            return Err(invalid("round_amount_floor", "must not be negative"));
        }
        if self.business_hours_start >= self.business_hours_end || self.business_hours_end > 24 {
            return Err(invalid(
                "business_hours",
                format!(
                    "start {} must be before end {} and end at most 24",
                    self.business_hours_start, self.business_hours_end
                ),
            ));
        }
        if self.min_customer_age > self.max_customer_age {
            return Err(invalid(
                "customer_age",
                "minimum age exceeds maximum age",
            ));
        }
        if self.structuring_window_days < 0 {
            return Err(invalid("structuring_window_days", "must not be negative"));
        }
        if self.velocity_window_hours < 0 {
            return Err(invalid("velocity_window_hours", "must not be negative"));
        }
        if self.fan_in_window_days < 0 {
            return Err(invalid("fan_in_window_days", "must not be negative"));
        }
        require_count("structuring_min_count", self.structuring_min_count)?;
        require_count("velocity_min_count", self.velocity_min_count)?;
        require_count("fan_in_min_senders", self.fan_in_min_senders)?;
        require_count("reference_min_senders", self.reference_min_senders)?;
        require_count("beneficiary_key_min_senders", self.beneficiary_key_min_senders)?;
        require_count("agent_sender_min_targets", self.agent_sender_min_targets)?;
        require_count("cancellation_min_count", self.cancellation_min_count)?;
        require_count(
            "cancellation_near_threshold_count",
            self.cancellation_near_threshold_count,
        )?;
        require_count("profile_min_history", self.profile_min_history)?;
        require_count(
            "habitual_destination_min_count",
            self.habitual_destination_min_count,
        )?;
        require_count("city_min_transactions", self.city_min_transactions)?;
        require_count("surge_min_transactions", self.surge_min_transactions)?;
        require_count(
            "concentration_min_transactions",
            self.concentration_min_transactions,
        )?;
        require_positive("profile_std_multiplier", self.profile_std_multiplier)?;
        require_positive("agent_volume_factor", self.agent_volume_factor)?;
        require_positive("city_amount_factor", self.city_amount_factor)?;
        require_positive("surge_growth_pct", self.surge_growth_pct)?;
        require_positive("corridor_shift_points", self.corridor_shift_points)?;
        if !(self.concentration_share > 0.0 && self.concentration_share <= 1.0) {
            return Err(invalid("concentration_share", "must be within (0, 1]"));
        }
        if !(self.cancellation_near_band >= 0.0) {
            return Err(invalid("cancellation_near_band", "must not be negative"));
        }
        self.document_regex()?;
        Ok(())
    }
}

/// One score range mapped to a tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierBand {
    pub tier: RiskTier,
    pub min_score: u32,
    /// `None` for the open-ended top band
    pub max_score: Option<u32>,
}

impl TierBand {
    pub fn new(tier: RiskTier, min_score: u32, max_score: Option<u32>) -> Self {
        Self {
            tier,
            min_score,
            max_score,
        }
    }

    fn contains(&self, score: u32) -> bool {
        score >= self.min_score && self.max_score.map_or(true, |max| score <= max)
    }
}

/// Ordered score ranges covering `0..` without gaps or overlaps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct TierScale {
    bands: Vec<TierBand>,
}

impl TierScale {
    /// Build and validate a scale
    pub fn new(bands: Vec<TierBand>) -> Result<Self, ConfigError> {
        let scale = Self { bands };
        scale.validate()?;
        Ok(scale)
    }

    pub fn bands(&self) -> &[TierBand] {
        &self.bands
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let first = self
            .bands
            .first()
            .ok_or_else(|| ConfigError::InvalidTierScale("no tier bands configured".to_string()))?;
        if first.min_score != 0 {
            return Err(ConfigError::InvalidTierScale(format!(
                "first band ({}) starts at {} instead of 0",
                first.tier, first.min_score
            )));
        }

        for pair in self.bands.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            let max = lower.max_score.ok_or_else(|| {
                ConfigError::InvalidTierScale(format!(
                    "band {} is open-ended but is not the last band",
                    lower.tier
                ))
            })?;
            if max < lower.min_score {
                return Err(ConfigError::InvalidTierScale(format!(
                    "band {} has max {} below min {}",
                    lower.tier, max, lower.min_score
                )));
            }
            if upper.min_score != max.saturating_add(1) || max == u32::MAX {
                return Err(ConfigError::InvalidTierScale(format!(
                    "band {} ends at {} but band {} starts at {}",
                    lower.tier, max, upper.tier, upper.min_score
                )));
            }
            if upper.tier <= lower.tier {
                return Err(ConfigError::InvalidTierScale(format!(
                    "tier {} must rank above {}",
                    upper.tier, lower.tier
                )));
            }
        }

        if let Some(last) = self.bands.last() {
            if let Some(max) = last.max_score {
                return Err(ConfigError::InvalidTierScale(format!(
                    "last band {} is capped at {}; scores above it would have no tier",
                    last.tier, max
                )));
            }
        }
        Ok(())
    }

    /// Tier for a composite score
    pub fn tier_for(&self, score: u32) -> RiskTier {
        self.bands
            .iter()
            .find(|band| band.contains(score))
            .map_or(RiskTier::Low, |band| band.tier)
    }
}

impl Default for TierScale {
    fn default() -> Self {
        Self {
            bands: vec![
                TierBand::new(RiskTier::Low, 0, Some(25)),
                TierBand::new(RiskTier::Medium, 26, Some(50)),
                TierBand::new(RiskTier::High, 51, Some(75)),
                TierBand::new(RiskTier::Critical, 76, None),
            ],
        }
    }
}

/// Summary-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregationSettings {
    /// Transactions at or above this tier count toward flagged volume
    pub flagged_tier: RiskTier,
    pub top_indicator_count: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            flagged_tier: RiskTier::High,
            top_indicator_count: 5,
        }
    }
}

/// How a node's risk tier is derived from the transactions touching it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRiskAggregation {
    #[default]
    MaxTier,
    /// Mean composite score mapped through the tier scale
    MeanScore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSettings {
    /// Transactions below this amount are left out of the graph
    pub min_amount: Option<f64>,
    /// Keep only transactions to these destinations (empty keeps all)
    pub destination_countries: Vec<String>,
    /// Keep only senders holding documents from these countries (empty keeps all)
    pub document_countries: Vec<String>,
    pub node_risk: NodeRiskAggregation,
    /// Transactions at or above this tier count as high-risk on edges
    pub high_risk_tier: RiskTier,
    pub max_cycle_hops: usize,
    pub funnel_min_sources: usize,
    pub funnel_max_targets: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            min_amount: None,
            destination_countries: Vec::new(),
            document_countries: Vec::new(),
            node_risk: NodeRiskAggregation::MaxTier,
            high_risk_tier: RiskTier::High,
            max_cycle_hops: 4,
            funnel_min_sources: 5,
            funnel_max_targets: 2,
        }
    }
}

impl NetworkSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(min) = self.min_amount {
            if !(min >= 0.0) {
                return Err(invalid("network.min_amount", "must not be negative"));
            }
        }
        if self.max_cycle_hops < 2 {
            return Err(invalid("network.max_cycle_hops", "must be at least 2"));
        }
        require_count("network.funnel_min_sources", self.funnel_min_sources)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommunityMethod {
    #[default]
    LabelPropagation,
    ConnectedComponents,
    /// Agglomerative modularity maximisation; deterministic without a seed
    GreedyModularity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommunitySettings {
    pub method: CommunityMethod,
    pub seed: u64,
    pub max_iterations: usize,
}

impl Default for CommunitySettings {
    fn default() -> Self {
        Self {
            method: CommunityMethod::LabelPropagation,
            seed: 42,
            max_iterations: 100,
        }
    }
}

/// Limits for the dataset-level smurfing report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmurfingSettings {
    /// Amounts strictly below this count as small
    pub small_amount: f64,
    pub same_day_min_count: usize,
    /// A sender's same-day small transfers must add up to more than this
    pub same_day_min_total: f64,
    pub frequent_small_min_count: usize,
    pub shared_beneficiary_min_senders: usize,
    /// Transaction ids listed per finding
    pub max_listed_transactions: usize,
}

impl Default for SmurfingSettings {
    fn default() -> Self {
        Self {
            small_amount: 1_000.0,
            same_day_min_count: 3,
            same_day_min_total: 3_000.0,
            frequent_small_min_count: 5,
            shared_beneficiary_min_senders: 3,
            max_listed_transactions: 10,
        }
    }
}

impl SmurfingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("smurfing.small_amount", self.small_amount)?;
        require_positive("smurfing.same_day_min_total", self.same_day_min_total)?;
        require_count("smurfing.same_day_min_count", self.same_day_min_count)?;
        require_count("smurfing.frequent_small_min_count", self.frequent_small_min_count)?;
        require_count(
            "smurfing.shared_beneficiary_min_senders",
            self.shared_beneficiary_min_senders,
        )?;
        require_count("smurfing.max_listed_transactions", self.max_listed_transactions)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Overrides keyed by indicator name; unlisted indicators keep their defaults
    pub indicators: BTreeMap<String, IndicatorSettings>,
    pub thresholds: IndicatorThresholds,
    pub countries: CountryRiskList,
    pub tiers: TierScale,
    pub aggregation: AggregationSettings,
    pub network: NetworkSettings,
    pub community: CommunitySettings,
    pub smurfing: SmurfingSettings,
}

impl EngineConfig {
    /// Parse a JSON document; missing sections take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading engine configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check internal consistency; indicator names are checked by the registry
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tiers.validate()?;
        self.thresholds.validate()?;
        self.network.validate()?;
        require_count("community.max_iterations", self.community.max_iterations)?;
        self.smurfing.validate()
    }

    /// Enable or disable a single indicator
    pub fn set_indicator_enabled(&mut self, name: &str, enabled: bool) {
        self.indicators.entry(name.to_string()).or_default().enabled = enabled;
    }

    pub fn set_indicator_weight(&mut self, name: &str, weight: u32) {
        self.indicators.entry(name.to_string()).or_default().weight = Some(weight);
    }
}
