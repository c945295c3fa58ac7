//! Indicator framework
//!
//! Each risk indicator implements [`Indicator`] and is evaluated against the
//! whole dataset at once, returning one [`Assessment`] per row. Indicators are
//! held in an [`IndicatorRegistry`] together with their weights; the
//! [`IndicatorEngine`] turns assessments into scored [`IndicatorResult`]s.

use crate::cohort_indicators::{
    AgentActivitySurge, AgentVolumeOutlier, CityAmountOutlier, DestinationConcentration,
    DocumentNameMismatch, FanInBeneficiary, ProfileDeviation, RepeatedCancellations,
    ReusedReference, Structuring, Velocity,
};
use crate::config::{EngineConfig, IndicatorThresholds};
use crate::dataset::{DatasetIndex, Transaction, TransactionDataset};
use crate::geographic_risk::CountryRiskList;
use crate::row_indicators::{
    HighRiskChannel, HighRiskCountry, IncompleteCustomerData, MalformedDocument,
    NationalityDestinationMismatch, PoliticallyExposedSender, RoundAmount, ThresholdAvoidance,
    UnusualHour,
};
use crate::ConfigError;
use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Reporting group an indicator belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorCategory {
    Documentation,
    Thresholds,
    Geographic,
    Outliers,
}

impl fmt::Display for IndicatorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorCategory::Documentation => write!(f, "documentation"),
            IndicatorCategory::Thresholds => write!(f, "thresholds"),
            IndicatorCategory::Geographic => write!(f, "geographic"),
            IndicatorCategory::Outliers => write!(f, "outliers"),
        }
    }
}

/// Whether an indicator looks at one row or at groups of rows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorScope {
    Row,
    Cohort,
}

/// Outcome of one indicator for one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Triggered { note: Option<String> },
    Clear,
    /// Required fields are missing or the cohort is too small to judge
    NotApplicable,
}

impl Assessment {
    pub fn triggered(note: impl Into<String>) -> Self {
        Assessment::Triggered {
            note: Some(note.into()),
        }
    }

    /// Triggered or clear depending on `condition`
    pub fn flag(condition: bool, note: impl FnOnce() -> String) -> Self {
        if condition {
            Assessment::triggered(note())
        } else {
            Assessment::Clear
        }
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self, Assessment::Triggered { .. })
    }

    pub fn is_applicable(&self) -> bool {
        !matches!(self, Assessment::NotApplicable)
    }
}

/// Read-only inputs shared by every indicator in a run
pub struct EvaluationContext<'a> {
    pub dataset: &'a TransactionDataset,
    pub index: &'a DatasetIndex<'a>,
    pub thresholds: &'a IndicatorThresholds,
    pub countries: &'a CountryRiskList,
    /// Compiled `thresholds.document_pattern`
    pub document_pattern: &'a Regex,
}

impl<'a> EvaluationContext<'a> {
    pub fn transaction(&self, row: usize) -> &'a Transaction {
        &self.dataset.transactions()[row]
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }
}

/// A single risk rule
pub trait Indicator: Send + Sync {
    /// Unique name within a registry
    fn name(&self) -> &str;

    fn category(&self) -> IndicatorCategory;

    fn scope(&self) -> IndicatorScope;

    /// Points contributed when triggered, unless configuration overrides it
    fn default_weight(&self) -> u32;

    /// Assess every row of the dataset; the result has one entry per row
    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment>;
}

/// Apply a row-local rule to every transaction
pub(crate) fn per_row<F>(ctx: &EvaluationContext<'_>, rule: F) -> Vec<Assessment>
where
    F: Fn(&Transaction) -> Assessment,
{
    ctx.dataset.iter().map(rule).collect()
}

/// Rows belonging to at least one window of `min_count` rows whose
/// timestamps span at most `span`.
///
/// `rows` must be sorted by time; rows without a timestamp are skipped.
pub(crate) fn mark_dense_windows<F>(
    rows: &[usize],
    time_of: F,
    span: Duration,
    min_count: usize,
) -> Vec<usize>
where
    F: Fn(usize) -> Option<NaiveDateTime>,
{
    let timed: Vec<(usize, NaiveDateTime)> = rows
        .iter()
        .filter_map(|&row| time_of(row).map(|t| (row, t)))
        .collect();

    let mut marked = Vec::new();
    let mut left = 0;
    let mut next_unmarked = 0;
    for right in 0..timed.len() {
        while timed[right].1 - timed[left].1 > span {
            left += 1;
        }
        if right + 1 - left >= min_count {
            for &(row, _) in &timed[left.max(next_unmarked)..=right] {
                marked.push(row);
            }
            next_unmarked = right + 1;
        }
    }
    marked
}

/// Scored result for one (transaction, indicator) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndicatorResult {
    pub indicator: String,
    pub category: IndicatorCategory,
    pub scope: IndicatorScope,
    pub triggered: bool,
    pub applicable: bool,
    /// Weight when triggered, otherwise 0
    pub score: u32,
    pub note: Option<String>,
}

impl IndicatorResult {
    fn from_assessment(indicator: &dyn Indicator, weight: u32, assessment: Assessment) -> Self {
        let applicable = assessment.is_applicable();
        let (triggered, note) = match assessment {
            Assessment::Triggered { note } => (true, note),
            Assessment::Clear | Assessment::NotApplicable => (false, None),
        };
        Self {
            indicator: indicator.name().to_string(),
            category: indicator.category(),
            scope: indicator.scope(),
            triggered,
            applicable,
            score: if triggered { weight } else { 0 },
            note,
        }
    }
}

/// All indicator results for one transaction, in registry order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionAssessment {
    pub transaction_id: String,
    pub row: usize,
    pub results: Vec<IndicatorResult>,
}

impl TransactionAssessment {
    pub fn result(&self, indicator: &str) -> Option<&IndicatorResult> {
        self.results.iter().find(|r| r.indicator == indicator)
    }

    pub fn triggered(&self) -> impl Iterator<Item = &IndicatorResult> {
        self.results.iter().filter(|r| r.triggered)
    }
}

struct RegisteredIndicator {
    indicator: Box<dyn Indicator>,
    weight: u32,
}

/// Ordered set of uniquely named indicators with their weights
#[derive(Default)]
pub struct IndicatorRegistry {
    entries: Vec<RegisteredIndicator>,
}

impl fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (e.indicator.name(), e.weight)))
            .finish()
    }
}

impl IndicatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The twenty standard indicators with their default weights
    pub fn standard() -> Self {
        let indicators: Vec<Box<dyn Indicator>> = vec![
            Box::new(RoundAmount),
            Box::new(ThresholdAvoidance),
            Box::new(HighRiskCountry),
            Box::new(HighRiskChannel),
            Box::new(PoliticallyExposedSender),
            Box::new(MalformedDocument),
            Box::new(IncompleteCustomerData),
            Box::new(NationalityDestinationMismatch),
            Box::new(UnusualHour),
            Box::new(Structuring),
            Box::new(Velocity),
            Box::new(FanInBeneficiary),
            Box::new(ReusedReference),
            Box::new(DocumentNameMismatch),
            Box::new(RepeatedCancellations),
            Box::new(ProfileDeviation),
            Box::new(AgentVolumeOutlier),
            Box::new(CityAmountOutlier),
            Box::new(AgentActivitySurge),
            Box::new(DestinationConcentration),
        ];

        Self {
            entries: indicators
                .into_iter()
                .map(|indicator| RegisteredIndicator {
                    weight: indicator.default_weight(),
                    indicator,
                })
                .collect(),
        }
    }

    /// Standard indicators with configured overrides applied
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::standard();
        for (name, settings) in &config.indicators {
            if !registry.contains(name) {
                return Err(ConfigError::UnknownIndicator(name.clone()));
            }
            if let Some(weight) = settings.weight {
                registry.set_weight(name, weight)?;
            }
            if !settings.enabled {
                registry.remove(name);
            }
        }
        Ok(registry)
    }

    /// Add an indicator at the end of the evaluation order
    pub fn register(&mut self, indicator: Box<dyn Indicator>, weight: u32) -> Result<(), ConfigError> {
        if self.contains(indicator.name()) {
            return Err(ConfigError::DuplicateIndicator(indicator.name().to_string()));
        }
        self.entries.push(RegisteredIndicator { indicator, weight });
        Ok(())
    }

    /// Remove an indicator, returning it if it was registered
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Indicator>> {
        let position = self.entries.iter().position(|e| e.indicator.name() == name)?;
        Some(self.entries.remove(position).indicator)
    }

    pub fn set_weight(&mut self, name: &str, weight: u32) -> Result<(), ConfigError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.indicator.name() == name)
            .ok_or_else(|| ConfigError::UnknownIndicator(name.to_string()))?;
        entry.weight = weight;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.indicator.name() == name)
    }

    pub fn weight(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.indicator.name() == name)
            .map(|e| e.weight)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.indicator.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indicators with their weights, in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = (&dyn Indicator, u32)> {
        self.entries
            .iter()
            .map(|e| (e.indicator.as_ref(), e.weight))
    }
}

/// Runs every registered indicator over a dataset
#[derive(Debug)]
pub struct IndicatorEngine {
    registry: IndicatorRegistry,
    thresholds: IndicatorThresholds,
    countries: CountryRiskList,
    document_pattern: Regex,
}

impl IndicatorEngine {
    /// Validate the thresholds and compile the document pattern
    pub fn new(
        registry: IndicatorRegistry,
        thresholds: IndicatorThresholds,
        countries: CountryRiskList,
    ) -> Result<Self, ConfigError> {
        thresholds.validate()?;
        let document_pattern = thresholds.document_regex()?;
        Ok(Self {
            registry,
            thresholds,
            countries,
            document_pattern,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(
            IndicatorRegistry::from_config(config)?,
            config.thresholds.clone(),
            config.countries.clone(),
        )
    }

    pub fn registry(&self) -> &IndicatorRegistry {
        &self.registry
    }

    /// Evaluate all indicators; returns one assessment per transaction in dataset order
    pub fn evaluate(&self, dataset: &TransactionDataset) -> Vec<TransactionAssessment> {
        let index = DatasetIndex::build(dataset);
        let ctx = EvaluationContext {
            dataset,
            index: &index,
            thresholds: &self.thresholds,
            countries: &self.countries,
            document_pattern: &self.document_pattern,
        };

        let mut assessments: Vec<TransactionAssessment> = dataset
            .iter()
            .enumerate()
            .map(|(row, tx)| TransactionAssessment {
                transaction_id: tx.transaction_id.clone(),
                row,
                results: Vec::with_capacity(self.registry.len()),
            })
            .collect();

        for (indicator, weight) in self.registry.iter() {
            let mut outcomes = indicator.evaluate(&ctx);
            if outcomes.len() != dataset.len() {
                warn!(
                    indicator = indicator.name(),
                    expected = dataset.len(),
                    got = outcomes.len(),
                    "indicator returned wrong number of assessments; treating as not applicable"
                );
                outcomes = vec![Assessment::NotApplicable; dataset.len()];
            }

            let triggered = outcomes.iter().filter(|a| a.is_triggered()).count();
            debug!(indicator = indicator.name(), triggered, "indicator evaluated");

            for (assessment, outcome) in assessments.iter_mut().zip(outcomes) {
                assessment
                    .results
                    .push(IndicatorResult::from_assessment(indicator, weight, outcome));
            }
        }

        info!(
            transactions = dataset.len(),
            indicators = self.registry.len(),
            "indicator evaluation complete"
        );
        assessments
    }
}
