//! Risk aggregation
//!
//! Folds per-indicator results into one composite record per transaction and
//! a dataset-level summary. Scores are integer points and money is summed in
//! cents, so results do not depend on evaluation order.

use crate::config::{AggregationSettings, EngineConfig, TierScale};
use crate::dataset::{from_cents, TransactionDataset};
use crate::indicators::{IndicatorCategory, TransactionAssessment};
use crate::AnalysisError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Discrete risk bucket, ordered from least to most severe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Low => write!(f, "LOW"),
            RiskTier::Medium => write!(f, "MEDIUM"),
            RiskTier::High => write!(f, "HIGH"),
            RiskTier::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Aggregated score and tier for one transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompositeRiskRecord {
    pub transaction_id: String,
    pub total_score: u32,
    pub tier: RiskTier,
    /// Names of triggered indicators, in registry order
    pub triggered_indicators: Vec<String>,
}

impl CompositeRiskRecord {
    pub fn is_flagged(&self, flagged_tier: RiskTier) -> bool {
        self.tier >= flagged_tier
    }
}

/// How often an indicator fired across the dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndicatorFrequency {
    pub indicator: String,
    pub triggered: usize,
}

/// Per-agent roll-up of composite records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentBreakdown {
    pub agent: String,
    pub transactions: usize,
    pub flagged: usize,
    pub max_tier: RiskTier,
    pub volume_cents: i64,
}

/// Dataset-level summary
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatasetSummary {
    pub transaction_count: usize,
    /// Only tiers with at least one transaction
    pub tier_counts: BTreeMap<RiskTier, usize>,
    /// Most frequently triggered indicators, ties broken by name
    pub top_indicators: Vec<IndicatorFrequency>,
    pub category_counts: BTreeMap<IndicatorCategory, usize>,
    pub not_applicable_counts: BTreeMap<String, usize>,
    pub flagged_tier: RiskTier,
    pub flagged_count: usize,
    pub flagged_volume_cents: i64,
    pub flagged_volume: f64,
    pub total_volume_cents: i64,
    pub agents: Vec<AgentBreakdown>,
}

impl DatasetSummary {
    pub fn count_for(&self, tier: RiskTier) -> usize {
        self.tier_counts.get(&tier).copied().unwrap_or(0)
    }
}

/// Combines indicator results into composite records
#[derive(Debug, Clone)]
pub struct RiskAggregator {
    tiers: TierScale,
    settings: AggregationSettings,
}

impl RiskAggregator {
    pub fn new(tiers: TierScale, settings: AggregationSettings) -> Result<Self, crate::ConfigError> {
        tiers.validate()?;
        Ok(Self { tiers, settings })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, crate::ConfigError> {
        Self::new(config.tiers.clone(), config.aggregation.clone())
    }

    pub fn tiers(&self) -> &TierScale {
        &self.tiers
    }

    /// Score a single transaction's results
    pub fn composite(&self, assessment: &TransactionAssessment) -> CompositeRiskRecord {
        let total_score = assessment
            .triggered()
            .fold(0u32, |acc, r| acc.saturating_add(r.score));
        CompositeRiskRecord {
            transaction_id: assessment.transaction_id.clone(),
            total_score,
            tier: self.tiers.tier_for(total_score),
            triggered_indicators: assessment.triggered().map(|r| r.indicator.clone()).collect(),
        }
    }

    /// Build composite records (in dataset order) and the summary
    pub fn aggregate(
        &self,
        dataset: &TransactionDataset,
        assessments: &[TransactionAssessment],
    ) -> Result<(Vec<CompositeRiskRecord>, DatasetSummary), AnalysisError> {
        if assessments.len() != dataset.len() {
            return Err(AnalysisError::StageMismatch(format!(
                "{} assessments for {} transactions",
                assessments.len(),
                dataset.len()
            )));
        }

        let mut records = Vec::with_capacity(assessments.len());
        let mut summary = DatasetSummary {
            transaction_count: dataset.len(),
            flagged_tier: self.settings.flagged_tier,
            ..DatasetSummary::default()
        };
        let mut frequencies: BTreeMap<&str, usize> = BTreeMap::new();
        let mut agents: BTreeMap<&str, AgentBreakdown> = BTreeMap::new();

        for (tx, assessment) in dataset.iter().zip(assessments) {
            if tx.transaction_id != assessment.transaction_id {
                return Err(AnalysisError::StageMismatch(format!(
                    "assessment for {} found at the position of {}",
                    assessment.transaction_id, tx.transaction_id
                )));
            }

            let record = self.composite(assessment);
            let cents = tx.amount_cents().unwrap_or(0);
            let flagged = record.is_flagged(self.settings.flagged_tier);

            *summary.tier_counts.entry(record.tier).or_insert(0) += 1;
            summary.total_volume_cents = summary.total_volume_cents.saturating_add(cents);
            if flagged {
                summary.flagged_count += 1;
                summary.flagged_volume_cents = summary.flagged_volume_cents.saturating_add(cents);
            }

            for result in &assessment.results {
                if result.triggered {
                    *frequencies.entry(result.indicator.as_str()).or_insert(0) += 1;
                    *summary.category_counts.entry(result.category).or_insert(0) += 1;
                }
                if !result.applicable {
                    *summary
                        .not_applicable_counts
                        .entry(result.indicator.clone())
                        .or_insert(0) += 1;
                }
            }

            if let Some(agent) = tx.agent.as_deref() {
                let breakdown = agents.entry(agent).or_insert_with(|| AgentBreakdown {
                    agent: agent.to_string(),
                    transactions: 0,
                    flagged: 0,
                    max_tier: RiskTier::Low,
                    volume_cents: 0,
                });
                breakdown.transactions += 1;
                breakdown.volume_cents = breakdown.volume_cents.saturating_add(cents);
                breakdown.max_tier = breakdown.max_tier.max(record.tier);
                if flagged {
                    breakdown.flagged += 1;
                }
            }

            records.push(record);
        }

        let mut top: Vec<IndicatorFrequency> = frequencies
            .into_iter()
            .map(|(indicator, triggered)| IndicatorFrequency {
                indicator: indicator.to_string(),
                triggered,
            })
            .collect();
        top.sort_by(|a, b| b.triggered.cmp(&a.triggered).then_with(|| a.indicator.cmp(&b.indicator)));
        top.truncate(self.settings.top_indicator_count);
        summary.top_indicators = top;
        summary.flagged_volume = from_cents(summary.flagged_volume_cents);
        summary.agents = agents.into_values().collect();

        info!(
            transactions = summary.transaction_count,
            flagged = summary.flagged_count,
            flagged_volume = summary.flagged_volume,
            "risk aggregation complete"
        );
        Ok((records, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierBand;
    use crate::dataset::Transaction;
    use crate::indicators::{IndicatorResult, IndicatorScope};

    fn result(indicator: &str, category: IndicatorCategory, weight: u32, triggered: bool) -> IndicatorResult {
        IndicatorResult {
            indicator: indicator.to_string(),
            category,
            scope: IndicatorScope::Row,
            triggered,
            applicable: true,
            score: if triggered { weight } else { 0 },
            note: None,
        }
    }

    fn create_fixture() -> (TransactionDataset, Vec<TransactionAssessment>) {
        let mut a = Transaction::new("TXN-001", "S1", "B1");
        a.amount = Some(9000.0);
        a.agent = Some("AG-1".to_string());
        let mut b = Transaction::new("TXN-002", "S2", "B2");
        b.amount = Some(120.5);
        b.agent = Some("AG-1".to_string());
        let c = Transaction::new("TXN-003", "S3", "B3");
        let dataset = TransactionDataset::new(vec![a, b, c]).unwrap();

        let assessments = vec![
            TransactionAssessment {
                transaction_id: "TXN-001".to_string(),
                row: 0,
                results: vec![
                    result("structuring", IndicatorCategory::Thresholds, 35, true),
                    result("high_risk_country", IndicatorCategory::Geographic, 35, true),
                    result("velocity", IndicatorCategory::Outliers, 25, false),
                ],
            },
            TransactionAssessment {
                transaction_id: "TXN-002".to_string(),
                row: 1,
                results: vec![
                    result("structuring", IndicatorCategory::Thresholds, 35, false),
                    result("high_risk_country", IndicatorCategory::Geographic, 35, true),
                    result("velocity", IndicatorCategory::Outliers, 25, false),
                ],
            },
            TransactionAssessment {
                transaction_id: "TXN-003".to_string(),
                row: 2,
                results: vec![
                    result("structuring", IndicatorCategory::Thresholds, 35, false),
                    IndicatorResult {
                        applicable: false,
                        ..result("high_risk_country", IndicatorCategory::Geographic, 35, false)
                    },
                    result("velocity", IndicatorCategory::Outliers, 25, false),
                ],
            },
        ];
        (dataset, assessments)
    }

    fn aggregator() -> RiskAggregator {
        RiskAggregator::from_config(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_total_equals_sum_of_triggered_weights() {
        let (dataset, assessments) = create_fixture();
        let (records, _) = aggregator().aggregate(&dataset, &assessments).unwrap();

        for (record, assessment) in records.iter().zip(&assessments) {
            let expected: u32 = assessment.triggered().map(|r| r.score).sum();
            assert_eq!(record.total_score, expected);
        }
        assert_eq!(records[0].total_score, 70);
        assert_eq!(records[0].tier, RiskTier::High);
        assert_eq!(
            records[0].triggered_indicators,
            vec!["structuring".to_string(), "high_risk_country".to_string()]
        );
    }

    #[test]
    fn test_summary_counts() {
        let (dataset, assessments) = create_fixture();
        let (_, summary) = aggregator().aggregate(&dataset, &assessments).unwrap();

        assert_eq!(summary.transaction_count, 3);
        assert_eq!(summary.count_for(RiskTier::High), 1);
        assert_eq!(summary.count_for(RiskTier::Medium), 1);
        assert_eq!(summary.count_for(RiskTier::Low), 1);
        assert!(!summary.tier_counts.contains_key(&RiskTier::Critical));
        assert_eq!(summary.flagged_count, 1);
        assert_eq!(summary.flagged_volume_cents, 900_000);
        assert_eq!(summary.total_volume_cents, 912_050);
        assert_eq!(summary.not_applicable_counts["high_risk_country"], 1);
        assert_eq!(summary.category_counts[&IndicatorCategory::Geographic], 2);
    }

    #[test]
    fn test_top_indicators_break_ties_by_name() {
        let (dataset, assessments) = create_fixture();
        let (_, summary) = aggregator().aggregate(&dataset, &assessments).unwrap();

        let top: Vec<(&str, usize)> = summary
            .top_indicators
            .iter()
            .map(|f| (f.indicator.as_str(), f.triggered))
            .collect();
        assert_eq!(top, vec![("high_risk_country", 2), ("structuring", 1)]);
    }

    #[test]
    fn test_agent_breakdown() {
        let (dataset, assessments) = create_fixture();
        let (_, summary) = aggregator().aggregate(&dataset, &assessments).unwrap();

        assert_eq!(summary.agents.len(), 1);
        let agent = &summary.agents[0];
        assert_eq!(agent.agent, "AG-1");
        assert_eq!(agent.transactions, 2);
        assert_eq!(agent.flagged, 1);
        assert_eq!(agent.max_tier, RiskTier::High);
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let (dataset, assessments) = create_fixture();
        let (records, summary) = aggregator().aggregate(&dataset, &assessments).unwrap();

        let mut reversed_txs: Vec<Transaction> = dataset.transactions().to_vec();
        reversed_txs.reverse();
        let reversed = TransactionDataset::new(reversed_txs).unwrap();
        let mut reversed_assessments = assessments.clone();
        reversed_assessments.reverse();

        let (mut rev_records, rev_summary) =
            aggregator().aggregate(&reversed, &reversed_assessments).unwrap();
        rev_records.reverse();
        assert_eq!(records, rev_records);
        assert_eq!(summary.tier_counts, rev_summary.tier_counts);
        assert_eq!(summary.flagged_volume_cents, rev_summary.flagged_volume_cents);
        assert_eq!(summary.top_indicators, rev_summary.top_indicators);
    }

    #[test]
    fn test_mismatched_stages_are_reported() {
        let (dataset, mut assessments) = create_fixture();
        assessments.pop();
        assert!(matches!(
            aggregator().aggregate(&dataset, &assessments),
            Err(AnalysisError::StageMismatch(_))
        ));

        let (dataset, mut assessments) = create_fixture();
        assessments.swap(0, 1);
        assert!(matches!(
            aggregator().aggregate(&dataset, &assessments),
            Err(AnalysisError::StageMismatch(_))
        ));
    }

    #[test]
    fn test_empty_dataset_gives_empty_summary() {
        let (records, summary) = aggregator()
            .aggregate(&TransactionDataset::empty(), &[])
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(summary.transaction_count, 0);
        assert!(summary.tier_counts.is_empty());
        assert!(summary.top_indicators.is_empty());
        assert_eq!(summary.flagged_volume_cents, 0);
    }

    #[test]
    fn test_custom_tier_scale() {
        let tiers = TierScale::new(vec![
            TierBand::new(RiskTier::Low, 0, Some(9)),
            TierBand::new(RiskTier::Critical, 10, None),
        ])
        .unwrap();
        let aggregator = RiskAggregator::new(tiers, AggregationSettings::default()).unwrap();
        let (dataset, assessments) = create_fixture();
        let (records, _) = aggregator.aggregate(&dataset, &assessments).unwrap();
        assert_eq!(records[1].tier, RiskTier::Critical);
        assert_eq!(records[2].tier, RiskTier::Low);
    }
}
