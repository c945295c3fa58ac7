//! # AML Risk Engine
//!
//! Anti-money-laundering risk scoring for batches of remittance transactions.
//!
//! ## Features
//!
//! - **Indicator Battery**: Twenty documentation, threshold, geographic and outlier indicators
//! - **Composite Scoring**: Weighted integer scores mapped onto configurable risk tiers
//! - **Dataset Summary**: Tier distribution, top indicators, flagged volume and per-agent roll-ups
//! - **Transaction Network**: Sender to beneficiary graph with circular flow and funnel detection
//! - **Community Detection**: Seeded label propagation or greedy modularity with risk-ranked communities
//! - **Smurfing Patterns**: Shared beneficiaries, structured same-day transfers and frequent small amounts
//! - **CSV Ingestion**: Header-named exports, including legacy remittance column names
//!
//! ## Pipeline
//!
//! ```no_run
//! use aml_risk_engine::{AmlEngine, EngineConfig, TransactionDataset};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = AmlEngine::new(EngineConfig::default())?;
//! let report = engine.analyze(&TransactionDataset::empty())?;
//! println!("{}", report.to_json()?);
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
pub mod cohort_indicators;
pub mod community;
pub mod config;
pub mod dataset;
pub mod geographic_risk;
pub mod indicators;
#[cfg(feature = "csv-ingest")]
pub mod ingest;
pub mod network_analysis;
pub mod row_indicators;
pub mod smurfing;

pub use aggregation::{CompositeRiskRecord, DatasetSummary, RiskAggregator, RiskTier};
pub use community::{Community, CommunityAssignment, CommunityDetector};
pub use config::{EngineConfig, IndicatorThresholds, TierBand, TierScale};
pub use dataset::{Beneficiary, Sender, Transaction, TransactionDataset, TransactionStatus};
pub use geographic_risk::{CountryRisk, CountryRiskLevel, CountryRiskList};
pub use indicators::{
    Assessment, Indicator, IndicatorEngine, IndicatorRegistry, IndicatorResult, TransactionAssessment,
};
pub use network_analysis::{NetworkBuilder, NetworkPatterns, TransactionNetwork};
pub use smurfing::{SmurfingDetector, SmurfingReport};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

/// Configuration errors, raised before any transaction is evaluated
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid tier scale: {0}")]
    InvalidTierScale(String),

    #[error("Unknown indicator: {0}")]
    UnknownIndicator(String),

    #[error("Indicator registered twice: {0}")]
    DuplicateIndicator(String),

    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid threshold {name}: {reason}")]
    InvalidThreshold { name: &'static str, reason: String },

    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Dataset construction and ingestion errors
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Transaction {transaction_id:?} has an empty {field}")]
    EmptyIdentity {
        transaction_id: String,
        field: &'static str,
    },

    #[error("Duplicate transaction id: {0}")]
    DuplicateTransactionId(String),

    #[error("Cannot read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv-ingest")]
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors between pipeline stages
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Stage mismatch: {0}")]
    StageMismatch(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Everything one analysis run produces
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RiskReport {
    pub records: Vec<CompositeRiskRecord>,
    pub summary: DatasetSummary,
    pub network: TransactionNetwork,
    pub patterns: NetworkPatterns,
    pub communities: CommunityAssignment,
    pub smurfing: SmurfingReport,
}

impl RiskReport {
    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Hex SHA-256 over the records, network and communities
    ///
    /// Two runs over the same dataset and configuration produce the same
    /// fingerprint.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&self.records)?);
        hasher.update(serde_json::to_vec(&self.network)?);
        hasher.update(serde_json::to_vec(&self.communities)?);
        Ok(hasher
            .finalize()
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect())
    }

    pub fn flagged(&self) -> impl Iterator<Item = &CompositeRiskRecord> {
        let tier = self.summary.flagged_tier;
        self.records.iter().filter(move |r| r.is_flagged(tier))
    }
}

/// The full analysis pipeline
#[derive(Debug)]
pub struct AmlEngine {
    config: EngineConfig,
    indicators: IndicatorEngine,
    aggregator: RiskAggregator,
    network: NetworkBuilder,
    communities: CommunityDetector,
    smurfing: SmurfingDetector,
}

impl AmlEngine {
    /// Validate the configuration and build every stage
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let indicators = IndicatorEngine::from_config(&config)?;
        let aggregator = RiskAggregator::from_config(&config)?;
        let network = NetworkBuilder::from_config(&config);
        let communities = CommunityDetector::from_config(&config);
        let smurfing = SmurfingDetector::from_config(&config);

        info!(
            indicators = indicators.registry().len(),
            high_risk_countries = ?config.countries.high_risk_countries(),
            "AML engine configured"
        );

        Ok(Self {
            config,
            indicators,
            aggregator,
            network,
            communities,
            smurfing,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn indicators(&self) -> &IndicatorEngine {
        &self.indicators
    }

    /// Run indicators, aggregation, network construction, community and
    /// smurfing detection
    pub fn analyze(&self, dataset: &TransactionDataset) -> Result<RiskReport, AnalysisError> {
        let assessments = self.indicators.evaluate(dataset);
        let (records, summary) = self.aggregator.aggregate(dataset, &assessments)?;
        let network = self.network.build(dataset, &records)?;
        let patterns = network.detect_patterns(self.network.settings());
        let communities = self.communities.detect(&network);
        let smurfing = self.smurfing.detect(dataset);

        info!(
            transactions = summary.transaction_count,
            flagged = summary.flagged_count,
            nodes = network.node_count(),
            communities = communities.len(),
            "analysis complete"
        );

        Ok(RiskReport {
            records,
            summary,
            network,
            patterns,
            communities,
            smurfing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 3, d)
    }

    fn transfer(id: &str, sender: &str, beneficiary: &str, amount: f64, d: u32) -> Transaction {
        let mut tx = Transaction::new(id, sender, beneficiary);
        tx.amount = Some(amount);
        tx.booked_on = day(d);
        tx.origin_country = Some("ES".to_string());
        tx.destination_country = Some("CO".to_string());
        tx
    }

    fn sample_dataset() -> TransactionDataset {
        let mut txs = vec![
            transfer("TX1", "ANA", "LUIS", 9000.0, 1),
            transfer("TX2", "ANA", "LUIS", 9000.0, 2),
            transfer("TX3", "ANA", "LUIS", 9000.0, 3),
            transfer("TX4", "LUIS", "MARTA", 5000.0, 4),
            transfer("TX5", "MARTA", "ANA", 4800.0, 5),
            transfer("TX6", "PEDRO", "JUAN", 120.0, 6),
        ];
        txs[5].destination_country = Some("IR".to_string());
        TransactionDataset::new(txs).unwrap()
    }

    fn only(indicator: &str) -> EngineConfig {
        let mut config = EngineConfig::default();
        for name in IndicatorRegistry::standard().names() {
            if name != indicator {
                config.set_indicator_enabled(name, false);
            }
        }
        config
    }

    #[test]
    fn test_high_risk_destination_scores_its_weight() {
        let mut tx = transfer("TX1", "ANA", "LUIS", 15000.0, 1);
        tx.destination_country = Some("IR".to_string());
        let dataset = TransactionDataset::new(vec![tx]).unwrap();

        let engine = AmlEngine::new(only("high_risk_country")).unwrap();
        let report = engine.analyze(&dataset).unwrap();

        let record = &report.records[0];
        assert_eq!(record.total_score, 35);
        assert_eq!(record.tier, RiskTier::Medium);
        assert_eq!(record.triggered_indicators, vec!["high_risk_country".to_string()]);
    }

    #[test]
    fn test_disabled_indicator_adds_nothing() {
        let mut tx = transfer("TX1", "ANA", "LUIS", 15000.0, 1);
        tx.destination_country = Some("IR".to_string());
        let dataset = TransactionDataset::new(vec![tx]).unwrap();

        let mut config = only("high_risk_country");
        config.set_indicator_enabled("high_risk_country", false);
        let engine = AmlEngine::new(config).unwrap();
        let report = engine.analyze(&dataset).unwrap();

        assert_eq!(report.records[0].total_score, 0);
        assert_eq!(report.records[0].tier, RiskTier::Low);
    }

    #[test]
    fn test_empty_dataset_gives_empty_report() {
        let engine = AmlEngine::new(EngineConfig::default()).unwrap();
        let report = engine.analyze(&TransactionDataset::empty()).unwrap();

        assert!(report.records.is_empty());
        assert_eq!(report.summary.transaction_count, 0);
        assert!(report.network.is_empty());
        assert!(report.communities.is_empty());
        assert!(!report.patterns.has_suspicious_activity());
        assert!(!report.smurfing.has_suspicious_activity());
    }

    #[test]
    fn test_missing_country_is_not_applicable() {
        let mut tx = transfer("TX1", "ANA", "LUIS", 250.0, 1);
        tx.origin_country = None;
        tx.destination_country = None;
        let dataset = TransactionDataset::new(vec![tx]).unwrap();

        let engine = AmlEngine::new(EngineConfig::default()).unwrap();
        let assessments = engine.indicators().evaluate(&dataset);

        let geo = assessments[0].result("high_risk_country").unwrap();
        assert!(!geo.applicable);
        assert!(!geo.triggered);
        assert_eq!(geo.score, 0);
        assert_eq!(assessments[0].results.len(), 20);

        let report = engine.analyze(&dataset).unwrap();
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn test_every_transaction_gets_one_record() {
        let dataset = sample_dataset();
        let engine = AmlEngine::new(EngineConfig::default()).unwrap();
        let report = engine.analyze(&dataset).unwrap();

        assert_eq!(report.records.len(), dataset.len());
        for (record, tx) in report.records.iter().zip(dataset.iter()) {
            assert_eq!(record.transaction_id, tx.transaction_id);
            assert_eq!(record.tier, engine.config().tiers.tier_for(record.total_score));
        }

        let node_total: usize = report.communities.communities.iter().map(|c| c.size()).sum();
        assert_eq!(node_total, report.network.node_count());
    }

    #[test]
    fn test_structuring_and_cycle_are_reported() {
        let dataset = sample_dataset();
        let engine = AmlEngine::new(EngineConfig::default()).unwrap();
        let report = engine.analyze(&dataset).unwrap();

        for id in ["TX1", "TX2", "TX3"] {
            let record = report.records.iter().find(|r| r.transaction_id == id).unwrap();
            assert!(record.triggered_indicators.iter().any(|n| n == "structuring"));
        }
        assert!(!report.patterns.circular_flows.is_empty());
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let dataset = sample_dataset();
        let first = AmlEngine::new(EngineConfig::default())
            .unwrap()
            .analyze(&dataset)
            .unwrap();
        let second = AmlEngine::new(EngineConfig::default())
            .unwrap()
            .analyze(&dataset)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
        assert_eq!(first.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_data() {
        let engine = AmlEngine::new(EngineConfig::default()).unwrap();
        let full = engine.analyze(&sample_dataset()).unwrap();
        let partial = engine
            .analyze(&sample_dataset().filtered(|tx| tx.transaction_id != "TX6"))
            .unwrap();

        assert_ne!(full.fingerprint().unwrap(), partial.fingerprint().unwrap());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.set_indicator_enabled("no_such_indicator", false);
        assert!(matches!(
            AmlEngine::new(config),
            Err(ConfigError::UnknownIndicator(_))
        ));

        let mut config = EngineConfig::default();
        config.network.max_cycle_hops = 1;
        assert!(matches!(
            AmlEngine::new(config),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_huge_amounts_saturate_instead_of_overflowing() {
        let txs: Vec<Transaction> = (1..=4)
            .map(|d| {
                let mut tx = transfer(&format!("TX{}", d), "ANA", "LUIS", 6.0e16, d);
                tx.agent = Some("AG-1".to_string());
                tx.agent_city = Some("Madrid".to_string());
                tx
            })
            .collect();
        let dataset = TransactionDataset::new(txs).unwrap();

        let engine = AmlEngine::new(EngineConfig::default()).unwrap();
        let report = engine.analyze(&dataset).unwrap();

        assert_eq!(report.summary.total_volume_cents, i64::MAX);
        let edge = report.network.edge("ANA", "LUIS").unwrap();
        assert_eq!(edge.volume_cents, i64::MAX);
        assert_eq!(edge.transaction_count, 4);
    }

    #[test]
    fn test_smurfing_section_in_report() {
        let txs: Vec<Transaction> = (1..=4)
            .map(|i| transfer(&format!("TX{}", i), "ANA", &format!("B{}", i), 950.0, 8))
            .collect();
        let dataset = TransactionDataset::new(txs).unwrap();

        let engine = AmlEngine::new(EngineConfig::default()).unwrap();
        let report = engine.analyze(&dataset).unwrap();

        assert_eq!(report.smurfing.structured_transactions.len(), 1);
        assert_eq!(report.smurfing.structured_transactions[0].total_amount, 3800.0);
        assert!(report.smurfing.frequent_small_amounts.is_empty());

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(
            value["smurfing"]["structured_transactions"][0]["sender"],
            "ANA"
        );
    }

    #[test]
    fn test_greedy_modularity_through_engine() {
        let mut config = EngineConfig::default();
        config.community.method = config::CommunityMethod::GreedyModularity;
        let engine = AmlEngine::new(config).unwrap();
        let report = engine.analyze(&sample_dataset()).unwrap();

        assert_eq!(report.communities.assignment["ANA"], report.communities.assignment["LUIS"]);
        assert_ne!(report.communities.assignment["ANA"], report.communities.assignment["PEDRO"]);
        assert_eq!(report.communities.assignment["PEDRO"], report.communities.assignment["JUAN"]);
    }

    #[test]
    fn test_report_json() {
        let engine = AmlEngine::new(EngineConfig::default()).unwrap();
        let report = engine.analyze(&sample_dataset()).unwrap();
        let json = report.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["records"].as_array().unwrap().len(), 6);
        assert!(value["network"]["nodes"].is_array());
        assert!(value["communities"]["communities"].is_array());
    }
}
