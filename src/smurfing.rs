//! Smurfing patterns
//!
//! Dataset-level findings for money split into many small transfers: one
//! beneficiary fed by several senders, a sender's small same-day transfers
//! that add up to a large sum, and senders with a long run of small amounts.
//! Unlike the indicators these describe groups of transactions, not rows.

use crate::config::{EngineConfig, SmurfingSettings};
use crate::dataset::{
    from_cents, normalize_name, sum_cents, to_cents, DatasetIndex, Transaction, TransactionDataset,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Beneficiary receiving from several distinct senders
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SharedBeneficiaryResult {
    pub beneficiary: String,
    pub sender_count: usize,
    pub transaction_count: usize,
    pub total_amount: f64,
    pub transactions: Vec<String>,
}

/// Small transfers by one sender on one day adding up to a large sum
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StructuredDayResult {
    pub sender: String,
    pub date: NaiveDate,
    pub transaction_count: usize,
    pub total_amount: f64,
    pub average_amount: f64,
    pub transactions: Vec<String>,
}

/// Sender with many small transfers
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FrequentSmallResult {
    pub sender: String,
    pub small_transaction_count: usize,
    pub total_amount: f64,
    pub average_amount: f64,
    /// Days between the first and last dated small transfer
    pub date_range_days: Option<i64>,
    pub transactions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SmurfingReport {
    pub multiple_senders_same_beneficiary: Vec<SharedBeneficiaryResult>,
    pub structured_transactions: Vec<StructuredDayResult>,
    pub frequent_small_amounts: Vec<FrequentSmallResult>,
}

impl SmurfingReport {
    pub fn has_suspicious_activity(&self) -> bool {
        !self.multiple_senders_same_beneficiary.is_empty()
            || !self.structured_transactions.is_empty()
            || !self.frequent_small_amounts.is_empty()
    }

    pub fn pattern_count(&self) -> usize {
        self.multiple_senders_same_beneficiary.len()
            + self.structured_transactions.len()
            + self.frequent_small_amounts.len()
    }
}

/// Finds smurfing patterns in a dataset
#[derive(Debug, Clone)]
pub struct SmurfingDetector {
    settings: SmurfingSettings,
}

impl SmurfingDetector {
    pub fn new(settings: SmurfingSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.smurfing.clone())
    }

    pub fn detect(&self, dataset: &TransactionDataset) -> SmurfingReport {
        let index = DatasetIndex::build(dataset);
        let report = SmurfingReport {
            multiple_senders_same_beneficiary: self.shared_beneficiaries(dataset),
            structured_transactions: self.structured_days(dataset, &index),
            frequent_small_amounts: self.frequent_small(dataset, &index),
        };
        info!(
            shared_beneficiaries = report.multiple_senders_same_beneficiary.len(),
            structured_days = report.structured_transactions.len(),
            frequent_small = report.frequent_small_amounts.len(),
            "smurfing detection complete"
        );
        report
    }

    fn listed(&self, txs: &[&Transaction]) -> Vec<String> {
        txs.iter()
            .take(self.settings.max_listed_transactions)
            .map(|tx| tx.transaction_id.clone())
            .collect()
    }

    /// Beneficiaries are matched by normalized name, falling back to their id
    fn shared_beneficiaries(&self, dataset: &TransactionDataset) -> Vec<SharedBeneficiaryResult> {
        let mut groups: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
        for tx in dataset.iter() {
            let key = tx
                .beneficiary
                .full_name
                .as_deref()
                .map(normalize_name)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| tx.beneficiary.id.clone());
            groups.entry(key).or_default().push(tx);
        }

        groups
            .into_iter()
            .filter_map(|(beneficiary, txs)| {
                let senders: BTreeSet<&str> = txs.iter().map(|tx| tx.sender.id.as_str()).collect();
                if senders.len() < self.settings.shared_beneficiary_min_senders {
                    return None;
                }
                let total = sum_cents(txs.iter().filter_map(|tx| tx.amount_cents()));
                Some(SharedBeneficiaryResult {
                    beneficiary,
                    sender_count: senders.len(),
                    transaction_count: txs.len(),
                    total_amount: from_cents(total),
                    transactions: self.listed(&txs),
                })
            })
            .collect()
    }

    fn structured_days(
        &self,
        dataset: &TransactionDataset,
        index: &DatasetIndex<'_>,
    ) -> Vec<StructuredDayResult> {
        let small = to_cents(self.settings.small_amount);
        let min_total = to_cents(self.settings.same_day_min_total);
        let txs = dataset.transactions();
        let mut results = Vec::new();

        for (sender, rows) in index.by_sender() {
            let mut days: BTreeMap<NaiveDate, Vec<(&Transaction, i64)>> = BTreeMap::new();
            for &row in rows {
                let tx = &txs[row];
                if let (Some(date), Some(cents)) = (tx.booked_on, tx.amount_cents()) {
                    days.entry(date).or_default().push((tx, cents));
                }
            }

            for (date, day) in days {
                if day.len() < self.settings.same_day_min_count {
                    continue;
                }
                let total = sum_cents(day.iter().map(|&(_, cents)| cents));
                let all_small = day.iter().all(|&(_, cents)| cents < small);
                if !all_small || total <= min_total {
                    continue;
                }
                let day_txs: Vec<&Transaction> = day.iter().map(|&(tx, _)| tx).collect();
                results.push(StructuredDayResult {
                    sender: sender.to_string(),
                    date,
                    transaction_count: day.len(),
                    total_amount: from_cents(total),
                    average_amount: from_cents(total) / day.len() as f64,
                    transactions: self.listed(&day_txs),
                });
            }
        }
        results
    }

    fn frequent_small(
        &self,
        dataset: &TransactionDataset,
        index: &DatasetIndex<'_>,
    ) -> Vec<FrequentSmallResult> {
        let small = to_cents(self.settings.small_amount);
        let txs = dataset.transactions();
        let mut results = Vec::new();

        for (sender, rows) in index.by_sender() {
            let small_txs: Vec<(&Transaction, i64)> = rows
                .iter()
                .map(|&row| &txs[row])
                .filter_map(|tx| tx.amount_cents().map(|cents| (tx, cents)))
                .filter(|&(_, cents)| cents < small)
                .collect();
            if small_txs.len() < self.settings.frequent_small_min_count {
                continue;
            }

            let total = sum_cents(small_txs.iter().map(|&(_, cents)| cents));
            let dates: Vec<NaiveDate> = small_txs.iter().filter_map(|(tx, _)| tx.booked_on).collect();
            let date_range_days = match (dates.iter().min(), dates.iter().max()) {
                (Some(first), Some(last)) => Some((*last - *first).num_days()),
                _ => None,
            };
            let listed: Vec<&Transaction> = small_txs.iter().map(|&(tx, _)| tx).collect();
            results.push(FrequentSmallResult {
                sender: sender.to_string(),
                small_transaction_count: small_txs.len(),
                total_amount: from_cents(total),
                average_amount: from_cents(total) / small_txs.len() as f64,
                date_range_days,
                transactions: self.listed(&listed),
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_transfer(id: &str, sender: &str, beneficiary: &str, amount: f64, day: u32) -> Transaction {
        let mut tx = Transaction::new(id, sender, beneficiary);
        tx.amount = Some(amount);
        tx.booked_on = NaiveDate::from_ymd_opt(2024, 3, day);
        tx
    }

    fn detect(txs: Vec<Transaction>) -> SmurfingReport {
        let dataset = TransactionDataset::new(txs).unwrap();
        SmurfingDetector::new(SmurfingSettings::default()).detect(&dataset)
    }

    #[test]
    fn test_structured_same_day_transfers() {
        let report = detect(vec![
            create_transfer("T1", "ANA", "B1", 990.0, 4),
            create_transfer("T2", "ANA", "B2", 995.0, 4),
            create_transfer("T3", "ANA", "B3", 999.0, 4),
            create_transfer("T4", "ANA", "B4", 980.0, 4),
            create_transfer("T5", "ANA", "B1", 990.0, 5),
        ]);

        assert_eq!(report.structured_transactions.len(), 1);
        let day = &report.structured_transactions[0];
        assert_eq!(day.sender, "ANA");
        assert_eq!(day.date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(day.transaction_count, 4);
        assert_eq!(day.total_amount, 3964.0);
        assert_eq!(day.average_amount, 991.0);
        assert_eq!(day.transactions, vec!["T1", "T2", "T3", "T4"]);
    }

    #[test]
    fn test_same_day_total_must_exceed_minimum() {
        // Three transfers of exactly 1000 total 3000: not small and not above the total
        let report = detect(vec![
            create_transfer("T1", "ANA", "B", 1000.0, 4),
            create_transfer("T2", "ANA", "B", 1000.0, 4),
            create_transfer("T3", "ANA", "B", 1000.0, 4),
            create_transfer("T4", "LUIS", "B", 999.0, 4),
            create_transfer("T5", "LUIS", "B", 999.0, 4),
            create_transfer("T6", "LUIS", "B", 1002.0, 4),
        ]);
        assert!(report.structured_transactions.is_empty());
    }

    #[test]
    fn test_frequent_small_amounts() {
        let mut txs: Vec<Transaction> = (1..=12)
            .map(|d| create_transfer(&format!("S{:02}", d), "PEDRO", "JUAN", 150.0, d))
            .collect();
        txs.push(create_transfer("BIG", "PEDRO", "JUAN", 5000.0, 20));
        txs.extend((1..=4).map(|d| create_transfer(&format!("Q{}", d), "MARTA", "JUAN", 100.0, d)));

        let report = detect(txs);
        assert_eq!(report.frequent_small_amounts.len(), 1);
        let sender = &report.frequent_small_amounts[0];
        assert_eq!(sender.sender, "PEDRO");
        assert_eq!(sender.small_transaction_count, 12);
        assert_eq!(sender.total_amount, 1800.0);
        assert_eq!(sender.average_amount, 150.0);
        assert_eq!(sender.date_range_days, Some(11));
        assert_eq!(sender.transactions.len(), 10);
        assert!(!sender.transactions.contains(&"BIG".to_string()));
    }

    #[test]
    fn test_multiple_senders_same_beneficiary() {
        let mut txs = vec![
            create_transfer("T1", "S1", "B-1", 300.0, 1),
            create_transfer("T2", "S2", "B-2", 300.0, 2),
            create_transfer("T3", "S3", "B-3", 300.0, 3),
            create_transfer("T4", "S1", "OTHER", 300.0, 3),
        ];
        txs[0].beneficiary.full_name = Some("Luis Gomez".to_string());
        txs[1].beneficiary.full_name = Some("LUIS  GOMEZ".to_string());
        txs[2].beneficiary.full_name = Some("luis gomez".to_string());

        let report = detect(txs);
        assert_eq!(report.multiple_senders_same_beneficiary.len(), 1);
        let shared = &report.multiple_senders_same_beneficiary[0];
        assert_eq!(shared.beneficiary, "luis gomez");
        assert_eq!(shared.sender_count, 3);
        assert_eq!(shared.total_amount, 900.0);
        assert!(report.has_suspicious_activity());
        assert_eq!(report.pattern_count(), 1);
    }

    #[test]
    fn test_empty_dataset_has_no_patterns() {
        let report = detect(Vec::new());
        assert!(!report.has_suspicious_activity());
        assert_eq!(report.pattern_count(), 0);
    }
}
