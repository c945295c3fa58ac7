//! Typed transaction dataset
//!
//! Transactions are validated once when a [`TransactionDataset`] is built;
//! every later stage works on the normalized, read-only rows.

use crate::DatasetError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Processing status of a transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Failed,
    Cancelled,
    #[default]
    Unknown,
}

impl TransactionStatus {
    /// Parse a free-text status column, accepting English and Spanish labels
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "COMPLETED" | "COMPLETE" | "SUCCESS" | "OK" | "EXITOSA" | "COMPLETADA" => {
                TransactionStatus::Completed
            }
            "FAILED" | "FAIL" | "ERROR" | "FALLIDA" => TransactionStatus::Failed,
            "CANCELLED" | "CANCELED" | "CANCELADA" => TransactionStatus::Cancelled,
            _ => TransactionStatus::Unknown,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
            TransactionStatus::Cancelled => write!(f, "cancelled"),
            TransactionStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Ordering party
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Sender {
    /// Graph key for the sender (document number when available)
    pub id: String,
    pub document: Option<String>,
    pub full_name: Option<String>,
    pub document_country: Option<String>,
    pub birth_country: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub is_pep: Option<bool>,
    pub is_agent: Option<bool>,
}

impl Sender {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Receiving party
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Beneficiary {
    /// Graph key for the beneficiary
    pub id: String,
    pub full_name: Option<String>,
}

impl Beneficiary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: None,
        }
    }
}

/// One transfer record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub transaction_id: String,
    pub sender: Sender,
    pub beneficiary: Beneficiary,
    /// `None` when the source value was missing, negative or not a number
    pub amount: Option<f64>,
    pub currency: String,
    pub booked_on: Option<NaiveDate>,
    pub booked_at: Option<NaiveTime>,
    pub origin_country: Option<String>,
    pub destination_country: Option<String>,
    pub channel: Option<String>,
    pub agent: Option<String>,
    pub agent_city: Option<String>,
    pub status: TransactionStatus,
    pub reference: Option<String>,
}

impl Transaction {
    /// Create a transaction with only its identities set
    pub fn new(
        transaction_id: impl Into<String>,
        sender_id: impl Into<String>,
        beneficiary_id: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            sender: Sender::new(sender_id),
            beneficiary: Beneficiary::new(beneficiary_id),
            amount: None,
            currency: "EUR".to_string(),
            booked_on: None,
            booked_at: None,
            origin_country: None,
            destination_country: None,
            channel: None,
            agent: None,
            agent_city: None,
            status: TransactionStatus::Unknown,
            reference: None,
        }
    }

    /// Booking instant; a missing time of day counts as midnight
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.booked_on
            .map(|date| date.and_time(self.booked_at.unwrap_or_default()))
    }

    /// Calendar month key `(year, month)` of the booking date
    pub fn month(&self) -> Option<(i32, u32)> {
        self.booked_on.map(|d| (d.year(), d.month()))
    }

    /// Amount in integer cents
    pub fn amount_cents(&self) -> Option<i64> {
        self.amount.map(to_cents)
    }

    pub fn is_self_transfer(&self) -> bool {
        self.sender.id == self.beneficiary.id
    }
}

/// Convert a monetary amount to integer cents
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Sum cents, saturating at `i64::MAX`.
///
/// Amounts are never negative, so a saturated total is the same whatever the
/// order of the terms.
pub fn sum_cents<I>(values: I) -> i64
where
    I: IntoIterator<Item = i64>,
{
    values.into_iter().fold(0, i64::saturating_add)
}

/// Convert integer cents back to a monetary amount
pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Canonical form for country and channel labels
pub fn normalize_label(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Canonical form for personal names: lowercase, single spaces
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn clean_optional(value: &mut Option<String>) {
    if let Some(inner) = value.take() {
        let trimmed = inner.trim();
        if !trimmed.is_empty() {
            *value = Some(trimmed.to_string());
        }
    }
}

/// Validated, immutable set of transactions for one analysis run
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionDataset {
    transactions: Vec<Transaction>,
}

impl TransactionDataset {
    /// Validate and normalize the given rows
    pub fn new(transactions: Vec<Transaction>) -> Result<Self, DatasetError> {
        let mut seen = HashSet::with_capacity(transactions.len());
        let mut normalized = Vec::with_capacity(transactions.len());

        for mut tx in transactions {
            tx.transaction_id = tx.transaction_id.trim().to_string();
            tx.sender.id = tx.sender.id.trim().to_string();
            tx.beneficiary.id = tx.beneficiary.id.trim().to_string();

            if tx.transaction_id.is_empty() {
                return Err(DatasetError::EmptyIdentity {
                    transaction_id: String::new(),
                    field: "transaction_id",
                });
            }
            if tx.sender.id.is_empty() {
                return Err(DatasetError::EmptyIdentity {
                    transaction_id: tx.transaction_id,
                    field: "sender",
                });
            }
            if tx.beneficiary.id.is_empty() {
                return Err(DatasetError::EmptyIdentity {
                    transaction_id: tx.transaction_id,
                    field: "beneficiary",
                });
            }
            if !seen.insert(tx.transaction_id.clone()) {
                return Err(DatasetError::DuplicateTransactionId(tx.transaction_id));
            }

            if let Some(amount) = tx.amount {
                if !amount.is_finite() || amount < 0.0 {
                    warn!(
                        transaction_id = %tx.transaction_id,
                        amount,
                        "discarding invalid amount"
                    );
                    tx.amount = None;
                }
            }

            for field in [
                &mut tx.sender.document,
                &mut tx.sender.full_name,
                &mut tx.sender.document_country,
                &mut tx.sender.birth_country,
                &mut tx.beneficiary.full_name,
                &mut tx.origin_country,
                &mut tx.destination_country,
                &mut tx.channel,
                &mut tx.agent,
                &mut tx.agent_city,
                &mut tx.reference,
            ] {
                clean_optional(field);
            }

            normalized.push(tx);
        }

        debug!(rows = normalized.len(), "transaction dataset validated");
        Ok(Self {
            transactions: normalized,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn get(&self, row: usize) -> Option<&Transaction> {
        self.transactions.get(row)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Keep only the rows matching `predicate`, e.g. an investigator's filter selection
    pub fn filtered<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Transaction) -> bool,
    {
        Self {
            transactions: self
                .transactions
                .iter()
                .filter(|tx| predicate(tx))
                .cloned()
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }
}

/// Row groupings shared by the cohort indicators.
///
/// Every group lists row indices ordered by booking timestamp, then by row.
#[derive(Debug, Default)]
pub struct DatasetIndex<'a> {
    by_sender: BTreeMap<&'a str, Vec<usize>>,
    by_beneficiary: BTreeMap<&'a str, Vec<usize>>,
    by_document: BTreeMap<&'a str, Vec<usize>>,
    by_agent: BTreeMap<&'a str, Vec<usize>>,
    by_city: BTreeMap<&'a str, Vec<usize>>,
    by_destination: BTreeMap<String, Vec<usize>>,
}

impl<'a> DatasetIndex<'a> {
    pub fn build(dataset: &'a TransactionDataset) -> Self {
        let mut index = DatasetIndex::default();

        for (row, tx) in dataset.transactions().iter().enumerate() {
            index.by_sender.entry(tx.sender.id.as_str()).or_default().push(row);
            index
                .by_beneficiary
                .entry(tx.beneficiary.id.as_str())
                .or_default()
                .push(row);
            if let Some(document) = tx.sender.document.as_deref() {
                index.by_document.entry(document).or_default().push(row);
            }
            if let Some(agent) = tx.agent.as_deref() {
                index.by_agent.entry(agent).or_default().push(row);
            }
            if let Some(city) = tx.agent_city.as_deref() {
                index.by_city.entry(city).or_default().push(row);
            }
            if let Some(destination) = tx.destination_country.as_deref() {
                index
                    .by_destination
                    .entry(normalize_label(destination))
                    .or_default()
                    .push(row);
            }
        }

        let txs = dataset.transactions();
        let sort = |rows: &mut Vec<usize>| rows.sort_by_key(|&row| (txs[row].timestamp(), row));
        index.by_sender.values_mut().for_each(sort);
        index.by_beneficiary.values_mut().for_each(sort);
        index.by_document.values_mut().for_each(sort);
        index.by_agent.values_mut().for_each(sort);
        index.by_city.values_mut().for_each(sort);
        index.by_destination.values_mut().for_each(sort);

        index
    }

    pub fn by_sender(&self) -> &BTreeMap<&'a str, Vec<usize>> {
        &self.by_sender
    }

    pub fn by_beneficiary(&self) -> &BTreeMap<&'a str, Vec<usize>> {
        &self.by_beneficiary
    }

    pub fn by_document(&self) -> &BTreeMap<&'a str, Vec<usize>> {
        &self.by_document
    }

    pub fn by_agent(&self) -> &BTreeMap<&'a str, Vec<usize>> {
        &self.by_agent
    }

    pub fn by_city(&self) -> &BTreeMap<&'a str, Vec<usize>> {
        &self.by_city
    }

    /// Keyed by normalized destination label
    pub fn by_destination(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.by_destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_transaction(id: &str, sender: &str, beneficiary: &str) -> Transaction {
        let mut tx = Transaction::new(id, sender, beneficiary);
        tx.amount = Some(250.0);
        tx.booked_on = NaiveDate::from_ymd_opt(2024, 3, 1);
        tx
    }

    #[test]
    fn test_rejects_empty_sender() {
        let tx = create_test_transaction("TXN-001", "  ", "B");
        let err = TransactionDataset::new(vec![tx]).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::EmptyIdentity { field: "sender", .. }
        ));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let a = create_test_transaction("TXN-001", "A", "B");
        let b = create_test_transaction("TXN-001", "C", "D");
        let err = TransactionDataset::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateTransactionId(id) if id == "TXN-001"));
    }

    #[test]
    fn test_invalid_amounts_become_missing() {
        let mut negative = create_test_transaction("TXN-001", "A", "B");
        negative.amount = Some(-10.0);
        let mut nan = create_test_transaction("TXN-002", "A", "B");
        nan.amount = Some(f64::NAN);

        let dataset = TransactionDataset::new(vec![negative, nan]).unwrap();
        assert!(dataset.iter().all(|tx| tx.amount.is_none()));
    }

    #[test]
    fn test_blank_optional_fields_are_cleared() {
        let mut tx = create_test_transaction("TXN-001", "A", "B");
        tx.destination_country = Some("   ".to_string());
        tx.channel = Some(" cash ".to_string());

        let dataset = TransactionDataset::new(vec![tx]).unwrap();
        let tx = &dataset.transactions()[0];
        assert_eq!(tx.destination_country, None);
        assert_eq!(tx.channel.as_deref(), Some("cash"));
    }

    #[test]
    fn test_index_orders_rows_by_time() {
        let mut late = create_test_transaction("TXN-001", "A", "B");
        late.booked_on = NaiveDate::from_ymd_opt(2024, 3, 9);
        let early = create_test_transaction("TXN-002", "A", "C");

        let dataset = TransactionDataset::new(vec![late, early]).unwrap();
        let index = DatasetIndex::build(&dataset);
        assert_eq!(index.by_sender()["A"], vec![1, 0]);
        assert_eq!(index.by_beneficiary().len(), 2);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(TransactionStatus::parse("cancelada"), TransactionStatus::Cancelled);
        assert_eq!(TransactionStatus::parse(" Completed "), TransactionStatus::Completed);
        assert_eq!(TransactionStatus::parse("???"), TransactionStatus::Unknown);
    }

    #[test]
    fn test_cents_are_exact() {
        assert_eq!(to_cents(9000.0), 900_000);
        assert_eq!(to_cents(0.1 + 0.2), 30);
        assert_eq!(from_cents(1_234_56), 1234.56);
    }

    #[test]
    fn test_cent_totals_saturate() {
        let huge = to_cents(6.0e16);
        assert_eq!(huge, 6_000_000_000_000_000_000);
        assert_eq!(sum_cents([huge, huge]), i64::MAX);
        assert_eq!(sum_cents([huge, huge, 5]), sum_cents([5, huge, huge]));
        assert_eq!(sum_cents([100, 250]), 350);
        assert_eq!(sum_cents(Vec::<i64>::new()), 0);
    }

    #[test]
    fn test_filtered_keeps_matching_rows() {
        let a = create_test_transaction("TXN-001", "A", "B");
        let mut b = create_test_transaction("TXN-002", "C", "D");
        b.amount = Some(5000.0);

        let dataset = TransactionDataset::new(vec![a, b]).unwrap();
        let large = dataset.filtered(|tx| tx.amount.unwrap_or(0.0) > 1000.0);
        assert_eq!(large.len(), 1);
        assert_eq!(large.transactions()[0].transaction_id, "TXN-002");
    }
}
