//! CSV ingestion
//!
//! Reads a header-named CSV export into a validated [`TransactionDataset`].
//! English snake_case headers are expected; the column names of the legacy
//! remittance exports (`IMPORTE`, `NUM_DOC_ORDENANTE`, ...) are accepted as
//! aliases. Malformed optional values are logged and treated as missing.

use crate::dataset::{Beneficiary, Sender, Transaction, TransactionDataset, TransactionStatus};
use crate::DatasetError;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvRow {
    #[serde(alias = "NUMERO_TRANSACCION")]
    transaction_id: Option<String>,
    sender_id: Option<String>,
    #[serde(alias = "NUM_DOC_ORDENANTE", alias = "DOCUMENTO_ORDENANTE", alias = "DOC_ORDENANTE")]
    sender_document: Option<String>,
    #[serde(alias = "NOMBRE_ORDENANTE")]
    sender_name: Option<String>,
    #[serde(alias = "APELLIDO_ORDENANTE")]
    sender_surname: Option<String>,
    #[serde(alias = "SEGUNDO_APELLIDO_ORDENANTE")]
    sender_second_surname: Option<String>,
    #[serde(alias = "PAIS_DOC_ORDENANTE", alias = "PAIS_DOCUMENTO_ORDENANTE")]
    sender_document_country: Option<String>,
    #[serde(alias = "PAIS_NAC_ORDENANTE", alias = "PAIS_NACIMIENTO_ORDENANTE")]
    sender_birth_country: Option<String>,
    #[serde(alias = "FECHA_NAC_ORDENANTE", alias = "FECHA_NACIMIENTO_ORDENANTE")]
    sender_birth_date: Option<String>,
    #[serde(alias = "es_PEP")]
    sender_is_pep: Option<String>,
    #[serde(alias = "es_Agente")]
    sender_is_agent: Option<String>,
    beneficiary_id: Option<String>,
    #[serde(alias = "NOMBRE_BENEFICIARIO")]
    beneficiary_name: Option<String>,
    #[serde(alias = "APELLIDO_BENEFICIARIO")]
    beneficiary_surname: Option<String>,
    #[serde(alias = "SEGUNDO_APELLIDO_BENEFICIARIO")]
    beneficiary_second_surname: Option<String>,
    #[serde(alias = "IMPORTE")]
    amount: Option<String>,
    currency: Option<String>,
    #[serde(alias = "FECHA")]
    date: Option<String>,
    #[serde(alias = "HORA")]
    time: Option<String>,
    #[serde(alias = "PAIS_ORIGEN")]
    origin_country: Option<String>,
    #[serde(alias = "PAIS_DESTINO")]
    destination_country: Option<String>,
    channel: Option<String>,
    #[serde(alias = "ENT_NAT_REF_COD", alias = "CODIGO_AGENTE", alias = "AGENT_ID")]
    agent: Option<String>,
    #[serde(alias = "ENT_TOW_CIT_RES")]
    agent_city: Option<String>,
    #[serde(alias = "ESTADO_OPERACION")]
    status: Option<String>,
    reference: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn join_name(parts: [Option<String>; 3]) -> Option<String> {
    let joined = parts
        .into_iter()
        .filter_map(non_empty)
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// Parse an amount, accepting `1234.56`, `1234,56` and `1.234,56`
pub fn parse_amount(raw: &str) -> Option<f64> {
    let raw = raw.trim().trim_start_matches('€').trim_end_matches('€').trim();
    let normalized = match (raw.rfind(','), raw.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => raw.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => raw.replace(',', ""),
        (Some(_), None) => raw.replace(',', "."),
        _ => raw.to_string(),
    };
    normalized.parse::<f64>().ok()
}

/// Parse a date as `dd/mm/yyyy`, `dd-mm-yyyy` or `yyyy-mm-dd`
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.split(|c| c == ' ' || c == 'T').next().unwrap_or(raw);
    ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}

/// Parse a time of day as `HH:MM:SS` or `HH:MM`
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_uppercase().as_str() {
        "TRUE" | "YES" | "Y" | "SI" | "SÍ" | "S" | "1" => Some(true),
        "FALSE" | "NO" | "N" | "0" => Some(false),
        _ => None,
    }
}

/// Parse an optional field, logging values that are present but malformed
fn parse_optional<T>(
    row: usize,
    field: &'static str,
    value: Option<String>,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let value = non_empty(value)?;
    let parsed = parse(&value);
    if parsed.is_none() {
        warn!(row, field, value = %value, "unparseable value treated as missing");
    }
    parsed
}

impl CsvRow {
    fn into_transaction(self, row: usize) -> Transaction {
        let document = non_empty(self.sender_document);
        let sender_name = join_name([self.sender_name, self.sender_surname, self.sender_second_surname]);
        let beneficiary_name = join_name([
            self.beneficiary_name,
            self.beneficiary_surname,
            self.beneficiary_second_surname,
        ]);

        let sender_id = non_empty(self.sender_id)
            .or_else(|| document.clone())
            .or_else(|| sender_name.clone())
            .unwrap_or_default();
        let beneficiary_id = non_empty(self.beneficiary_id)
            .or_else(|| beneficiary_name.clone())
            .unwrap_or_default();

        Transaction {
            transaction_id: non_empty(self.transaction_id).unwrap_or_else(|| format!("ROW-{}", row + 1)),
            sender: Sender {
                id: sender_id,
                document,
                full_name: sender_name,
                document_country: non_empty(self.sender_document_country),
                birth_country: non_empty(self.sender_birth_country),
                birth_date: parse_optional(row, "sender_birth_date", self.sender_birth_date, parse_date),
                is_pep: parse_optional(row, "sender_is_pep", self.sender_is_pep, parse_flag),
                is_agent: parse_optional(row, "sender_is_agent", self.sender_is_agent, parse_flag),
            },
            beneficiary: Beneficiary {
                id: beneficiary_id,
                full_name: beneficiary_name,
            },
            amount: parse_optional(row, "amount", self.amount, parse_amount),
            currency: non_empty(self.currency).unwrap_or_else(|| "EUR".to_string()),
            booked_on: parse_optional(row, "date", self.date, parse_date),
            booked_at: parse_optional(row, "time", self.time, parse_time),
            origin_country: non_empty(self.origin_country),
            destination_country: non_empty(self.destination_country),
            channel: non_empty(self.channel),
            agent: non_empty(self.agent),
            agent_city: non_empty(self.agent_city),
            status: non_empty(self.status)
                .map(|s| TransactionStatus::parse(&s))
                .unwrap_or_default(),
            reference: non_empty(self.reference),
        }
    }
}

/// Load a dataset from any CSV reader
pub fn load_csv<R: Read>(reader: R) -> Result<TransactionDataset, DatasetError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut transactions = Vec::new();
    for (row, record) in csv_reader.deserialize::<CsvRow>().enumerate() {
        transactions.push(record?.into_transaction(row));
    }

    info!(rows = transactions.len(), "csv rows loaded");
    TransactionDataset::new(transactions)
}

/// Load a dataset from a CSV file
pub fn load_csv_path(path: impl AsRef<Path>) -> Result<TransactionDataset, DatasetError> {
    let file = std::fs::File::open(path.as_ref())?;
    load_csv(std::io::BufReader::new(file))
}
