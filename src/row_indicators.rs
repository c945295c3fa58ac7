//! Row-local indicators
//!
//! These rules look at a single transaction's fields only.

use crate::dataset::{normalize_label, normalize_name, to_cents, Transaction};
use crate::indicators::{per_row, Assessment, EvaluationContext, Indicator, IndicatorCategory, IndicatorScope};
use chrono::{Datelike, NaiveDate, Timelike};

/// Check letters for Spanish DNI/NIE numbers, indexed by `number % 23`
const DNI_CHECK_LETTERS: &[u8; 23] = b"TRWAGMYFPDXBNJZSQVHLCKE";

/// Validate the check letter of a DNI (`12345678Z`) or NIE (`X1234567L`).
///
/// Returns `None` when the document does not have that shape.
pub fn national_id_check(document: &str) -> Option<bool> {
    let bytes = document.as_bytes();
    if bytes.len() != 9 || !bytes[1..8].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let prefix = match bytes[0] {
        b'X' => 0,
        b'Y' => 1,
        b'Z' => 2,
        d if d.is_ascii_digit() => u32::from(d - b'0'),
        _ => return None,
    };
    let letter = bytes[8];
    if !letter.is_ascii_uppercase() {
        return None;
    }

    let number = bytes[1..8]
        .iter()
        .fold(prefix, |acc, d| acc * 10 + u32::from(d - b'0'));
    Some(DNI_CHECK_LETTERS[(number % 23) as usize] == letter)
}

fn normalize_document(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '.')
        .flat_map(char::to_uppercase)
        .collect()
}

fn age_at(birth: NaiveDate, on: NaiveDate) -> i32 {
    let mut age = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

/// Large amount that is an exact multiple of the rounding unit
pub struct RoundAmount;

impl Indicator for RoundAmount {
    fn name(&self) -> &str {
        "round_amount"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Thresholds
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        10
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let unit = to_cents(ctx.thresholds.round_unit);
        let floor = to_cents(ctx.thresholds.round_amount_floor);
        per_row(ctx, |tx| match tx.amount_cents() {
            Some(cents) if unit > 0 => Assessment::flag(cents >= floor && cents % unit == 0, || {
                format!("round amount {:.2}", tx.amount.unwrap_or_default())
            }),
            _ => Assessment::NotApplicable,
        })
    }
}

/// Amount just below the reporting threshold
pub struct ThresholdAvoidance;

impl Indicator for ThresholdAvoidance {
    fn name(&self) -> &str {
        "threshold_avoidance"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Thresholds
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        20
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let threshold = ctx.thresholds.reporting_threshold;
        let lower = to_cents(threshold * (1.0 - ctx.thresholds.threshold_margin));
        let upper = to_cents(threshold);
        per_row(ctx, |tx| match tx.amount_cents() {
            Some(cents) => Assessment::flag(cents >= lower && cents < upper, || {
                format!(
                    "amount {:.2} just below reporting threshold {:.2}",
                    tx.amount.unwrap_or_default(),
                    threshold
                )
            }),
            None => Assessment::NotApplicable,
        })
    }
}

/// Destination or origin on the high-risk country list
pub struct HighRiskCountry;

impl Indicator for HighRiskCountry {
    fn name(&self) -> &str {
        "high_risk_country"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Geographic
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        35
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        per_row(ctx, |tx| {
            if tx.destination_country.is_none() && tx.origin_country.is_none() {
                return Assessment::NotApplicable;
            }
            let flagged = [
                ("destination", tx.destination_country.as_deref()),
                ("origin", tx.origin_country.as_deref()),
            ]
            .into_iter()
            .find_map(|(side, country)| {
                country
                    .filter(|c| ctx.countries.is_high_risk(c))
                    .map(|c| (side, c))
            });

            match flagged {
                Some((side, country)) => Assessment::triggered(format!(
                    "{} country {} is {} risk",
                    side,
                    normalize_label(country),
                    ctx.countries.level(country)
                )),
                None => Assessment::Clear,
            }
        })
    }
}

/// Channel on the high-risk channel list
pub struct HighRiskChannel;

impl Indicator for HighRiskChannel {
    fn name(&self) -> &str {
        "high_risk_channel"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Outliers
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        15
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let channels: Vec<String> = ctx
            .thresholds
            .high_risk_channels
            .iter()
            .map(|c| normalize_label(c))
            .collect();
        per_row(ctx, |tx| match tx.channel.as_deref() {
            Some(channel) => {
                let channel = normalize_label(channel);
                Assessment::flag(channels.contains(&channel), || {
                    format!("high-risk channel {}", channel)
                })
            }
            None => Assessment::NotApplicable,
        })
    }
}

/// Sender is a politically exposed person
pub struct PoliticallyExposedSender;

impl Indicator for PoliticallyExposedSender {
    fn name(&self) -> &str {
        "politically_exposed_sender"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Outliers
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        20
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        per_row(ctx, |tx| match tx.sender.is_pep {
            Some(pep) => Assessment::flag(pep, || "sender is a politically exposed person".to_string()),
            None => Assessment::NotApplicable,
        })
    }
}

/// Sender document does not match the expected format or check letter
pub struct MalformedDocument;

impl Indicator for MalformedDocument {
    fn name(&self) -> &str {
        "malformed_document"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Documentation
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        15
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let pattern = ctx.document_pattern;
        let verify = ctx.thresholds.verify_document_check_letter;

        per_row(ctx, |tx| {
            let Some(raw) = tx.sender.document.as_deref() else {
                return Assessment::NotApplicable;
            };
            let document = normalize_document(raw);
            if !pattern.is_match(&document) {
                return Assessment::triggered(format!("document {} has an invalid format", raw));
            }
            if verify && national_id_check(&document) == Some(false) {
                return Assessment::triggered(format!("document {} has a wrong check letter", raw));
            }
            Assessment::Clear
        })
    }
}

/// Mandatory customer data missing or implausible
pub struct IncompleteCustomerData;

impl IncompleteCustomerData {
    fn problems(tx: &Transaction, ctx: &EvaluationContext<'_>) -> Vec<String> {
        let thresholds = ctx.thresholds;
        let mut problems = Vec::new();

        let missing: Vec<&str> = [
            ("sender document", tx.sender.document.is_none()),
            ("sender name", tx.sender.full_name.is_none()),
            ("document country", tx.sender.document_country.is_none()),
            ("birth date", tx.sender.birth_date.is_none()),
            ("beneficiary name", tx.beneficiary.full_name.is_none()),
        ]
        .into_iter()
        .filter(|(_, absent)| *absent)
        .map(|(field, _)| field)
        .collect();
        if !missing.is_empty() {
            problems.push(format!("missing {}", missing.join(", ")));
        }

        if let (Some(birth), Some(booked)) = (tx.sender.birth_date, tx.booked_on) {
            let age = age_at(birth, booked);
            let allowed = i64::from(thresholds.min_customer_age)..=i64::from(thresholds.max_customer_age);
            if !allowed.contains(&i64::from(age)) {
                problems.push(format!("implausible customer age {}", age));
            }
        }

        if let Some(name) = tx.beneficiary.full_name.as_deref() {
            if normalize_name(name).chars().count() < thresholds.min_name_length {
                problems.push(format!("beneficiary name '{}' too short", name));
            }
        }

        problems
    }
}

impl Indicator for IncompleteCustomerData {
    fn name(&self) -> &str {
        "incomplete_customer_data"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Documentation
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        10
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        per_row(ctx, |tx| {
            let problems = Self::problems(tx, ctx);
            Assessment::flag(!problems.is_empty(), || problems.join("; "))
        })
    }
}

/// Destination matches neither the sender's birth country nor document country
pub struct NationalityDestinationMismatch;

impl Indicator for NationalityDestinationMismatch {
    fn name(&self) -> &str {
        "nationality_destination_mismatch"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Geographic
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        10
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        per_row(ctx, |tx| {
            let Some(destination) = tx.destination_country.as_deref().map(normalize_label) else {
                return Assessment::NotApplicable;
            };
            let known: Vec<String> = [
                tx.sender.birth_country.as_deref(),
                tx.sender.document_country.as_deref(),
            ]
            .into_iter()
            .flatten()
            .map(normalize_label)
            .collect();
            if known.is_empty() {
                return Assessment::NotApplicable;
            }
            Assessment::flag(!known.contains(&destination), || {
                format!(
                    "destination {} differs from sender nationality {}",
                    destination,
                    known.join("/")
                )
            })
        })
    }
}

/// Booked outside business hours
pub struct UnusualHour;

impl Indicator for UnusualHour {
    fn name(&self) -> &str {
        "unusual_hour"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Outliers
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Row
    }

    fn default_weight(&self) -> u32 {
        10
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let start = ctx.thresholds.business_hours_start;
        let end = ctx.thresholds.business_hours_end;
        per_row(ctx, |tx| match tx.booked_at {
            Some(time) => {
                let hour = time.hour();
                Assessment::flag(hour < start || hour >= end, || {
                    format!("booked at {} outside business hours", time.format("%H:%M"))
                })
            }
            None => Assessment::NotApplicable,
        })
    }
}
