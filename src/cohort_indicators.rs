//! Cohort indicators
//!
//! These rules compare a transaction with related transactions: the same
//! sender, beneficiary, document, agent, city or destination. Groups come from
//! the shared [`DatasetIndex`](crate::dataset::DatasetIndex) and time-bounded
//! rules use sliding windows over time-ordered rows.

use crate::dataset::{from_cents, normalize_label, normalize_name, sum_cents, Transaction};
use crate::indicators::{
    mark_dense_windows, Assessment, EvaluationContext, Indicator, IndicatorCategory, IndicatorScope,
};
use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet, HashMap};

fn applicable_when<F>(ctx: &EvaluationContext<'_>, has_inputs: F) -> Vec<Assessment>
where
    F: Fn(usize) -> bool,
{
    (0..ctx.len())
        .map(|row| {
            if has_inputs(row) {
                Assessment::Clear
            } else {
                Assessment::NotApplicable
            }
        })
        .collect()
}

/// Repeated identical amounts from one sender within a short window
pub struct Structuring;

impl Indicator for Structuring {
    fn name(&self) -> &str {
        "structuring"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Thresholds
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        35
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let t = ctx.thresholds;
        let span = Duration::days(t.structuring_window_days);
        let mut out = applicable_when(ctx, |row| {
            let tx = ctx.transaction(row);
            tx.amount.is_some() && tx.timestamp().is_some()
        });

        for (sender, rows) in ctx.index.by_sender() {
            if rows.len() < t.structuring_min_count {
                continue;
            }
            let mut by_amount: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
            for &row in rows {
                if let Some(cents) = ctx.transaction(row).amount_cents() {
                    by_amount.entry(cents).or_default().push(row);
                }
            }

            for (cents, same_amount) in by_amount {
                if same_amount.len() < t.structuring_min_count {
                    continue;
                }
                let marked = mark_dense_windows(
                    &same_amount,
                    |row| ctx.transaction(row).timestamp(),
                    span,
                    t.structuring_min_count,
                );
                for row in marked {
                    out[row] = Assessment::triggered(format!(
                        "sender {} repeated amount {:.2} at least {} times within {} days",
                        sender,
                        from_cents(cents),
                        t.structuring_min_count,
                        t.structuring_window_days
                    ));
                }
            }
        }
        out
    }
}

/// Too many transactions from one sender within a rolling window
pub struct Velocity;

impl Indicator for Velocity {
    fn name(&self) -> &str {
        "velocity"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Outliers
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        25
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let t = ctx.thresholds;
        let span = Duration::hours(t.velocity_window_hours);
        let mut out = applicable_when(ctx, |row| ctx.transaction(row).timestamp().is_some());

        for (sender, rows) in ctx.index.by_sender() {
            if rows.len() < t.velocity_min_count {
                continue;
            }
            let marked = mark_dense_windows(
                rows,
                |row| ctx.transaction(row).timestamp(),
                span,
                t.velocity_min_count,
            );
            for row in marked {
                out[row] = Assessment::triggered(format!(
                    "sender {} made at least {} transactions within {} hours",
                    sender, t.velocity_min_count, t.velocity_window_hours
                ));
            }
        }
        out
    }
}

/// Beneficiary receiving from many distinct senders around the same time
pub struct FanInBeneficiary;

impl Indicator for FanInBeneficiary {
    fn name(&self) -> &str {
        "fan_in_beneficiary"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Thresholds
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        25
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let t = ctx.thresholds;
        let span = Duration::days(t.fan_in_window_days);
        let mut out = applicable_when(ctx, |row| ctx.transaction(row).timestamp().is_some());

        for (beneficiary, rows) in ctx.index.by_beneficiary() {
            let timed: Vec<(usize, NaiveDateTime, &str)> = rows
                .iter()
                .filter_map(|&row| {
                    let tx = ctx.transaction(row);
                    tx.timestamp().map(|ts| (row, ts, tx.sender.id.as_str()))
                })
                .collect();
            if timed.len() < t.fan_in_min_senders {
                continue;
            }

            // Distinct senders within +/- span of each row
            let mut senders: HashMap<&str, usize> = HashMap::new();
            let (mut lo, mut hi) = (0, 0);
            for &(row, at, _) in &timed {
                while hi < timed.len() && timed[hi].1 - at <= span {
                    *senders.entry(timed[hi].2).or_insert(0) += 1;
                    hi += 1;
                }
                while at - timed[lo].1 > span {
                    let sender = timed[lo].2;
                    if let Some(count) = senders.get_mut(sender) {
                        *count -= 1;
                        if *count == 0 {
                            senders.remove(sender);
                        }
                    }
                    lo += 1;
                }
                if senders.len() >= t.fan_in_min_senders {
                    out[row] = Assessment::triggered(format!(
                        "beneficiary {} received from {} senders within {} days",
                        beneficiary,
                        senders.len(),
                        t.fan_in_window_days
                    ));
                }
            }
        }
        out
    }
}

fn normalize_reference(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

type SenderGroups<'a> = BTreeMap<String, (BTreeSet<&'a str>, Vec<usize>)>;

/// Beneficiary identity as typed by the sender: name plus destination
fn beneficiary_key(tx: &Transaction) -> Option<String> {
    let name = normalize_name(tx.beneficiary.full_name.as_deref()?);
    let destination = normalize_label(tx.destination_country.as_deref()?);
    (!name.is_empty()).then(|| format!("{}|{}", name, destination))
}

/// Same memo text, or the same beneficiary details, entered by unrelated senders
pub struct ReusedReference;

impl Indicator for ReusedReference {
    fn name(&self) -> &str {
        "reused_reference"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Documentation
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        15
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let t = ctx.thresholds;
        let mut out = applicable_when(ctx, |row| {
            let tx = ctx.transaction(row);
            tx.reference.is_some() || beneficiary_key(tx).is_some()
        });

        let mut references: SenderGroups<'_> = BTreeMap::new();
        let mut beneficiaries: SenderGroups<'_> = BTreeMap::new();
        for (row, tx) in ctx.dataset.iter().enumerate() {
            let sender = tx.sender.id.as_str();
            if let Some(reference) = tx.reference.as_deref() {
                let reference = normalize_reference(reference);
                if reference.chars().count() >= t.reference_min_length {
                    let (senders, rows) = references.entry(reference).or_default();
                    senders.insert(sender);
                    rows.push(row);
                }
            }
            if let Some(key) = beneficiary_key(tx) {
                let (senders, rows) = beneficiaries.entry(key).or_default();
                senders.insert(sender);
                rows.push(row);
            }
        }

        let mut notes: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (reference, (senders, rows)) in references {
            if senders.len() < t.reference_min_senders {
                continue;
            }
            for row in rows {
                notes.entry(row).or_default().push(format!(
                    "reference '{}' reused by {} senders",
                    reference,
                    senders.len()
                ));
            }
        }
        for (key, (senders, rows)) in beneficiaries {
            if senders.len() < t.beneficiary_key_min_senders {
                continue;
            }
            let name = key.split('|').next().unwrap_or_default();
            for row in rows {
                notes.entry(row).or_default().push(format!(
                    "beneficiary '{}' entered by {} senders",
                    name,
                    senders.len()
                ));
            }
        }

        for (row, row_notes) in notes {
            out[row] = Assessment::triggered(row_notes.join("; "));
        }
        out
    }
}

/// One document presented under different names
pub struct DocumentNameMismatch;

impl Indicator for DocumentNameMismatch {
    fn name(&self) -> &str {
        "document_name_mismatch"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Documentation
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        20
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let mut out = applicable_when(ctx, |row| {
            let sender = &ctx.transaction(row).sender;
            sender.document.is_some() && sender.full_name.is_some()
        });

        for (document, rows) in ctx.index.by_document() {
            let names: BTreeSet<String> = rows
                .iter()
                .filter_map(|&row| ctx.transaction(row).sender.full_name.as_deref())
                .map(normalize_name)
                .collect();
            if names.len() < 2 {
                continue;
            }
            for &row in rows {
                if out[row].is_applicable() {
                    out[row] = Assessment::triggered(format!(
                        "document {} used with {} different names",
                        document,
                        names.len()
                    ));
                }
            }
        }
        out
    }
}

/// Sender cancelling many transfers, especially near the reporting threshold
pub struct RepeatedCancellations;

impl Indicator for RepeatedCancellations {
    fn name(&self) -> &str {
        "repeated_cancellations"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Thresholds
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        15
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        use crate::dataset::TransactionStatus;

        let t = ctx.thresholds;
        let mut out = vec![Assessment::Clear; ctx.len()];

        for (sender, rows) in ctx.index.by_sender() {
            let cancelled: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&row| ctx.transaction(row).status == TransactionStatus::Cancelled)
                .collect();
            let near_threshold = cancelled
                .iter()
                .filter(|&&row| {
                    ctx.transaction(row).amount.map_or(false, |amount| {
                        (amount - t.reporting_threshold).abs() <= t.cancellation_near_band
                    })
                })
                .count();

            if cancelled.len() >= t.cancellation_min_count
                || near_threshold >= t.cancellation_near_threshold_count
            {
                for &row in &cancelled {
                    out[row] = Assessment::triggered(format!(
                        "sender {} cancelled {} transactions, {} near the reporting threshold",
                        sender,
                        cancelled.len(),
                        near_threshold
                    ));
                }
            }
        }
        out
    }
}

/// Per-row outcome of the profile checks; `None` means the check had no data
#[derive(Default)]
struct ProfileChecks {
    amount: Option<bool>,
    destination: Option<bool>,
    agent_spread: Option<bool>,
    notes: Vec<String>,
}

impl ProfileChecks {
    fn record(&mut self, outcome: bool, note: impl FnOnce() -> String) -> Option<bool> {
        if outcome {
            self.notes.push(note());
        }
        Some(outcome)
    }

    fn into_assessment(self) -> Assessment {
        let checks = [self.amount, self.destination, self.agent_spread];
        if checks.contains(&Some(true)) {
            Assessment::triggered(self.notes.join("; "))
        } else if checks.iter().any(Option::is_some) {
            Assessment::Clear
        } else {
            Assessment::NotApplicable
        }
    }
}

/// Transaction out of line with the sender's own history, or an agent
/// acting as sender towards many destinations or beneficiaries
pub struct ProfileDeviation;

impl ProfileDeviation {
    /// Leave-one-out check of each amount against the sender's other amounts.
    /// The spread never drops below a tenth of the mean.
    fn amount_outliers(
        ctx: &EvaluationContext<'_>,
        rows: &[usize],
        checks: &mut HashMap<usize, ProfileChecks>,
    ) {
        let t = ctx.thresholds;
        let amounts: Vec<(usize, i64)> = rows
            .iter()
            .filter_map(|&row| ctx.transaction(row).amount_cents().map(|c| (row, c)))
            .collect();
        // Leave-one-out needs at least one other amount
        if amounts.len() < t.profile_min_history.max(2) {
            return;
        }

        let sum: i128 = amounts.iter().map(|&(_, c)| i128::from(c)).sum();
        // Squares of cent amounts can exceed i128 when summed
        let sum_sq: f64 = amounts.iter().map(|&(_, c)| (c as f64) * (c as f64)).sum();
        let others = (amounts.len() - 1) as f64;

        for &(row, cents) in &amounts {
            let x = cents as f64;
            let mean = (sum - i128::from(cents)) as f64 / others;
            let variance = ((sum_sq - x * x) / others - mean * mean).max(0.0);
            let spread = variance.sqrt().max(mean * 0.1);
            let limit = mean + t.profile_std_multiplier * spread;
            let outlier = x > mean && x >= limit;

            let entry = checks.entry(row).or_default();
            entry.amount = entry.record(outlier, || {
                format!(
                    "amount {:.2} exceeds sender profile limit {:.2}",
                    from_cents(cents),
                    limit / 100.0
                )
            });
        }
    }

    fn unusual_destinations(
        ctx: &EvaluationContext<'_>,
        rows: &[usize],
        checks: &mut HashMap<usize, ProfileChecks>,
    ) {
        let t = ctx.thresholds;
        let destinations: Vec<(usize, String)> = rows
            .iter()
            .filter_map(|&row| {
                ctx.transaction(row)
                    .destination_country
                    .as_deref()
                    .map(|d| (row, normalize_label(d)))
            })
            .collect();
        if destinations.len() < t.profile_min_history {
            return;
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, destination) in &destinations {
            *counts.entry(destination.as_str()).or_insert(0) += 1;
        }
        // BTreeMap order makes the smallest label win ties
        let habitual = counts
            .iter()
            .fold(None::<(&str, usize)>, |best, (&dest, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((dest, count)),
            })
            .filter(|&(_, count)| count >= t.habitual_destination_min_count);

        let Some((habitual, _)) = habitual else {
            return;
        };
        for (row, destination) in &destinations {
            let unusual = destination != habitual;
            let entry = checks.entry(*row).or_default();
            entry.destination = entry.record(unusual, || {
                format!(
                    "destination {} differs from habitual destination {}",
                    destination, habitual
                )
            });
        }
    }

    /// Senders flagged as agents must not spread transfers over many
    /// destinations or beneficiaries
    fn agent_as_sender(
        ctx: &EvaluationContext<'_>,
        rows: &[usize],
        checks: &mut HashMap<usize, ProfileChecks>,
    ) {
        let t = ctx.thresholds;
        let Some(is_agent) = rows
            .iter()
            .filter_map(|&row| ctx.transaction(row).sender.is_agent)
            .reduce(|a, b| a || b)
        else {
            return;
        };

        let destinations: BTreeSet<String> = rows
            .iter()
            .filter_map(|&row| ctx.transaction(row).destination_country.as_deref())
            .map(normalize_label)
            .collect();
        let beneficiaries: BTreeSet<&str> = rows
            .iter()
            .map(|&row| ctx.transaction(row).beneficiary.id.as_str())
            .collect();
        let spread = is_agent
            && (destinations.len() >= t.agent_sender_min_targets
                || beneficiaries.len() >= t.agent_sender_min_targets);

        for &row in rows {
            let entry = checks.entry(row).or_default();
            entry.agent_spread = entry.record(spread, || {
                format!(
                    "agent sender reaches {} destinations and {} beneficiaries",
                    destinations.len(),
                    beneficiaries.len()
                )
            });
        }
    }
}

impl Indicator for ProfileDeviation {
    fn name(&self) -> &str {
        "profile_deviation"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Outliers
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        20
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let mut out = vec![Assessment::NotApplicable; ctx.len()];

        for rows in ctx.index.by_sender().values() {
            let mut checks = HashMap::new();
            Self::amount_outliers(ctx, rows, &mut checks);
            Self::unusual_destinations(ctx, rows, &mut checks);
            Self::agent_as_sender(ctx, rows, &mut checks);

            for (row, profile) in checks {
                out[row] = profile.into_assessment();
            }
        }
        out
    }
}

/// Agent handling far more transactions than the average agent
pub struct AgentVolumeOutlier;

impl Indicator for AgentVolumeOutlier {
    fn name(&self) -> &str {
        "agent_volume_outlier"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Outliers
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        10
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let agents = ctx.index.by_agent();
        if agents.len() < 2 {
            return vec![Assessment::NotApplicable; ctx.len()];
        }

        let mut out = applicable_when(ctx, |row| ctx.transaction(row).agent.is_some());
        let total: usize = agents.values().map(Vec::len).sum();
        let mean = total as f64 / agents.len() as f64;
        let limit = ctx.thresholds.agent_volume_factor * mean;

        for (agent, rows) in agents {
            if (rows.len() as f64) < limit {
                continue;
            }
            for &row in rows {
                out[row] = Assessment::triggered(format!(
                    "agent {} handled {} transactions against an average of {:.1}",
                    agent,
                    rows.len(),
                    mean
                ));
            }
        }
        out
    }
}

/// Amount far above the mean of the agent's city
pub struct CityAmountOutlier;

impl Indicator for CityAmountOutlier {
    fn name(&self) -> &str {
        "city_amount_outlier"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Outliers
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        15
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let t = ctx.thresholds;
        let mut out = vec![Assessment::NotApplicable; ctx.len()];

        for (city, rows) in ctx.index.by_city() {
            let amounts: Vec<(usize, i64)> = rows
                .iter()
                .filter_map(|&row| ctx.transaction(row).amount_cents().map(|c| (row, c)))
                .collect();
            if amounts.len() < t.city_min_transactions {
                continue;
            }

            let total = sum_cents(amounts.iter().map(|&(_, c)| c));
            let mean = total as f64 / amounts.len() as f64;
            let limit = t.city_amount_factor * mean;
            for (row, cents) in amounts {
                out[row] = Assessment::flag(mean > 0.0 && cents as f64 >= limit, || {
                    format!(
                        "amount {:.2} exceeds {:.1}x the {} average of {:.2}",
                        from_cents(cents),
                        t.city_amount_factor,
                        city,
                        mean / 100.0
                    )
                });
            }
        }
        out
    }
}

#[derive(Default)]
struct MonthActivity<'a> {
    rows: Vec<usize>,
    volume: i64,
    high_risk_volume: i64,
    senders: BTreeSet<&'a str>,
}

impl MonthActivity<'_> {
    /// Percentage of the month's volume sent to high-risk destinations
    fn high_risk_share(&self) -> f64 {
        if self.volume > 0 {
            self.high_risk_volume as f64 / self.volume as f64 * 100.0
        } else {
            0.0
        }
    }
}

fn growth_pct(previous: f64, current: f64) -> Option<f64> {
    (previous > 0.0).then(|| (current - previous) / previous * 100.0)
}

/// Month-over-month jump in an agent's volume or distinct senders, or a
/// shift of the agent's corridors towards high-risk destinations
pub struct AgentActivitySurge;

impl Indicator for AgentActivitySurge {
    fn name(&self) -> &str {
        "agent_activity_surge"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Outliers
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        10
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let t = ctx.thresholds;
        let mut out = applicable_when(ctx, |row| {
            let tx = ctx.transaction(row);
            tx.agent.is_some() && tx.booked_on.is_some()
        });

        let high_risk = |row: usize| {
            ctx.transaction(row)
                .destination_country
                .as_deref()
                .map_or(false, |c| ctx.countries.is_high_risk(c))
        };

        for (agent, rows) in ctx.index.by_agent() {
            let mut months: BTreeMap<(i32, u32), MonthActivity<'_>> = BTreeMap::new();
            for &row in rows {
                let tx = ctx.transaction(row);
                let Some(month) = tx.month() else {
                    continue;
                };
                let cents = tx.amount_cents().unwrap_or(0);
                let activity = months.entry(month).or_default();
                activity.rows.push(row);
                activity.volume = activity.volume.saturating_add(cents);
                if high_risk(row) {
                    activity.high_risk_volume = activity.high_risk_volume.saturating_add(cents);
                }
                activity.senders.insert(tx.sender.id.as_str());
            }

            let ordered: Vec<(&(i32, u32), &MonthActivity<'_>)> = months.iter().collect();
            for pair in ordered.windows(2) {
                let (previous, (&(year, month), current)) = (pair[0].1, pair[1]);
                if current.rows.len() < t.surge_min_transactions {
                    continue;
                }
                let volume_growth = growth_pct(previous.volume as f64, current.volume as f64);
                let sender_growth =
                    growth_pct(previous.senders.len() as f64, current.senders.len() as f64);
                let surge = [volume_growth, sender_growth]
                    .into_iter()
                    .flatten()
                    .fold(None::<f64>, |best, g| Some(best.map_or(g, |b| b.max(g))))
                    .filter(|&g| g >= t.surge_growth_pct);
                let shift = current.high_risk_share() - previous.high_risk_share();
                let corridor_shift = shift >= t.corridor_shift_points;

                for &row in &current.rows {
                    let mut notes = Vec::new();
                    if let Some(growth) = surge {
                        notes.push(format!(
                            "agent {} activity grew {:.0}% in {}-{:02}",
                            agent, growth, year, month
                        ));
                    }
                    if corridor_shift && high_risk(row) {
                        notes.push(format!(
                            "agent {} high-risk destination share rose {:.0} points in {}-{:02}",
                            agent, shift, year, month
                        ));
                    }
                    if !notes.is_empty() {
                        out[row] = Assessment::triggered(notes.join("; "));
                    }
                }
            }
        }
        out
    }
}

/// Agent concentrating above-average amounts on one destination
pub struct DestinationConcentration;

impl Indicator for DestinationConcentration {
    fn name(&self) -> &str {
        "destination_concentration"
    }

    fn category(&self) -> IndicatorCategory {
        IndicatorCategory::Geographic
    }

    fn scope(&self) -> IndicatorScope {
        IndicatorScope::Cohort
    }

    fn default_weight(&self) -> u32 {
        10
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Vec<Assessment> {
        let t = ctx.thresholds;
        let mut out = applicable_when(ctx, |row| {
            let tx = ctx.transaction(row);
            tx.agent.is_some() && tx.destination_country.is_some() && tx.amount.is_some()
        });

        let destination_means: HashMap<&str, f64> = ctx
            .index
            .by_destination()
            .iter()
            .filter_map(|(destination, rows)| {
                let amounts: Vec<i64> = rows
                    .iter()
                    .filter_map(|&row| ctx.transaction(row).amount_cents())
                    .collect();
                (!amounts.is_empty()).then(|| {
                    let total = sum_cents(amounts.iter().copied());
                    (destination.as_str(), total as f64 / amounts.len() as f64)
                })
            })
            .collect();

        for (agent, rows) in ctx.index.by_agent() {
            let mut corridors: BTreeMap<String, Vec<(usize, i64)>> = BTreeMap::new();
            for &row in rows {
                let tx = ctx.transaction(row);
                if let (Some(destination), Some(cents)) =
                    (tx.destination_country.as_deref(), tx.amount_cents())
                {
                    corridors
                        .entry(normalize_label(destination))
                        .or_default()
                        .push((row, cents));
                }
            }

            for (destination, corridor) in corridors {
                if corridor.len() < t.concentration_min_transactions {
                    continue;
                }
                let Some(&mean) = destination_means.get(destination.as_str()) else {
                    continue;
                };
                let above: Vec<usize> = corridor
                    .iter()
                    .filter(|&&(_, cents)| cents as f64 > mean)
                    .map(|&(row, _)| row)
                    .collect();
                let share = above.len() as f64 / corridor.len() as f64;
                if share < t.concentration_share {
                    continue;
                }
                for row in above {
                    out[row] = Assessment::triggered(format!(
                        "agent {} sends {:.0}% of {} transfers above the destination average",
                        agent,
                        share * 100.0,
                        destination
                    ));
                }
            }
        }
        out
    }
}
