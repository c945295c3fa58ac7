//! Transaction risk analysis example
//!
//! Loads a CSV export, scores every transaction and prints the summary,
//! network patterns, the riskiest communities and smurfing findings.
//!
//! Usage: cargo run --example analyze_transactions -- <transactions.csv> [config.json]
//!
//! Set `RUST_LOG=aml_risk_engine=debug` to see per-indicator trigger counts.

use aml_risk_engine::ingest::load_csv_path;
use aml_risk_engine::{AmlEngine, EngineConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(csv_path) = args.next() else {
        eprintln!("usage: analyze_transactions <transactions.csv> [config.json]");
        std::process::exit(2);
    };
    let config = match args.next() {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };

    println!("=== AML Risk Analysis ===\n");

    let dataset = load_csv_path(&csv_path)?;
    let engine = AmlEngine::new(config)?;
    let report = engine.analyze(&dataset)?;
    let summary = &report.summary;

    println!("1. Risk Tiers");
    println!("   Transactions: {}", summary.transaction_count);
    for (tier, count) in &summary.tier_counts {
        println!("   {:<9} {}", tier.to_string(), count);
    }
    println!(
        "   Flagged (>= {}): {} transactions, {:.2} volume",
        summary.flagged_tier, summary.flagged_count, summary.flagged_volume
    );
    println!();

    println!("2. Top Indicators");
    for frequency in &summary.top_indicators {
        println!("   {:<34} {}", frequency.indicator, frequency.triggered);
    }
    println!();

    println!("3. Highest Scoring Transactions");
    let mut flagged: Vec<_> = report.flagged().collect();
    flagged.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
    });
    for record in flagged.iter().take(10) {
        println!(
            "   {} score {} ({}) {:?}",
            record.transaction_id, record.total_score, record.tier, record.triggered_indicators
        );
    }
    println!();

    println!("4. Network");
    let stats = report.network.stats();
    println!("   Nodes: {}  Edges: {}", stats.node_count, stats.edge_count);
    println!("   Circular flows: {}", report.patterns.circular_flows.len());
    println!("   Funnel accounts: {}", report.patterns.funnel_accounts.len());
    println!("   Distributors: {}", report.patterns.distributors.len());
    println!("   Pass-through accounts: {}", report.patterns.pass_through.len());
    println!();

    println!("5. Communities");
    for community in report.communities.ranked().into_iter().take(5) {
        println!(
            "   #{} {} members {} high-risk tx {} max tier {}",
            community.rank,
            community.name,
            community.size(),
            community.high_risk_transactions,
            community.max_tier
        );
    }
    println!();

    println!("6. Smurfing");
    let smurfing = &report.smurfing;
    println!(
        "   Shared beneficiaries: {}",
        smurfing.multiple_senders_same_beneficiary.len()
    );
    for day in &smurfing.structured_transactions {
        println!(
            "   {} sent {} small transfers on {} totalling {:.2}",
            day.sender, day.transaction_count, day.date, day.total_amount
        );
    }
    println!(
        "   Frequent small senders: {}",
        smurfing.frequent_small_amounts.len()
    );
    println!();

    println!("Report fingerprint: {}", report.fingerprint()?);
    Ok(())
}
