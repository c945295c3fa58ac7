//! Transaction network analysis
//!
//! Builds a directed sender→beneficiary graph from the scored dataset and
//! detects structural patterns on it. Parallel transactions between the same
//! pair collapse into one edge; self-transfers are kept as flagged self-loops.

use crate::aggregation::{CompositeRiskRecord, RiskTier};
use crate::config::{EngineConfig, NetworkSettings, NodeRiskAggregation, TierScale};
use crate::dataset::{from_cents, normalize_label, sum_cents, Transaction, TransactionDataset};
use crate::AnalysisError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Structural pattern types
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousPattern {
    /// Money moving in a circle back to origin
    CircularFlow,
    /// Many sources feeding one account
    FunnelAccount,
    /// Account distributing to many recipients
    Distributor,
    /// Inflow and outflow nearly equal
    PassThrough,
    /// Sender and beneficiary are the same identity
    SelfLoop,
}

/// Which side(s) of transfers a node appears on
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Sender,
    Beneficiary,
    Both,
}

/// One identity in the network
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkNode {
    pub id: String,
    pub role: NodeRole,
    /// Most frequent country seen for this identity
    pub country: Option<String>,
    pub transaction_count: usize,
    pub inflow_cents: i64,
    pub outflow_cents: i64,
    /// Inflow plus outflow, counting a self-transfer once
    pub total_volume: f64,
    /// Distinct counterparties sending to this node
    pub in_degree: usize,
    /// Distinct counterparties this node sends to
    pub out_degree: usize,
    /// Highest composite tier among touching transactions
    pub max_tier: RiskTier,
    /// Tier after the configured node aggregation
    pub risk_tier: RiskTier,
    pub mean_score: f64,
    pub high_risk_transactions: usize,
}

impl NetworkNode {
    fn is_funnel(&self, settings: &NetworkSettings) -> bool {
        self.in_degree >= settings.funnel_min_sources && self.out_degree <= settings.funnel_max_targets
    }

    fn is_distributor(&self, settings: &NetworkSettings) -> bool {
        self.in_degree <= settings.funnel_max_targets && self.out_degree >= settings.funnel_min_sources
    }

    fn is_pass_through(&self) -> bool {
        if self.inflow_cents == 0 {
            return false;
        }
        let ratio = self.outflow_cents as f64 / self.inflow_cents as f64;
        (0.9..=1.1).contains(&ratio) && self.transaction_count >= 4
    }
}

/// Aggregated transfers from one identity to another
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub transaction_count: usize,
    pub volume_cents: i64,
    pub volume: f64,
    pub max_tier: RiskTier,
    pub high_risk_transactions: usize,
    pub self_loop: bool,
    pub transaction_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub self_loop_count: usize,
    pub total_transactions: usize,
    pub total_volume_cents: i64,
    pub total_volume: f64,
    /// Transactions left out by the network filters
    pub filtered_transactions: usize,
}

/// Immutable sender→beneficiary graph; nodes sorted by id, edges by (source, target)
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionNetwork {
    nodes: Vec<NetworkNode>,
    edges: Vec<NetworkEdge>,
    stats: GraphStats,
    #[serde(skip)]
    node_index: HashMap<String, usize>,
}

impl PartialEq for TransactionNetwork {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.edges == other.edges && self.stats == other.stats
    }
}

impl TransactionNetwork {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[NetworkEdge] {
        &self.edges
    }

    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }

    pub fn node(&self, id: &str) -> Option<&NetworkNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_position(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&NetworkEdge> {
        self.edges
            .binary_search_by(|e| (e.source.as_str(), e.target.as_str()).cmp(&(source, target)))
            .ok()
            .map(|i| &self.edges[i])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Undirected projection as adjacency lists of `(neighbor, transaction count)`.
    /// Self-loops are left out; both directions of a pair are merged.
    pub fn undirected_adjacency(&self) -> Vec<Vec<(usize, u64)>> {
        let mut merged: Vec<BTreeMap<usize, u64>> = vec![BTreeMap::new(); self.nodes.len()];
        for edge in self.edges.iter().filter(|e| !e.self_loop) {
            let (Some(&a), Some(&b)) = (self.node_index.get(&edge.source), self.node_index.get(&edge.target)) else {
                continue;
            };
            let weight = edge.transaction_count as u64;
            *merged[a].entry(b).or_insert(0) += weight;
            *merged[b].entry(a).or_insert(0) += weight;
        }
        merged.into_iter().map(|m| m.into_iter().collect()).collect()
    }

    fn successors(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.nodes.len()];
        for edge in self.edges.iter().filter(|e| !e.self_loop) {
            if let (Some(&a), Some(&b)) = (self.node_index.get(&edge.source), self.node_index.get(&edge.target)) {
                out[a].push(b);
            }
        }
        out
    }

    /// Detect circular flows of at most `max_hops` transfers.
    ///
    /// Each cycle is reported once, starting from its smallest node id.
    pub fn detect_circular_flows(&self, max_hops: usize) -> Vec<CircularFlowResult> {
        let successors = self.successors();
        let mut results = Vec::new();

        for start in 0..self.nodes.len() {
            let mut path = vec![start];
            self.dfs_circular(start, &successors, &mut path, max_hops, &mut results);
        }
        results
    }

    fn dfs_circular(
        &self,
        start: usize,
        successors: &[Vec<usize>],
        path: &mut Vec<usize>,
        max_hops: usize,
        results: &mut Vec<CircularFlowResult>,
    ) {
        let Some(&current) = path.last() else {
            return;
        };
        for &next in &successors[current] {
            if next == start && path.len() >= 2 {
                let mut cycle = path.clone();
                cycle.push(start);
                results.push(self.circular_flow(&cycle));
                continue;
            }
            // Only nodes above the start, so every cycle is found from its minimum
            if next <= start || path.contains(&next) || path.len() >= max_hops {
                continue;
            }
            path.push(next);
            self.dfs_circular(start, successors, path, max_hops, results);
            path.pop();
        }
    }

    fn circular_flow(&self, cycle: &[usize]) -> CircularFlowResult {
        let accounts: Vec<String> = cycle.iter().map(|&i| self.nodes[i].id.clone()).collect();
        let volume_cents = sum_cents(
            accounts
                .windows(2)
                .filter_map(|w| self.edge(&w[0], &w[1]).map(|e| e.volume_cents)),
        );
        CircularFlowResult {
            accounts,
            total_volume: from_cents(volume_cents),
            pattern: SuspiciousPattern::CircularFlow,
        }
    }

    /// Detect funnel accounts (many-to-one aggregation)
    pub fn detect_funnel_accounts(&self, settings: &NetworkSettings) -> Vec<AccountPatternResult> {
        self.nodes
            .iter()
            .filter(|node| node.is_funnel(settings))
            .map(|node| AccountPatternResult::new(node, SuspiciousPattern::FunnelAccount))
            .collect()
    }

    pub fn detect_distributors(&self, settings: &NetworkSettings) -> Vec<AccountPatternResult> {
        self.nodes
            .iter()
            .filter(|node| node.is_distributor(settings))
            .map(|node| AccountPatternResult::new(node, SuspiciousPattern::Distributor))
            .collect()
    }

    /// Detect pass-through accounts
    pub fn detect_pass_through(&self) -> Vec<AccountPatternResult> {
        self.nodes
            .iter()
            .filter(|node| node.is_pass_through())
            .map(|node| AccountPatternResult::new(node, SuspiciousPattern::PassThrough))
            .collect()
    }

    pub fn self_loops(&self) -> Vec<&NetworkEdge> {
        self.edges.iter().filter(|e| e.self_loop).collect()
    }

    /// Run all structural detectors
    pub fn detect_patterns(&self, settings: &NetworkSettings) -> NetworkPatterns {
        let patterns = NetworkPatterns {
            circular_flows: self.detect_circular_flows(settings.max_cycle_hops),
            funnel_accounts: self.detect_funnel_accounts(settings),
            distributors: self.detect_distributors(settings),
            pass_through: self.detect_pass_through(),
            self_loops: self.self_loops().into_iter().map(|e| e.source.clone()).collect(),
        };
        debug!(patterns = patterns.pattern_count(), "network patterns detected");
        patterns
    }
}

#[derive(Debug, Default)]
struct NodeAccumulator {
    as_sender: bool,
    as_beneficiary: bool,
    countries: BTreeMap<String, usize>,
    transaction_count: usize,
    inflow_cents: i64,
    outflow_cents: i64,
    self_cents: i64,
    incoming: BTreeSet<String>,
    outgoing: BTreeSet<String>,
    max_tier: RiskTier,
    score_sum: u64,
    high_risk_transactions: usize,
}

impl NodeAccumulator {
    fn touch(&mut self, record: &CompositeRiskRecord, high_risk: bool) {
        self.transaction_count += 1;
        self.max_tier = self.max_tier.max(record.tier);
        self.score_sum += u64::from(record.total_score);
        if high_risk {
            self.high_risk_transactions += 1;
        }
    }

    fn dominant_country(&self) -> Option<String> {
        let mut best: Option<(&String, usize)> = None;
        for (country, &count) in &self.countries {
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((country, count));
            }
        }
        best.map(|(country, _)| country.clone())
    }
}

/// Builds a [`TransactionNetwork`] from scored transactions
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    settings: NetworkSettings,
    tiers: TierScale,
}

impl NetworkBuilder {
    pub fn new(settings: NetworkSettings, tiers: TierScale) -> Self {
        Self { settings, tiers }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.network.clone(), config.tiers.clone())
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    fn include(&self, tx: &Transaction) -> bool {
        if let Some(min) = self.settings.min_amount {
            if tx.amount.map_or(true, |amount| amount < min) {
                return false;
            }
        }
        if !self.settings.destination_countries.is_empty() {
            let matches = tx.destination_country.as_deref().map_or(false, |d| {
                let d = normalize_label(d);
                self.settings
                    .destination_countries
                    .iter()
                    .any(|c| normalize_label(c) == d)
            });
            if !matches {
                return false;
            }
        }
        if !self.settings.document_countries.is_empty() {
            let matches = tx.sender.document_country.as_deref().map_or(false, |d| {
                let d = normalize_label(d);
                self.settings
                    .document_countries
                    .iter()
                    .any(|c| normalize_label(c) == d)
            });
            if !matches {
                return false;
            }
        }
        true
    }

    /// Build the network; `records` must be in dataset order
    pub fn build(
        &self,
        dataset: &TransactionDataset,
        records: &[CompositeRiskRecord],
    ) -> Result<TransactionNetwork, AnalysisError> {
        if records.len() != dataset.len() {
            return Err(AnalysisError::StageMismatch(format!(
                "{} risk records for {} transactions",
                records.len(),
                dataset.len()
            )));
        }

        let mut accumulators: BTreeMap<String, NodeAccumulator> = BTreeMap::new();
        let mut edges: BTreeMap<(String, String), NetworkEdge> = BTreeMap::new();
        let mut filtered = 0;

        for (tx, record) in dataset.iter().zip(records) {
            if tx.transaction_id != record.transaction_id {
                return Err(AnalysisError::StageMismatch(format!(
                    "risk record for {} found at the position of {}",
                    record.transaction_id, tx.transaction_id
                )));
            }
            if !self.include(tx) {
                filtered += 1;
                continue;
            }
            self.add_transaction(tx, record, &mut accumulators, &mut edges);
        }

        let nodes: Vec<NetworkNode> = accumulators
            .into_iter()
            .map(|(id, acc)| self.finish_node(id, acc))
            .collect();
        let edges: Vec<NetworkEdge> = edges.into_values().collect();
        let node_index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();

        let total_volume_cents = sum_cents(edges.iter().map(|e| e.volume_cents));
        let stats = GraphStats {
            node_count: nodes.len(),
            edge_count: edges.len(),
            self_loop_count: edges.iter().filter(|e| e.self_loop).count(),
            total_transactions: edges.iter().map(|e| e.transaction_count).sum(),
            total_volume_cents,
            total_volume: from_cents(total_volume_cents),
            filtered_transactions: filtered,
        };

        info!(
            nodes = stats.node_count,
            edges = stats.edge_count,
            self_loops = stats.self_loop_count,
            filtered = stats.filtered_transactions,
            "transaction network built"
        );

        Ok(TransactionNetwork {
            nodes,
            edges,
            stats,
            node_index,
        })
    }

    fn add_transaction(
        &self,
        tx: &Transaction,
        record: &CompositeRiskRecord,
        accumulators: &mut BTreeMap<String, NodeAccumulator>,
        edges: &mut BTreeMap<(String, String), NetworkEdge>,
    ) {
        let sender = tx.sender.id.as_str();
        let beneficiary = tx.beneficiary.id.as_str();
        let cents = tx.amount_cents().unwrap_or(0);
        let high_risk = record.tier >= self.settings.high_risk_tier;
        let self_loop = tx.is_self_transfer();

        // Update source node
        let from_node = accumulators.entry(sender.to_string()).or_default();
        from_node.as_sender = true;
        from_node.outflow_cents = from_node.outflow_cents.saturating_add(cents);
        from_node.touch(record, high_risk);
        if let Some(country) = tx.sender.document_country.as_deref() {
            *from_node.countries.entry(normalize_label(country)).or_insert(0) += 1;
        }

        if self_loop {
            from_node.as_beneficiary = true;
            from_node.inflow_cents = from_node.inflow_cents.saturating_add(cents);
            from_node.self_cents = from_node.self_cents.saturating_add(cents);
        } else {
            from_node.outgoing.insert(beneficiary.to_string());

            // Update destination node
            let to_node = accumulators.entry(beneficiary.to_string()).or_default();
            to_node.as_beneficiary = true;
            to_node.inflow_cents = to_node.inflow_cents.saturating_add(cents);
            to_node.incoming.insert(sender.to_string());
            to_node.touch(record, high_risk);
            if let Some(country) = tx.destination_country.as_deref() {
                *to_node.countries.entry(normalize_label(country)).or_insert(0) += 1;
            }
        }

        // Update edge
        let edge = edges
            .entry((sender.to_string(), beneficiary.to_string()))
            .or_insert_with(|| NetworkEdge {
                source: sender.to_string(),
                target: beneficiary.to_string(),
                transaction_count: 0,
                volume_cents: 0,
                volume: 0.0,
                max_tier: RiskTier::Low,
                high_risk_transactions: 0,
                self_loop,
                transaction_ids: Vec::new(),
            });
        edge.transaction_count += 1;
        edge.volume_cents = edge.volume_cents.saturating_add(cents);
        edge.volume = from_cents(edge.volume_cents);
        edge.max_tier = edge.max_tier.max(record.tier);
        if high_risk {
            edge.high_risk_transactions += 1;
        }
        edge.transaction_ids.push(tx.transaction_id.clone());
    }

    fn finish_node(&self, id: String, acc: NodeAccumulator) -> NetworkNode {
        let role = match (acc.as_sender, acc.as_beneficiary) {
            (true, true) => NodeRole::Both,
            (true, false) => NodeRole::Sender,
            _ => NodeRole::Beneficiary,
        };
        let count = acc.transaction_count.max(1) as u64;
        let rounded_mean = ((acc.score_sum + count / 2) / count) as u32;
        let risk_tier = match self.settings.node_risk {
            NodeRiskAggregation::MaxTier => acc.max_tier,
            NodeRiskAggregation::MeanScore => self.tiers.tier_for(rounded_mean),
        };

        NetworkNode {
            country: acc.dominant_country(),
            role,
            transaction_count: acc.transaction_count,
            inflow_cents: acc.inflow_cents,
            outflow_cents: acc.outflow_cents,
            total_volume: from_cents(
                acc.inflow_cents
                    .saturating_add(acc.outflow_cents)
                    .saturating_sub(acc.self_cents),
            ),
            in_degree: acc.incoming.len(),
            out_degree: acc.outgoing.len(),
            max_tier: acc.max_tier,
            risk_tier,
            mean_score: acc.score_sum as f64 / count as f64,
            high_risk_transactions: acc.high_risk_transactions,
            id,
        }
    }
}

// Result types

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CircularFlowResult {
    pub accounts: Vec<String>,
    pub total_volume: f64,
    pub pattern: SuspiciousPattern,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountPatternResult {
    pub account_id: String,
    pub incoming_count: usize,
    pub outgoing_count: usize,
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub pattern: SuspiciousPattern,
}

impl AccountPatternResult {
    fn new(node: &NetworkNode, pattern: SuspiciousPattern) -> Self {
        Self {
            account_id: node.id.clone(),
            incoming_count: node.in_degree,
            outgoing_count: node.out_degree,
            total_inflow: from_cents(node.inflow_cents),
            total_outflow: from_cents(node.outflow_cents),
            pattern,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NetworkPatterns {
    pub circular_flows: Vec<CircularFlowResult>,
    pub funnel_accounts: Vec<AccountPatternResult>,
    pub distributors: Vec<AccountPatternResult>,
    pub pass_through: Vec<AccountPatternResult>,
    /// Identities transferring to themselves
    pub self_loops: Vec<String>,
}

impl NetworkPatterns {
    /// Check if any suspicious patterns were found
    pub fn has_suspicious_activity(&self) -> bool {
        self.pattern_count() > 0
    }

    /// Get total suspicious pattern count
    pub fn pattern_count(&self) -> usize {
        self.circular_flows.len()
            + self.funnel_accounts.len()
            + self.distributors.len()
            + self.pass_through.len()
            + self.self_loops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_network(
        transfers: &[(&str, &str, f64)],
        tiers: &[RiskTier],
        settings: NetworkSettings,
    ) -> TransactionNetwork {
        let txs: Vec<Transaction> = transfers
            .iter()
            .enumerate()
            .map(|(i, (from, to, amount))| {
                let mut tx = Transaction::new(format!("TXN-{:03}", i), *from, *to);
                tx.amount = Some(*amount);
                tx
            })
            .collect();
        let dataset = TransactionDataset::new(txs).unwrap();
        let records: Vec<CompositeRiskRecord> = dataset
            .iter()
            .enumerate()
            .map(|(i, tx)| {
                let tier = tiers.get(i).copied().unwrap_or(RiskTier::Low);
                CompositeRiskRecord {
                    transaction_id: tx.transaction_id.clone(),
                    total_score: match tier {
                        RiskTier::Low => 0,
                        RiskTier::Medium => 30,
                        RiskTier::High => 60,
                        RiskTier::Critical => 90,
                    },
                    tier,
                    triggered_indicators: Vec::new(),
                }
            })
            .collect();
        NetworkBuilder::new(settings, TierScale::default())
            .build(&dataset, &records)
            .unwrap()
    }

    fn simple(transfers: &[(&str, &str, f64)]) -> TransactionNetwork {
        create_network(transfers, &[], NetworkSettings::default())
    }

    #[test]
    fn test_parallel_transactions_collapse() {
        let network = simple(&[("A", "B", 1000.0), ("A", "B", 500.0), ("B", "C", 750.0)]);

        assert_eq!(network.node_count(), 3);
        assert_eq!(network.edge_count(), 2);
        let edge = network.edge("A", "B").unwrap();
        assert_eq!(edge.transaction_count, 2);
        assert_eq!(edge.volume_cents, 150_000);
        assert_eq!(edge.transaction_ids, vec!["TXN-000", "TXN-001"]);

        let stats = network.stats();
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(stats.total_volume, 2250.0);
    }

    #[test]
    fn test_node_aggregates() {
        let network = simple(&[("A", "B", 1000.0), ("A", "C", 2000.0)]);

        let a = network.node("A").unwrap();
        assert_eq!(a.outflow_cents, 300_000);
        assert_eq!(a.out_degree, 2);
        assert_eq!(a.role, NodeRole::Sender);
        assert_eq!(network.node("B").unwrap().role, NodeRole::Beneficiary);
    }

    #[test]
    fn test_self_loop_kept_and_flagged() {
        let network = simple(&[("A", "A", 400.0), ("A", "B", 100.0)]);

        assert_eq!(network.node_count(), 2);
        let edge = network.edge("A", "A").unwrap();
        assert!(edge.self_loop);
        assert_eq!(network.stats().self_loop_count, 1);

        let a = network.node("A").unwrap();
        assert_eq!(a.role, NodeRole::Both);
        assert_eq!(a.transaction_count, 2);
        assert_eq!(a.total_volume, 500.0);

        let patterns = network.detect_patterns(&NetworkSettings::default());
        assert_eq!(patterns.self_loops, vec!["A".to_string()]);
    }

    #[test]
    fn test_node_risk_is_max_tier() {
        let network = create_network(
            &[("A", "B", 100.0), ("A", "C", 100.0), ("D", "C", 100.0)],
            &[RiskTier::Low, RiskTier::Critical, RiskTier::Medium],
            NetworkSettings::default(),
        );

        assert_eq!(network.node("A").unwrap().risk_tier, RiskTier::Critical);
        assert_eq!(network.node("B").unwrap().risk_tier, RiskTier::Low);
        assert_eq!(network.node("C").unwrap().risk_tier, RiskTier::Critical);
        assert_eq!(network.node("C").unwrap().high_risk_transactions, 1);
        assert_eq!(network.edge("A", "C").unwrap().high_risk_transactions, 1);
    }

    #[test]
    fn test_node_risk_mean_score() {
        let settings = NetworkSettings {
            node_risk: NodeRiskAggregation::MeanScore,
            ..NetworkSettings::default()
        };
        let network = create_network(
            &[("A", "B", 100.0), ("A", "C", 100.0)],
            &[RiskTier::Low, RiskTier::Critical],
            settings,
        );

        let a = network.node("A").unwrap();
        assert_eq!(a.max_tier, RiskTier::Critical);
        assert_eq!(a.mean_score, 45.0);
        assert_eq!(a.risk_tier, RiskTier::Medium);
    }

    #[test]
    fn test_filters_skip_transactions() {
        let settings = NetworkSettings {
            min_amount: Some(500.0),
            ..NetworkSettings::default()
        };
        let network = create_network(&[("A", "B", 1000.0), ("C", "D", 100.0)], &[], settings);

        assert_eq!(network.node_count(), 2);
        assert!(network.node("C").is_none());
        assert_eq!(network.stats().filtered_transactions, 1);
    }

    #[test]
    fn test_circular_flow_detection() {
        let network = simple(&[("A", "B", 1000.0), ("B", "C", 1000.0), ("C", "A", 1000.0)]);

        let circles = network.detect_circular_flows(5);
        assert_eq!(circles.len(), 1);
        assert_eq!(circles[0].accounts, vec!["A", "B", "C", "A"]);
        assert_eq!(circles[0].total_volume, 3000.0);

        assert!(network.detect_circular_flows(2).is_empty());
    }

    #[test]
    fn test_funnel_account() {
        let mut transfers: Vec<(String, &str, f64)> = (0..10)
            .map(|i| (format!("SOURCE{}", i), "FUNNEL", 1000.0))
            .collect();
        transfers.push(("FUNNEL".to_string(), "DEST", 9500.0));
        let borrowed: Vec<(&str, &str, f64)> = transfers
            .iter()
            .map(|(from, to, amount)| (from.as_str(), *to, *amount))
            .collect();
        let network = simple(&borrowed);

        let funnels = network.detect_funnel_accounts(&NetworkSettings::default());
        assert_eq!(funnels.len(), 1);
        assert_eq!(funnels[0].account_id, "FUNNEL");
        assert_eq!(funnels[0].incoming_count, 10);
    }

    #[test]
    fn test_distributor_account() {
        let mut transfers: Vec<(&str, String, f64)> = vec![("ORIGIN", "HUB".to_string(), 9500.0)];
        transfers.extend((0..10).map(|i| ("HUB", format!("TARGET{}", i), 950.0)));
        let borrowed: Vec<(&str, &str, f64)> = transfers
            .iter()
            .map(|(from, to, amount)| (*from, to.as_str(), *amount))
            .collect();
        let network = simple(&borrowed);
        let settings = NetworkSettings::default();

        let distributors = network.detect_distributors(&settings);
        assert_eq!(distributors.len(), 1);
        assert_eq!(distributors[0].account_id, "HUB");
        assert_eq!(distributors[0].outgoing_count, 10);
        assert_eq!(distributors[0].incoming_count, 1);
        assert_eq!(distributors[0].pattern, SuspiciousPattern::Distributor);
        assert!(network.detect_funnel_accounts(&settings).is_empty());
    }

    #[test]
    fn test_pass_through() {
        let network = simple(&[
            ("A", "PASS", 1000.0),
            ("B", "PASS", 1000.0),
            ("PASS", "C", 1000.0),
            ("PASS", "D", 1000.0),
        ]);

        let pass_through = network.detect_pass_through();
        assert_eq!(pass_through.len(), 1);
        assert_eq!(pass_through[0].account_id, "PASS");
    }

    #[test]
    fn test_undirected_projection_merges_directions() {
        let network = simple(&[("A", "B", 1.0), ("B", "A", 1.0), ("B", "A", 1.0), ("C", "C", 1.0)]);
        let adjacency = network.undirected_adjacency();

        let a = network.node_position("A").unwrap();
        let b = network.node_position("B").unwrap();
        let c = network.node_position("C").unwrap();
        assert_eq!(adjacency[a], vec![(b, 3)]);
        assert!(adjacency[c].is_empty());
    }

    #[test]
    fn test_stage_mismatch() {
        let dataset = TransactionDataset::new(vec![Transaction::new("T1", "A", "B")]).unwrap();
        let result = NetworkBuilder::from_config(&EngineConfig::default()).build(&dataset, &[]);
        assert!(matches!(result, Err(AnalysisError::StageMismatch(_))));
    }

    #[test]
    fn test_empty_dataset_gives_empty_graph() {
        let network = NetworkBuilder::from_config(&EngineConfig::default())
            .build(&TransactionDataset::empty(), &[])
            .unwrap();
        assert_eq!(network.node_count(), 0);
        assert_eq!(network.edge_count(), 0);
        assert!(!network.detect_patterns(&NetworkSettings::default()).has_suspicious_activity());
    }
}
