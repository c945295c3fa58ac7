//! Community detection
//!
//! Partitions the undirected projection of the transaction network and ranks
//! the resulting communities by risk. Label propagation visits nodes in an
//! order shuffled by a seeded RNG, so identical input and seed always give the
//! same partition. Greedy modularity needs no seed: ties between candidate
//! merges go to the pair with the smallest node ids.

use crate::aggregation::RiskTier;
use crate::config::{CommunityMethod, CommunitySettings, EngineConfig};
use crate::dataset::from_cents;
use crate::network_analysis::{NodeRole, TransactionNetwork};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One group of closely connected identities
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Community {
    /// Position in smallest-member-id order
    pub id: usize,
    /// 1 is the riskiest community
    pub rank: usize,
    pub name: String,
    /// Member ids, sorted
    pub members: Vec<String>,
    pub sender_count: usize,
    pub beneficiary_count: usize,
    pub dominant_country: Option<String>,
    /// Edges with both ends inside the community
    pub internal_edges: usize,
    /// Edges crossing the community boundary
    pub external_edges: usize,
    pub transaction_count: usize,
    pub volume_cents: i64,
    pub volume: f64,
    /// High-risk transactions on internal edges
    pub high_risk_transactions: usize,
    pub max_tier: RiskTier,
}

impl Community {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Partition of the network
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CommunityAssignment {
    /// Node id to community id
    pub assignment: BTreeMap<String, usize>,
    /// Communities ordered by id
    pub communities: Vec<Community>,
    pub iterations: usize,
}

impl CommunityAssignment {
    pub fn community_of(&self, node: &str) -> Option<&Community> {
        self.assignment
            .get(node)
            .and_then(|&id| self.communities.get(id))
    }

    /// Communities from riskiest to least risky
    pub fn ranked(&self) -> Vec<&Community> {
        let mut ranked: Vec<&Community> = self.communities.iter().collect();
        ranked.sort_by_key(|c| c.rank);
        ranked
    }

    pub fn len(&self) -> usize {
        self.communities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }
}

/// Partitions a [`TransactionNetwork`] into communities
#[derive(Debug, Clone)]
pub struct CommunityDetector {
    settings: CommunitySettings,
}

impl CommunityDetector {
    pub fn new(settings: CommunitySettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.community.clone())
    }

    pub fn detect(&self, network: &TransactionNetwork) -> CommunityAssignment {
        if network.is_empty() {
            return CommunityAssignment::default();
        }

        let adjacency = network.undirected_adjacency();
        let (labels, iterations) = match self.settings.method {
            CommunityMethod::LabelPropagation => self.label_propagation(&adjacency),
            CommunityMethod::ConnectedComponents => (connected_components(&adjacency), 0),
            CommunityMethod::GreedyModularity => greedy_modularity(&adjacency),
        };

        let assignment = build_assignment(network, &labels, iterations);
        info!(
            method = ?self.settings.method,
            communities = assignment.len(),
            iterations,
            "community detection complete"
        );
        assignment
    }

    /// Asynchronous label propagation; ties keep the current label, otherwise
    /// the smallest label wins
    fn label_propagation(&self, adjacency: &[Vec<(usize, u64)>]) -> (Vec<usize>, usize) {
        let mut labels: Vec<usize> = (0..adjacency.len()).collect();
        let mut order: Vec<usize> = (0..adjacency.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let mut iterations = 0;

        while iterations < self.settings.max_iterations {
            iterations += 1;
            order.shuffle(&mut rng);
            let mut changed = false;

            for &node in &order {
                if adjacency[node].is_empty() {
                    continue;
                }
                let mut weights: BTreeMap<usize, u64> = BTreeMap::new();
                for &(neighbor, weight) in &adjacency[node] {
                    *weights.entry(labels[neighbor]).or_insert(0) += weight;
                }
                let Some(best) = weights.values().copied().max() else {
                    continue;
                };
                let current = labels[node];
                if weights.get(&current) == Some(&best) {
                    continue;
                }
                if let Some((&label, _)) = weights.iter().find(|&(_, &w)| w == best) {
                    labels[node] = label;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        debug!(iterations, "label propagation converged");
        (labels, iterations)
    }
}

fn connected_components(adjacency: &[Vec<(usize, u64)>]) -> Vec<usize> {
    let mut labels = vec![usize::MAX; adjacency.len()];
    for start in 0..adjacency.len() {
        if labels[start] != usize::MAX {
            continue;
        }
        labels[start] = start;
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &(neighbor, _) in &adjacency[node] {
                if labels[neighbor] == usize::MAX {
                    labels[neighbor] = start;
                    stack.push(neighbor);
                }
            }
        }
    }
    labels
}

/// Agglomerative modularity maximisation; returns labels and the number of merges.
///
/// A merge of `a` and `b` is scored `2m * w_ab - d_a * d_b`, the modularity
/// gain scaled by `2m^2`, so every comparison is exact. The best positive merge
/// is applied until none is left. Each label is its community's smallest node.
fn greedy_modularity(adjacency: &[Vec<(usize, u64)>]) -> (Vec<usize>, usize) {
    let n = adjacency.len();
    let mut labels: Vec<usize> = (0..n).collect();
    let mut degrees: Vec<i128> = adjacency
        .iter()
        .map(|neighbors| neighbors.iter().map(|&(_, w)| i128::from(w)).sum())
        .collect();
    let two_m: i128 = degrees.iter().sum();
    if two_m == 0 {
        return (labels, 0);
    }
    let mut links: Vec<BTreeMap<usize, i128>> = adjacency
        .iter()
        .map(|neighbors| neighbors.iter().map(|&(c, w)| (c, i128::from(w))).collect())
        .collect();

    let mut merges = 0;
    loop {
        let mut best: Option<(i128, usize, usize)> = None;
        for a in 0..n {
            for (&c, &w) in links[a].range(a + 1..) {
                let score = two_m * w - degrees[a] * degrees[c];
                if score > 0 && best.map_or(true, |(top, _, _)| score > top) {
                    best = Some((score, a, c));
                }
            }
        }
        let Some((_, a, b)) = best else {
            break;
        };

        for (c, w) in std::mem::take(&mut links[b]) {
            links[c].remove(&b);
            if c == a {
                continue;
            }
            *links[a].entry(c).or_insert(0) += w;
            *links[c].entry(a).or_insert(0) += w;
        }
        degrees[a] += degrees[b];
        degrees[b] = 0;
        for label in labels.iter_mut().filter(|label| **label == b) {
            *label = a;
        }
        merges += 1;
    }

    debug!(merges, "greedy modularity finished");
    (labels, merges)
}

fn build_assignment(network: &TransactionNetwork, labels: &[usize], iterations: usize) -> CommunityAssignment {
    let nodes = network.nodes();

    // Nodes are sorted by id, so the first member seen is the smallest
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(node);
    }
    let mut ordered: Vec<Vec<usize>> = groups.into_values().collect();
    ordered.sort_by_key(|members| members[0]);

    let mut community_of = vec![0usize; nodes.len()];
    for (id, members) in ordered.iter().enumerate() {
        for &node in members {
            community_of[node] = id;
        }
    }

    let mut communities: Vec<Community> = ordered
        .iter()
        .enumerate()
        .map(|(id, members)| {
            let mut countries: BTreeMap<&str, usize> = BTreeMap::new();
            let mut senders = 0;
            let mut beneficiaries = 0;
            let mut max_tier = RiskTier::Low;
            for &node in members {
                let node = &nodes[node];
                if matches!(node.role, NodeRole::Sender | NodeRole::Both) {
                    senders += 1;
                }
                if matches!(node.role, NodeRole::Beneficiary | NodeRole::Both) {
                    beneficiaries += 1;
                }
                max_tier = max_tier.max(node.risk_tier);
                if let Some(country) = node.country.as_deref() {
                    *countries.entry(country).or_insert(0) += 1;
                }
            }
            let dominant_country = countries
                .iter()
                .fold(None::<(&str, usize)>, |best, (&country, &count)| match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((country, count)),
                })
                .map(|(country, _)| country.to_string());

            Community {
                id,
                rank: 0,
                name: format!(
                    "{} ({} senders, {} beneficiaries)",
                    dominant_country.as_deref().unwrap_or("mixed"),
                    senders,
                    beneficiaries
                ),
                members: members.iter().map(|&n| nodes[n].id.clone()).collect(),
                sender_count: senders,
                beneficiary_count: beneficiaries,
                dominant_country,
                internal_edges: 0,
                external_edges: 0,
                transaction_count: 0,
                volume_cents: 0,
                volume: 0.0,
                high_risk_transactions: 0,
                max_tier,
            }
        })
        .collect();

    for edge in network.edges() {
        let (Some(source), Some(target)) = (
            network.node_position(&edge.source),
            network.node_position(&edge.target),
        ) else {
            continue;
        };
        let (a, b) = (community_of[source], community_of[target]);
        if a == b {
            let community = &mut communities[a];
            community.internal_edges += 1;
            community.transaction_count += edge.transaction_count;
            community.volume_cents = community.volume_cents.saturating_add(edge.volume_cents);
            community.high_risk_transactions += edge.high_risk_transactions;
        } else {
            communities[a].external_edges += 1;
            communities[b].external_edges += 1;
        }
    }

    for community in &mut communities {
        community.volume = from_cents(community.volume_cents);
    }

    let mut by_risk: Vec<usize> = (0..communities.len()).collect();
    by_risk.sort_by(|&x, &y| {
        let (a, b) = (&communities[x], &communities[y]);
        b.high_risk_transactions
            .cmp(&a.high_risk_transactions)
            .then(b.max_tier.cmp(&a.max_tier))
            .then(b.volume_cents.cmp(&a.volume_cents))
            .then(a.id.cmp(&b.id))
    });
    for (position, &index) in by_risk.iter().enumerate() {
        communities[index].rank = position + 1;
    }

    let assignment = nodes
        .iter()
        .enumerate()
        .map(|(node, n)| (n.id.clone(), community_of[node]))
        .collect();

    CommunityAssignment {
        assignment,
        communities,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::CompositeRiskRecord;
    use crate::config::{NetworkSettings, TierScale};
    use crate::dataset::{Transaction, TransactionDataset};
    use crate::network_analysis::NetworkBuilder;
    use std::collections::BTreeSet;

    fn create_network(transfers: &[(&str, &str, f64, RiskTier)]) -> TransactionNetwork {
        let txs: Vec<Transaction> = transfers
            .iter()
            .enumerate()
            .map(|(i, (from, to, amount, _))| {
                let mut tx = Transaction::new(format!("TXN-{:03}", i), *from, *to);
                tx.amount = Some(*amount);
                tx
            })
            .collect();
        let dataset = TransactionDataset::new(txs).unwrap();
        let records: Vec<CompositeRiskRecord> = dataset
            .iter()
            .zip(transfers)
            .map(|(tx, (_, _, _, tier))| CompositeRiskRecord {
                transaction_id: tx.transaction_id.clone(),
                total_score: 0,
                tier: *tier,
                triggered_indicators: Vec::new(),
            })
            .collect();
        NetworkBuilder::new(NetworkSettings::default(), TierScale::default())
            .build(&dataset, &records)
            .unwrap()
    }

    /// Two dense triangles joined by one light edge, plus an isolated self-loop
    fn two_clusters() -> TransactionNetwork {
        use RiskTier::*;
        create_network(&[
            ("A1", "A2", 100.0, Low),
            ("A2", "A3", 100.0, Low),
            ("A3", "A1", 100.0, Low),
            ("A1", "A2", 100.0, Low),
            ("A2", "A3", 100.0, Low),
            ("B1", "B2", 5000.0, High),
            ("B2", "B3", 5000.0, Critical),
            ("B3", "B1", 5000.0, Low),
            ("B1", "B2", 5000.0, Low),
            ("B2", "B3", 5000.0, Low),
            ("A3", "B1", 10.0, Low),
            ("Z", "Z", 50.0, Low),
        ])
    }

    fn detector(method: CommunityMethod, seed: u64) -> CommunityDetector {
        CommunityDetector::new(CommunitySettings {
            method,
            seed,
            max_iterations: 100,
        })
    }

    #[test]
    fn test_every_node_in_exactly_one_community() {
        let network = two_clusters();
        let result = detector(CommunityMethod::LabelPropagation, 42).detect(&network);

        assert_eq!(result.assignment.len(), network.node_count());
        let mut seen = BTreeSet::new();
        for community in &result.communities {
            for member in &community.members {
                assert!(seen.insert(member.clone()), "{} in two communities", member);
                assert_eq!(result.assignment[member], community.id);
            }
        }
        let all: BTreeSet<String> = network.nodes().iter().map(|n| n.id.clone()).collect();
        assert_eq!(seen, all);
    }

    #[test]
    fn test_label_propagation_separates_clusters() {
        let network = two_clusters();
        let result = detector(CommunityMethod::LabelPropagation, 42).detect(&network);

        let a = result.assignment["A1"];
        let b = result.assignment["B1"];
        assert_ne!(a, b);
        assert_eq!(result.assignment["A2"], a);
        assert_eq!(result.assignment["A3"], a);
        assert_eq!(result.assignment["B2"], b);
        assert_eq!(result.assignment["B3"], b);
    }

    #[test]
    fn test_isolated_node_is_singleton() {
        let network = two_clusters();
        let result = detector(CommunityMethod::LabelPropagation, 42).detect(&network);

        let z = result.community_of("Z").unwrap();
        assert!(z.is_singleton());
        assert_eq!(z.internal_edges, 1);
    }

    #[test]
    fn test_same_seed_same_partition() {
        let network = two_clusters();
        let first = detector(CommunityMethod::LabelPropagation, 7).detect(&network);
        let second = detector(CommunityMethod::LabelPropagation, 7).detect(&network);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ids_follow_smallest_member() {
        let network = two_clusters();
        let result = detector(CommunityMethod::LabelPropagation, 42).detect(&network);

        let firsts: Vec<&str> = result.communities.iter().map(|c| c.members[0].as_str()).collect();
        let mut sorted = firsts.clone();
        sorted.sort();
        assert_eq!(firsts, sorted);
        assert_eq!(result.communities[0].members[0], "A1");
    }

    #[test]
    fn test_riskiest_community_ranks_first() {
        let network = two_clusters();
        let result = detector(CommunityMethod::LabelPropagation, 42).detect(&network);

        let top = result.ranked()[0];
        assert!(top.members.contains(&"B1".to_string()));
        assert_eq!(top.rank, 1);
        assert_eq!(top.high_risk_transactions, 2);
        assert_eq!(top.max_tier, RiskTier::Critical);

        let ranks: BTreeSet<usize> = result.communities.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, (1..=result.len()).collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_connected_components() {
        let network = two_clusters();
        let result = detector(CommunityMethod::ConnectedComponents, 0).detect(&network);

        assert_eq!(result.len(), 2);
        assert_eq!(result.assignment["A1"], result.assignment["B3"]);
        assert_ne!(result.assignment["A1"], result.assignment["Z"]);
        assert_eq!(result.communities[0].external_edges, 0);
    }

    #[test]
    fn test_greedy_modularity_separates_clusters() {
        let network = two_clusters();
        let result = detector(CommunityMethod::GreedyModularity, 0).detect(&network);

        assert_eq!(result.len(), 3);
        assert_eq!(result.communities[0].members, vec!["A1", "A2", "A3"]);
        assert_eq!(result.communities[1].members, vec!["B1", "B2", "B3"]);
        assert!(result.community_of("Z").unwrap().is_singleton());
        assert_eq!(result.iterations, 4);
        assert_eq!(result.communities[0].external_edges, 1);
    }

    #[test]
    fn test_greedy_modularity_ignores_seed() {
        let network = two_clusters();
        let first = detector(CommunityMethod::GreedyModularity, 1).detect(&network);
        let second = detector(CommunityMethod::GreedyModularity, 99).detect(&network);
        assert_eq!(first, second);
    }

    #[test]
    fn test_greedy_modularity_tie_takes_smallest_pair() {
        // Two disjoint edges score the same; both merge, lowest ids first
        let adjacency = vec![
            vec![(1, 1)],
            vec![(0, 1)],
            vec![(3, 1)],
            vec![(2, 1)],
        ];
        let (labels, merges) = greedy_modularity(&adjacency);
        assert_eq!(labels, vec![0, 0, 2, 2]);
        assert_eq!(merges, 2);
    }

    #[test]
    fn test_greedy_modularity_without_edges() {
        let (labels, merges) = greedy_modularity(&[Vec::new(), Vec::new()]);
        assert_eq!(labels, vec![0, 1]);
        assert_eq!(merges, 0);
    }

    #[test]
    fn test_empty_network() {
        let result = detector(CommunityMethod::LabelPropagation, 42).detect(&TransactionNetwork::empty());
        assert!(result.is_empty());
        assert!(result.assignment.is_empty());
    }
}
