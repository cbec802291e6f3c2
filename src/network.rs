//! Multi-site network grouping.
//!
//! One hash group-by over the scored spine, then a per-group reduction: no
//! pairwise comparison anywhere, so runtime stays linear in organization
//! count. A shared brand name alone is not enough to materialize a Network;
//! the group must span multiple states or have at least three same-state
//! sites, which suppresses the coincidental two-clinic false positives.

use std::collections::{BTreeSet, HashMap};

use crate::common::stable_hash;
use crate::spine::Organization;

#[derive(Debug, Clone)]
pub struct Network {
    pub network_id: String,
    pub normalized_network_name: String,
    /// Members in spine order; always >= 2.
    pub member_org_ids: Vec<String>,
    pub state_set: BTreeSet<String>,
    /// Member with the highest individual total score.
    pub anchor_org_id: String,
    /// Site-count-weighted average of member total scores (weight 1 for
    /// members without a site count).
    pub network_score: f64,
}

/// Cluster organizations sharing a normalized brand name into Networks.
///
/// `total_scores` maps org_id -> total_score for every spine organization.
pub fn group_networks(
    organizations: &[Organization],
    total_scores: &HashMap<String, f64>,
) -> Vec<Network> {
    let mut groups: HashMap<&str, Vec<&Organization>> = HashMap::new();
    for org in organizations {
        if org.normalized_name.is_empty() {
            continue;
        }
        groups.entry(org.normalized_name.as_str()).or_default().push(org);
    }

    let mut networks = Vec::new();
    for (normalized_name, members) in groups {
        if members.len() < 2 {
            continue;
        }

        let state_set: BTreeSet<String> = members
            .iter()
            .filter(|org| !org.state_code.is_empty())
            .map(|org| org.state_code.clone())
            .collect();
        let multi_state = state_set.len() >= 2;
        let same_state_cluster = state_set.len() == 1 && members.len() >= 3;
        if !(multi_state || same_state_cluster) {
            continue;
        }

        let mut weighted_sum = 0.0f64;
        let mut weight_total = 0.0f64;
        let mut anchor: Option<(&str, f64)> = None;
        for org in &members {
            let score = total_scores.get(&org.org_id).copied().unwrap_or_default();
            let weight = f64::from(org.site_count.unwrap_or(1).max(1));
            weighted_sum += score * weight;
            weight_total += weight;
            let is_better = anchor.map(|(_, best)| score > best).unwrap_or(true);
            if is_better {
                anchor = Some((org.org_id.as_str(), score));
            }
        }

        let (anchor_org_id, _) = anchor.expect("group has >= 2 members");
        networks.push(Network {
            network_id: format!("net_{}", stable_hash(normalized_name)),
            normalized_network_name: normalized_name.to_string(),
            member_org_ids: members.iter().map(|org| org.org_id.clone()).collect(),
            state_set,
            anchor_org_id: anchor_org_id.to_string(),
            network_score: if weight_total > 0.0 {
                weighted_sum / weight_total
            } else {
                0.0
            },
        });
    }

    // HashMap iteration order is not stable; sort for reproducible output.
    networks.sort_by(|a, b| a.normalized_network_name.cmp(&b.normalized_network_name));
    networks
}

/// org_id -> (network_id, is_anchor) lookup for the organization table.
pub fn membership_index(networks: &[Network]) -> HashMap<String, (String, bool)> {
    let mut index = HashMap::new();
    for network in networks {
        for member in &network.member_org_ids {
            index.insert(
                member.clone(),
                (network.network_id.clone(), member == &network.anchor_org_id),
            );
        }
    }
    index
}
