//! Rolling-reboot scheduler: group nodes into reboot waves such that
//! no two nodes sharing a replicated instance reboot in the same wave.
//!
//! This is graph coloring over the node-conflict graph (an edge between
//! any two nodes that are primary/secondary for the same DRBD instance).
//! Three classic greedy heuristics are evaluated and the smallest color
//! count wins; ties are broken by heuristic priority (LF, then DSATUR,
//! then DColor), matching the order they're listed in below.

use crate::model::{ClusterSnapshot, NodeIdx};

/// Adjacency-list conflict graph: `edges[n]` holds every node `n` cannot
/// reboot alongside.
fn conflict_graph(snap: &ClusterSnapshot) -> Vec<Vec<NodeIdx>> {
    let mut edges = vec![Vec::new(); snap.nodes.len()];
    for n in 0..snap.nodes.len() {
        for peer in snap.drbd_peers_of(n) {
            if !edges[n].contains(&peer) {
                edges[n].push(peer);
            }
        }
    }
    for adj in &mut edges {
        adj.sort();
    }
    edges
}

/// Largest-First: sort nodes by descending degree, assign each the lowest
/// color not used by an already-colored neighbor.
fn color_largest_first(adj: &[Vec<NodeIdx>]) -> Vec<usize> {
    let n = adj.len();
    let mut order: Vec<NodeIdx> = (0..n).collect();
    order.sort_by(|&a, &b| adj[b].len().cmp(&adj[a].len()).then(a.cmp(&b)));
    greedy_color_in_order(adj, &order)
}

/// DSATUR: repeatedly pick the uncolored node with the highest "saturation"
/// (number of distinctly colored neighbors), breaking ties by degree then
/// index.
fn color_dsatur(adj: &[Vec<NodeIdx>]) -> Vec<usize> {
    let n = adj.len();
    let mut colors = vec![usize::MAX; n];
    let mut colored = 0usize;

    while colored < n {
        let mut best: Option<NodeIdx> = None;
        let mut best_sat = 0usize;
        let mut best_deg = 0usize;

        for v in 0..n {
            if colors[v] != usize::MAX {
                continue;
            }
            let mut neighbor_colors: Vec<usize> = adj[v]
                .iter()
                .filter_map(|&u| if colors[u] != usize::MAX { Some(colors[u]) } else { None })
                .collect();
            neighbor_colors.sort();
            neighbor_colors.dedup();
            let sat = neighbor_colors.len();
            let deg = adj[v].len();

            let better = match best {
                None => true,
                Some(b) => (sat, deg, std::cmp::Reverse(v)) > (best_sat, best_deg, std::cmp::Reverse(b)),
            };
            if better {
                best = Some(v);
                best_sat = sat;
                best_deg = deg;
            }
        }

        let v = best.expect("uncolored node must exist while colored < n");
        colors[v] = lowest_free_color(adj, &colors, v);
        colored += 1;
    }

    colors
}

/// DColor: unlike DSATUR, which ranks an uncolored vertex by its *own*
/// current saturation, DColor looks one step ahead and ranks it by how
/// much coloring it *now* would raise its uncolored neighbors'
/// saturation — the count of uncolored neighbors that don't already have
/// a same-colored neighbor in the color this vertex would receive. This
/// favors committing first to the vertex that tightens the most
/// constraints elsewhere, rather than the one already most constrained.
/// Ties (equal subsequent-saturation-increase, then equal degree) break
/// by smallest index.
fn color_dcolor(adj: &[Vec<NodeIdx>]) -> Vec<usize> {
    let n = adj.len();
    let mut colors = vec![usize::MAX; n];
    let mut colored = 0usize;

    while colored < n {
        let mut best: Option<NodeIdx> = None;
        let mut best_ssi = 0usize;
        let mut best_deg = 0usize;

        for v in 0..n {
            if colors[v] != usize::MAX {
                continue;
            }
            let candidate_color = lowest_free_color(adj, &colors, v);
            let ssi = adj[v]
                .iter()
                .filter(|&&u| colors[u] == usize::MAX)
                .filter(|&&u| !adj[u].iter().any(|&w| colors[w] == candidate_color))
                .count();
            let deg = adj[v].len();

            let better = match best {
                None => true,
                Some(b) => (ssi, deg, std::cmp::Reverse(v)) > (best_ssi, best_deg, std::cmp::Reverse(b)),
            };
            if better {
                best = Some(v);
                best_ssi = ssi;
                best_deg = deg;
            }
        }

        let v = best.expect("uncolored node must exist while colored < n");
        colors[v] = lowest_free_color(adj, &colors, v);
        colored += 1;
    }

    colors
}

fn lowest_free_color(adj: &[Vec<NodeIdx>], colors: &[usize], v: NodeIdx) -> usize {
    let used: Vec<usize> = adj[v]
        .iter()
        .filter_map(|&u| if colors[u] != usize::MAX { Some(colors[u]) } else { None })
        .collect();
    let mut c = 0usize;
    while used.contains(&c) {
        c += 1;
    }
    c
}

fn greedy_color_in_order(adj: &[Vec<NodeIdx>], order: &[NodeIdx]) -> Vec<usize> {
    let mut colors = vec![usize::MAX; adj.len()];
    for &v in order {
        colors[v] = lowest_free_color(adj, &colors, v);
    }
    colors
}

fn color_count(colors: &[usize]) -> usize {
    colors.iter().copied().max().map(|m| m + 1).unwrap_or(0)
}

fn waves_from_colors(colors: &[usize]) -> Vec<Vec<NodeIdx>> {
    let n_colors = color_count(colors);
    let mut waves = vec![Vec::new(); n_colors];
    for (node, &c) in colors.iter().enumerate() {
        waves[c].push(node);
    }
    for wave in &mut waves {
        wave.sort();
    }
    waves
}

/// Plan rolling-reboot waves: nodes in the same inner `Vec` may reboot
/// concurrently; waves execute in order. Runs LF, DSATUR, and DColor and
/// keeps the smallest result, breaking ties in that listed order.
pub fn plan_reboot_waves(snap: &ClusterSnapshot) -> Vec<Vec<NodeIdx>> {
    let adj = conflict_graph(snap);
    if adj.is_empty() {
        return Vec::new();
    }

    let candidates = [
        color_largest_first(&adj),
        color_dsatur(&adj),
        color_dcolor(&adj),
    ];

    let best = candidates
        .iter()
        .min_by_key(|c| color_count(c))
        .expect("candidates is non-empty");

    waves_from_colors(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::*;
    use std::collections::BTreeSet;

    #[test]
    fn independent_nodes_share_one_wave() {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
            basic_node("n3", 0, 8192, 102400),
        ];
        let snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        let waves = plan_reboot_waves(&snap);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 3);
    }

    #[test]
    fn drbd_pair_never_shares_a_wave() {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
        ];
        let mut snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        snap.instances.push(drbd_instance("i1", 0, 1, 0, 1024, 10240));
        snap.reindex();

        let waves = plan_reboot_waves(&snap);
        assert_eq!(waves.len(), 2);
        assert!(waves.iter().all(|w| w.len() == 1));
    }

    #[test]
    fn triangle_of_drbd_pairs_needs_three_waves() {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
            basic_node("n3", 0, 8192, 102400),
        ];
        let mut snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        snap.instances.push(drbd_instance("i1", 0, 1, 0, 1024, 10240));
        snap.instances.push(drbd_instance("i2", 1, 2, 0, 1024, 10240));
        snap.instances.push(drbd_instance("i3", 2, 0, 0, 1024, 10240));
        snap.reindex();

        let waves = plan_reboot_waves(&snap);
        assert_eq!(waves.len(), 3);
        let total: usize = waves.iter().map(|w| w.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn dcolor_breaks_ties_by_smallest_index() {
        // A single edge: both endpoints tie on (sat, deg) at every step, so
        // the tie-break alone decides which one is colored first.
        let adj = vec![vec![1], vec![0]];
        let colors = color_dcolor(&adj);
        assert_eq!(colors, vec![0, 1]);
    }

    #[test]
    fn empty_cluster_plans_no_waves() {
        let snap = ClusterSnapshot::new(1, vec![], vec![], vec![], BTreeSet::new());
        assert!(plan_reboot_waves(&snap).is_empty());
    }
}
