//! The shared game tree.
//!
//! Nodes live in a contiguous arena indexed by `u32`. Statistics inside
//! the nodes are atomic and never need the arena lock; the `RwLock` only
//! guards arena growth, so writers (child materialisation) hold it for a
//! single push. `reset_to_position` is the one mechanism by which search
//! statistics survive across consecutive UCI `position` commands.

use crate::node::{Node, NO_NODE};
use engine_core::{format_move, parse_move, Position, PositionError, PositionHistory};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use tracing::debug;

struct Head {
    root: u32,
    start_fen: String,
    /// Move strings from `start_fen` to the head, in legacy encoding.
    moves: Vec<String>,
    history: PositionHistory,
}

/// The search tree shared by every worker.
pub struct NodeTree {
    nodes: RwLock<Vec<Node>>,
    head: Mutex<Head>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        let root = Position::startpos();
        Self {
            nodes: RwLock::new(vec![Node::default()]),
            head: Mutex::new(Head {
                root: 0,
                start_fen: root.fen(),
                moves: Vec::new(),
                history: PositionHistory::starting_from(root),
            }),
        }
    }

    /// Point the tree at the position reached by `moves` from `fen`.
    ///
    /// Returns `true` (same game) when the requested path is a
    /// prefix-extension of the current head, in which case the subtree
    /// below the new head is kept and its statistics are reused. Any
    /// other request rebuilds from scratch.
    pub fn reset_to_position(
        &self,
        fen: &str,
        moves: &[String],
    ) -> Result<bool, PositionError> {
        let mut history = PositionHistory::starting_from(Position::from_fen(fen)?);
        let mut parsed = Vec::with_capacity(moves.len());
        for s in moves {
            let mv = parse_move(history.last(), s)?;
            // Normalise to legacy encoding so prefix comparison doesn't
            // depend on which castling form the GUI sent.
            parsed.push(format_move(&mv, false));
            history.append(&mv);
        }

        let mut head = self.head.lock();
        let same_game = head.start_fen == fen
            && parsed.len() >= head.moves.len()
            && parsed[..head.moves.len()] == head.moves[..];

        if same_game {
            let tail = &parsed[head.moves.len()..];
            let new_root = self.advance_root(head.root, &head.history, tail);
            self.compact(new_root);
            head.root = 0;
            head.moves = parsed;
            head.history = history;
        } else {
            debug!("position is not a continuation, dropping tree");
            *self.nodes.write() = vec![Node::default()];
            head.root = 0;
            head.start_fen = fen.to_string();
            head.moves = parsed;
            head.history = history;
        }
        Ok(same_game)
    }

    /// Follow `tail` moves down from `root`, materialising empty nodes
    /// where the subtree has never been visited.
    fn advance_root(&self, root: u32, root_history: &PositionHistory, tail: &[String]) -> u32 {
        let mut idx = root;
        let mut history = root_history.clone();
        for s in tail {
            let Ok(mv) = parse_move(history.last(), s) else {
                break;
            };
            let wanted = format_move(&mv, false);
            let edge_pos = {
                let nodes = self.nodes.read();
                nodes[idx as usize].raw_edges().and_then(|edges| {
                    edges
                        .iter()
                        .position(|e| format_move(e.mv(), false) == wanted)
                })
            };
            match edge_pos {
                Some(i) => {
                    idx = self.materialize_child(idx, i);
                }
                None => {
                    // The subtree was never expanded this far; start a
                    // fresh node for the new head.
                    let mut nodes = self.nodes.write();
                    nodes.push(Node::default());
                    idx = (nodes.len() - 1) as u32;
                }
            }
            history.append(&mv);
        }
        idx
    }

    /// Rebuild the arena so it contains exactly the subtree rooted at
    /// `root`, which becomes index 0. Statistics are preserved; orphaned
    /// siblings are dropped.
    fn compact(&self, root: u32) {
        let mut nodes = self.nodes.write();

        // Pass 1: breadth-first order of reachable old indices.
        let mut order: Vec<u32> = vec![root];
        let mut remap = vec![NO_NODE; nodes.len()];
        remap[root as usize] = 0;
        let mut queue = VecDeque::from([root]);
        while let Some(old) = queue.pop_front() {
            if let Some(edges) = nodes[old as usize].raw_edges() {
                for edge in edges {
                    if let Some(child) = edge.child() {
                        if remap[child as usize] == NO_NODE {
                            remap[child as usize] = order.len() as u32;
                            order.push(child);
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        // Pass 2: move the nodes into their new slots and rewrite the
        // child pointers.
        let mut slots: Vec<Option<Node>> = std::mem::take(&mut *nodes)
            .into_iter()
            .map(Some)
            .collect();
        let mut fresh = Vec::with_capacity(order.len());
        for &old_idx in &order {
            let node = slots[old_idx as usize]
                .take()
                .expect("BFS order visits each node once");
            if let Some(edges) = node.raw_edges() {
                for edge in edges {
                    match edge.child() {
                        Some(child) => edge.remap_child(remap[child as usize]),
                        None => edge.remap_child(NO_NODE),
                    }
                }
            }
            fresh.push(node);
        }
        *nodes = fresh;
    }

    /// Drop the whole tree, keeping the head position.
    pub fn clear(&self) {
        let mut head = self.head.lock();
        *self.nodes.write() = vec![Node::default()];
        head.root = 0;
    }

    /// The position at the head of the tree.
    pub fn head_position(&self) -> Position {
        self.head.lock().history.last().clone()
    }

    /// Root index and the history leading to it, snapshotted for one
    /// search.
    pub fn head(&self) -> (u32, PositionHistory) {
        let head = self.head.lock();
        (head.root, head.history.clone())
    }

    /// Arena access for the search. Readers take the shared lock for the
    /// duration of a descent; all node mutation goes through atomics.
    #[inline]
    pub fn arena(&self) -> &RwLock<Vec<Node>> {
        &self.nodes
    }

    /// Create (or fetch) the child node behind `edge_idx` of `parent`.
    pub fn materialize_child(&self, parent: u32, edge_idx: usize) -> u32 {
        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes[parent as usize]
            .raw_edges()
            .and_then(|edges| edges[edge_idx].child())
        {
            return existing;
        }
        nodes.push(Node::default());
        let idx = (nodes.len() - 1) as u32;
        nodes[parent as usize]
            .raw_edges()
            .expect("parent must be expanded to materialise a child")[edge_idx]
            .set_child(idx)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Edge;
    use engine_core::STARTPOS_FEN;

    fn strings(moves: &[&str]) -> Vec<String> {
        moves.iter().map(|s| s.to_string()).collect()
    }

    /// Expand a node with uniform priors, the way the search would.
    fn expand_uniform(tree: &NodeTree, idx: u32, history: &PositionHistory) {
        let legal = history.last().legal_moves();
        let p = 1.0 / legal.len() as f32;
        let edges: Vec<Edge> = legal.iter().map(|m| Edge::new(m.clone(), p)).collect();
        let nodes = tree.arena().read();
        assert!(nodes[idx as usize].try_begin_expansion());
        nodes[idx as usize].publish_edges(edges.into_boxed_slice());
    }

    #[test]
    fn identical_reset_is_same_game() {
        let tree = NodeTree::new();
        assert!(tree.reset_to_position(STARTPOS_FEN, &[]).unwrap());
        assert!(tree.reset_to_position(STARTPOS_FEN, &[]).unwrap());
    }

    #[test]
    fn extension_reuses_subtree_statistics() {
        let tree = NodeTree::new();
        tree.reset_to_position(STARTPOS_FEN, &[]).unwrap();

        let (root, history) = tree.head();
        expand_uniform(&tree, root, &history);

        // Visit the e2e4 child and give it some statistics.
        let edge_idx = {
            let nodes = tree.arena().read();
            nodes[root as usize]
                .raw_edges()
                .unwrap()
                .iter()
                .position(|e| format_move(e.mv(), false) == "e2e4")
                .unwrap()
        };
        let child = tree.materialize_child(root, edge_idx);
        {
            let nodes = tree.arena().read();
            nodes[child as usize].add_virtual_loss();
            nodes[child as usize].apply_backup(0.25, 0.5, 3.0);
        }

        let same = tree
            .reset_to_position(STARTPOS_FEN, &strings(&["e2e4"]))
            .unwrap();
        assert!(same);
        let (new_root, _) = tree.head();
        let nodes = tree.arena().read();
        assert_eq!(nodes[new_root as usize].n(), 1);
        assert!((nodes[new_root as usize].q() - 0.25).abs() < 1e-9);
        // Siblings of e2e4 were dropped by compaction.
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn non_continuation_rebuilds() {
        let tree = NodeTree::new();
        tree.reset_to_position(STARTPOS_FEN, &strings(&["e2e4", "e7e5"]))
            .unwrap();
        // Takeback: shorter than the current head.
        let same = tree
            .reset_to_position(STARTPOS_FEN, &strings(&["e2e4"]))
            .unwrap();
        assert!(!same);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn different_fen_rebuilds() {
        let tree = NodeTree::new();
        tree.reset_to_position(STARTPOS_FEN, &[]).unwrap();
        let same = tree
            .reset_to_position("7k/8/8/8/8/8/8/K7 w - - 0 1", &[])
            .unwrap();
        assert!(!same);
        assert_eq!(
            tree.head_position().fen(),
            "7k/8/8/8/8/8/8/K7 w - - 0 1"
        );
    }

    #[test]
    fn head_position_follows_moves() {
        let tree = NodeTree::new();
        tree.reset_to_position(STARTPOS_FEN, &strings(&["e2e4"]))
            .unwrap();
        assert_eq!(
            tree.head_position().side_to_move(),
            engine_core::Color::Black
        );
    }

    #[test]
    fn chess960_castling_form_matches_legacy_prefix() {
        let fen = "8/8/8/8/8/8/6k1/4K2R w K - 0 1";
        let tree = NodeTree::new();
        tree.reset_to_position(fen, &strings(&["e1g1"])).unwrap();
        // The same path given in king-takes-rook form is the same game.
        assert!(tree.reset_to_position(fen, &strings(&["e1h1"])).unwrap());
    }

    #[test]
    fn clear_drops_nodes_but_keeps_head() {
        let tree = NodeTree::new();
        tree.reset_to_position(STARTPOS_FEN, &strings(&["e2e4"]))
            .unwrap();
        let (root, history) = tree.head();
        expand_uniform(&tree, root, &history);
        tree.materialize_child(root, 0);
        assert!(tree.node_count() > 1);
        tree.clear();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(
            tree.head_position().side_to_move(),
            engine_core::Color::Black
        );
    }

    #[test]
    fn materialize_child_is_idempotent() {
        let tree = NodeTree::new();
        let (root, history) = tree.head();
        expand_uniform(&tree, root, &history);
        let a = tree.materialize_child(root, 3);
        let b = tree.materialize_child(root, 3);
        assert_eq!(a, b);
        assert_eq!(tree.node_count(), 2);
    }
}
