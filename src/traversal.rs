//! Dual-tree traversal: builds the sparse interaction lists that drive the
//! translation passes, stored in a compressed matrix-free form.

use log::debug;

use crate::ball::dist;
use crate::tree::{Tree, TreeNode};
use crate::types::NodeIndex;

/// Compressed adjacency of one interaction list. Observation node
/// `obs_nodes[i]` interacts with the source nodes in
/// `src_nodes[obs_src_starts[i]..obs_src_starts[i + 1]]`.
///
/// The dense matrices these entries denote are never stored; they are
/// re-evaluated through the kernel at use time.
#[derive(Debug, Clone, Default)]
pub struct MatrixFreeOp {
    pub obs_nodes: Vec<NodeIndex>,
    pub obs_src_starts: Vec<usize>,
    pub src_nodes: Vec<NodeIndex>,
}

impl MatrixFreeOp {
    /// Compress a pair list. Entries are ordered by observation-tree
    /// pre-order, then source-tree pre-order within each observation node;
    /// node indices are pre-order ranks, so sorting by index realizes the
    /// ordering contract.
    fn from_pairs(mut pairs: Vec<(NodeIndex, NodeIndex)>) -> MatrixFreeOp {
        pairs.sort_unstable();

        let mut obs_nodes = Vec::new();
        let mut obs_src_starts = Vec::new();
        let mut src_nodes = Vec::with_capacity(pairs.len());
        for (obs, src) in pairs {
            if obs_nodes.last() != Some(&obs) {
                obs_nodes.push(obs);
                obs_src_starts.push(src_nodes.len());
            }
            src_nodes.push(src);
        }
        obs_src_starts.push(src_nodes.len());

        MatrixFreeOp {
            obs_nodes,
            obs_src_starts,
            src_nodes,
        }
    }

    pub fn n_entries(&self) -> usize {
        self.src_nodes.len()
    }

    /// Source nodes of the `i`-th row.
    pub fn row(&self, i: usize) -> &[NodeIndex] {
        &self.src_nodes[self.obs_src_starts[i]..self.obs_src_starts[i + 1]]
    }

    /// Iterate `(obs_node, sources)` rows.
    pub fn rows(&self) -> impl Iterator<Item = (NodeIndex, &[NodeIndex])> + '_ {
        self.obs_nodes
            .iter()
            .enumerate()
            .map(move |(i, &obs)| (obs, self.row(i)))
    }

    /// Map from observation node index to its row, for sweeps that walk the
    /// node array directly.
    pub fn row_lookup(&self, n_nodes: usize) -> Vec<Option<usize>> {
        let mut lookup = vec![None; n_nodes];
        for (i, &obs) in self.obs_nodes.iter().enumerate() {
            lookup[obs] = Some(i);
        }
        lookup
    }
}

/// The four interaction lists produced by the dual traversal.
#[derive(Debug, Clone, Default)]
pub struct InteractionLists {
    /// Leaf-leaf direct interactions.
    pub p2p: MatrixFreeOp,
    /// Farfield multipole-to-local interactions.
    pub m2l: MatrixFreeOp,
    /// Source leaf delivered directly to an observation local expansion.
    pub p2l: MatrixFreeOp,
    /// Source multipole delivered directly to observation leaf points.
    pub m2p: MatrixFreeOp,
}

/// Multipole acceptance test for a node pair.
///
/// The distance form `d > (r_obs + r_src) / θ` implies the ratio form
/// `max(r) / (d − min(r)) < θ` for θ < 1; both are required, keeping the
/// stricter behavior at the boundary.
pub fn well_separated<const D: usize>(obs: &TreeNode<D>, src: &TreeNode<D>, mac: f64) -> bool {
    let d = dist(&obs.bounds.center, &src.bounds.center);
    let r_obs = obs.bounds.radius;
    let r_src = src.bounds.radius;
    if d * mac <= r_obs + r_src {
        return false;
    }
    let (r_max, r_min) = if r_obs >= r_src {
        (r_obs, r_src)
    } else {
        (r_src, r_obs)
    };
    r_max < mac * (d - r_min)
}

/// Build the interaction lists for an observation/source tree pair.
///
/// `surface_size` is the translation-surface point count: a leaf holding
/// fewer points than that is cheaper to handle directly than through an
/// expansion, which is what routes well-separated pairs into the P2L, M2P
/// and P2P lists instead of M2L.
pub fn dual_traversal<const D: usize>(
    obs_tree: &Tree<D>,
    src_tree: &Tree<D>,
    mac: f64,
    surface_size: usize,
) -> InteractionLists {
    let mut pairs = PairLists::default();
    traverse(
        obs_tree,
        src_tree,
        obs_tree.root(),
        src_tree.root(),
        mac,
        surface_size,
        &mut pairs,
    );
    debug!(
        "interaction lists: {} p2p, {} m2l, {} p2l, {} m2p",
        pairs.p2p.len(),
        pairs.m2l.len(),
        pairs.p2l.len(),
        pairs.m2p.len()
    );

    InteractionLists {
        p2p: MatrixFreeOp::from_pairs(pairs.p2p),
        m2l: MatrixFreeOp::from_pairs(pairs.m2l),
        p2l: MatrixFreeOp::from_pairs(pairs.p2l),
        m2p: MatrixFreeOp::from_pairs(pairs.m2p),
    }
}

#[derive(Default)]
struct PairLists {
    p2p: Vec<(NodeIndex, NodeIndex)>,
    m2l: Vec<(NodeIndex, NodeIndex)>,
    p2l: Vec<(NodeIndex, NodeIndex)>,
    m2p: Vec<(NodeIndex, NodeIndex)>,
}

fn small<const D: usize>(node: &TreeNode<D>, surface_size: usize) -> bool {
    node.is_leaf && node.len() < surface_size
}

fn traverse<const D: usize>(
    obs_tree: &Tree<D>,
    src_tree: &Tree<D>,
    obs: &TreeNode<D>,
    src: &TreeNode<D>,
    mac: f64,
    surface_size: usize,
    out: &mut PairLists,
) {
    if well_separated(obs, src, mac) {
        let pair = (obs.idx, src.idx);
        match (small(obs, surface_size), small(src, surface_size)) {
            (true, true) => out.p2p.push(pair),
            (true, false) => out.m2p.push(pair),
            (false, true) => out.p2l.push(pair),
            (false, false) => out.m2l.push(pair),
        }
        return;
    }

    if obs.is_leaf && src.is_leaf {
        out.p2p.push((obs.idx, src.idx));
        return;
    }

    // Descend the node with the larger radius; a tie descends the source.
    // A leaf cannot be subdivided, so the other side descends.
    let descend_obs = if src.is_leaf {
        true
    } else if obs.is_leaf {
        false
    } else {
        obs.bounds.radius > src.bounds.radius
    };

    if descend_obs {
        for &c in &obs.children {
            traverse(
                obs_tree,
                src_tree,
                &obs_tree.nodes[c],
                src,
                mac,
                surface_size,
                out,
            );
        }
    } else {
        for &c in &src.children {
            traverse(
                obs_tree,
                src_tree,
                obs,
                &src_tree.nodes[c],
                mac,
                surface_size,
                out,
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::{dual_traversal, well_separated, MatrixFreeOp};
    use crate::ball::dist;
    use crate::helpers::{normals_fixture, points_fixture};
    use crate::tree::{build_tree, Tree};
    use crate::types::NodeIndex;

    #[test]
    fn test_from_pairs_compression() {
        let op = MatrixFreeOp::from_pairs(vec![(4, 2), (1, 7), (4, 0), (1, 3)]);
        assert_eq!(op.obs_nodes, vec![1, 4]);
        assert_eq!(op.obs_src_starts, vec![0, 2, 4]);
        assert_eq!(op.src_nodes, vec![3, 7, 0, 2]);
        assert_eq!(op.row(0), &[3, 7]);
        assert_eq!(op.row(1), &[0, 2]);

        let lookup = op.row_lookup(6);
        assert_eq!(lookup[1], Some(0));
        assert_eq!(lookup[4], Some(1));
        assert_eq!(lookup[0], None);
    }

    fn trees_fixture() -> (Tree<3>, Tree<3>) {
        let obs_points = points_fixture::<3>(1500, 21);
        let obs_normals = normals_fixture::<3>(1500, 22);
        let src_points = points_fixture::<3>(1200, 23);
        let src_normals = normals_fixture::<3>(1200, 24);
        (
            build_tree(&obs_points, &obs_normals, 40).unwrap(),
            build_tree(&src_points, &src_normals, 40).unwrap(),
        )
    }

    #[test]
    fn test_mac_safety_of_m2l_entries() {
        let (obs_tree, src_tree) = trees_fixture();
        let mac = 0.3;
        let lists = dual_traversal(&obs_tree, &src_tree, mac, 56);

        for (obs, sources) in lists.m2l.rows() {
            let o = &obs_tree.nodes[obs];
            for &src in sources {
                let s = &src_tree.nodes[src];
                let d = dist(&o.bounds.center, &s.bounds.center);
                assert!(d * mac > o.bounds.radius + s.bounds.radius);
                let r_max = o.bounds.radius.max(s.bounds.radius);
                let r_min = o.bounds.radius.min(s.bounds.radius);
                assert!(r_max < mac * (d - r_min));
            }
        }
    }

    #[test]
    fn test_list_membership_shapes() {
        let (obs_tree, src_tree) = trees_fixture();
        let surface_size = 56;
        let lists = dual_traversal(&obs_tree, &src_tree, 0.3, surface_size);

        for (obs, sources) in lists.p2p.rows() {
            assert!(obs_tree.nodes[obs].is_leaf);
            for &src in sources {
                assert!(src_tree.nodes[src].is_leaf);
            }
        }
        for (obs, sources) in lists.m2p.rows() {
            let o = &obs_tree.nodes[obs];
            assert!(o.is_leaf && o.len() < surface_size);
            for &src in sources {
                let s = &src_tree.nodes[src];
                assert!(!(s.is_leaf && s.len() < surface_size));
            }
        }
        for (obs, sources) in lists.p2l.rows() {
            let o = &obs_tree.nodes[obs];
            assert!(!(o.is_leaf && o.len() < surface_size));
            for &src in sources {
                let s = &src_tree.nodes[src];
                assert!(s.is_leaf && s.len() < surface_size);
            }
        }
    }

    #[test]
    fn test_ordering_contract() {
        let (obs_tree, src_tree) = trees_fixture();
        let lists = dual_traversal(&obs_tree, &src_tree, 0.3, 56);

        for op in [&lists.p2p, &lists.m2l, &lists.p2l, &lists.m2p] {
            for pair in op.obs_nodes.windows(2) {
                assert!(pair[0] < pair[1]);
            }
            for i in 0..op.obs_nodes.len() {
                for pair in op.row(i).windows(2) {
                    assert!(pair[0] < pair[1]);
                }
            }
        }
    }

    fn descendant_leaves<const D: usize>(tree: &Tree<D>, node: NodeIndex) -> Vec<NodeIndex> {
        let mut stack = vec![node];
        let mut leaves = Vec::new();
        while let Some(i) = stack.pop() {
            let n = &tree.nodes[i];
            if n.is_leaf {
                leaves.push(i);
            } else {
                stack.extend(n.children.iter().copied());
            }
        }
        leaves
    }

    #[test]
    fn test_exhaustiveness_every_leaf_pair_covered_once() {
        let obs_points = points_fixture::<3>(400, 31);
        let obs_normals = normals_fixture::<3>(400, 32);
        let src_points = points_fixture::<3>(300, 33);
        let src_normals = normals_fixture::<3>(300, 34);
        let obs_tree = build_tree(&obs_points, &obs_normals, 20).unwrap();
        let src_tree = build_tree(&src_points, &src_normals, 20).unwrap();

        let lists = dual_traversal(&obs_tree, &src_tree, 0.3, 56);

        let obs_leaves: Vec<NodeIndex> = obs_tree.leaves().map(|n| n.idx).collect();
        let src_leaves: Vec<NodeIndex> = src_tree.leaves().map(|n| n.idx).collect();
        let obs_rank: std::collections::HashMap<NodeIndex, usize> =
            obs_leaves.iter().enumerate().map(|(i, &l)| (l, i)).collect();
        let src_rank: std::collections::HashMap<NodeIndex, usize> =
            src_leaves.iter().enumerate().map(|(i, &l)| (l, i)).collect();

        let mut counts = vec![vec![0u32; src_leaves.len()]; obs_leaves.len()];
        for op in [&lists.p2p, &lists.m2l, &lists.p2l, &lists.m2p] {
            for (obs, sources) in op.rows() {
                for &src in sources {
                    for &ol in &descendant_leaves(&obs_tree, obs) {
                        for &sl in &descendant_leaves(&src_tree, src) {
                            counts[obs_rank[&ol]][src_rank[&sl]] += 1;
                        }
                    }
                }
            }
        }

        for row in &counts {
            for &c in row {
                assert_eq!(c, 1);
            }
        }
    }

    #[test]
    fn test_well_separated_boundary() {
        let obs_points = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let normals = vec![[0.0, 0.0, 1.0]; 2];
        let tree = build_tree(&obs_points, &normals, 2).unwrap();
        let root = tree.root();
        // A node is never well separated from itself.
        assert!(!well_separated(root, root, 0.5));
    }
}
