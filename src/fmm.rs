//! The FMM operator: precomputation and evaluation.
//!
//! `build_fmm` runs all precomputation (canonical surface, check-to-
//! equivalent operators, interaction lists); `evaluate` then applies the
//! operator to a density vector, in tree-reordered index order. The phases
//! run in the sequence P2M → M2M (bottom-up) → {M2L, P2L} → L2L (top-down)
//! → {L2P, M2P, P2P}, each phase parallelized over nodes whose buffers are
//! disjoint.

use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::{
    IndexedParallelIterator, IntoParallelIterator, ParallelIterator, ParallelSliceMut,
};

use crate::c2e::{build_c2e_entries, C2eEntry};
use crate::kernel::{kernel_by_name, Kernel};
use crate::surface::{scaled_surface, unit_surface};
use crate::traversal::{dual_traversal, InteractionLists};
use crate::tree::Tree;
use crate::types::{FmmError, FmmResult, NodeIndex};

/// Parameters fixed across an evaluation.
#[derive(Debug, Clone)]
pub struct FmmConfig {
    /// Equivalent-surface radius factor (upward equivalent, downward check).
    pub inner_r: f64,
    /// Check-surface radius factor (upward check, downward equivalent).
    pub outer_r: f64,
    /// Expansion order controlling the surface point count.
    pub order: usize,
    /// Registry name of the kernel.
    pub kernel_name: String,
    /// Kernel parameters.
    pub params: Vec<f64>,
    /// Multipole acceptance threshold, in `(0, 1/(outer_r − 1))`.
    pub mac: f64,
    /// Maximum number of points per tree leaf.
    pub leaf_capacity: usize,
    /// Relative singular-value cutoff for the check-to-equivalent solves.
    pub svd_threshold: f64,
}

impl Default for FmmConfig {
    fn default() -> Self {
        FmmConfig {
            inner_r: 1.1,
            outer_r: 2.9,
            order: 6,
            kernel_name: "laplace".to_string(),
            params: Vec::new(),
            mac: 0.3,
            leaf_capacity: 50,
            svd_threshold: 1e-15,
        }
    }
}

impl FmmConfig {
    fn validate(&self) -> FmmResult<()> {
        if self.order < 2 {
            return Err(FmmError::InvalidConfig(format!(
                "expansion order must be at least 2, got {}",
                self.order
            )));
        }
        if self.leaf_capacity < 1 {
            return Err(FmmError::InvalidConfig(
                "leaf_capacity must be at least 1".to_string(),
            ));
        }
        if !(self.inner_r > 0.0 && self.inner_r.is_finite()) {
            return Err(FmmError::InvalidConfig(format!(
                "inner_r must be positive, got {}",
                self.inner_r
            )));
        }
        if self.outer_r <= self.inner_r {
            return Err(FmmError::InvalidConfig(format!(
                "outer_r ({}) must exceed inner_r ({})",
                self.outer_r, self.inner_r
            )));
        }
        if !(self.svd_threshold >= 0.0 && self.svd_threshold.is_finite()) {
            return Err(FmmError::InvalidConfig(format!(
                "svd_threshold must be non-negative, got {}",
                self.svd_threshold
            )));
        }
        // Farfield approximations are only valid when the check surface
        // stays clear of the target box.
        let mac_limit = 1.0 / (self.outer_r - 1.0);
        if !(self.mac > 0.0 && self.mac < mac_limit) {
            return Err(FmmError::InvalidConfig(format!(
                "mac must lie in (0, 1/(outer_r − 1)) = (0, {}), got {}",
                mac_limit, self.mac
            )));
        }
        Ok(())
    }
}

/// A fully precomputed FMM operator over an observation and a source tree.
#[derive(Debug)]
pub struct Fmm<const D: usize> {
    obs_tree: Tree<D>,
    src_tree: Tree<D>,
    kernel: Box<dyn Kernel<D>>,
    config: FmmConfig,
    unit_surf: Vec<[f64; D]>,
    lists: InteractionLists,
    /// Upward check-to-equivalent operator per source node.
    u2e: Vec<C2eEntry>,
    /// Downward check-to-equivalent operator per observation node.
    d2e: Vec<C2eEntry>,
    m2l_rows: Vec<Option<usize>>,
    p2l_rows: Vec<Option<usize>>,
    m2p_rows: Vec<Option<usize>>,
    p2p_rows: Vec<Option<usize>>,
}


/// Run all precomputation for an observation/source tree pair.
///
/// Normals live inside the trees and were reordered with their points at
/// build time. The trees, the operator cache and the interaction lists are
/// frozen afterwards; `evaluate` only reads them.
pub fn build_fmm<const D: usize>(
    obs_tree: Tree<D>,
    src_tree: Tree<D>,
    config: FmmConfig,
) -> FmmResult<Fmm<D>> {
    config.validate()?;
    let kernel = kernel_by_name::<D>(&config.kernel_name, &config.params)?;
    let unit_surf = unit_surface::<D>(config.order);

    let lists = dual_traversal(&obs_tree, &src_tree, config.mac, unit_surf.len());

    let mut u2e_cache = HashMap::new();
    let u2e = build_c2e_entries(
        &src_tree,
        kernel.as_ref(),
        &unit_surf,
        config.inner_r,
        config.outer_r,
        config.svd_threshold,
        &mut u2e_cache,
    )?;
    let mut d2e_cache = HashMap::new();
    let d2e = build_c2e_entries(
        &obs_tree,
        kernel.as_ref(),
        &unit_surf,
        config.outer_r,
        config.inner_r,
        config.svd_threshold,
        &mut d2e_cache,
    )?;

    info!(
        "fmm precomputation: {} obs nodes, {} src nodes, surface size {}, {} u2e / {} d2e operators",
        obs_tree.nodes.len(),
        src_tree.nodes.len(),
        unit_surf.len(),
        u2e_cache.len(),
        d2e_cache.len()
    );

    let n_obs_nodes = obs_tree.nodes.len();
    let m2l_rows = lists.m2l.row_lookup(n_obs_nodes);
    let p2l_rows = lists.p2l.row_lookup(n_obs_nodes);
    let m2p_rows = lists.m2p.row_lookup(n_obs_nodes);
    let p2p_rows = lists.p2p.row_lookup(n_obs_nodes);

    Ok(Fmm {
        obs_tree,
        src_tree,
        kernel,
        config,
        unit_surf,
        lists,
        u2e,
        d2e,
        m2l_rows,
        p2l_rows,
        m2p_rows,
        p2p_rows,
    })
}

impl<const D: usize> Fmm<D> {
    pub fn obs_tree(&self) -> &Tree<D> {
        &self.obs_tree
    }

    pub fn src_tree(&self) -> &Tree<D> {
        &self.src_tree
    }

    pub fn kernel(&self) -> &dyn Kernel<D> {
        self.kernel.as_ref()
    }

    pub fn config(&self) -> &FmmConfig {
        &self.config
    }

    pub fn lists(&self) -> &InteractionLists {
        &self.lists
    }

    fn check_density_shape(&self, q: &[f64]) -> FmmResult<()> {
        let expected = self.src_tree.n_points() * self.kernel.tensor_dim();
        if q.len() != expected {
            return Err(FmmError::ShapeMismatch {
                what: "densities",
                expected,
                found: q.len(),
            });
        }
        Ok(())
    }

    /// Apply the operator: `u = K · q`, both in tree-reordered order.
    ///
    /// All intermediate multipole/local buffers are allocated here and
    /// dropped on return; the operator itself is read-only, so concurrent
    /// evaluations are safe.
    pub fn evaluate(&self, q: &[f64]) -> FmmResult<Vec<f64>> {
        self.check_density_shape(q)?;
        let t = self.kernel.tensor_dim();
        let stride = self.unit_surf.len() * t;

        let mut multipoles = vec![0.0; self.src_tree.nodes.len() * stride];
        let mut up_check = vec![0.0; self.src_tree.nodes.len() * stride];
        let mut locals = vec![0.0; self.obs_tree.nodes.len() * stride];
        let mut down_check = vec![0.0; self.obs_tree.nodes.len() * stride];
        let mut u = vec![0.0; self.obs_tree.n_points() * t];

        self.upward_pass(q, &mut multipoles, &mut up_check)?;
        self.downward_pass(q, &multipoles, &mut locals, &mut down_check)?;
        self.leaf_pass(q, &multipoles, &locals, &mut u)?;
        debug!("evaluated fmm operator on {} observation points", u.len() / t);
        Ok(u)
    }

    /// Reference evaluation: the dense kernel sum over every
    /// observation-source pair, bypassing the tree entirely.
    pub fn evaluate_p2p_only(&self, q: &[f64]) -> FmmResult<Vec<f64>> {
        self.check_density_shape(q)?;
        let t = self.kernel.tensor_dim();
        let mut u = vec![0.0; self.obs_tree.n_points() * t];
        let kernel = self.kernel.as_ref();
        let obs_tree = &self.obs_tree;
        let src_tree = &self.src_tree;

        u.par_chunks_exact_mut(t)
            .enumerate()
            .try_for_each(|(i, out)| {
                kernel.evaluate(
                    &obs_tree.points[i..i + 1],
                    &obs_tree.normals[i..i + 1],
                    &src_tree.points,
                    &src_tree.normals,
                    q,
                    out,
                )
            })?;
        Ok(u)
    }

    /// P2M at the source leaves, then M2M per level, leaves first.
    fn upward_pass(
        &self,
        q: &[f64],
        multipoles: &mut [f64],
        up_check: &mut [f64],
    ) -> FmmResult<()> {
        let t = self.kernel.tensor_dim();
        let stride = self.unit_surf.len() * t;
        let kernel = self.kernel.as_ref();
        let tree = &self.src_tree;
        let unit = &self.unit_surf;
        let outer_r = self.config.outer_r;
        let inner_r = self.config.inner_r;

        // P2M: kernel from each leaf's points to its upward check surface.
        up_check
            .par_chunks_exact_mut(stride)
            .enumerate()
            .try_for_each(|(i, check)| -> FmmResult<()> {
                let node = &tree.nodes[i];
                if !node.is_leaf {
                    return Ok(());
                }
                let check_surface = scaled_surface(unit, &node.bounds, outer_r);
                kernel.evaluate(
                    &check_surface,
                    unit,
                    &tree.points[node.start..node.end],
                    &tree.normals[node.start..node.end],
                    &q[node.start * t..node.end * t],
                    check,
                )
            })?;
        {
            let up_check_r: &[f64] = up_check;
            multipoles
                .par_chunks_exact_mut(stride)
                .enumerate()
                .for_each(|(i, m)| {
                    if tree.nodes[i].is_leaf {
                        self.u2e[i].apply(&up_check_r[i * stride..(i + 1) * stride], m);
                    }
                });
        }

        // M2M: a parent's check potential sums the kernel from each child's
        // equivalent surface; children live one level deeper, so a reverse
        // sweep over depths serializes parents after children.
        for depth in (0..tree.depth).rev() {
            {
                let multipoles_r: &[f64] = multipoles;
                up_check
                    .par_chunks_exact_mut(stride)
                    .enumerate()
                    .try_for_each(|(i, check)| -> FmmResult<()> {
                        let node = &tree.nodes[i];
                        if node.depth != depth || node.is_leaf {
                            return Ok(());
                        }
                        let check_surface = scaled_surface(unit, &node.bounds, outer_r);
                        for &c in &node.children {
                            let child = &tree.nodes[c];
                            let equiv_surface = scaled_surface(unit, &child.bounds, inner_r);
                            kernel.evaluate(
                                &check_surface,
                                unit,
                                &equiv_surface,
                                unit,
                                &multipoles_r[c * stride..(c + 1) * stride],
                                check,
                            )?;
                        }
                        Ok(())
                    })?;
            }
            {
                let up_check_r: &[f64] = up_check;
                multipoles
                    .par_chunks_exact_mut(stride)
                    .enumerate()
                    .for_each(|(i, m)| {
                        let node = &tree.nodes[i];
                        if node.depth == depth && !node.is_leaf {
                            self.u2e[i].apply(&up_check_r[i * stride..(i + 1) * stride], m);
                        }
                    });
            }
        }
        Ok(())
    }

    /// M2L/P2L accumulation, then per-level L2L with the downward
    /// check-to-equivalent inversion.
    fn downward_pass(
        &self,
        q: &[f64],
        multipoles: &[f64],
        locals: &mut [f64],
        down_check: &mut [f64],
    ) -> FmmResult<()> {
        let t = self.kernel.tensor_dim();
        let stride = self.unit_surf.len() * t;
        let kernel = self.kernel.as_ref();
        let obs_tree = &self.obs_tree;
        let src_tree = &self.src_tree;
        let unit = &self.unit_surf;
        let inner_r = self.config.inner_r;
        let outer_r = self.config.outer_r;

        // Every farfield contribution lands in the check potential before
        // any local density is finalized.
        down_check
            .par_chunks_exact_mut(stride)
            .enumerate()
            .try_for_each(|(i, check)| -> FmmResult<()> {
                let (m2l_row, p2l_row) = (self.m2l_rows[i], self.p2l_rows[i]);
                if m2l_row.is_none() && p2l_row.is_none() {
                    return Ok(());
                }
                let node = &obs_tree.nodes[i];
                let check_surface = scaled_surface(unit, &node.bounds, inner_r);
                if let Some(row) = m2l_row {
                    for &s in self.lists.m2l.row(row) {
                        let src = &src_tree.nodes[s];
                        let equiv_surface = scaled_surface(unit, &src.bounds, inner_r);
                        kernel.evaluate(
                            &check_surface,
                            unit,
                            &equiv_surface,
                            unit,
                            &multipoles[s * stride..(s + 1) * stride],
                            check,
                        )?;
                    }
                }
                if let Some(row) = p2l_row {
                    for &s in self.lists.p2l.row(row) {
                        let src = &src_tree.nodes[s];
                        kernel.evaluate(
                            &check_surface,
                            unit,
                            &src_tree.points[src.start..src.end],
                            &src_tree.normals[src.start..src.end],
                            &q[src.start * t..src.end * t],
                            check,
                        )?;
                    }
                }
                Ok(())
            })?;

        for depth in 0..=obs_tree.depth {
            // L2L: the parent's finalized local density contributes to the
            // child's check potential.
            if depth > 0 {
                let locals_r: &[f64] = locals;
                down_check
                    .par_chunks_exact_mut(stride)
                    .enumerate()
                    .try_for_each(|(i, check)| -> FmmResult<()> {
                        let node = &obs_tree.nodes[i];
                        if node.depth != depth {
                            return Ok(());
                        }
                        let Some(p) = node.parent else {
                            return Ok(());
                        };
                        let parent = &obs_tree.nodes[p];
                        let check_surface = scaled_surface(unit, &node.bounds, inner_r);
                        let parent_equiv = scaled_surface(unit, &parent.bounds, outer_r);
                        kernel.evaluate(
                            &check_surface,
                            unit,
                            &parent_equiv,
                            unit,
                            &locals_r[p * stride..(p + 1) * stride],
                            check,
                        )
                    })?;
            }
            let down_check_r: &[f64] = down_check;
            locals
                .par_chunks_exact_mut(stride)
                .enumerate()
                .for_each(|(i, l)| {
                    if obs_tree.nodes[i].depth == depth {
                        self.d2e[i].apply(&down_check_r[i * stride..(i + 1) * stride], l);
                    }
                });
        }
        Ok(())
    }

    /// L2P, M2P and P2P delivery into `u`. Observation leaves partition the
    /// output in order, so each leaf's slice has exactly one writer and a
    /// fixed reduction order.
    fn leaf_pass(
        &self,
        q: &[f64],
        multipoles: &[f64],
        locals: &[f64],
        u: &mut [f64],
    ) -> FmmResult<()> {
        let t = self.kernel.tensor_dim();
        let stride = self.unit_surf.len() * t;
        let kernel = self.kernel.as_ref();
        let obs_tree = &self.obs_tree;
        let src_tree = &self.src_tree;
        let unit = &self.unit_surf;
        let inner_r = self.config.inner_r;
        let outer_r = self.config.outer_r;

        let leaves = obs_tree.leaves().map(|n| n.idx).collect_vec();
        let mut slices: Vec<(NodeIndex, &mut [f64])> = Vec::with_capacity(leaves.len());
        let mut rest: &mut [f64] = u;
        for &li in &leaves {
            let node = &obs_tree.nodes[li];
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(node.len() * t);
            slices.push((li, head));
            rest = tail;
        }

        slices
            .into_par_iter()
            .try_for_each(|(li, out)| -> FmmResult<()> {
                let node = &obs_tree.nodes[li];
                let obs_pts = &obs_tree.points[node.start..node.end];
                let obs_normals = &obs_tree.normals[node.start..node.end];

                // L2P: the leaf's own local expansion.
                let equiv_surface = scaled_surface(unit, &node.bounds, outer_r);
                kernel.evaluate(
                    obs_pts,
                    obs_normals,
                    &equiv_surface,
                    unit,
                    &locals[li * stride..(li + 1) * stride],
                    out,
                )?;

                // M2P: well-separated source multipoles, delivered directly.
                if let Some(row) = self.m2p_rows[li] {
                    for &s in self.lists.m2p.row(row) {
                        let src = &src_tree.nodes[s];
                        let src_equiv = scaled_surface(unit, &src.bounds, inner_r);
                        kernel.evaluate(
                            obs_pts,
                            obs_normals,
                            &src_equiv,
                            unit,
                            &multipoles[s * stride..(s + 1) * stride],
                            out,
                        )?;
                    }
                }

                // P2P: near-field direct interactions.
                if let Some(row) = self.p2p_rows[li] {
                    for &s in self.lists.p2p.row(row) {
                        let src = &src_tree.nodes[s];
                        kernel.evaluate(
                            obs_pts,
                            obs_normals,
                            &src_tree.points[src.start..src.end],
                            &src_tree.normals[src.start..src.end],
                            &q[src.start * t..src.end * t],
                            out,
                        )?;
                    }
                }
                Ok(())
            })
    }
}
