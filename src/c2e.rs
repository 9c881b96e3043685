//! Precomputed check-to-equivalent operators, cached per radius scale.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use nalgebra::DMatrix;

use crate::ball::Ball;
use crate::kernel::Kernel;
use crate::pinv::{pinv, Pinv};
use crate::surface::scaled_surface;
use crate::tree::Tree;
use crate::types::{FmmError, FmmResult};

/// The check-to-equivalent operator assigned to one tree node: a shared
/// pseudoinverse plus the node's dilation factor relative to the cached
/// representative radius.
#[derive(Debug, Clone)]
pub struct C2eEntry {
    pub op: Arc<Pinv>,
    pub scale: f64,
}

impl C2eEntry {
    /// `out = scale · P · check_potential`.
    pub fn apply(&self, check_potential: &[f64], out: &mut [f64]) {
        self.op.apply(check_potential, self.scale, out);
    }
}

/// Build one check-to-equivalent entry per tree node.
///
/// For the upward direction the equivalent surface factor is `inner_r` and
/// the check factor `outer_r`; the downward direction swaps them. Kernels
/// with a dilation law share one pseudoinverse per power-of-two radius
/// bucket, rescaled exactly to each node's radius; kernels without one get
/// an operator per distinct radius.
pub fn build_c2e_entries<const D: usize>(
    tree: &Tree<D>,
    kernel: &dyn Kernel<D>,
    unit_surf: &[[f64; D]],
    equiv_factor: f64,
    check_factor: f64,
    svd_threshold: f64,
    cache: &mut HashMap<u64, Arc<Pinv>>,
) -> FmmResult<Vec<C2eEntry>> {
    let homogeneous = kernel.homogeneity_scale(1.0).is_some();
    let mut entries = Vec::with_capacity(tree.nodes.len());

    for node in &tree.nodes {
        let r = node.bounds.radius;
        let (key, rep, scale) = if homogeneous {
            let exponent = r.log2().round();
            let rep = exponent.exp2();
            // The gram matrix scales by the kernel's dilation factor, so its
            // pseudoinverse scales by the reciprocal.
            let dilation = kernel.homogeneity_scale(r / rep).ok_or_else(|| {
                FmmError::Kernel(format!(
                    "kernel {:?} reports a homogeneity scale at s = 1 but none at s = {}",
                    kernel.name(),
                    r / rep
                ))
            })?;
            ((exponent as i64) as u64, rep, 1.0 / dilation)
        } else {
            (r.to_bits(), r, 1.0)
        };

        let op = match cache.get(&key) {
            Some(op) => Arc::clone(op),
            None => {
                let op = Arc::new(solve_c2e(
                    kernel,
                    unit_surf,
                    rep,
                    equiv_factor,
                    check_factor,
                    svd_threshold,
                )?);
                cache.insert(key, Arc::clone(&op));
                op
            }
        };
        entries.push(C2eEntry { op, scale });
    }

    debug!(
        "check-to-equivalent cache: {} operators for {} nodes",
        cache.len(),
        tree.nodes.len()
    );
    Ok(entries)
}

/// Pseudoinverse of the gram matrix from the equivalent surface to the check
/// surface of a ball of radius `radius` at the origin.
fn solve_c2e<const D: usize>(
    kernel: &dyn Kernel<D>,
    unit_surf: &[[f64; D]],
    radius: f64,
    equiv_factor: f64,
    check_factor: f64,
    svd_threshold: f64,
) -> FmmResult<Pinv> {
    let ball = Ball {
        center: [0.0; D],
        radius,
    };
    let equiv = scaled_surface(unit_surf, &ball, equiv_factor);
    let check = scaled_surface(unit_surf, &ball, check_factor);

    let size = unit_surf.len() * kernel.tensor_dim();
    let mut gram = vec![0.0; size * size];
    kernel.assemble(&check, unit_surf, &equiv, unit_surf, &mut gram)?;

    pinv(&DMatrix::from_row_slice(size, size, &gram), svd_threshold)
}
