//! Canonical translation surfaces and their per-node placement.
//!
//! The canonical surface is the boundary of an `order^d` grid on `[-1, 1]^d`
//! projected onto the unit sphere (circle in 2D). It is generated once per
//! operator; per-node equivalent and check surfaces are obtained by
//! translating and scaling it, never stored.

use crate::ball::Ball;

/// Number of surface points for a given expansion order.
///
/// `6·order² − 12·order + 8` in 3D and `4·order − 4` in 2D, the point counts
/// of the respective grid boundaries.
pub fn surface_size<const D: usize>(order: usize) -> usize {
    debug_assert!(order >= 2);
    order.pow(D as u32) - (order - 2).pow(D as u32)
}

/// Points of the canonical surface on the unit sphere/circle.
///
/// The radial directions double as the surface normals.
pub fn unit_surface<const D: usize>(order: usize) -> Vec<[f64; D]> {
    debug_assert!(order >= 2);
    let mut points = Vec::with_capacity(surface_size::<D>(order));

    for flat in 0..order.pow(D as u32) {
        let mut digits = [0usize; D];
        let mut rest = flat;
        for d in digits.iter_mut() {
            *d = rest % order;
            rest /= order;
        }
        if !digits.iter().any(|&d| d == 0 || d == order - 1) {
            continue;
        }

        let mut p = [0.0; D];
        for (k, &d) in digits.iter().enumerate() {
            p[k] = 2.0 * d as f64 / (order - 1) as f64 - 1.0;
        }
        let norm = p.iter().map(|x| x * x).sum::<f64>().sqrt();
        for x in p.iter_mut() {
            *x /= norm;
        }
        points.push(p);
    }

    points
}

/// The canonical surface placed around `ball`, scaled by `factor` times the
/// ball radius.
pub fn scaled_surface<const D: usize>(
    unit: &[[f64; D]],
    ball: &Ball<D>,
    factor: f64,
) -> Vec<[f64; D]> {
    let r = factor * ball.radius;
    unit.iter()
        .map(|p| {
            let mut q = [0.0; D];
            for k in 0..D {
                q[k] = ball.center[k] + r * p[k];
            }
            q
        })
        .collect()
}
