//! Seeded point-cloud fixtures shared by tests and benchmarks.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// `n` points sampled uniformly from the unit cube `[0, 1)^D`.
pub fn points_fixture<const D: usize>(n: usize, seed: u64) -> Vec<[f64; D]> {
    let mut rng = StdRng::seed_from_u64(seed);
    let between = Uniform::from(0.0..1.0);
    (0..n)
        .map(|_| std::array::from_fn(|_| between.sample(&mut rng)))
        .collect()
}

/// A unit-cube fixture translated by `shift`.
pub fn shifted_points_fixture<const D: usize>(
    n: usize,
    seed: u64,
    shift: [f64; D],
) -> Vec<[f64; D]> {
    let mut points = points_fixture::<D>(n, seed);
    for p in points.iter_mut() {
        for k in 0..D {
            p[k] += shift[k];
        }
    }
    points
}

/// `n` points on the unit sphere.
pub fn points_fixture_sphere(n: usize, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = StdRng::seed_from_u64(seed);
    let z_dist = Uniform::from(-1.0..1.0);
    let phi_dist = Uniform::from(0.0..2.0 * std::f64::consts::PI);
    (0..n)
        .map(|_| {
            let z: f64 = z_dist.sample(&mut rng);
            let phi: f64 = phi_dist.sample(&mut rng);
            let rho = (1.0 - z * z).sqrt();
            [rho * phi.cos(), rho * phi.sin(), z]
        })
        .collect()
}

/// `n` random unit normals.
pub fn normals_fixture<const D: usize>(n: usize, seed: u64) -> Vec<[f64; D]> {
    let mut rng = StdRng::seed_from_u64(seed);
    let between = Uniform::from(-1.0..1.0);
    (0..n)
        .map(|_| loop {
            let v: [f64; D] = std::array::from_fn(|_| between.sample(&mut rng));
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 1e-3 {
                let mut unit = [0.0; D];
                for k in 0..D {
                    unit[k] = v[k] / norm;
                }
                return unit;
            }
        })
        .collect()
}

/// `n` density values sampled uniformly from `[-1, 1)`.
pub fn densities_fixture(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let between = Uniform::from(-1.0..1.0);
    (0..n).map(|_| between.sample(&mut rng)).collect()
}
