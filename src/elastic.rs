//! Kelvin fundamental solution for 3D linear elasticity (displacement form).

use crate::kernel::Kernel;
use crate::types::{FmmError, FmmResult};

/// Displacement kernel `U_ij` of an isotropic elastic full space,
/// parameterized by `[shear_modulus, poisson_ratio]`. Tensor dimension 3.
///
/// `U_ij = ((3 − 4ν) δ_ij + d_i d_j) / (16 π μ (1 − ν) r)` with
/// `d = (x − y)/r`; the coincident-point block is zero.
#[derive(Debug, Clone)]
pub struct ElasticKernel<const D: usize> {
    params: [f64; 2],
    prefactor: f64,
    kappa: f64,
}

impl<const D: usize> ElasticKernel<D> {
    pub fn new(params: &[f64]) -> FmmResult<Self> {
        if D != 3 {
            return Err(FmmError::InvalidConfig(format!(
                "elastic kernel is three-dimensional, got D = {D}"
            )));
        }
        if params.len() != 2 {
            return Err(FmmError::Kernel(format!(
                "elastic kernel takes [shear_modulus, poisson_ratio], got {} parameters",
                params.len()
            )));
        }
        let (mu, nu) = (params[0], params[1]);
        if !(mu > 0.0) || !(nu < 0.5) || !nu.is_finite() {
            return Err(FmmError::Kernel(format!(
                "elastic kernel parameters out of range: mu = {mu}, nu = {nu}"
            )));
        }
        Ok(ElasticKernel {
            params: [mu, nu],
            prefactor: 1.0 / (16.0 * std::f64::consts::PI * mu * (1.0 - nu)),
            kappa: 3.0 - 4.0 * nu,
        })
    }

    /// The 3x3 displacement block for a single observation-source pair.
    fn block(&self, obs: &[f64; D], src: &[f64; D]) -> [[f64; 3]; 3] {
        let mut d = [0.0f64; 3];
        for k in 0..D.min(3) {
            d[k] = obs[k] - src[k];
        }
        let r = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        let mut out = [[0.0; 3]; 3];
        if r == 0.0 {
            return out;
        }
        for x in d.iter_mut() {
            *x /= r;
        }
        let c = self.prefactor / r;
        for (a, row) in out.iter_mut().enumerate() {
            for (b, entry) in row.iter_mut().enumerate() {
                let delta = if a == b { self.kappa } else { 0.0 };
                *entry = c * (delta + d[a] * d[b]);
            }
        }
        out
    }
}

impl<const D: usize> Kernel<D> for ElasticKernel<D> {
    fn name(&self) -> &'static str {
        "elastic"
    }

    fn tensor_dim(&self) -> usize {
        3
    }

    fn params(&self) -> &[f64] {
        &self.params
    }

    fn assemble(
        &self,
        obs_pts: &[[f64; D]],
        _obs_normals: &[[f64; D]],
        src_pts: &[[f64; D]],
        _src_normals: &[[f64; D]],
        out: &mut [f64],
    ) -> FmmResult<()> {
        let ncols = src_pts.len() * 3;
        debug_assert_eq!(out.len(), obs_pts.len() * 3 * ncols);
        for (i, obs) in obs_pts.iter().enumerate() {
            for (j, src) in src_pts.iter().enumerate() {
                let block = self.block(obs, src);
                for (a, row) in block.iter().enumerate() {
                    for (b, &value) in row.iter().enumerate() {
                        out[(i * 3 + a) * ncols + j * 3 + b] = value;
                    }
                }
            }
        }
        Ok(())
    }

    fn evaluate(
        &self,
        obs_pts: &[[f64; D]],
        _obs_normals: &[[f64; D]],
        src_pts: &[[f64; D]],
        _src_normals: &[[f64; D]],
        densities: &[f64],
        out: &mut [f64],
    ) -> FmmResult<()> {
        debug_assert_eq!(densities.len(), src_pts.len() * 3);
        debug_assert_eq!(out.len(), obs_pts.len() * 3);
        for (i, obs) in obs_pts.iter().enumerate() {
            let mut acc = [0.0f64; 3];
            for (j, src) in src_pts.iter().enumerate() {
                let block = self.block(obs, src);
                let q = &densities[j * 3..j * 3 + 3];
                for a in 0..3 {
                    acc[a] += block[a][0] * q[0] + block[a][1] * q[1] + block[a][2] * q[2];
                }
            }
            for a in 0..3 {
                out[i * 3 + a] += acc[a];
            }
        }
        Ok(())
    }

    fn homogeneity_scale(&self, s: f64) -> Option<f64> {
        Some(1.0 / s)
    }
}

#[cfg(test)]
mod test {
    use super::ElasticKernel;
    use crate::kernel::Kernel;
    use approx::assert_relative_eq;

    #[test]
    fn test_block_symmetry() {
        let kernel = ElasticKernel::<3>::new(&[1.0, 0.25]).unwrap();
        let obs = [0.3, -0.7, 1.1];
        let src = [2.0, 0.4, -0.5];
        let block = kernel.block(&obs, &src);
        for a in 0..3 {
            for b in 0..3 {
                assert_relative_eq!(block[a][b], block[b][a], epsilon = 1e-15);
            }
        }
        // Reciprocity: swapping observation and source leaves U unchanged.
        let swapped = kernel.block(&src, &obs);
        for a in 0..3 {
            for b in 0..3 {
                assert_relative_eq!(block[a][b], swapped[a][b], epsilon = 1e-15);
            }
        }
    }

    #[test]
    fn test_diagonal_dominates_on_axis() {
        let kernel = ElasticKernel::<3>::new(&[1.0, 0.25]).unwrap();
        let block = kernel.block(&[1.0, 0.0, 0.0], &[0.0, 0.0, 0.0]);
        // On the x axis: U_xx carries the d_i d_j term, U_yy and U_zz do not.
        assert!(block[0][0] > block[1][1]);
        assert_relative_eq!(block[1][1], block[2][2], epsilon = 1e-15);
        assert_relative_eq!(block[0][1], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(ElasticKernel::<3>::new(&[1.0]).is_err());
        assert!(ElasticKernel::<3>::new(&[-1.0, 0.25]).is_err());
        assert!(ElasticKernel::<3>::new(&[1.0, 0.5]).is_err());
    }
}
