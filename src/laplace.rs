//! Laplace-family scalar kernels.

use crate::ball::dist;
use crate::kernel::Kernel;
use crate::types::FmmResult;

/// Single-layer Laplace kernel: `1/(4π r)` in 3D, `−log r / 2π` in 2D.
///
/// The coincident-point value is defined as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaplaceKernel<const D: usize>;

impl<const D: usize> LaplaceKernel<D> {
    pub fn new() -> Self {
        LaplaceKernel
    }

    fn green(&self, r: f64) -> f64 {
        if r == 0.0 {
            return 0.0;
        }
        if D == 2 {
            -r.ln() / (2.0 * std::f64::consts::PI)
        } else {
            1.0 / (4.0 * std::f64::consts::PI * r)
        }
    }
}

impl<const D: usize> Kernel<D> for LaplaceKernel<D> {
    fn name(&self) -> &'static str {
        "laplace"
    }

    fn tensor_dim(&self) -> usize {
        1
    }

    fn params(&self) -> &[f64] {
        &[]
    }

    fn assemble(
        &self,
        obs_pts: &[[f64; D]],
        _obs_normals: &[[f64; D]],
        src_pts: &[[f64; D]],
        _src_normals: &[[f64; D]],
        out: &mut [f64],
    ) -> FmmResult<()> {
        debug_assert_eq!(out.len(), obs_pts.len() * src_pts.len());
        for (i, obs) in obs_pts.iter().enumerate() {
            let row = &mut out[i * src_pts.len()..(i + 1) * src_pts.len()];
            for (entry, src) in row.iter_mut().zip(src_pts.iter()) {
                *entry = self.green(dist(obs, src));
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
        debug_assert_eq!(densities.len(), src_pts.len());
        debug_assert_eq!(out.len(), obs_pts.len());
        for (value, obs) in out.iter_mut().zip(obs_pts.iter()) {
            let mut sum = 0.0;
            for (src, q) in src_pts.iter().zip(densities.iter()) {
                sum += self.green(dist(obs, src)) * q;
            }
            *value += sum;
        }
        Ok(())
    }

    fn homogeneity_scale(&self, s: f64) -> Option<f64> {
        // log r picks up an additive term under dilation.
        if D == 2 {
            None
        } else {
            Some(1.0 / s)
        }
    }
}

/// The bare Newtonian kernel `1/r`, available in any dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvRKernel<const D: usize>;

impl<const D: usize> InvRKernel<D> {
    pub fn new() -> Self {
        InvRKernel
    }

    fn green(&self, r: f64) -> f64 {
        if r == 0.0 {
            0.0
        } else {
            1.0 / r
        }
    }
}

impl<const D: usize> Kernel<D> for InvRKernel<D> {
    fn name(&self) -> &'static str {
        "inv-r"
    }

    fn tensor_dim(&self) -> usize {
        1
    }

    fn params(&self) -> &[f64] {
        &[]
    }

    fn assemble(
        &self,
        obs_pts: &[[f64; D]],
        _obs_normals: &[[f64; D]],
        src_pts: &[[f64; D]],
        _src_normals: &[[f64; D]],
        out: &mut [f64],
    ) -> FmmResult<()> {
        debug_assert_eq!(out.len(), obs_pts.len() * src_pts.len());
        for (i, obs) in obs_pts.iter().enumerate() {
            let row = &mut out[i * src_pts.len()..(i + 1) * src_pts.len()];
            for (entry, src) in row.iter_mut().zip(src_pts.iter()) {
                *entry = self.green(dist(obs, src));
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
        debug_assert_eq!(densities.len(), src_pts.len());
        debug_assert_eq!(out.len(), obs_pts.len());
        for (value, obs) in out.iter_mut().zip(obs_pts.iter()) {
            let mut sum = 0.0;
            for (src, q) in src_pts.iter().zip(densities.iter()) {
                sum += self.green(dist(obs, src)) * q;
            }
            *value += sum;
        }
        Ok(())
    }

    fn homogeneity_scale(&self, s: f64) -> Option<f64> {
        Some(1.0 / s)
    }
}

#[cfg(test)]
mod test {
    use super::{InvRKernel, LaplaceKernel};
    use crate::kernel::Kernel;
    use approx::assert_relative_eq;

    #[test]
    fn test_laplace_3d_point_values() {
        let kernel = LaplaceKernel::<3>::new();
        let obs = [[2.0, 0.0, 0.0]];
        let src = [[0.0, 0.0, 0.0]];
        let mut out = [0.0];
        kernel
            .evaluate(&obs, &obs, &src, &src, &[1.0], &mut out)
            .unwrap();
        assert_relative_eq!(out[0], 1.0 / (8.0 * std::f64::consts::PI), epsilon = 1e-15);
    }

    #[test]
    fn test_laplace_self_interaction_is_zero() {
        let kernel = LaplaceKernel::<3>::new();
        let pts = [[0.5, 0.5, 0.5]];
        let mut out = [0.0];
        kernel
            .evaluate(&pts, &pts, &pts, &pts, &[3.0], &mut out)
            .unwrap();
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_inv_r_matches_assemble() {
        let kernel = InvRKernel::<2>::new();
        let obs = [[0.0, 0.0], [1.0, 1.0]];
        let src = [[3.0, 0.0], [0.0, 4.0]];
        let q = [2.0, -1.0];

        let mut gram = [0.0; 4];
        kernel.assemble(&obs, &obs, &src, &src, &mut gram).unwrap();

        let mut direct = [0.0; 2];
        kernel
            .evaluate(&obs, &obs, &src, &src, &q, &mut direct)
            .unwrap();

        for i in 0..2 {
            let via_gram = gram[i * 2] * q[0] + gram[i * 2 + 1] * q[1];
            assert_relative_eq!(direct[i], via_gram, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_evaluate_accumulates() {
        let kernel = InvRKernel::<2>::new();
        let obs = [[0.0, 0.0]];
        let src = [[2.0, 0.0]];
        let mut out = [1.0];
        kernel
            .evaluate(&obs, &obs, &src, &src, &[1.0], &mut out)
            .unwrap();
        assert_relative_eq!(out[0], 1.5, epsilon = 1e-15);
    }
}
