//! The kernel interface consumed by the engine, and the name-based registry.

use crate::elastic::ElasticKernel;
use crate::laplace::{InvRKernel, LaplaceKernel};
use crate::types::{FmmError, FmmResult};

/// A tensor-valued Green's function kernel evaluated over point batches.
///
/// Kernels are pure functions: they never mutate their inputs and are
/// reentrant, so a single instance is shared across worker threads. A kernel
/// is an injected value, not a subclass; the engine owns it as a trait
/// object.
pub trait Kernel<const D: usize>: Send + Sync + std::fmt::Debug {
    /// Registry name of the kernel.
    fn name(&self) -> &'static str;

    /// Output dimensionality per observation-source pair (1 for scalar
    /// kernels, 3 for 3D elastic displacement).
    fn tensor_dim(&self) -> usize;

    /// Kernel parameters, e.g. material constants.
    fn params(&self) -> &[f64];

    /// Fill `out` with kernel values in row-major order, shape
    /// `(n_obs·T, n_src·T)` flattened to length `n_obs·n_src·T²`.
    fn assemble(
        &self,
        obs_pts: &[[f64; D]],
        obs_normals: &[[f64; D]],
        src_pts: &[[f64; D]],
        src_normals: &[[f64; D]],
        out: &mut [f64],
    ) -> FmmResult<()>;

    /// Accumulate `out += K · densities`, with `densities` of length
    /// `n_src·T` and `out` of length `n_obs·T`.
    fn evaluate(
        &self,
        obs_pts: &[[f64; D]],
        obs_normals: &[[f64; D]],
        src_pts: &[[f64; D]],
        src_normals: &[[f64; D]],
        densities: &[f64],
        out: &mut [f64],
    ) -> FmmResult<()>;

    /// How kernel values scale under a uniform dilation of the geometry:
    /// `K(s·x, s·y) = homogeneity_scale(s) · K(x, y)`, or `None` for kernels
    /// without a dilation law (e.g. the 2D logarithmic kernel).
    ///
    /// Must be uniformly `Some` or uniformly `None` over all `s > 0`.
    /// Homogeneous kernels share one check-to-equivalent operator per radius
    /// scale; the rest get one per distinct radius.
    fn homogeneity_scale(&self, s: f64) -> Option<f64>;
}

/// Resolve a kernel by registry name for dimension `D`.
///
/// Unknown names, or names not available in `D` dimensions, are an
/// [`FmmError::InvalidConfig`].
pub fn kernel_by_name<const D: usize>(
    name: &str,
    params: &[f64],
) -> FmmResult<Box<dyn Kernel<D>>> {
    match name {
        "laplace" if D == 2 || D == 3 => Ok(Box::new(LaplaceKernel::<D>::new())),
        "inv-r" => Ok(Box::new(InvRKernel::<D>::new())),
        "elastic" if D == 3 => Ok(Box::new(ElasticKernel::<D>::new(params)?)),
        _ => Err(FmmError::InvalidConfig(format!(
            "unknown kernel {name:?} in {D} dimensions"
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::kernel_by_name;
    use crate::types::FmmError;

    #[test]
    fn test_registry_known_kernels() {
        assert_eq!(kernel_by_name::<3>("laplace", &[]).unwrap().tensor_dim(), 1);
        assert_eq!(kernel_by_name::<2>("laplace", &[]).unwrap().tensor_dim(), 1);
        assert_eq!(kernel_by_name::<2>("inv-r", &[]).unwrap().tensor_dim(), 1);
        let elastic = kernel_by_name::<3>("elastic", &[1.0, 0.25]).unwrap();
        assert_eq!(elastic.tensor_dim(), 3);
    }

    #[test]
    fn test_registry_unknown_kernel() {
        let err = kernel_by_name::<3>("helmholtz", &[]).unwrap_err();
        assert!(matches!(err, FmmError::InvalidConfig(_)));
        // The elastic kernel is three-dimensional only.
        let err = kernel_by_name::<2>("elastic", &[1.0, 0.25]).unwrap_err();
        assert!(matches!(err, FmmError::InvalidConfig(_)));
    }
}
