//! SVD pseudoinverse for the check-to-equivalent systems.

use nalgebra::{DMatrix, DVector};

use crate::types::{FmmError, FmmResult};

/// A pseudoinverse stored in two parts, `P = a · b`, applied as
/// `a · (b · x)` so the truncated singular spectrum is never multiplied out
/// into a single ill-conditioned matrix.
#[derive(Debug, Clone)]
pub struct Pinv {
    /// `V · Σ⁻¹` with truncated reciprocals on the diagonal.
    pub a: DMatrix<f64>,
    /// `Uᵀ`.
    pub b: DMatrix<f64>,
}

impl Pinv {
    /// `out = scale · P · x`.
    pub fn apply(&self, x: &[f64], scale: f64, out: &mut [f64]) {
        let x = DVector::from_column_slice(x);
        let y = &self.a * (&self.b * x);
        for (o, v) in out.iter_mut().zip(y.iter()) {
            *o = scale * v;
        }
    }
}

/// Pseudoinverse of `mat` with singular values below
/// `rel_threshold · σ_max` treated as zero.
///
/// Check-to-equivalent systems routinely have condition numbers of 1e6-1e12;
/// the truncation keeps the inversion stable. A spectrum that is zero
/// altogether means the node geometry is degenerate and is reported as
/// [`FmmError::NumericallySingular`].
pub fn pinv(mat: &DMatrix<f64>, rel_threshold: f64) -> FmmResult<Pinv> {
    let svd = mat.clone().svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| FmmError::InvalidConfig("SVD did not produce U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| FmmError::InvalidConfig("SVD did not produce Vᵀ".to_string()))?;

    let sigma_max = svd.singular_values.iter().cloned().fold(0.0f64, f64::max);
    if sigma_max == 0.0 {
        return Err(FmmError::NumericallySingular);
    }

    let cut = rel_threshold * sigma_max;
    let sigma_inv = DVector::from_iterator(
        svd.singular_values.len(),
        svd.singular_values
            .iter()
            .map(|&s| if s > cut { 1.0 / s } else { 0.0 }),
    );

    Ok(Pinv {
        a: v_t.transpose() * DMatrix::from_diagonal(&sigma_inv),
        b: u.transpose(),
    })
}

#[cfg(test)]
mod test {
    use super::pinv;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    #[test]
    fn test_pinv_inverts_well_conditioned_matrix() {
        let mat = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0]);
        let p = pinv(&mat, 1e-15).unwrap();

        let rhs = [1.0, -2.0, 0.5];
        let mut x = [0.0; 3];
        p.apply(&rhs, 1.0, &mut x);

        // mat * x should reproduce rhs.
        let back = &mat * nalgebra::DVector::from_column_slice(&x);
        for (b, r) in back.iter().zip(rhs.iter()) {
            assert_relative_eq!(*b, *r, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pinv_scale_factor() {
        let mat = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 5.0]);
        let p = pinv(&mat, 1e-15).unwrap();
        let mut x = [0.0; 2];
        p.apply(&[2.0, 5.0], 3.0, &mut x);
        assert_relative_eq!(x[0], 3.0, epsilon = 1e-14);
        assert_relative_eq!(x[1], 3.0, epsilon = 1e-14);
    }

    #[test]
    fn test_pinv_truncates_tiny_singular_values() {
        // Rank-one matrix: the second singular value is zero and must not
        // blow up the result.
        let mat = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let p = pinv(&mat, 1e-12).unwrap();
        let mut x = [0.0; 2];
        p.apply(&[1.0, 1.0], 1.0, &mut x);
        assert!(x.iter().all(|v| v.is_finite()));
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_pinv_reports_zero_matrix_as_singular() {
        let mat = DMatrix::zeros(4, 4);
        assert!(pinv(&mat, 1e-15).is_err());
    }
}
