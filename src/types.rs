//! Shared type definitions: error kinds and index aliases.

use std::error::Error;
use std::fmt;

/// Index of a node inside a tree's flat node array.
///
/// Every interaction list and node reference goes through this alias, so the
/// index width can be changed in one place.
pub type NodeIndex = usize;

/// Helper type for a call that could go wrong.
pub type FmmResult<T> = Result<T, FmmError>;

/// Error type for the FMM engine. Every failure is fatal to the in-flight
/// call; the engine keeps no partial results.
#[derive(Debug, Clone, PartialEq)]
pub enum FmmError {
    /// A configuration parameter is out of range, or the kernel name is not
    /// registered. Raised while building the operator.
    InvalidConfig(String),
    /// An input slice does not have the length implied by the geometry, e.g.
    /// a density vector whose length is not `n_sources * tensor_dim`.
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// A check-to-equivalent system had no nonzero singular values, meaning
    /// the node geometry is fully degenerate.
    NumericallySingular,
    /// Propagated from a kernel callback.
    Kernel(String),
}

impl fmt::Display for FmmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FmmError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            FmmError::ShapeMismatch {
                what,
                expected,
                found,
            } => write!(f, "shape mismatch for {what}: expected {expected}, found {found}"),
            FmmError::NumericallySingular => {
                write!(f, "check-to-equivalent operator is numerically singular")
            }
            FmmError::Kernel(msg) => write!(f, "kernel evaluation failed: {msg}"),
        }
    }
}

impl Error for FmmError {}

#[cfg(test)]
mod test {
    use super::FmmError;

    #[test]
    fn test_error_display() {
        let err = FmmError::ShapeMismatch {
            what: "densities",
            expected: 30,
            found: 10,
        };
        let msg = format!("{err}");
        assert!(msg.contains("densities"));
        assert!(msg.contains("30"));
    }
}
