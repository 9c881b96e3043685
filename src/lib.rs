//! Kernel-independent fast multipole evaluation over adaptive ball trees.
//!
//! The engine evaluates dense pairwise sums `u(x_i) = Σ_j K(x_i, n_i, x_j,
//! n_j) · q_j` for tensor-valued Green's function kernels in two or three
//! dimensions, reducing the naive `O(N·M)` cost to roughly `O(N + M)` at a
//! user-controlled accuracy. The kernel enters only through batched
//! evaluations, so any smooth enough kernel works without per-kernel
//! expansion machinery.
//!
//! Usage is two-phase: build a [`tree::Tree`] over each point cloud with
//! [`build_tree`], precompute an operator with [`build_fmm`], then apply it
//! with [`fmm::Fmm::evaluate`]. Densities and potentials are indexed in
//! tree-reordered order; permute through `Tree::orig_idx` to recover the
//! caller's ordering.

#![cfg_attr(feature = "strict", deny(warnings))]

pub mod ball;
pub mod c2e;
pub mod elastic;
pub mod fmm;
pub mod helpers;
pub mod kernel;
pub mod laplace;
pub mod pinv;
pub mod surface;
pub mod traversal;
pub mod tree;
pub mod types;

pub use crate::fmm::{build_fmm, Fmm, FmmConfig};
pub use crate::kernel::{kernel_by_name, Kernel};
pub use crate::tree::{build_tree, Tree, TreeNode};
pub use crate::types::{FmmError, FmmResult, NodeIndex};
