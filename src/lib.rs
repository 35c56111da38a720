//! Striped UniFrac on a balanced-parenthesis tree.
//!
//!  * `tree`      – succinct BP tree: parse, navigate, shear, collapse
//!  * `embed`     – per-node sample weights, block by block in postorder
//!  * `stripes`   – stripe decomposition of the pair space + buffers
//!  * `zero_skip` – all-zero flags, per-sample sums, 8-bit length tables
//!  * `kernels`   – unweighted / weighted / generalized / variance-adjusted
//!  * `unifrac`   – end-to-end driver and the distance matrix
//!  * `io`        – TSV / BIOM tables in, TSV matrix out

pub mod embed;
pub mod error;
pub mod io;
pub mod kernels;
pub mod stripes;
pub mod table;
pub mod tree;
pub mod unifrac;
pub mod zero_skip;

pub use embed::{EmbedNeeds, EmbeddedBlock, Embedder, Layout};
pub use error::{IdAxis, Result, UnifracError};
pub use kernels::{Method, Metric, PairKernel, run_metric_stripe};
pub use stripes::{ExecutionTarget, StripeBuffers, StripeConfig, locate_pair, stripe_count};
pub use table::{FeatureTable, SparseTable};
pub use tree::BpTree;
pub use unifrac::{DistanceMatrix, UnifracOptions, compute_unifrac, prepare_tree};
