//! Per-pair UniFrac kernels and the two loop structures that drive them.
//!
//! Every kernel reduces to "numerator / denominator contribution of the pair
//! `(k, l)` over the current node block" ([`PairKernel`]).  The CPU path
//! walks stripe × sample tiles with width-8 / width-4 groups and a scalar
//! tail; the grid path flattens (sample block, stripe, sample) into one
//! parallel space and adds the results in a single pass afterwards.  Both
//! accumulate (`+=`) so successive node blocks fold into the same buffers.

mod generalized;
mod unweighted;
mod vaw;
mod weighted;

use log::debug;
use rayon::prelude::*;
use std::{fmt, str::FromStr, time::Instant};

use crate::embed::{EmbedNeeds, EmbeddedBlock};
use crate::error::{Result, UnifracError};
use crate::stripes::{ExecutionTarget, StripeBuffers, StripeConfig, Tile};

pub use generalized::Generalized;
pub use unweighted::Unweighted;
pub use vaw::VarianceAdjusted;
pub use weighted::Weighted;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Unweighted,
    /// Unweighted numerator only, not divided by the union length.
    UnweightedUnnormalized,
    WeightedNormalized,
    WeightedUnnormalized,
    Generalized,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Unweighted => "unweighted",
            Method::UnweightedUnnormalized => "unweighted_unnormalized",
            Method::WeightedNormalized => "weighted_normalized",
            Method::WeightedUnnormalized => "weighted_unnormalized",
            Method::Generalized => "generalized",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = UnifracError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "unweighted" => Ok(Method::Unweighted),
            "unweighted_unnormalized" => Ok(Method::UnweightedUnnormalized),
            "weighted_normalized" | "weighted" => Ok(Method::WeightedNormalized),
            "weighted_unnormalized" => Ok(Method::WeightedUnnormalized),
            "generalized" => Ok(Method::Generalized),
            other => Err(UnifracError::InvalidConfig(format!("unknown method '{other}'"))),
        }
    }
}

/// A method plus its parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metric {
    pub method: Method,
    /// Exponent of generalized UniFrac; ignored by the other methods.
    pub alpha: f64,
    /// Divide every per-node term by `sqrt(m_i (m - m_i))`.
    pub variance_adjusted: bool,
}

impl Metric {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            alpha: 1.0,
            variance_adjusted: false,
        }
    }

    pub fn generalized(alpha: f64) -> Self {
        Self {
            alpha,
            ..Self::new(Method::Generalized)
        }
    }

    pub fn variance_adjusted(self, on: bool) -> Self {
        Self {
            variance_adjusted: on,
            ..self
        }
    }

    /// Whether a denominator is accumulated and divided out at the end.
    pub fn is_normalized(&self) -> bool {
        matches!(
            self.method,
            Method::Unweighted | Method::WeightedNormalized | Method::Generalized
        )
    }

    fn is_unweighted(&self) -> bool {
        matches!(self.method, Method::Unweighted | Method::UnweightedUnnormalized)
    }

    pub fn needs(&self) -> EmbedNeeds {
        EmbedNeeds {
            proportions: !self.is_unweighted(),
            presence: self.is_unweighted(),
            counts: self.variance_adjusted,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.method == Method::Generalized && !self.alpha.is_finite() {
            return Err(UnifracError::InvalidConfig(format!(
                "generalized alpha {} is not finite",
                self.alpha
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variance_adjusted {
            f.write_str("vaw_")?;
        }
        write!(f, "{}", self.method)?;
        if self.method == Method::Generalized {
            write!(f, "(alpha={})", self.alpha)?;
        }
        Ok(())
    }
}

/// Contribution of one sample pair over the current node block.
pub trait PairKernel: Sync {
    /// `(numerator, denominator)` for the pair `(k, l)`.
    fn pair(&self, k: usize, l: usize) -> (f64, f64);

    /// `W` consecutive pairs `(ks + i, ls + i)`; neither run wraps.
    fn group<const W: usize>(&self, ks: usize, ls: usize) -> ([f64; W], [f64; W]) {
        let mut num = [0.0; W];
        let mut den = [0.0; W];
        for i in 0..W {
            (num[i], den[i]) = self.pair(ks + i, ls + i);
        }
        (num, den)
    }

    /// Order in which the grid path visits samples.
    fn grid_order(&self, n_samples: usize) -> Vec<usize> {
        (0..n_samples).collect()
    }
}

#[inline]
fn add_group(num: &mut [f64], den: Option<&mut [f64]>, at: usize, n: &[f64], d: &[f64]) {
    for (dst, v) in num[at..at + n.len()].iter_mut().zip(n) {
        *dst += v;
    }
    if let Some(den) = den {
        for (dst, v) in den[at..at + d.len()].iter_mut().zip(d) {
            *dst += v;
        }
    }
}

/// Cache-tiled sweep: tiles run in parallel, each walks its rows with the
/// widest group that fits before falling back to single pairs.
pub fn run_cpu<K: PairKernel>(kernel: &K, buffers: &mut StripeBuffers, cfg: &StripeConfig) {
    let s = buffers.n_samples();
    let width = cfg.max_vector_width;

    buffers.tiles(cfg.step_size).into_par_iter().for_each(|tile| {
        let Tile {
            stripe0,
            k0,
            k1,
            num,
            den,
        } = tile;
        let mut den_rows = den.into_iter();
        for (r, num_row) in num.into_iter().enumerate() {
            let d = stripe0 + r;
            let mut den_row = den_rows.next();
            let mut k = k0;
            while k < k1 {
                let l = (k + d + 1) % s;
                let at = k - k0;
                if width >= 8 && k + 8 <= k1 && s - l >= 8 {
                    let (n, dn) = kernel.group::<8>(k, l);
                    add_group(num_row, den_row.as_deref_mut(), at, &n, &dn);
                    k += 8;
                } else if width >= 4 && k + 4 <= k1 && s - l >= 4 {
                    let (n, dn) = kernel.group::<4>(k, l);
                    add_group(num_row, den_row.as_deref_mut(), at, &n, &dn);
                    k += 4;
                } else {
                    let (n, dn) = kernel.pair(k, l);
                    add_group(num_row, den_row.as_deref_mut(), at, &[n], &[dn]);
                    k += 1;
                }
            }
        }
    });
}

/// Flattened sweep in the kernel's preferred sample order.
pub fn run_grid<K: PairKernel>(kernel: &K, buffers: &mut StripeBuffers, cfg: &StripeConfig) {
    let s = buffers.n_samples();
    let order = kernel.grid_order(s);
    buffers.grid_accumulate(&order, cfg.step_size, |d, k| kernel.pair(k, (k + d + 1) % s));
}

fn run_target<K: PairKernel>(kernel: &K, buffers: &mut StripeBuffers, target: ExecutionTarget, cfg: &StripeConfig) {
    match target {
        ExecutionTarget::Cpu => run_cpu(kernel, buffers, cfg),
        ExecutionTarget::Grid => run_grid(kernel, buffers, cfg),
    }
}

/// Fold one node block into the stripes `buffers` covers.
///
/// The block layout must match `target`, and the buffers must carry a
/// denominator exactly when the metric is normalized.
pub fn run_metric_stripe(
    metric: &Metric,
    block: &EmbeddedBlock,
    buffers: &mut StripeBuffers,
    target: ExecutionTarget,
    cfg: &StripeConfig,
) -> Result<()> {
    metric.validate()?;
    cfg.validate()?;
    if block.layout() != target.layout() {
        return Err(UnifracError::Precondition(format!(
            "{:?} block given to the {target:?} path",
            block.layout()
        )));
    }
    if block.n_samples() != buffers.n_samples() {
        return Err(UnifracError::Precondition(format!(
            "block has {} samples, stripes {}",
            block.n_samples(),
            buffers.n_samples()
        )));
    }
    if buffers.has_denominator() != metric.is_normalized() {
        return Err(UnifracError::Precondition(format!(
            "{metric} needs {} denominator",
            if metric.is_normalized() { "a" } else { "no" }
        )));
    }
    block.require(metric.needs())?;
    if block.filled_embs() == 0 || buffers.start() == buffers.stop() {
        return Ok(());
    }

    let t0 = Instant::now();
    if metric.variance_adjusted {
        let k = VarianceAdjusted::new(block, metric.method, metric.alpha);
        run_target(&k, buffers, target, cfg);
    } else {
        match metric.method {
            Method::WeightedNormalized | Method::WeightedUnnormalized => {
                let k = Weighted::new(block, metric.is_normalized())?;
                run_target(&k, buffers, target, cfg);
            }
            Method::Unweighted | Method::UnweightedUnnormalized => {
                let k = Unweighted::new(block, metric.is_normalized())?;
                run_target(&k, buffers, target, cfg);
            }
            Method::Generalized => {
                let k = Generalized::new(block, metric.alpha);
                run_target(&k, buffers, target, cfg);
            }
        }
    }
    debug!(
        "{metric}: stripes {}..{} x {} nodes in {} ms",
        buffers.start(),
        buffers.stop(),
        block.filled_embs(),
        t0.elapsed().as_millis()
    );
    Ok(())
}
