//! Stripe decomposition of the sample-pair space and the stripe buffers the
//! kernels accumulate into.
//!
//! Stripe `d` holds the pairs `(k, (k + d + 1) mod S)` for `k` in `0..S`.
//! `S / 2` stripes cover every unordered pair: once for odd `S`; for even
//! `S` the last stripe sees each of its pairs twice (from `k` and from
//! `k + S/2`), both copies carrying the same value.

use log::debug;
use rayon::prelude::*;
use std::str::FromStr;

use crate::embed::Layout;
use crate::error::{Result, UnifracError, try_filled};

pub const DEFAULT_STEP_SIZE: usize = 32;
pub const DEFAULT_VECTOR_WIDTH: usize = 8;

/// Tiling granularity and vector width for the kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripeConfig {
    /// Side of a cache tile, in stripes and in samples.
    pub step_size: usize,
    /// Widest grouped computation the CPU kernels may use (8, 4 or 1).
    pub max_vector_width: usize,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            step_size: DEFAULT_STEP_SIZE,
            max_vector_width: DEFAULT_VECTOR_WIDTH,
        }
    }
}

impl StripeConfig {
    pub fn new(step_size: usize, max_vector_width: usize) -> Result<Self> {
        let cfg = Self {
            step_size,
            max_vector_width,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_size == 0 {
            return Err(UnifracError::InvalidConfig("step size must be positive".into()));
        }
        if !matches!(self.max_vector_width, 1 | 4 | 8) {
            return Err(UnifracError::InvalidConfig(format!(
                "vector width {} not in {{1, 4, 8}}",
                self.max_vector_width
            )));
        }
        Ok(())
    }
}

/// Which loop structure and memory layout the kernels run with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// Transposed layout, stripe × sample cache tiles, grouped inner loops.
    #[default]
    Cpu,
    /// Straight layout, one collapsed (sample block, stripe, sample) space.
    Grid,
}

impl ExecutionTarget {
    pub fn layout(self) -> Layout {
        match self {
            ExecutionTarget::Cpu => Layout::Transposed,
            ExecutionTarget::Grid => Layout::Straight,
        }
    }
}

impl FromStr for ExecutionTarget {
    type Err = UnifracError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(ExecutionTarget::Cpu),
            "grid" | "gpu" => Ok(ExecutionTarget::Grid),
            other => Err(UnifracError::InvalidConfig(format!("unknown target '{other}'"))),
        }
    }
}

#[inline]
pub fn stripe_count(n_samples: usize) -> usize {
    n_samples / 2
}

/// Stripe and row holding the unordered pair `{i, j}`.
pub fn locate_pair(i: usize, j: usize, n_samples: usize) -> Result<(usize, usize)> {
    if i == j || i >= n_samples || j >= n_samples {
        return Err(UnifracError::Precondition(format!(
            "pair ({i}, {j}) is not a distinct pair of {n_samples} samples"
        )));
    }
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    let offset = j - i;
    if offset - 1 < n_samples / 2 {
        Ok((offset - 1, i))
    } else {
        Ok((n_samples - offset - 1, j))
    }
}

/// Numerator (and, for normalized metrics, denominator) rows for stripes
/// `start..stop`.  Row `d - start` holds `n_samples_r` slots, of which the
/// first `n_samples` are live.
#[derive(Clone, Debug)]
pub struct StripeBuffers {
    start: usize,
    stop: usize,
    n_samples: usize,
    n_samples_r: usize,
    with_denominator: bool,
    numerator: Vec<f64>,
    denominator: Vec<f64>,
}

impl StripeBuffers {
    pub fn new(
        start: usize,
        stop: usize,
        n_samples: usize,
        n_samples_r: usize,
        with_denominator: bool,
    ) -> Result<Self> {
        if start > stop || stop > stripe_count(n_samples) {
            return Err(UnifracError::Precondition(format!(
                "stripes {start}..{stop} outside 0..{}",
                stripe_count(n_samples)
            )));
        }
        if n_samples_r < n_samples {
            return Err(UnifracError::Precondition(format!(
                "row stride {n_samples_r} below sample count {n_samples}"
            )));
        }
        let len = (stop - start) * n_samples_r;
        let numerator = try_filled(0.0, len, "stripe numerator")?;
        let denominator = if with_denominator {
            try_filled(0.0, len, "stripe denominator")?
        } else {
            Vec::new()
        };
        Ok(Self {
            start,
            stop,
            n_samples,
            n_samples_r,
            with_denominator,
            numerator,
            denominator,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn stop(&self) -> usize {
        self.stop
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_samples_r(&self) -> usize {
        self.n_samples_r
    }

    pub fn has_denominator(&self) -> bool {
        self.with_denominator
    }

    pub fn numerator(&self) -> &[f64] {
        &self.numerator
    }

    pub fn denominator(&self) -> &[f64] {
        &self.denominator
    }

    /// Accumulated value for the pair `(k, (k + d + 1) mod S)`.
    #[inline]
    pub fn value(&self, d: usize, k: usize) -> f64 {
        self.numerator[(d - self.start) * self.n_samples_r + k]
    }

    /// Replace every numerator with numerator / denominator (0 when the
    /// denominator is 0).  Buffers without a denominator are left untouched.
    pub fn compute_stripe_totals(&mut self) {
        if !self.with_denominator {
            return;
        }
        self.numerator
            .par_iter_mut()
            .zip(self.denominator.par_iter())
            .for_each(|(n, &d)| *n = if d == 0.0 { 0.0 } else { *n / d });
    }

    /// Split the live part of both buffers into disjoint stripe × sample
    /// tiles of side `step`.
    pub(crate) fn tiles(&mut self, step: usize) -> Vec<Tile<'_>> {
        let n = self.n_samples;
        if self.start == self.stop || n == 0 || step == 0 {
            return Vec::new();
        }
        let n_kb = n.div_ceil(step);
        let mut out: Vec<Tile<'_>> = Vec::with_capacity((self.stop - self.start).div_ceil(step) * n_kb);

        let mut num_rows = self.numerator.chunks_mut(self.n_samples_r);
        let mut den_rows = self.denominator.chunks_mut(self.n_samples_r);
        for block_start in (self.start..self.stop).step_by(step) {
            let block_stop = (block_start + step).min(self.stop);
            let base = out.len();
            for kb in 0..n_kb {
                out.push(Tile {
                    stripe0: block_start,
                    k0: kb * step,
                    k1: ((kb + 1) * step).min(n),
                    num: Vec::with_capacity(block_stop - block_start),
                    den: Vec::new(),
                });
            }
            for _ in block_start..block_stop {
                if let Some(row) = num_rows.next() {
                    for (kb, piece) in row[..n].chunks_mut(step).enumerate() {
                        out[base + kb].num.push(piece);
                    }
                }
                if let Some(row) = den_rows.next() {
                    for (kb, piece) in row[..n].chunks_mut(step).enumerate() {
                        out[base + kb].den.push(piece);
                    }
                }
            }
        }
        debug!("{} tiles of side {step}", out.len());
        out
    }

    /// Collapsed iteration over (sample block, stripe, in-block sample), with
    /// samples visited in `order`.  Stripe rows are disjoint and each slot of
    /// a row is touched once, so rows run in parallel and accumulate in place.
    pub(crate) fn grid_accumulate<F>(&mut self, order: &[usize], step: usize, f: F)
    where
        F: Fn(usize, usize) -> (f64, f64) + Sync,
    {
        let n = self.n_samples;
        if self.start == self.stop || n == 0 || step == 0 {
            return;
        }
        let (start, r) = (self.start, self.n_samples_r);
        let order = &order[..n];

        let sweep = |s: usize, num: &mut [f64], mut den: Option<&mut [f64]>| {
            for block in order.chunks(step) {
                for &k in block {
                    let (a, b) = f(start + s, k);
                    num[k] += a;
                    if let Some(den) = den.as_deref_mut() {
                        den[k] += b;
                    }
                }
            }
        };

        if self.with_denominator {
            self.numerator
                .par_chunks_mut(r)
                .zip(self.denominator.par_chunks_mut(r))
                .enumerate()
                .for_each(|(s, (num, den))| sweep(s, num, Some(den)));
        } else {
            self.numerator
                .par_chunks_mut(r)
                .enumerate()
                .for_each(|(s, num)| sweep(s, num, None));
        }
    }
}

/// Rows `stripe0..stripe0 + num.len()`, samples `k0..k1` of a
/// [`StripeBuffers`].
pub(crate) struct Tile<'a> {
    pub stripe0: usize,
    pub k0: usize,
    pub k1: usize,
    pub num: Vec<&'a mut [f64]>,
    pub den: Vec<&'a mut [f64]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pair_is_covered() {
        for s in 0..=64usize {
            let mut seen = vec![0u32; s * s];
            for d in 0..stripe_count(s) {
                for k in 0..s {
                    let l = (k + d + 1) % s;
                    assert_ne!(k, l);
                    let (a, b) = (k.min(l), k.max(l));
                    seen[a * s + b] += 1;
                }
            }
            for i in 0..s {
                for j in (i + 1)..s {
                    let c = seen[i * s + j];
                    let (d, _) = locate_pair(i, j, s).unwrap();
                    if s % 2 == 1 {
                        assert_eq!(c, 1, "S={s} pair ({i},{j})");
                    } else if d + 1 == s / 2 {
                        assert_eq!(c, 2, "S={s} pair ({i},{j})");
                    } else {
                        assert_eq!(c, 1, "S={s} pair ({i},{j})");
                    }
                }
            }
        }
    }

    #[test]
    fn locate_pair_is_consistent() {
        for s in 2..=33usize {
            for i in 0..s {
                for j in 0..s {
                    if i == j {
                        continue;
                    }
                    let (d, k) = locate_pair(i, j, s).unwrap();
                    assert!(d < stripe_count(s));
                    let l = (k + d + 1) % s;
                    assert_eq!((k.min(l), k.max(l)), (i.min(j), i.max(j)));
                    assert_eq!(locate_pair(j, i, s).unwrap(), (d, k));
                }
            }
        }
        assert!(locate_pair(1, 1, 4).is_err());
        assert!(locate_pair(0, 4, 4).is_err());
    }

    #[test]
    fn config_validation() {
        assert!(StripeConfig::default().validate().is_ok());
        assert!(StripeConfig::new(16, 4).is_ok());
        assert!(matches!(StripeConfig::new(0, 8), Err(UnifracError::InvalidConfig(_))));
        assert!(matches!(StripeConfig::new(8, 3), Err(UnifracError::InvalidConfig(_))));
        assert_eq!("GPU".parse::<ExecutionTarget>().unwrap(), ExecutionTarget::Grid);
        assert!("tpu".parse::<ExecutionTarget>().is_err());
    }

    #[test]
    fn buffers_reject_bad_ranges() {
        assert!(StripeBuffers::new(0, 3, 5, 8, true).is_err());
        assert!(StripeBuffers::new(2, 1, 5, 8, true).is_err());
        assert!(StripeBuffers::new(0, 2, 5, 4, true).is_err());
        let b = StripeBuffers::new(0, 0, 1, 64, true).unwrap();
        assert!(b.numerator().is_empty());
    }

    #[test]
    fn totals_divide_and_zero_guard() {
        let mut b = StripeBuffers::new(0, 1, 3, 4, true).unwrap();
        b.numerator[..3].copy_from_slice(&[1.0, 2.0, 3.0]);
        b.denominator[..3].copy_from_slice(&[2.0, 0.0, 4.0]);
        b.compute_stripe_totals();
        assert_eq!(&b.numerator()[..3], &[0.5, 0.0, 0.75]);
    }

    #[test]
    fn tiles_partition_the_live_region() {
        let mut b = StripeBuffers::new(0, 5, 11, 16, true).unwrap();
        for t in b.tiles(4) {
            for (r, (row, den)) in t.num.into_iter().zip(t.den).enumerate() {
                assert_eq!(row.len(), t.k1 - t.k0);
                for (x, y) in row.iter_mut().zip(den.iter_mut()) {
                    *x += (t.stripe0 + r) as f64;
                    *y += 1.0;
                }
            }
        }
        for d in 0..5 {
            for k in 0..11 {
                assert_eq!(b.value(d, k), d as f64);
                assert_eq!(b.denominator()[d * 16 + k], 1.0);
            }
            for k in 11..16 {
                assert_eq!(b.denominator()[d * 16 + k], 0.0);
            }
        }
    }

    #[test]
    fn grid_accumulates_both_buffers_in_place() {
        let mut b = StripeBuffers::new(0, 3, 7, 8, true).unwrap();
        let order: Vec<usize> = vec![3, 0, 6, 1, 5, 2, 4];
        for _ in 0..2 {
            b.grid_accumulate(&order, 3, |d, k| ((d * 10 + k) as f64, 1.0));
        }
        for d in 0..3 {
            for k in 0..7 {
                assert_eq!(b.value(d, k), 2.0 * (d * 10 + k) as f64);
                assert_eq!(b.denominator()[d * 8 + k], 2.0);
            }
            assert_eq!(b.value(d, 7), 0.0);
            assert_eq!(b.denominator()[d * 8 + 7], 0.0);
        }
    }

    #[test]
    fn grid_visits_each_slot_once() {
        let mut b = StripeBuffers::new(1, 4, 9, 16, false).unwrap();
        let order: Vec<usize> = (0..9).rev().collect();
        b.grid_accumulate(&order, 4, |d, k| ((d * 100 + k) as f64, 0.0));
        for d in 1..4 {
            for k in 0..9 {
                assert_eq!(b.value(d, k), (d * 100 + k) as f64);
            }
        }
    }
}
