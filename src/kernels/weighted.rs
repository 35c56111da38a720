//! Weighted UniFrac, normalized and unnormalized.
//!
//! numerator   Σ len · |u − v|
//! denominator Σ len · (u + v)     (normalized only)

use super::PairKernel;
use crate::embed::EmbeddedBlock;
use crate::error::Result;
use crate::zero_skip::{ZeroSums, weighted_zeros_and_sums};

pub struct Weighted<'a> {
    block: &'a EmbeddedBlock,
    zs: ZeroSums,
    normalized: bool,
}

impl<'a> Weighted<'a> {
    pub fn new(block: &'a EmbeddedBlock, normalized: bool) -> Result<Self> {
        Ok(Self {
            block,
            zs: weighted_zeros_and_sums(block)?,
            normalized,
        })
    }

    /// Node-by-node numerator for two samples with nonzero weights.
    #[inline]
    fn dense(&self, k: usize, l: usize) -> f64 {
        let b = self.block;
        let props = b.proportions();
        b.lengths()[..b.filled_embs()]
            .iter()
            .enumerate()
            .map(|(emb, &len)| (props[b.cell(emb, k)] - props[b.cell(emb, l)]).abs() * len)
            .sum()
    }
}

impl PairKernel for Weighted<'_> {
    fn pair(&self, k: usize, l: usize) -> (f64, f64) {
        let (zk, zl) = (self.zs.all_zero(k), self.zs.all_zero(l));
        if zk && zl {
            return (0.0, 0.0);
        }
        let sums = &self.zs.sums;
        // the denominator always distributes
        let den = if self.normalized { sums[k] + sums[l] } else { 0.0 };
        let num = if zk {
            sums[l]
        } else if zl {
            sums[k]
        } else {
            self.dense(k, l)
        };
        (num, den)
    }

    fn group<const W: usize>(&self, ks: usize, ls: usize) -> ([f64; W], [f64; W]) {
        let any_zero = (0..W).any(|i| self.zs.all_zero(ks + i) || self.zs.all_zero(ls + i));
        if any_zero {
            let mut num = [0.0; W];
            let mut den = [0.0; W];
            for i in 0..W {
                (num[i], den[i]) = self.pair(ks + i, ls + i);
            }
            return (num, den);
        }

        let b = self.block;
        let props = b.proportions();
        let mut num = [0.0; W];
        for (emb, &len) in b.lengths()[..b.filled_embs()].iter().enumerate() {
            for (i, acc) in num.iter_mut().enumerate() {
                let u = props[b.cell(emb, ks + i)];
                let v = props[b.cell(emb, ls + i)];
                *acc += (u - v).abs() * len;
            }
        }
        let den = if self.normalized {
            std::array::from_fn(|i| self.zs.sums[ks + i] + self.zs.sums[ls + i])
        } else {
            [0.0; W]
        };
        (num, den)
    }
}
