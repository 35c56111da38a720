//! Variance-adjusted variants of every method.
//!
//! With `m` the pair's combined sample total and `m_i` its combined count at
//! node `i`, each node term is divided by `sqrt(m_i (m - m_i))`; nodes where
//! that factor is 0 are skipped.  There is no zero-skip shortcut since the
//! factor depends on both samples.

use super::{Method, PairKernel};
use crate::embed::EmbeddedBlock;

pub struct VarianceAdjusted<'a> {
    block: &'a EmbeddedBlock,
    method: Method,
    alpha: f64,
}

impl<'a> VarianceAdjusted<'a> {
    pub fn new(block: &'a EmbeddedBlock, method: Method, alpha: f64) -> Self {
        Self { block, method, alpha }
    }

    /// Visit every node with a nonzero variance factor as `(emb, len, vaw)`.
    #[inline]
    fn for_each_node(&self, k: usize, l: usize, mut f: impl FnMut(usize, f64, f64)) {
        let b = self.block;
        let counts = b.counts();
        let totals = b.totals();
        let m = totals[k] + totals[l];
        for (emb, &len) in b.lengths()[..b.filled_embs()].iter().enumerate() {
            let mi = counts[b.cell(emb, k)] + counts[b.cell(emb, l)];
            let vaw = (mi * (m - mi)).sqrt();
            if vaw > 0.0 {
                f(emb, len, vaw);
            }
        }
    }
}

impl PairKernel for VarianceAdjusted<'_> {
    fn pair(&self, k: usize, l: usize) -> (f64, f64) {
        let b = self.block;
        let (mut num, mut den) = (0.0, 0.0);
        match self.method {
            Method::Unweighted | Method::UnweightedUnnormalized => {
                self.for_each_node(k, l, |emb, len, vaw| {
                    let lv = len / vaw;
                    let (u, v) = (b.is_present(emb, k), b.is_present(emb, l));
                    if u != v {
                        num += lv;
                    }
                    if u || v {
                        den += lv;
                    }
                });
            }
            Method::WeightedNormalized | Method::WeightedUnnormalized => {
                let props = b.proportions();
                self.for_each_node(k, l, |emb, len, vaw| {
                    let u = props[b.cell(emb, k)];
                    let v = props[b.cell(emb, l)];
                    num += ((u - v).abs() * len) / vaw;
                    den += ((u + v) * len) / vaw;
                });
            }
            Method::Generalized => {
                let props = b.proportions();
                let alpha = self.alpha;
                self.for_each_node(k, l, |emb, len, vaw| {
                    let u = props[b.cell(emb, k)];
                    let v = props[b.cell(emb, l)];
                    let sum1 = (u + v) / vaw;
                    if sum1 == 0.0 {
                        return;
                    }
                    let sub1 = (u - v).abs() / vaw;
                    let sum_pow = sum1.powf(alpha) * len;
                    num += sum_pow * (sub1 / sum1);
                    den += sum_pow;
                });
            }
        }
        (num, den)
    }
}
