//! Generalized UniFrac with exponent `alpha`.
//!
//! Per node with `u + v > 0`:
//! numerator   len · (u + v)^α · |u − v| / (u + v)
//! denominator len · (u + v)^α

use super::PairKernel;
use crate::embed::EmbeddedBlock;

pub struct Generalized<'a> {
    block: &'a EmbeddedBlock,
    alpha: f64,
}

impl<'a> Generalized<'a> {
    pub fn new(block: &'a EmbeddedBlock, alpha: f64) -> Self {
        Self { block, alpha }
    }
}

impl PairKernel for Generalized<'_> {
    fn pair(&self, k: usize, l: usize) -> (f64, f64) {
        let b = self.block;
        let props = b.proportions();
        let (mut num, mut den) = (0.0, 0.0);
        for (emb, &len) in b.lengths()[..b.filled_embs()].iter().enumerate() {
            let u = props[b.cell(emb, k)];
            let v = props[b.cell(emb, l)];
            let sum = u + v;
            if sum != 0.0 {
                let sum_pow = sum.powf(self.alpha) * len;
                num += sum_pow * ((u - v).abs() / sum);
                den += sum_pow;
            }
        }
        (num, den)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{block, fixture};
    use super::super::weighted::Weighted;
    use super::*;
    use crate::embed::Layout;
    use crate::kernels::{Method, Metric};
    use crate::table::FeatureTable;
    use approx::assert_abs_diff_eq;

    #[test]
    fn alpha_one_is_weighted_normalized() {
        let (tree, table) = fixture();
        let metric = Metric::generalized(1.0);
        let b = block(&tree, &table, &metric, Layout::Transposed);
        let g = Generalized::new(&b, 1.0);
        let w = Weighted::new(&b, true).unwrap();
        for i in 0..table.n_samples() {
            for j in (i + 1)..table.n_samples() {
                let (gn, gd) = g.pair(i, j);
                let (wn, wd) = w.pair(i, j);
                assert_abs_diff_eq!(gn, wn, epsilon = 1e-12);
                assert_abs_diff_eq!(gd, wd, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn alpha_zero_weighs_nodes_by_length_only() {
        let (tree, table) = fixture();
        let metric = Metric::generalized(0.0);
        let b = block(&tree, &table, &metric, Layout::Straight);
        let g = Generalized::new(&b, 0.0);
        // identical samples contribute no numerator
        let (num, den) = g.pair(4, 4);
        assert_eq!(num, 0.0);
        let spanned: f64 = (0..b.filled_embs())
            .filter(|&e| b.proportion(e, 4) > 0.0)
            .map(|e| b.lengths()[e])
            .sum();
        assert_abs_diff_eq!(den, spanned, epsilon = 1e-12);
    }
}
