//! Per-block precomputation that lets the kernels skip all-zero samples.
//!
//! A sample whose weights are all zero over the current node block
//! contributes `f(u, 0) = Σ len·u` to every pair it is part of, so the
//! pair value is read from that per-sample sum instead of walking nodes.

use rayon::prelude::*;

use crate::embed::{EmbedNeeds, EmbeddedBlock};
use crate::error::Result;

/// Zero flags and length-weighted sums, one entry per sample.
#[derive(Clone, Debug, Default)]
pub struct ZeroSums {
    pub zcheck: Vec<bool>,
    pub sums: Vec<f64>,
}

impl ZeroSums {
    pub fn all_zero(&self, k: usize) -> bool {
        self.zcheck[k]
    }

    pub fn n_zero(&self) -> usize {
        self.zcheck.iter().filter(|&&z| z).count()
    }
}

/// For every sample: whether all proportions in the block are 0, and
/// `Σ len[e] · prop[e]`.
pub fn weighted_zeros_and_sums(block: &EmbeddedBlock) -> Result<ZeroSums> {
    block.require(EmbedNeeds {
        proportions: true,
        ..Default::default()
    })?;
    let filled = block.filled_embs();
    let lengths = block.lengths();
    let props = block.proportions();

    let (zcheck, sums) = (0..block.n_samples())
        .into_par_iter()
        .map(|k| {
            let mut all_zeros = true;
            let mut my_sum = 0.0;
            for (emb, &len) in lengths.iter().enumerate().take(filled) {
                let u = props[block.cell(emb, k)];
                my_sum += u * len;
                all_zeros = all_zeros && u == 0.0;
            }
            (all_zeros, my_sum)
        })
        .unzip();
    Ok(ZeroSums { zcheck, sums })
}

/// Sums of branch lengths for every 8-bit presence pattern.
///
/// Byte `b` of packed word `w` covers nodes `w*64 + b*8 .. w*64 + b*8 + 8`;
/// its 256 entries start at `(w*8 + b) * 256`.
#[derive(Clone, Debug)]
pub struct LengthTable {
    words: usize,
    sums: Vec<f64>,
}

impl LengthTable {
    pub fn new(lengths: &[f64], filled_embs: usize) -> Self {
        let words = filled_embs.div_ceil(64);
        let len_at = |e: usize| if e < filled_embs { lengths[e] } else { 0.0 };

        let sums = (0..words * 8)
            .into_par_iter()
            .flat_map_iter(|emb8| {
                let pl: [f64; 8] = std::array::from_fn(|i| len_at(emb8 * 8 + i));
                (0..256usize).map(move |b8| {
                    (0..8)
                        .filter(|bit| (b8 >> bit) & 1 == 1)
                        .map(|bit| pl[bit])
                        .sum::<f64>()
                })
            })
            .collect();
        Self { words, sums }
    }

    /// Number of packed words the table covers.
    pub fn words(&self) -> usize {
        self.words
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.sums
    }

    /// Σ lengths of the nodes whose bit is set in `word`, the `w`-th word.
    #[inline]
    pub fn lookup(&self, w: usize, mut word: u64) -> f64 {
        let mut psum = &self.sums[w * 0x800..(w + 1) * 0x800];
        let mut acc = 0.0;
        while word != 0 {
            let b = (word & 0xff) as usize;
            if b != 0 {
                acc += psum[b];
            }
            word >>= 8;
            psum = &psum[0x100..];
        }
        acc
    }
}

/// For every sample: whether no node of the block is present, and the
/// summed length of the present nodes.
pub fn unweighted_zeros_and_sums(block: &EmbeddedBlock, table: &LengthTable) -> Result<ZeroSums> {
    block.require(EmbedNeeds {
        presence: true,
        ..Default::default()
    })?;
    let presence = block.presence();

    let (zcheck, sums) = (0..block.n_samples())
        .into_par_iter()
        .map(|k| {
            let mut all_zeros = true;
            let mut my_stripe = 0.0;
            for w in 0..table.words() {
                let o = presence[block.word(w * 64, k)];
                if o != 0 {
                    all_zeros = false;
                    my_stripe += table.lookup(w, o);
                }
            }
            (all_zeros, my_stripe)
        })
        .unzip();
    Ok(ZeroSums { zcheck, sums })
}

/// Sample indices with all-zero samples first, each group in ascending
/// order.
pub fn zero_first_order(zcheck: &[bool]) -> Vec<usize> {
    let (mut order, rest): (Vec<usize>, Vec<usize>) = (0..zcheck.len()).partition(|&k| zcheck[k]);
    order.extend(rest);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{Embedder, Layout};
    use crate::table::SparseTable;
    use crate::tree::BpTree;
    use approx::assert_abs_diff_eq;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn block(layout: Layout) -> EmbeddedBlock {
        // postorder a b d c
        let tree = BpTree::from_newick("((a:1,b:2)d:3,c:4)r;").unwrap();
        let table = SparseTable::from_dense(
            ids(&["a", "b", "c"]),
            ids(&["s1", "s2", "s3"]),
            &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 5.0]],
        )
        .unwrap();
        let needs = EmbedNeeds {
            proportions: true,
            presence: true,
            counts: false,
        };
        Embedder::new(&tree, &table, layout, needs, 64)
            .unwrap()
            .next_block()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn weighted_sums_and_flags() {
        for layout in [Layout::Transposed, Layout::Straight] {
            let b = block(layout);
            let z = weighted_zeros_and_sums(&b).unwrap();
            assert_eq!(z.zcheck, vec![false, true, false]);
            // s1: a .5*1 + b .5*2 + d 1*3
            assert_abs_diff_eq!(z.sums[0], 4.5);
            assert_eq!(z.sums[1], 0.0);
            assert_abs_diff_eq!(z.sums[2], 4.0);
            assert_eq!(z.n_zero(), 1);
        }
    }

    #[test]
    fn length_table_matches_bit_sums() {
        let lengths: Vec<f64> = (0..70).map(|i| 1.0 + i as f64 * 0.5).collect();
        let t = LengthTable::new(&lengths, 70);
        assert_eq!(t.words(), 2);
        assert_eq!(t.as_slice().len(), 2 * 8 * 256);
        for word in [0u64, 1, 0xff, 0x8000_0000_0000_0001, u64::MAX, 0x0f0f_00f0_1234_5678] {
            let expect: f64 = (0..64).filter(|b| (word >> b) & 1 == 1).map(|b| lengths[b]).sum();
            assert_abs_diff_eq!(t.lookup(0, word), expect, epsilon = 1e-9);
        }
        // second word: only 6 filled nodes, higher bits weigh nothing
        let expect: f64 = (64..70).map(|e| lengths[e]).sum();
        assert_abs_diff_eq!(t.lookup(1, u64::MAX), expect, epsilon = 1e-9);
    }

    #[test]
    fn unweighted_sums_and_flags() {
        for layout in [Layout::Transposed, Layout::Straight] {
            let b = block(layout);
            let t = LengthTable::new(b.lengths(), b.filled_embs());
            let z = unweighted_zeros_and_sums(&b, &t).unwrap();
            assert_eq!(z.zcheck, vec![false, true, false]);
            assert_abs_diff_eq!(z.sums[0], 6.0);
            assert_abs_diff_eq!(z.sums[2], 4.0);
        }
    }

    #[test]
    fn zero_first_is_stable() {
        assert_eq!(zero_first_order(&[false, true, false, true]), vec![1, 3, 0, 2]);
        assert!(zero_first_order(&[]).is_empty());
    }

    #[test]
    fn missing_arrays_are_reported() {
        let tree = BpTree::from_newick("(a:1,b:1);").unwrap();
        let table = SparseTable::from_dense(ids(&["a"]), ids(&["s"]), &[vec![1.0]]).unwrap();
        let b = Embedder::new(&tree, &table, Layout::Transposed, EmbedNeeds::default(), 64)
            .unwrap()
            .next_block()
            .unwrap()
            .unwrap();
        assert!(weighted_zeros_and_sums(&b).is_err());
    }
}
