//! Unweighted UniFrac over packed presence words.
//!
//! numerator   Σ len over nodes present in exactly one sample (u ^ v)
//! denominator Σ len over nodes present in either sample (u | v)
//!
//! Both sums are read 8 bits at a time from a [`LengthTable`].

use super::PairKernel;
use crate::embed::EmbeddedBlock;
use crate::error::Result;
use crate::zero_skip::{LengthTable, ZeroSums, unweighted_zeros_and_sums, zero_first_order};

pub struct Unweighted<'a> {
    block: &'a EmbeddedBlock,
    table: LengthTable,
    zs: ZeroSums,
    normalized: bool,
}

impl<'a> Unweighted<'a> {
    pub fn new(block: &'a EmbeddedBlock, normalized: bool) -> Result<Self> {
        let table = LengthTable::new(block.lengths(), block.filled_embs());
        let zs = unweighted_zeros_and_sums(block, &table)?;
        Ok(Self {
            block,
            table,
            zs,
            normalized,
        })
    }
}

impl PairKernel for Unweighted<'_> {
    fn pair(&self, k: usize, l: usize) -> (f64, f64) {
        let (zk, zl) = (self.zs.all_zero(k), self.zs.all_zero(l));
        if zk && zl {
            return (0.0, 0.0);
        }
        if zk || zl {
            // with one side empty, xor and or both reduce to the other side
            let v = self.zs.sums[if zk { l } else { k }];
            return (v, v);
        }

        let b = self.block;
        let presence = b.presence();
        let (mut num, mut den) = (0.0, 0.0);
        for w in 0..self.table.words() {
            let u = presence[b.word(w * 64, k)];
            let v = presence[b.word(w * 64, l)];
            let o = u | v;
            if o == 0 {
                continue;
            }
            num += self.table.lookup(w, u ^ v);
            if self.normalized {
                den += self.table.lookup(w, o);
            }
        }
        (num, den)
    }

    fn grid_order(&self, _n_samples: usize) -> Vec<usize> {
        zero_first_order(&self.zs.zcheck)
    }
}
