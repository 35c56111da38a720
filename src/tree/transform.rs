//! Pruning transforms. Each one returns a new tree.

use bitvec::{order::Lsb0, slice::BitSlice};
use log::debug;
use std::collections::HashSet;

use super::{BpTree, Parens};
use crate::error::{Result, UnifracError};

impl BpTree {
    /// Keep exactly the positions set in `keep`, in their original order,
    /// taking lengths from `lengths` instead of the tree's own (so callers can
    /// fold lengths before masking).
    ///
    /// The kept positions must themselves form a balanced tree.
    pub fn mask(&self, keep: &BitSlice<u64, Lsb0>, lengths: &[f64]) -> Result<BpTree> {
        let n = self.nparens();
        if keep.len() != n {
            return Err(UnifracError::LengthMismatch {
                what: "topology mask",
                expected: n,
                got: keep.len(),
            });
        }
        if lengths.len() != n {
            return Err(UnifracError::LengthMismatch {
                what: "mask lengths",
                expected: n,
                got: lengths.len(),
            });
        }

        let count = keep.count_ones();
        let mut structure = Parens::with_capacity(count);
        let mut new_lengths = Vec::with_capacity(count);
        let mut new_names = Vec::with_capacity(count);
        for old in keep.iter_ones() {
            structure.push(self.structure[old]);
            new_lengths.push(lengths[old]);
            new_names.push(self.names[old].clone());
        }
        BpTree::from_parts(structure, new_lengths, new_names)
    }

    /// Retain the named leaves and every ancestor needed to reach the root.
    ///
    /// Fails with [`UnifracError::EmptyTree`] when no leaf matches.
    pub fn shear(&self, to_keep: &HashSet<String>) -> Result<BpTree> {
        let n = self.nparens();
        let mut shearmask = Parens::repeat(false, n);

        for i in 0..n {
            if !(self.is_leaf(i) && to_keep.contains(&self.names[i])) {
                continue;
            }
            shearmask.set(i, true);
            shearmask.set(i + 1, true);

            let mut p = self.parent(i);
            while let Some(anc) = p {
                if shearmask[anc] {
                    break;
                }
                shearmask.set(anc, true);
                shearmask.set(self.close(anc), true);
                p = self.parent(anc);
            }
        }

        debug!(
            "shear: keeping {} of {} nodes",
            shearmask.count_ones() / 2,
            self.node_count()
        );
        self.mask(&shearmask, &self.lengths)
    }

    /// Drop internal nodes with exactly one child, adding their branch length
    /// to that child.  The root and leaves are always kept.
    ///
    /// Preorder guarantees a chain of single-child nodes accumulates into the
    /// lowest surviving descendant.
    pub fn collapse(&self) -> Result<BpTree> {
        let n = self.nparens();
        let mut collapsemask = Parens::repeat(false, n);
        let mut new_lengths = self.lengths.clone();

        for k in 0..self.node_count() {
            let current = self.preorder_select(k);

            if self.is_leaf(current) || current == self.root() {
                collapsemask.set(current, true);
                collapsemask.set(self.close(current), true);
                continue;
            }
            match (self.left_child(current), self.right_child(current)) {
                (Some(first), Some(last)) if first == last => {
                    new_lengths[first] += new_lengths[current];
                }
                _ => {
                    collapsemask.set(current, true);
                    collapsemask.set(self.close(current), true);
                }
            }
        }

        self.mask(&collapsemask, &new_lengths)
    }
}
