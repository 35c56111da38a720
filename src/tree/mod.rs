//! Balanced-parenthesis (BP) phylogenetic tree.
//!
//! A node is identified by the position of its open token in `structure`;
//! every node contributes one open (`true`) and one matching close
//! (`false`) token, in preorder.  Side arrays are indexed by position:
//!
//! * `openclose[i]`  position of the token matching `i`
//! * `excess[i]`     opens minus closes over `structure[..=i]`
//! * `select1[k]`    position of the k-th open  (preorder rank k)
//! * `select0[k]`    position of the k-th close (postorder rank k)
//! * `lengths[i]`, `names[i]` branch length / label, meaningful at opens
//!
//! Trees are immutable once built; `mask`, `shear` and `collapse` return
//! new instances.

mod convert;
mod parse;
mod transform;

use bitvec::{order::Lsb0, slice::BitSlice, vec::BitVec};
use std::collections::HashSet;

use crate::error::{Result, UnifracError};

/// Bit storage for the parenthesis sequence.
pub type Parens = BitVec<u64, Lsb0>;

#[derive(Clone, Debug)]
pub struct BpTree {
    structure: Parens,
    openclose: Vec<u32>,
    lengths: Vec<f64>,
    names: Vec<String>,
    excess: Vec<u32>,
    select0: Vec<u32>,
    select1: Vec<u32>,
}

impl BpTree {
    /// Build from raw parallel arrays, one entry per parenthesis token.
    pub fn from_parts(structure: Parens, lengths: Vec<f64>, names: Vec<String>) -> Result<Self> {
        let n = structure.len();
        if n == 0 {
            return Err(UnifracError::EmptyTree);
        }
        if lengths.len() != n {
            return Err(UnifracError::LengthMismatch {
                what: "branch lengths",
                expected: n,
                got: lengths.len(),
            });
        }
        if names.len() != n {
            return Err(UnifracError::LengthMismatch {
                what: "node names",
                expected: n,
                got: names.len(),
            });
        }
        if n > u32::MAX as usize {
            return Err(UnifracError::MalformedTree(format!(
                "{n} parentheses exceed the 32-bit position space"
            )));
        }

        let openclose = structure_to_openclose(&structure)?;
        let (excess, select0, select1) = index_and_cache(&structure);

        Ok(Self {
            structure,
            openclose,
            lengths,
            names,
            excess,
            select0,
            select1,
        })
    }

    /// Convenience over [`BpTree::from_parts`] for plain boolean slices.
    pub fn from_bools(structure: &[bool], lengths: Vec<f64>, names: Vec<String>) -> Result<Self> {
        let bits: Parens = structure.iter().copied().collect();
        Self::from_parts(bits, lengths, names)
    }

    #[inline]
    pub fn nparens(&self) -> usize {
        self.structure.len()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.structure.len() / 2
    }

    #[inline]
    pub fn root(&self) -> usize {
        0
    }

    #[inline]
    pub fn is_open(&self, i: usize) -> bool {
        self.structure[i]
    }

    pub fn structure(&self) -> &BitSlice<u64, Lsb0> {
        &self.structure
    }

    pub fn openclose(&self) -> &[u32] {
        &self.openclose
    }

    pub fn excess(&self) -> &[u32] {
        &self.excess
    }

    /// Per-position lengths; only open positions carry meaningful values.
    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Branch length of the node owning position `i`.
    #[inline]
    pub fn length(&self, i: usize) -> f64 {
        self.lengths[self.open(i)]
    }

    /// Label of the node owning position `i` (empty when unnamed).
    #[inline]
    pub fn name(&self, i: usize) -> &str {
        &self.names[self.open(i)]
    }

    #[inline]
    pub fn open(&self, i: usize) -> usize {
        if self.structure[i] {
            i
        } else {
            self.openclose[i] as usize
        }
    }

    #[inline]
    pub fn close(&self, i: usize) -> usize {
        if self.structure[i] {
            self.openclose[i] as usize
        } else {
            i
        }
    }

    /// A leaf is the bit pattern (open, close).
    #[inline]
    pub fn is_leaf(&self, i: usize) -> bool {
        self.structure[i] && i + 1 < self.structure.len() && !self.structure[i + 1]
    }

    /// First child of the node at `i`; `None` for leaves.
    pub fn left_child(&self, i: usize) -> Option<usize> {
        let i = self.open(i);
        if self.is_leaf(i) { None } else { Some(i + 1) }
    }

    /// Last child of the node at `i`; `None` for leaves.
    pub fn right_child(&self, i: usize) -> Option<usize> {
        let i = self.open(i);
        if self.is_leaf(i) {
            None
        } else {
            Some(self.open(self.close(i) - 1))
        }
    }

    /// Next sibling to the right; `None` for the root and last children.
    pub fn right_sibling(&self, i: usize) -> Option<usize> {
        let pos = self.close(i) + 1;
        if pos < self.structure.len() && self.structure[pos] {
            Some(pos)
        } else {
            None
        }
    }

    /// Open position of the parent; `None` for the root.
    #[inline]
    pub fn parent(&self, i: usize) -> Option<usize> {
        self.enclose(i)
    }

    /// Nearest enclosing open token.
    ///
    /// Backward scan for the last position whose excess is two below the
    /// excess at `i` (or `i - 1` for a close token); the parent opens right
    /// after it.  When no such position exists the parent is the root.  A
    /// negative target means `i` belongs to the root itself.
    ///
    /// O(depth × width) worst case; a min-excess index would make this O(1)
    /// with identical results.
    pub fn enclose(&self, i: usize) -> Option<usize> {
        let j = if self.structure[i] { i } else { i.checked_sub(1)? };
        let target = self.excess[j] as i64 - 2;
        if target < 0 {
            return None;
        }
        Some(self.bwd(j, target as u32).map_or(0, |p| p + 1))
    }

    fn bwd(&self, i: usize, target: u32) -> Option<usize> {
        self.excess[..i].iter().rposition(|&e| e == target)
    }

    /// Open position of the k-th node in preorder.
    #[inline]
    pub fn preorder_select(&self, k: usize) -> usize {
        self.select1[k] as usize
    }

    /// Open position of the k-th node in postorder.
    #[inline]
    pub fn postorder_select(&self, k: usize) -> usize {
        self.open(self.select0[k] as usize)
    }

    /// Open positions of all nodes in postorder; the root is last.
    pub fn postorder(&self) -> Vec<usize> {
        (0..self.node_count()).map(|k| self.postorder_select(k)).collect()
    }

    /// Open positions of all nodes in preorder; the root is first.
    pub fn preorder(&self) -> Vec<usize> {
        self.select1.iter().map(|&p| p as usize).collect()
    }

    /// Children of the node at `i`, left to right.
    pub fn children(&self, i: usize) -> Children<'_> {
        Children {
            tree: self,
            next: self.left_child(i),
        }
    }

    /// Number of edges between the node at `i` and the root.
    pub fn depth(&self, i: usize) -> usize {
        self.excess[self.open(i)] as usize - 1
    }

    pub fn leaf_count(&self) -> usize {
        (0..self.nparens()).filter(|&i| self.is_leaf(i)).count()
    }

    /// Labels of all leaves.
    pub fn tip_names(&self) -> HashSet<String> {
        (0..self.nparens())
            .filter(|&i| self.is_leaf(i))
            .map(|i| self.names[i].clone())
            .collect()
    }
}

pub struct Children<'a> {
    tree: &'a BpTree,
    next: Option<usize>,
}

impl Iterator for Children<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let cur = self.next?;
        self.next = self.tree.right_sibling(cur);
        Some(cur)
    }
}

/// Pair every open with its close using a stack; rejects unbalanced input
/// and sequences describing more than one root.
fn structure_to_openclose(structure: &BitSlice<u64, Lsb0>) -> Result<Vec<u32>> {
    let n = structure.len();
    let mut openclose = vec![0u32; n];
    let mut stack: Vec<u32> = Vec::new();

    for (i, bit) in structure.iter().by_vals().enumerate() {
        if bit {
            if i > 0 && stack.is_empty() {
                return Err(UnifracError::MalformedTree(format!(
                    "second root opens at position {i}"
                )));
            }
            stack.push(i as u32);
        } else {
            let open_idx = stack.pop().ok_or_else(|| {
                UnifracError::MalformedTree(format!("unmatched close at position {i}"))
            })?;
            openclose[i] = open_idx;
            openclose[open_idx as usize] = i as u32;
        }
    }
    if !stack.is_empty() {
        return Err(UnifracError::MalformedTree(format!(
            "{} unclosed parentheses",
            stack.len()
        )));
    }
    Ok(openclose)
}

fn index_and_cache(structure: &BitSlice<u64, Lsb0>) -> (Vec<u32>, Vec<u32>, Vec<u32>) {
    let n = structure.len();
    let mut excess = Vec::with_capacity(n);
    let mut select0 = Vec::with_capacity(n / 2);
    let mut select1 = Vec::with_capacity(n / 2);
    let mut e = 0u32;
    for (idx, bit) in structure.iter().by_vals().enumerate() {
        if bit {
            select1.push(idx as u32);
            e += 1;
        } else {
            select0.push(idx as u32);
            e -= 1;
        }
        excess.push(e);
    }
    (excess, select0, select1)
}
