//! Bridge from a `newick` crate tree to [`BpTree`].

use newick::{Newick, NewickTree, NodeID};

use super::{BpTree, Parens};
use crate::error::Result;

/// Iterative depth-first walk: a node's open token is emitted on the way
/// down, its close token once every child has been closed.
struct BpTrav<'a> {
    t: &'a NewickTree,
    stack: Vec<(NodeID, bool)>,
}

impl<'a> BpTrav<'a> {
    fn new(t: &'a NewickTree) -> Self {
        Self {
            t,
            stack: vec![(t.root(), false)],
        }
    }

    fn build(mut self) -> Result<BpTree> {
        let total = self.t.nodes().into_iter().count() * 2;
        let mut structure = Parens::with_capacity(total);
        let mut lengths = Vec::with_capacity(total);
        let mut names = Vec::with_capacity(total);

        while let Some((id, closing)) = self.stack.pop() {
            structure.push(!closing);
            lengths.push(self.t[id].branch().copied().unwrap_or(0.0) as f64);
            names.push(self.t.name(id).map(|s| s.to_string()).unwrap_or_default());
            if closing {
                continue;
            }
            self.stack.push((id, true));
            for &c in self.t[id].children().iter().rev() {
                self.stack.push((c, false));
            }
        }
        BpTree::from_parts(structure, lengths, names)
    }
}

impl BpTree {
    /// Convert an already parsed `newick` crate tree, keeping child order.
    ///
    /// The `newick` crate stores branch lengths as `f32`, so lengths arrive
    /// rounded to single precision.  [`BpTree::from_newick`] keeps `f64`.
    pub fn from_newick_tree(t: &NewickTree) -> Result<Self> {
        BpTrav::new(t).build()
    }
}
