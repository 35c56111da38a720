//! Per-node sample weights ("embeddings") handed to the kernels.
//!
//! Nodes are visited in postorder, the root excluded, and cut into blocks of
//! `embs_per_block` nodes.  A node's sample vector is the sum of its leaves'
//! vectors, kept on a stack of finished subtrees until the parent consumes
//! them, so blocks must be produced in order.
//!
//! Layouts (`e` = node within the block, `s` = sample):
//!
//! * transposed: `props[s * embs_stride + e]`,
//!   presence word `s * words_stride + e / 64`
//! * straight:   `props[e * n_samples_r + s]`,
//!   presence word `(e / 64) * n_samples_r + s`
//!
//! Presence bits are `Lsb0` within a word: node `e` is bit `e % 64`.

use bitvec::{order::Lsb0, vec::BitVec};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::error::{IdAxis, Result, UnifracError, try_filled};
use crate::table::FeatureTable;
use crate::tree::BpTree;

/// Sample rows are padded to a multiple of this.
pub const SAMPLE_ALIGN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// All nodes of one sample contiguous.
    Transposed,
    /// All samples of one node contiguous.
    Straight,
}

/// Which arrays a metric reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmbedNeeds {
    pub proportions: bool,
    pub presence: bool,
    pub counts: bool,
}

#[inline]
pub fn round_samples(n_samples: usize) -> usize {
    n_samples.div_ceil(SAMPLE_ALIGN) * SAMPLE_ALIGN
}

/// One block of embedded nodes.  Arrays the metric does not need are empty.
#[derive(Clone, Debug)]
pub struct EmbeddedBlock {
    layout: Layout,
    n_samples: usize,
    n_samples_r: usize,
    embs_stride: usize,
    filled_embs: usize,
    lengths: Vec<f64>,
    proportions: Vec<f64>,
    presence: Vec<u64>,
    counts: Vec<f64>,
    totals: Vec<f64>,
}

impl EmbeddedBlock {
    /// An empty block; fill columns with [`EmbeddedBlock::set_node`].
    pub fn new(
        layout: Layout,
        n_samples: usize,
        embs_stride: usize,
        needs: EmbedNeeds,
        totals: Vec<f64>,
    ) -> Result<Self> {
        if embs_stride == 0 || embs_stride % 64 != 0 {
            return Err(UnifracError::InvalidConfig(format!(
                "node block size {embs_stride} is not a positive multiple of 64"
            )));
        }
        if totals.len() != n_samples {
            return Err(UnifracError::LengthMismatch {
                what: "sample totals",
                expected: n_samples,
                got: totals.len(),
            });
        }
        let n_samples_r = round_samples(n_samples);
        let cells = embs_stride * n_samples_r;
        let words = embs_stride / 64 * n_samples_r;
        let alloc = |on: bool, what| if on { try_filled(0.0, cells, what) } else { Ok(Vec::new()) };

        Ok(Self {
            layout,
            n_samples,
            n_samples_r,
            embs_stride,
            filled_embs: 0,
            lengths: try_filled(0.0, embs_stride, "node lengths")?,
            proportions: alloc(needs.proportions, "embedded proportions")?,
            presence: if needs.presence {
                try_filled(0u64, words, "packed presence")?
            } else {
                Vec::new()
            },
            counts: alloc(needs.counts, "embedded counts")?,
            totals: if needs.counts { totals } else { Vec::new() },
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_samples_r(&self) -> usize {
        self.n_samples_r
    }

    /// Capacity of the block in nodes.
    pub fn embs_stride(&self) -> usize {
        self.embs_stride
    }

    /// Presence words per sample (transposed) or word rows (straight).
    pub fn words_stride(&self) -> usize {
        self.embs_stride / 64
    }

    /// Number of nodes actually embedded; the rest of the block is zero.
    pub fn filled_embs(&self) -> usize {
        self.filled_embs
    }

    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    pub fn proportions(&self) -> &[f64] {
        &self.proportions
    }

    pub fn presence(&self) -> &[u64] {
        &self.presence
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Sample totals; only kept for variance-adjusted metrics.
    pub fn totals(&self) -> &[f64] {
        &self.totals
    }

    /// Fail unless every array in `needs` is materialised.
    pub fn require(&self, needs: EmbedNeeds) -> Result<()> {
        let missing = [
            (needs.proportions, self.proportions.is_empty(), "proportions"),
            (needs.presence, self.presence.is_empty(), "presence"),
            (needs.counts, self.counts.is_empty() || self.totals.is_empty(), "counts"),
        ]
        .into_iter()
        .find(|&(want, empty, _)| want && empty && self.n_samples > 0);
        match missing {
            Some((_, _, what)) => Err(UnifracError::Precondition(format!(
                "embedded block carries no {what}"
            ))),
            None => Ok(()),
        }
    }

    #[inline]
    pub(crate) fn cell(&self, emb: usize, sample: usize) -> usize {
        match self.layout {
            Layout::Transposed => sample * self.embs_stride + emb,
            Layout::Straight => emb * self.n_samples_r + sample,
        }
    }

    #[inline]
    pub(crate) fn word(&self, emb: usize, sample: usize) -> usize {
        match self.layout {
            Layout::Transposed => sample * self.words_stride() + emb / 64,
            Layout::Straight => (emb / 64) * self.n_samples_r + sample,
        }
    }

    pub fn proportion(&self, emb: usize, sample: usize) -> f64 {
        self.proportions[self.cell(emb, sample)]
    }

    pub fn count(&self, emb: usize, sample: usize) -> f64 {
        self.counts[self.cell(emb, sample)]
    }

    pub fn is_present(&self, emb: usize, sample: usize) -> bool {
        (self.presence[self.word(emb, sample)] >> (emb % 64)) & 1 == 1
    }

    /// Write node `emb` from its raw counts: proportions are `counts / totals`
    /// (0 for empty samples).  Presence bits are packed per block by the
    /// [`Embedder`].
    pub fn set_node(&mut self, emb: usize, length: f64, counts: &[f64], totals: &[f64]) -> Result<()> {
        if emb >= self.embs_stride {
            return Err(UnifracError::Precondition(format!(
                "node {emb} outside block of {}",
                self.embs_stride
            )));
        }
        if counts.len() != self.n_samples || totals.len() != self.n_samples {
            return Err(UnifracError::LengthMismatch {
                what: "node sample vector",
                expected: self.n_samples,
                got: counts.len().min(totals.len()),
            });
        }
        self.lengths[emb] = length;
        for (s, (&c, &t)) in counts.iter().zip(totals).enumerate() {
            let cell = self.cell(emb, s);
            if !self.proportions.is_empty() {
                self.proportions[cell] = if t == 0.0 { 0.0 } else { c / t };
            }
            if !self.counts.is_empty() {
                self.counts[cell] = c;
            }
        }
        self.filled_embs = self.filled_embs.max(emb + 1);
        Ok(())
    }

    /// Copy per-sample bit rows into the packed presence words.
    fn pack_presence(&mut self, rows: &[BitVec<u64, Lsb0>]) {
        if self.presence.is_empty() {
            return;
        }
        let ws = self.words_stride();
        for (s, bits) in rows.iter().enumerate() {
            for (w, &word) in bits.as_raw_slice().iter().enumerate().take(ws) {
                let at = match self.layout {
                    Layout::Transposed => s * ws + w,
                    Layout::Straight => w * self.n_samples_r + s,
                };
                self.presence[at] = word;
            }
        }
    }
}

/// Walks a tree in postorder and emits [`EmbeddedBlock`]s.
pub struct Embedder<'a> {
    tree: &'a BpTree,
    leaf_rows: HashMap<&'a str, Vec<f64>>,
    totals: Vec<f64>,
    n_samples: usize,
    layout: Layout,
    needs: EmbedNeeds,
    embs_per_block: usize,
    /// Next postorder rank to embed.
    next: usize,
    /// Sample vectors of finished subtrees whose parent is pending.
    stack: Vec<Vec<f64>>,
}

impl<'a> Embedder<'a> {
    /// Every table observation must be a tip of `tree`; tips without a
    /// table row embed as zero.
    pub fn new<T: FeatureTable + ?Sized>(
        tree: &'a BpTree,
        table: &T,
        layout: Layout,
        needs: EmbedNeeds,
        embs_per_block: usize,
    ) -> Result<Self> {
        if embs_per_block == 0 || embs_per_block % 64 != 0 {
            return Err(UnifracError::InvalidConfig(format!(
                "node block size {embs_per_block} is not a positive multiple of 64"
            )));
        }
        let t0 = Instant::now();
        let n_samples = table.n_samples();

        // a tip label shared by two leaves would feed one row into both
        let observed: HashSet<&str> = table.observation_ids().iter().map(String::as_str).collect();
        let mut tips: HashSet<&'a str> = HashSet::new();
        for i in (0..tree.nparens()).filter(|&i| tree.is_leaf(i)) {
            let name = tree.name(i);
            if !tips.insert(name) && observed.contains(name) {
                return Err(UnifracError::DuplicateId {
                    axis: IdAxis::Observation,
                    id: name.to_owned(),
                });
            }
        }

        let mut leaf_rows = HashMap::with_capacity(table.n_observations());
        for id in table.observation_ids() {
            let Some(&name) = tips.get(id.as_str()) else {
                return Err(UnifracError::NotFound {
                    axis: IdAxis::Observation,
                    id: id.clone(),
                });
            };
            leaf_rows.insert(name, table.dense_range(id, 0, n_samples, false)?);
        }
        debug!(
            "embedder: {} observations over {} tips, {} samples",
            leaf_rows.len(),
            tips.len(),
            n_samples
        );
        info!("leaf vectors gathered in {} ms", t0.elapsed().as_millis());

        Ok(Self {
            tree,
            leaf_rows,
            totals: table.sample_totals().to_vec(),
            n_samples,
            layout,
            needs,
            embs_per_block,
            next: 0,
            stack: Vec::new(),
        })
    }

    /// Nodes to embed: all but the root.
    pub fn total_embs(&self) -> usize {
        self.tree.node_count() - 1
    }

    pub fn n_blocks(&self) -> usize {
        self.total_embs().div_ceil(self.embs_per_block)
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Embed the next `embs_per_block` nodes; `None` once the tree is done.
    pub fn next_block(&mut self) -> Result<Option<EmbeddedBlock>> {
        let total = self.total_embs();
        if self.next >= total {
            return Ok(None);
        }
        let lo = self.next;
        let hi = (lo + self.embs_per_block).min(total);

        let mut block = EmbeddedBlock::new(
            self.layout,
            self.n_samples,
            self.embs_per_block,
            self.needs,
            self.totals.clone(),
        )?;
        let mut bits: Vec<BitVec<u64, Lsb0>> = if self.needs.presence {
            (0..self.n_samples)
                .map(|_| BitVec::repeat(false, self.embs_per_block))
                .collect()
        } else {
            Vec::new()
        };

        for k in lo..hi {
            let node = self.tree.postorder_select(k);
            let vec = if self.tree.is_leaf(node) {
                self.leaf_rows
                    .get(self.tree.name(node))
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.n_samples])
            } else {
                let nchild = self.tree.children(node).count();
                let at = self.stack.len().checked_sub(nchild).ok_or_else(|| {
                    UnifracError::MalformedTree(format!("node {node} has fewer finished children than expected"))
                })?;
                let mut acc = vec![0.0; self.n_samples];
                for child in self.stack.drain(at..) {
                    for (a, c) in acc.iter_mut().zip(child) {
                        *a += c;
                    }
                }
                acc
            };

            let emb = k - lo;
            block.set_node(emb, self.tree.length(node), &vec, &self.totals)?;
            for (s, &c) in vec.iter().enumerate() {
                if c > 0.0 {
                    if let Some(row) = bits.get_mut(s) {
                        row.set(emb, true);
                    }
                }
            }
            self.stack.push(vec);
        }
        block.pack_presence(&bits);

        self.next = hi;
        Ok(Some(block))
    }
}
