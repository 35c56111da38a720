//! End-to-end driver: tree + table → distance matrix.

use log::{debug, info};
use std::collections::HashSet;
use std::time::Instant;

use crate::embed::{Embedder, round_samples};
use crate::error::{IdAxis, Result, UnifracError};
use crate::kernels::{Method, Metric, run_metric_stripe};
use crate::stripes::{ExecutionTarget, StripeBuffers, StripeConfig, locate_pair, stripe_count};
use crate::table::FeatureTable;
use crate::tree::BpTree;

/// Nodes embedded per block unless configured otherwise.
pub const DEFAULT_EMBS_PER_BLOCK: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnifracOptions {
    pub metric: Metric,
    pub target: ExecutionTarget,
    pub stripes: StripeConfig,
    /// Nodes per embedding block; a positive multiple of 64.
    pub embs_per_block: usize,
}

impl Default for UnifracOptions {
    fn default() -> Self {
        Self {
            metric: Metric::new(Method::Unweighted),
            target: ExecutionTarget::Cpu,
            stripes: StripeConfig::default(),
            embs_per_block: DEFAULT_EMBS_PER_BLOCK,
        }
    }
}

impl UnifracOptions {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.metric.validate()?;
        self.stripes.validate()?;
        if self.embs_per_block == 0 || self.embs_per_block % 64 != 0 {
            return Err(UnifracError::InvalidConfig(format!(
                "node block size {} is not a positive multiple of 64",
                self.embs_per_block
            )));
        }
        Ok(())
    }
}

/// Symmetric sample × sample distances, stored as the condensed upper
/// triangle (row-major, diagonal excluded).
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    condensed: Vec<f64>,
}

impl DistanceMatrix {
    pub fn from_condensed(ids: Vec<String>, condensed: Vec<f64>) -> Result<Self> {
        let n = ids.len();
        let expected = n * n.saturating_sub(1) / 2;
        if condensed.len() != expected {
            return Err(UnifracError::LengthMismatch {
                what: "condensed distances",
                expected,
                got: condensed.len(),
            });
        }
        Ok(Self { ids, condensed })
    }

    /// Read every pair out of stripes covering `0..stripe_count(n)`.
    pub fn from_stripes(ids: Vec<String>, stripes: &StripeBuffers) -> Result<Self> {
        let n = ids.len();
        if stripes.n_samples() != n || stripes.start() != 0 || stripes.stop() != stripe_count(n) {
            return Err(UnifracError::Precondition(format!(
                "stripes {}..{} over {} samples do not cover {n} samples",
                stripes.start(),
                stripes.stop(),
                stripes.n_samples()
            )));
        }
        let mut condensed = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let (d, k) = locate_pair(i, j, n)?;
                condensed.push(stripes.value(d, k));
            }
        }
        Ok(Self { ids, condensed })
    }

    pub fn n(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn condensed(&self) -> &[f64] {
        &self.condensed
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        let n = self.ids.len();
        n * i - i * (i + 1) / 2 + (j - i - 1)
    }

    /// Distance between samples `i` and `j`; 0 on the diagonal.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.condensed[self.index(i, j)],
            std::cmp::Ordering::Greater => self.condensed[self.index(j, i)],
        }
    }

    /// Distance by sample id.
    pub fn get_by_id(&self, a: &str, b: &str) -> Result<f64> {
        let pos = |id: &str| {
            self.ids.iter().position(|x| x == id).ok_or_else(|| UnifracError::NotFound {
                axis: IdAxis::Sample,
                id: id.to_owned(),
            })
        };
        Ok(self.get(pos(a)?, pos(b)?))
    }

    /// Row-major `n × n` copy.
    pub fn to_square(&self) -> Vec<f64> {
        let n = self.n();
        let mut sq = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let v = self.condensed[self.index(i, j)];
                sq[i * n + j] = v;
                sq[j * n + i] = v;
            }
        }
        sq
    }
}

/// Restrict `tree` to the table's observations and drop single-child
/// internal nodes.  Every observation must name a tip.
pub fn prepare_tree<T: FeatureTable + ?Sized>(tree: &BpTree, table: &T) -> Result<BpTree> {
    let tips = tree.tip_names();
    let mut keep = HashSet::with_capacity(table.n_observations());
    for id in table.observation_ids() {
        if !tips.contains(id) {
            return Err(UnifracError::NotFound {
                axis: IdAxis::Observation,
                id: id.clone(),
            });
        }
        keep.insert(id.clone());
    }
    let pruned = tree.shear(&keep)?.collapse()?;
    debug!(
        "tree pruned from {} to {} nodes ({} tips)",
        tree.node_count(),
        pruned.node_count(),
        pruned.leaf_count()
    );
    Ok(pruned)
}

/// Compute the distance matrix of `opts.metric` over every sample pair.
pub fn compute_unifrac<T: FeatureTable + ?Sized>(
    tree: &BpTree,
    table: &T,
    opts: &UnifracOptions,
) -> Result<DistanceMatrix> {
    opts.validate()?;
    let metric = opts.metric;
    let n = table.n_samples();
    info!(
        "{metric}: {} samples, {} observations, target {:?}",
        n,
        table.n_observations(),
        opts.target
    );

    let t0 = Instant::now();
    let pruned = prepare_tree(tree, table)?;
    info!("tree prepared in {} ms", t0.elapsed().as_millis());

    let mut stripes = StripeBuffers::new(0, stripe_count(n), n, round_samples(n), metric.is_normalized())?;
    let mut embedder = Embedder::new(
        &pruned,
        table,
        opts.target.layout(),
        metric.needs(),
        opts.embs_per_block,
    )?;

    let t1 = Instant::now();
    let n_blocks = embedder.n_blocks();
    let mut done = 0;
    while let Some(block) = embedder.next_block()? {
        run_metric_stripe(&metric, &block, &mut stripes, opts.target, &opts.stripes)?;
        done += 1;
        debug!("block {done}/{n_blocks} folded");
    }
    stripes.compute_stripe_totals();
    info!(
        "{} stripes over {} blocks in {} ms",
        stripe_count(n),
        n_blocks,
        t1.elapsed().as_millis()
    );

    DistanceMatrix::from_stripes(table.sample_ids().to_vec(), &stripes)
}
