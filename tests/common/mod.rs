//! Shared fixtures: seeded random trees/tables and a per-node reference
//! UniFrac computed directly from the definitions.
#![allow(dead_code)]

use std::collections::HashMap;
use std::num::Wrapping;

use unifrac_bp::{BpTree, FeatureTable, Method, Metric, SparseTable};

pub fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// Small deterministic PRNG so failing cases replay from their seed.
pub struct Lcg(Wrapping<u64>);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(Wrapping(seed ^ 0x9E37_79B9_7F4A_7C15))
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self.0 * Wrapping(6364136223846793005u64) + Wrapping(1442695040888963407u64);
        self.0.0 >> 33
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    pub fn length(&mut self) -> f64 {
        (self.below(1000) + 1) as f64 / 100.0
    }
}

/// Newick body of a subtree (without its own branch length).
fn subtree(names: &[String], rng: &mut Lcg) -> String {
    if names.len() == 1 {
        // occasional single-child chain for collapse to fold
        return if rng.below(5) == 0 {
            format!("({}:{})", names[0], rng.length())
        } else {
            names[0].clone()
        };
    }
    let arity = 2 + rng.below(3u64.min(names.len() as u64 - 1)) as usize;
    let mut cuts: Vec<usize> = (0..arity - 1)
        .map(|_| 1 + rng.below(names.len() as u64 - 1) as usize)
        .collect();
    cuts.push(0);
    cuts.push(names.len());
    cuts.sort_unstable();
    cuts.dedup();
    let kids: Vec<String> = cuts
        .windows(2)
        .map(|w| format!("{}:{}", subtree(&names[w[0]..w[1]], rng), rng.length()))
        .collect();
    format!("({})", kids.join(","))
}

/// Random multifurcating newick over tips `t0..t{n_tips}`.
pub fn random_newick(n_tips: usize, rng: &mut Lcg) -> String {
    let names: Vec<String> = (0..n_tips).map(|i| format!("t{i}")).collect();
    let body = subtree(&names, rng);
    if n_tips == 1 {
        format!("({body}:1)root;")
    } else {
        format!("{body}root;")
    }
}

/// Random sparse table over a subset of `t0..t{n_tips}`; a few samples are
/// left completely empty.
pub fn random_table(n_tips: usize, n_samples: usize, rng: &mut Lcg) -> SparseTable {
    let mut obs: Vec<String> = (0..n_tips)
        .filter(|_| rng.below(5) != 0)
        .map(|i| format!("t{i}"))
        .collect();
    if obs.is_empty() {
        obs.push("t0".into());
    }
    let empty: Vec<bool> = (0..n_samples).map(|_| rng.below(7) == 0).collect();
    let rows: Vec<Vec<f64>> = obs
        .iter()
        .map(|_| {
            (0..n_samples)
                .map(|s| {
                    if empty[s] || rng.below(10) < 6 {
                        0.0
                    } else {
                        (1 + rng.below(20)) as f64
                    }
                })
                .collect()
        })
        .collect();
    let samples = (0..n_samples).map(|s| format!("S{s}")).collect();
    SparseTable::from_dense(obs, samples, &rows).unwrap()
}

/// Per-node sample counts of every non-root node, as `(length, counts)`.
fn node_counts(tree: &BpTree, table: &SparseTable) -> Vec<(f64, Vec<f64>)> {
    let n = table.n_samples();
    let mut acc: HashMap<usize, Vec<f64>> = HashMap::new();
    let mut out = Vec::new();
    for node in tree.postorder() {
        let v = if tree.is_leaf(node) {
            table.dense_vector(tree.name(node)).unwrap_or_else(|_| vec![0.0; n])
        } else {
            let mut v = vec![0.0; n];
            for c in tree.children(node) {
                for (a, b) in v.iter_mut().zip(&acc[&c]) {
                    *a += b;
                }
            }
            v
        };
        if node != tree.root() {
            out.push((tree.length(node), v.clone()));
        }
        acc.insert(node, v);
    }
    out
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

/// Square distance matrix straight from the per-node definitions.
pub fn reference(tree: &BpTree, table: &SparseTable, metric: &Metric) -> Vec<f64> {
    let n = table.n_samples();
    let totals = table.sample_totals();
    let nodes = node_counts(tree, table);
    let mut out = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let (mut num, mut den) = (0.0, 0.0);
            for (len, c) in &nodes {
                let (ci, cj) = (c[i], c[j]);
                let u = ratio(ci, totals[i]);
                let v = ratio(cj, totals[j]);
                let w = if metric.variance_adjusted {
                    let m = totals[i] + totals[j];
                    let mi = ci + cj;
                    let vaw = (mi * (m - mi)).sqrt();
                    if vaw <= 0.0 {
                        continue;
                    }
                    vaw
                } else {
                    1.0
                };
                match metric.method {
                    Method::Unweighted | Method::UnweightedUnnormalized => {
                        let (p, q) = (ci > 0.0, cj > 0.0);
                        if p != q {
                            num += len / w;
                        }
                        if p || q {
                            den += len / w;
                        }
                    }
                    Method::WeightedNormalized | Method::WeightedUnnormalized => {
                        num += len * (u - v).abs() / w;
                        den += len * (u + v) / w;
                    }
                    Method::Generalized => {
                        let sum = (u + v) / w;
                        if sum > 0.0 {
                            let sp = sum.powf(metric.alpha) * len;
                            num += sp * ((u - v).abs() / w) / sum;
                            den += sp;
                        }
                    }
                }
            }
            let d = if metric.is_normalized() { ratio(num, den) } else { num };
            out[i * n + j] = d;
            out[j * n + i] = d;
        }
    }
    out
}

pub fn all_metrics() -> Vec<Metric> {
    let mut v = Vec::new();
    for m in [
        Metric::new(Method::Unweighted),
        Metric::new(Method::UnweightedUnnormalized),
        Metric::new(Method::WeightedNormalized),
        Metric::new(Method::WeightedUnnormalized),
        Metric::generalized(0.5),
        Metric::generalized(1.5),
    ] {
        v.push(m);
        v.push(m.variance_adjusted(true));
    }
    v
}
