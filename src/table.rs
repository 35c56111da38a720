//! In-memory observation × sample feature table.
//!
//! Storage is observation-major CSR: row `o` holds the nonzero samples of
//! observation `o` in `indices[indptr[o]..indptr[o+1]]` with counts in the
//! matching `data` slots.

use std::collections::HashMap;

use crate::error::{IdAxis, Result, UnifracError};

/// What the embedding step needs from a feature table.
pub trait FeatureTable {
    fn observation_ids(&self) -> &[String];
    fn sample_ids(&self) -> &[String];

    /// Per-sample sum over all observations.
    fn sample_totals(&self) -> &[f64];

    /// Counts of one observation across all samples, zero-filled.
    fn dense_vector(&self, id: &str) -> Result<Vec<f64>>;

    /// Counts of one observation for samples `start..end`, optionally divided
    /// by each sample's total.
    fn dense_range(&self, id: &str, start: usize, end: usize, normalize: bool) -> Result<Vec<f64>>;

    fn n_samples(&self) -> usize {
        self.sample_ids().len()
    }

    fn n_observations(&self) -> usize {
        self.observation_ids().len()
    }
}

#[derive(Clone, Debug)]
pub struct SparseTable {
    obs_ids: Vec<String>,
    sample_ids: Vec<String>,
    obs_index: HashMap<String, usize>,
    sample_index: HashMap<String, usize>,
    indptr: Vec<u32>,
    indices: Vec<u32>,
    data: Vec<f64>,
    sample_counts: Vec<f64>,
}

fn index_ids(ids: &[String], axis: IdAxis) -> Result<HashMap<String, usize>> {
    let mut map = HashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        if map.insert(id.clone(), i).is_some() {
            return Err(UnifracError::DuplicateId {
                axis,
                id: id.clone(),
            });
        }
    }
    Ok(map)
}

/// CSR offsets and column indices are stored as `u32`.
pub(crate) fn csr_u32(v: usize, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| UnifracError::MalformedTable(format!("{what} {v} exceeds the u32 CSR range")))
}

impl SparseTable {
    /// Build from observation-major CSR arrays.
    pub fn from_csr(
        obs_ids: Vec<String>,
        sample_ids: Vec<String>,
        indptr: Vec<u32>,
        indices: Vec<u32>,
        data: Vec<f64>,
    ) -> Result<Self> {
        let n_obs = obs_ids.len();
        let n_samples = sample_ids.len();

        if indptr.len() != n_obs + 1 {
            return Err(UnifracError::LengthMismatch {
                what: "indptr",
                expected: n_obs + 1,
                got: indptr.len(),
            });
        }
        if data.len() != indices.len() {
            return Err(UnifracError::LengthMismatch {
                what: "CSR data",
                expected: indices.len(),
                got: data.len(),
            });
        }
        if indptr[0] != 0 || indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(UnifracError::MalformedTable("indptr is not monotone from 0".into()));
        }
        if indptr[n_obs] as usize != indices.len() {
            return Err(UnifracError::LengthMismatch {
                what: "CSR indices",
                expected: indptr[n_obs] as usize,
                got: indices.len(),
            });
        }
        if let Some(&bad) = indices.iter().find(|&&j| j as usize >= n_samples) {
            return Err(UnifracError::MalformedTable(format!(
                "sample index {bad} out of range for {n_samples} samples"
            )));
        }

        let obs_index = index_ids(&obs_ids, IdAxis::Observation)?;
        let sample_index = index_ids(&sample_ids, IdAxis::Sample)?;

        let mut sample_counts = vec![0.0; n_samples];
        for (&j, &v) in indices.iter().zip(&data) {
            sample_counts[j as usize] += v;
        }

        Ok(Self {
            obs_ids,
            sample_ids,
            obs_index,
            sample_index,
            indptr,
            indices,
            data,
            sample_counts,
        })
    }

    /// Build from one dense row per observation; zeros are dropped.
    pub fn from_dense(obs_ids: Vec<String>, sample_ids: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        if rows.len() != obs_ids.len() {
            return Err(UnifracError::LengthMismatch {
                what: "dense rows",
                expected: obs_ids.len(),
                got: rows.len(),
            });
        }
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0u32);
        for row in rows {
            if row.len() != sample_ids.len() {
                return Err(UnifracError::LengthMismatch {
                    what: "dense row",
                    expected: sample_ids.len(),
                    got: row.len(),
                });
            }
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    indices.push(csr_u32(j, "column")?);
                    data.push(v);
                }
            }
            indptr.push(csr_u32(indices.len(), "nonzero count")?);
        }
        Self::from_csr(obs_ids, sample_ids, indptr, indices, data)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn observation_index(&self, id: &str) -> Result<usize> {
        self.obs_index
            .get(id)
            .copied()
            .ok_or_else(|| UnifracError::NotFound {
                axis: IdAxis::Observation,
                id: id.to_owned(),
            })
    }

    pub fn sample_index(&self, id: &str) -> Result<usize> {
        self.sample_index
            .get(id)
            .copied()
            .ok_or_else(|| UnifracError::NotFound {
                axis: IdAxis::Sample,
                id: id.to_owned(),
            })
    }

    fn row(&self, o: usize) -> (&[u32], &[f64]) {
        let (a, b) = (self.indptr[o] as usize, self.indptr[o + 1] as usize);
        (&self.indices[a..b], &self.data[a..b])
    }
}

impl FeatureTable for SparseTable {
    fn observation_ids(&self) -> &[String] {
        &self.obs_ids
    }

    fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    fn sample_totals(&self) -> &[f64] {
        &self.sample_counts
    }

    fn dense_vector(&self, id: &str) -> Result<Vec<f64>> {
        self.dense_range(id, 0, self.sample_ids.len(), false)
    }

    fn dense_range(&self, id: &str, start: usize, end: usize, normalize: bool) -> Result<Vec<f64>> {
        if start > end || end > self.sample_ids.len() {
            return Err(UnifracError::Precondition(format!(
                "sample range {start}..{end} outside 0..{}",
                self.sample_ids.len()
            )));
        }
        let o = self.observation_index(id)?;
        let mut out = vec![0.0; end - start];
        let (idx, vals) = self.row(o);
        for (&j, &v) in idx.iter().zip(vals) {
            let j = j as usize;
            if j < start || j >= end {
                continue;
            }
            out[j - start] = if normalize {
                let total = self.sample_counts[j];
                if total == 0.0 { 0.0 } else { v / total }
            } else {
                v
            };
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn small() -> SparseTable {
        SparseTable::from_dense(
            ids(&["o1", "o2", "o3"]),
            ids(&["s1", "s2", "s3"]),
            &[vec![1.0, 0.0, 2.0], vec![3.0, 0.0, 0.0], vec![0.0, 0.0, 2.0]],
        )
        .unwrap()
    }

    #[test]
    fn totals_and_vectors() {
        let t = small();
        assert_eq!(t.nnz(), 4);
        assert_eq!(t.sample_totals(), &[4.0, 0.0, 4.0]);
        assert_eq!(t.dense_vector("o1").unwrap(), vec![1.0, 0.0, 2.0]);
        assert_eq!(t.dense_range("o1", 1, 3, false).unwrap(), vec![0.0, 2.0]);
        assert_eq!(t.sample_index("s3").unwrap(), 2);
    }

    #[test]
    fn normalized_range_handles_empty_samples() {
        let t = small();
        let v = t.dense_range("o1", 0, 3, true).unwrap();
        assert_abs_diff_eq!(v[0], 0.25);
        assert_eq!(v[1], 0.0);
        assert_abs_diff_eq!(v[2], 0.5);
    }

    #[test]
    fn unknown_ids_are_typed() {
        let t = small();
        assert!(matches!(
            t.dense_vector("nope"),
            Err(UnifracError::NotFound {
                axis: IdAxis::Observation,
                ..
            })
        ));
        assert!(matches!(
            t.sample_index("nope"),
            Err(UnifracError::NotFound { axis: IdAxis::Sample, .. })
        ));
        assert!(matches!(t.dense_range("o1", 2, 5, false), Err(UnifracError::Precondition(_))));
    }

    #[test]
    fn csr_shape_is_checked() {
        let r = SparseTable::from_csr(ids(&["a"]), ids(&["x"]), vec![0], vec![], vec![]);
        assert!(matches!(r, Err(UnifracError::LengthMismatch { .. })));

        let r = SparseTable::from_csr(ids(&["a"]), ids(&["x"]), vec![0, 1], vec![3], vec![1.0]);
        assert!(matches!(r, Err(UnifracError::MalformedTable(_))));

        let r = SparseTable::from_csr(ids(&["a", "b"]), ids(&["x"]), vec![0, 1, 0], vec![0], vec![1.0]);
        assert!(matches!(r, Err(UnifracError::MalformedTable(_))));

        let r = SparseTable::from_csr(ids(&["a", "a"]), ids(&["x"]), vec![0, 0, 0], vec![], vec![]);
        assert!(matches!(r, Err(UnifracError::DuplicateId { .. })));
    }

    #[test]
    fn csr_offsets_do_not_truncate() {
        assert_eq!(csr_u32(u32::MAX as usize, "column").unwrap(), u32::MAX);
        assert!(matches!(
            csr_u32(u32::MAX as usize + 1, "column"),
            Err(UnifracError::MalformedTable(_))
        ));
    }
}
