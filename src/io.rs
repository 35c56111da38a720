//! Feature tables in (TSV, BIOM 2.x) and distance matrices out (TSV).

use hdf5::{File as H5File, types::VarLenUnicode};
use log::{debug, info};
use rayon::prelude::*;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    time::Instant,
};

use crate::error::{Result, UnifracError};
use crate::table::{SparseTable, csr_u32};
use crate::unifrac::DistanceMatrix;

/// Read an observation × sample TSV.
///
/// The first non-comment line is the header (`<corner>\tS1\tS2…`); each
/// following line is `<observation>\t<count>…`.  Lines starting with `# `
/// (as written by `biom convert`) and blank lines are skipped.
pub fn read_tsv_table<P: AsRef<Path>>(p: P) -> Result<SparseTable> {
    let f = File::open(p.as_ref())?;
    parse_tsv_table(BufReader::new(f))
}

pub fn parse_tsv_table<R: BufRead>(reader: R) -> Result<SparseTable> {
    let mut lines = reader
        .lines()
        .filter(|l| l.as_ref().map_or(true, |s| !s.trim().is_empty() && !s.starts_with("# ")));

    let hdr = lines
        .next()
        .ok_or_else(|| UnifracError::MalformedTable("empty table".into()))??;
    let mut it = hdr.trim_end_matches('\r').split('\t');
    it.next();
    let samples: Vec<String> = it.map(|s| s.to_owned()).collect();

    let mut taxa = Vec::new();
    let mut indptr = vec![0u32];
    let mut indices = Vec::new();
    let mut data = Vec::new();
    for (lineno, l) in lines.enumerate() {
        let row = l?;
        let mut p = row.trim_end_matches('\r').split('\t');
        let tax = p.next().unwrap_or_default().to_owned();
        let mut ncols = 0;
        for (j, v) in p.enumerate() {
            let x: f64 = v.trim().parse().map_err(|_| {
                UnifracError::MalformedTable(format!(
                    "row {} ('{tax}'), column {}: '{v}' is not a number",
                    lineno + 2,
                    j + 2
                ))
            })?;
            if x != 0.0 {
                indices.push(csr_u32(j, "column")?);
                data.push(x);
            }
            ncols += 1;
        }
        if ncols != samples.len() {
            return Err(UnifracError::MalformedTable(format!(
                "row '{tax}' has {ncols} values for {} samples",
                samples.len()
            )));
        }
        taxa.push(tax);
        indptr.push(csr_u32(indices.len(), "nonzero count")?);
    }
    SparseTable::from_csr(taxa, samples, indptr, indices, data)
}

fn read_utf8(f: &H5File, path: &str) -> Result<Vec<String>> {
    Ok(f.dataset(path)?
        .read_1d::<VarLenUnicode>()?
        .into_iter()
        .map(|v| v.as_str().to_owned())
        .collect())
}

/// Read a BIOM 2.x (HDF5) table.
///
/// CSR arrays may live under `observation/matrix/` (current layout) or
/// directly under `observation/` (older 2.0 files); the current layout is
/// tried first.
pub fn read_biom<P: AsRef<Path>>(p: P) -> Result<SparseTable> {
    let t0 = Instant::now();
    let f = H5File::open(p.as_ref())?;

    let taxa = read_utf8(&f, "observation/ids")?;
    let samples = read_utf8(&f, "sample/ids")?;

    let try_paths = |name: &str| -> hdf5::Result<hdf5::Dataset> {
        f.dataset(&format!("observation/matrix/{name}"))
            .or_else(|_| f.dataset(&format!("observation/{name}")))
    };

    let indptr = try_paths("indptr")?.read_raw::<u32>()?;
    let indices = try_paths("indices")?.read_raw::<u32>()?;
    let data = try_paths("data")?.read_raw::<f64>()?;

    debug!(
        "biom: {} observations, {} samples, {} nonzeros",
        taxa.len(),
        samples.len(),
        data.len()
    );
    let table = SparseTable::from_csr(taxa, samples, indptr, indices, data)?;
    info!("biom table loaded in {} ms", t0.elapsed().as_millis());
    Ok(table)
}

/// Render a square TSV distance matrix; rows are formatted in parallel.
pub fn write_matrix_to<W: Write>(dm: &DistanceMatrix, out: W) -> Result<()> {
    let names = dm.ids();
    let n = names.len();

    let header = {
        let mut s = String::with_capacity(n * 16);
        s.push_str("Sample");
        for name in names {
            s.push('\t');
            s.push_str(name);
        }
        s.push('\n');
        s
    };

    let rows: Vec<String> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut line = String::with_capacity(n * 12);
            let mut buf = ryu::Buffer::new();
            line.push_str(&names[i]);
            for j in 0..n {
                line.push('\t');
                line.push_str(buf.format(dm.get(i, j)));
            }
            line.push('\n');
            line
        })
        .collect();

    let mut out = BufWriter::with_capacity(16 << 20, out);
    out.write_all(header.as_bytes())?;
    for line in &rows {
        out.write_all(line.as_bytes())?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_matrix<P: AsRef<Path>>(dm: &DistanceMatrix, path: P) -> Result<()> {
    let t0 = Instant::now();
    write_matrix_to(dm, File::create(path.as_ref())?)?;
    info!("distance matrix written in {} ms", t0.elapsed().as_millis());
    Ok(())
}
