//! unifrac  –  striped UniFrac distances on a succinct BP tree
//!  * unweighted / weighted (normalized, unnormalized) / generalized
//!  * --vaw          variance-adjusted form of any method
//!  * --target grid  flattened sweep over the straight layout
use std::{fs, time::Instant};
use log::info;
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgGroup, Command, value_parser};

use unifrac_bp::{
    BpTree, ExecutionTarget, Method, Metric, StripeConfig, UnifracOptions, compute_unifrac,
    io::{read_biom, read_tsv_table, write_matrix},
};

fn cli() -> Command {
    Command::new("unifrac")
        .about("Striped UniFrac distances between samples of a feature table")
        .arg(
            Arg::new("tree")
                .short('t')
                .long("tree")
                .help("Input tree in Newick format")
                .required(true),
        )
        .arg(
            Arg::new("input")      // TSV
                .short('i')
                .long("input")
                .help("Feature table in TSV format"),
        )
        .arg(
            Arg::new("biom")       // BIOM
                .short('m')
                .long("biom")
                .help("Feature table in BIOM (HDF5) format"),
        )
        .group(
            ArgGroup::new("table")
                .args(["input", "biom"])
                .required(true),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Output distance matrix in TSV format")
                .default_value("unifrac.tsv"),
        )
        .arg(
            Arg::new("method")
                .long("method")
                .help("unweighted | unweighted_unnormalized | weighted_normalized | weighted_unnormalized | generalized")
                .default_value("unweighted"),
        )
        .arg(
            Arg::new("alpha")
                .short('a')
                .long("alpha")
                .help("Exponent of generalized UniFrac")
                .value_parser(value_parser!(f64))
                .default_value("1.0"),
        )
        .arg(
            Arg::new("vaw")
                .long("vaw")
                .help("Variance-adjusted weighting")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .help("cpu (cache tiles) or grid (flattened sweep)")
                .default_value("cpu"),
        )
        .arg(
            Arg::new("block-size")
                .long("block-size")
                .help("Tree nodes embedded per block (multiple of 64)")
                .value_parser(value_parser!(usize))
                .default_value("1024"),
        )
        .arg(
            Arg::new("step")
                .long("step")
                .help("Cache tile side, in stripes and samples")
                .value_parser(value_parser!(usize))
                .default_value("32"),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .help("Widest grouped pair computation (8, 4 or 1)")
                .value_parser(value_parser!(usize))
                .default_value("8"),
        )
        .arg(
            Arg::new("threads")
                .short('T')
                .long("threads")
                .help("Worker threads (default: all cores)")
                .value_parser(value_parser!(usize)),
        )
}

/// Newick file → BP tree, branch lengths kept in double precision.
fn load_tree(path: &str) -> Result<BpTree> {
    let text = fs::read_to_string(path).with_context(|| format!("read tree {path}"))?;
    BpTree::from_newick(&text).context("parse newick")
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();
    let m = cli().get_matches();

    let tree_file = m.get_one::<String>("tree").context("missing --tree")?;
    let out_file  = m.get_one::<String>("output").context("missing --output")?;

    let method: Method = m
        .get_one::<String>("method")
        .context("missing --method")?
        .parse()?;
    let alpha = *m.get_one::<f64>("alpha").context("missing --alpha")?;
    let metric = match method {
        Method::Generalized => Metric::generalized(alpha),
        other => Metric::new(other),
    }
    .variance_adjusted(m.get_flag("vaw"));

    let target: ExecutionTarget = m
        .get_one::<String>("target")
        .context("missing --target")?
        .parse()?;
    let stripes = StripeConfig::new(
        *m.get_one::<usize>("step").context("missing --step")?,
        *m.get_one::<usize>("width").context("missing --width")?,
    )?;
    let opts = UnifracOptions {
        metric,
        target,
        stripes,
        embs_per_block: *m.get_one::<usize>("block-size").context("missing --block-size")?,
    };
    opts.validate()?;

    /* ─────────── Rayon pool ─────────── */
    let threads = m.get_one::<usize>("threads").copied().unwrap_or_else(num_cpus::get);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("build rayon pool")?;
    info!("{threads} worker threads");

    /* ─────────── Load tree  ─────────── */
    let t0 = Instant::now();
    let tree = load_tree(tree_file)?;
    info!(
        "tree: {} nodes, {} tips in {} ms",
        tree.node_count(),
        tree.leaf_count(),
        t0.elapsed().as_millis()
    );

    /* ─────────── Read table (TSV or BIOM) ─────────── */
    info!("Start parsing input.");
    let table = if let Some(tsv) = m.get_one::<String>("input") {
        read_tsv_table(tsv).with_context(|| format!("read TSV table {tsv}"))?
    } else {
        let biom = m.get_one::<String>("biom").context("missing --biom")?;
        read_biom(biom).with_context(|| format!("open BIOM file {biom}"))?
    };

    /* ─────────── Compute UniFrac ─────────── */
    let t1 = Instant::now();
    let dm = compute_unifrac(&tree, &table, &opts).with_context(|| format!("compute {metric}"))?;
    info!("{metric} done in {} ms", t1.elapsed().as_millis());

    /* ─────────── Write output ─────────── */
    info!("Start writing output.");
    write_matrix(&dm, out_file).with_context(|| format!("write {out_file}"))
}
