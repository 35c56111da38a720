//! Structural invariants of parsed, sheared and collapsed trees.

mod common;

use approx::assert_abs_diff_eq;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

use common::{Lcg, random_newick};
use unifrac_bp::BpTree;

fn tree_strategy() -> impl Strategy<Value = BpTree> {
    (1usize..40, any::<u64>()).prop_map(|(n, seed)| {
        let nwk = random_newick(n, &mut Lcg::new(seed));
        BpTree::from_newick(&nwk).unwrap()
    })
}

/// Root-to-tip path length of every named leaf.
fn tip_depths(t: &BpTree) -> HashMap<String, f64> {
    (0..t.nparens())
        .filter(|&i| t.is_leaf(i))
        .map(|i| {
            let mut d = 0.0;
            let mut j = i;
            while let Some(p) = t.parent(j) {
                d += t.length(j);
                j = p;
            }
            (t.name(i).to_string(), d)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn parens_are_balanced(t in tree_strategy()) {
        let s = t.structure();
        prop_assert_eq!(s.count_ones(), t.node_count());
        prop_assert_eq!(s.count_zeros(), t.node_count());
        let mut e = 0i64;
        for (i, bit) in s.iter().by_vals().enumerate() {
            e += if bit { 1 } else { -1 };
            prop_assert!(e >= 0);
            prop_assert_eq!(e, t.excess()[i] as i64);
        }
        prop_assert_eq!(e, 0);
    }

    #[test]
    fn navigation_is_consistent(t in tree_strategy()) {
        for i in 0..t.nparens() {
            prop_assert_eq!(t.parent(t.open(i)), t.parent(t.close(i)));
            prop_assert_eq!(t.open(t.close(i)), t.open(i));
            let leaf = t.is_open(i) && i + 1 < t.nparens() && !t.is_open(i + 1);
            prop_assert_eq!(t.is_leaf(i), leaf);
        }
        for node in t.preorder() {
            for c in t.children(node) {
                prop_assert_eq!(t.parent(c), Some(node));
                prop_assert_eq!(t.depth(c), t.depth(node) + 1);
            }
        }
        prop_assert_eq!(t.parent(t.root()), None);
        prop_assert_eq!(*t.postorder().last().unwrap(), t.root());
    }

    #[test]
    fn shear_to_all_tips_is_identity(t in tree_strategy()) {
        let s = t.shear(&t.tip_names()).unwrap();
        prop_assert_eq!(s.tip_names(), t.tip_names());
        prop_assert_eq!(s.node_count(), t.node_count());
        prop_assert_eq!(s.structure(), t.structure());
    }

    #[test]
    fn shear_keeps_only_requested_tips(t in tree_strategy(), pick in any::<u64>()) {
        let tips: Vec<String> = {
            let mut v: Vec<String> = t.tip_names().into_iter().collect();
            v.sort();
            v
        };
        let keep: HashSet<String> = tips
            .iter()
            .enumerate()
            .filter(|(i, _)| (pick >> (i % 64)) & 1 == 1 || *i == 0)
            .map(|(_, n)| n.clone())
            .collect();
        let s = t.shear(&keep).unwrap();
        prop_assert_eq!(s.tip_names(), keep.clone());
        let before = tip_depths(&t);
        for (name, d) in tip_depths(&s) {
            assert_abs_diff_eq!(d, before[&name], epsilon = 1e-9);
        }
    }

    #[test]
    fn collapse_removes_single_children_and_keeps_paths(t in tree_strategy()) {
        let c = t.collapse().unwrap();
        for node in c.preorder() {
            if node != c.root() && !c.is_leaf(node) {
                prop_assert!(c.children(node).count() >= 2);
            }
        }
        prop_assert_eq!(c.tip_names(), t.tip_names());
        let before = tip_depths(&t);
        for (name, d) in tip_depths(&c) {
            assert_abs_diff_eq!(d, before[&name], epsilon = 1e-9);
        }
    }
}

#[test]
fn newick_crate_and_native_parser_agree() {
    let mut rng = Lcg::new(7);
    for n in [1, 2, 5, 17, 33] {
        let nwk = random_newick(n, &mut rng);
        let native = BpTree::from_newick(&nwk).unwrap();
        let parsed: newick::NewickTree = newick::one_from_string(&nwk).unwrap();
        let bridged = BpTree::from_newick_tree(&parsed).unwrap();
        assert_eq!(native.structure(), bridged.structure());
        assert_eq!(native.tip_names(), bridged.tip_names());
        // the bridge carries f32 lengths
        for i in 0..native.nparens() {
            let (x, y) = (native.length(i), bridged.length(i));
            assert!((x - y).abs() <= x.abs() * f32::EPSILON as f64, "{x} vs {y}");
        }
    }
}
