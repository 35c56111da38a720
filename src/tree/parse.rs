//! Newick text → balanced parentheses.
//!
//! One scan classifies `(`, `)`, `,`, quoted spans and `[...]` comments,
//! emitting tokens into the parenthesis sequence and recording every label
//! together with the position it belongs to.  Leaf labels precede the `,` or
//! `)` that materialises the leaf (an open/close pair), internal labels follow
//! the `)` closing their node.  Labels are attached once the open/close
//! pairing exists, so a close position resolves to its node's open.

use super::{BpTree, Parens};
use crate::error::{Result, UnifracError};

/// A label waiting for its node, by open or close position.
struct PendingLabel {
    pos: usize,
    name: String,
    length: f64,
}

#[derive(Default)]
struct Token {
    text: String,
    colon: Option<usize>,
    quoted: bool,
}

impl Token {
    fn push(&mut self, c: char, in_quote: bool) {
        if c == ':' && !in_quote {
            self.colon = Some(self.text.len());
        }
        self.text.push(c);
    }

    fn is_blank(&self) -> bool {
        !self.quoted && self.text.trim().is_empty()
    }

    /// Split into `name[:length]` and reset.
    fn take(&mut self) -> Result<Option<(String, f64)>> {
        if self.is_blank() {
            *self = Token::default();
            return Ok(None);
        }
        let tok = std::mem::take(self);
        let (name, length) = match tok.colon {
            Some(c) => {
                let name = tok.text[..c].trim().to_owned();
                let len_txt = tok.text[c + 1..].trim();
                let length = len_txt.parse::<f64>().map_err(|_| UnifracError::InvalidLength {
                    name: name.clone(),
                    token: len_txt.to_owned(),
                })?;
                (name, length)
            }
            None => (tok.text.trim().to_owned(), 0.0),
        };
        Ok(Some((name, length)))
    }
}

fn attach(labels: &mut Vec<PendingLabel>, pos: usize, tok: Option<(String, f64)>) {
    if let Some((name, length)) = tok {
        labels.push(PendingLabel { pos, name, length });
    }
}

fn newick_to_bp(newick: &str) -> Result<(Parens, Vec<PendingLabel>)> {
    let mut structure = Parens::with_capacity(newick.len() / 2);
    let mut labels: Vec<PendingLabel> = Vec::new();
    let mut token = Token::default();

    let mut last_structure: Option<char> = None;
    let mut last_close: Option<usize> = None;
    let mut potential_single_descendant = false;
    let mut in_quote = false;
    let mut comment_depth = 0usize;
    let mut depth = 0usize;

    let mut chars = newick.chars().peekable();
    while let Some(c) = chars.next() {
        if comment_depth > 0 {
            match c {
                '[' => comment_depth += 1,
                ']' => comment_depth -= 1,
                _ => {}
            }
            continue;
        }
        if c == '\'' {
            // '' inside a quoted label is a literal quote
            if in_quote && chars.peek() == Some(&'\'') {
                chars.next();
                token.push(c, true);
            } else {
                in_quote = !in_quote;
                token.quoted = true;
            }
            continue;
        }
        if in_quote {
            token.push(c, true);
            continue;
        }

        match c {
            '[' => comment_depth = 1,
            '(' => {
                if !token.is_blank() {
                    return Err(UnifracError::MalformedTree(format!(
                        "label '{}' directly before '('",
                        token.text.trim()
                    )));
                }
                if depth == 0 && last_structure.is_some() {
                    return Err(UnifracError::MalformedTree("more than one root".into()));
                }
                token = Token::default();
                depth += 1;
                structure.push(true);
                potential_single_descendant = true;
                last_structure = Some('(');
            }
            ')' => {
                if depth == 0 {
                    return Err(UnifracError::MalformedTree("unbalanced ')'".into()));
                }
                depth -= 1;
                let tok = token.take()?;
                if potential_single_descendant || last_structure == Some(',') {
                    // single descendant or last child: materialise the leaf
                    let leaf = structure.len();
                    structure.push(true);
                    structure.push(false);
                    attach(&mut labels, leaf, tok);
                    potential_single_descendant = false;
                } else if let Some(prev) = last_close {
                    attach(&mut labels, prev, tok);
                }
                structure.push(false);
                last_close = Some(structure.len() - 1);
                last_structure = Some(')');
            }
            ',' => {
                if depth == 0 {
                    return Err(UnifracError::MalformedTree("',' outside any parenthesis".into()));
                }
                let tok = token.take()?;
                if last_structure != Some(')') {
                    let leaf = structure.len();
                    structure.push(true);
                    structure.push(false);
                    attach(&mut labels, leaf, tok);
                } else if let Some(prev) = last_close {
                    attach(&mut labels, prev, tok);
                }
                potential_single_descendant = false;
                last_structure = Some(',');
            }
            ';' => break,
            '\n' | '\r' => {}
            _ => token.push(c, false),
        }
    }

    if in_quote {
        return Err(UnifracError::MalformedTree("unterminated quoted label".into()));
    }
    if comment_depth > 0 {
        return Err(UnifracError::MalformedTree("unterminated comment".into()));
    }

    // root label
    if last_structure.is_some() && last_structure != Some(')') && !token.is_blank() {
        return Err(UnifracError::MalformedTree(format!(
            "label '{}' outside any parenthesis",
            token.text.trim()
        )));
    }
    let tok = token.take()?;
    if let (Some(')'), Some(prev)) = (last_structure, last_close) {
        attach(&mut labels, prev, tok);
    }

    Ok((structure, labels))
}

impl BpTree {
    /// Parse a Newick string.
    ///
    /// Unnamed nodes get an empty name, missing lengths are 0.  A text
    /// without any parenthesis has no nodes and is rejected.
    pub fn from_newick(newick: &str) -> Result<Self> {
        let (structure, labels) = newick_to_bp(newick)?;
        let n = structure.len();
        let mut tree = BpTree::from_parts(structure, vec![0.0; n], vec![String::new(); n])?;
        for PendingLabel { pos, name, length } in labels {
            let open = tree.open(pos);
            tree.names[open] = name;
            tree.lengths[open] = length;
        }
        Ok(tree)
    }
}

impl std::str::FromStr for BpTree {
    type Err = UnifracError;

    fn from_str(s: &str) -> Result<Self> {
        BpTree::from_newick(s)
    }
}
