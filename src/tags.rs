use std::cmp::Ordering;

use thiserror::Error;

pub const TAG_SEPARATOR: char = ';';
pub const NAME_TAG: &str = "__name__";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("incomplete tags in '{0}'")]
    IncompleteTags(String),
}

/// A tagged metric in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedPath {
    /// `name?k1=v1&k2=v2...` with tags in natural order.
    pub path: String,
    /// Every `key=value` pair including `__name__=<name>`, in natural order.
    pub tags: Vec<String>,
}

/// Parses `name;k1=v1;k2=v2` into its canonical path and sorted tag list.
pub fn parse_tagged(metric: &str) -> Result<TaggedPath, TagError> {
    let Some((name, rest)) = metric.split_once(TAG_SEPARATOR) else {
        return Err(TagError::IncompleteTags(metric.to_owned()));
    };
    if rest.is_empty() {
        return Err(TagError::IncompleteTags(metric.to_owned()));
    }

    // a trailing separator does not start another tag
    let rest = rest.strip_suffix(TAG_SEPARATOR).unwrap_or(rest);
    let mut tags = Vec::with_capacity(12);
    tags.push(format!("{NAME_TAG}={name}"));
    for tag in rest.split(TAG_SEPARATOR) {
        if !tag.contains('=') {
            return Err(TagError::IncompleteTags(metric.to_owned()));
        }
        tags.push(tag.to_owned());
    }
    tags.sort_by(|a, b| natural_cmp(a, b));

    // the first entry is dropped whatever it is, so a key sorting before
    // `__name__` pushes the name entry into the path instead
    let mut path = String::with_capacity(metric.len() + 1);
    path.push_str(name);
    path.push('?');
    for (i, tag) in tags.iter().skip(1).enumerate() {
        if i > 0 {
            path.push('&');
        }
        path.push_str(tag);
    }
    Ok(TaggedPath { path, tags })
}

/// Natural ordering: digit runs compare by numeric value, everything else
/// bytewise, and a digit sorts before any other byte.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (da, db) = (a[i].is_ascii_digit(), b[j].is_ascii_digit());
        match (da, db) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {
                if a[i] != b[j] {
                    return a[i].cmp(&b[j]);
                }
                i += 1;
                j += 1;
            }
            (true, true) => {
                let (zeros_a, zeros_b) = (skip_zeros(a, i), skip_zeros(b, j));
                let (end_a, end_b) = (skip_digits(a, zeros_a), skip_digits(b, zeros_b));
                let (num_a, num_b) = (&a[zeros_a..end_a], &b[zeros_b..end_b]);
                // equal-length digit strings without leading zeros compare like numbers
                let ord = num_a
                    .len()
                    .cmp(&num_b.len())
                    .then_with(|| num_a.cmp(num_b))
                    .then_with(|| (zeros_a - i).cmp(&(zeros_b - j)));
                if ord != Ordering::Equal {
                    return ord;
                }
                i = end_a;
                j = end_b;
            }
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn skip_zeros(s: &[u8], mut i: usize) -> usize {
    while i < s.len() && s[i] == b'0' {
        i += 1;
    }
    i
}

fn skip_digits(s: &[u8], mut i: usize) -> usize {
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
    }
    i
}
