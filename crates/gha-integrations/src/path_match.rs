//! Typo-tolerant path matching over a set of cached repository paths.
//!
//! Lookup order: exact, case-insensitive exact, suffix/basename, then
//! Levenshtein distance over lower-cased full paths. Ties are broken by
//! lowest distance, then shortest path, then lexicographic order, so the
//! result is deterministic for a given path set.

use serde::{Deserialize, Serialize};

/// How a requested path was matched to a cached one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    Suffix,
    Fuzzy { distance: usize, similarity: f64 },
}

/// Canonical form used as a cache key.
///
/// Backslashes become `/`, leading `./` and `/` are stripped, as are
/// trailing slashes, and repeated slashes collapse.
pub fn normalize_path(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    let mut rest = unified.as_str();
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
        } else {
            break;
        }
    }
    rest.split('/')
        .filter(|seg| !seg.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Character-level edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - distance / max(len)`; two empty strings are identical.
pub fn similarity(a: &str, b: &str, distance: usize) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        1.0
    } else {
        1.0 - distance as f64 / longest as f64
    }
}

/// Find the best cached path for `requested` (already normalized).
///
/// Returns `None` when nothing clears `min_similarity` at the fuzzy stage.
pub fn find_match<'a, I>(paths: I, requested: &str, min_similarity: f64) -> Option<(&'a str, MatchKind)>
where
    I: IntoIterator<Item = &'a str>,
{
    let paths: Vec<&'a str> = paths.into_iter().collect();
    if requested.is_empty() {
        return None;
    }

    if let Some(p) = paths.iter().copied().find(|p| *p == requested) {
        return Some((p, MatchKind::Exact));
    }

    let lowered = requested.to_lowercase();
    if let Some(p) = shortest_then_lexicographic(
        paths.iter().copied().filter(|p| p.to_lowercase() == lowered),
    ) {
        return Some((p, MatchKind::CaseInsensitive));
    }

    let suffix = format!("/{lowered}");
    let basename_only = !lowered.contains('/');
    if let Some(p) = shortest_then_lexicographic(paths.iter().copied().filter(|p| {
        let lp = p.to_lowercase();
        lp.ends_with(&suffix) || (basename_only && basename(&lp) == lowered)
    })) {
        return Some((p, MatchKind::Suffix));
    }

    paths
        .iter()
        .map(|p| {
            let lp = p.to_lowercase();
            let distance = levenshtein(&lowered, &lp);
            (*p, distance, similarity(&lowered, &lp, distance))
        })
        .filter(|(_, _, sim)| *sim >= min_similarity)
        .min_by(|(pa, da, _), (pb, db, _)| {
            da.cmp(db)
                .then_with(|| pa.len().cmp(&pb.len()))
                .then_with(|| pa.cmp(pb))
        })
        .map(|(p, distance, similarity)| {
            (
                p,
                MatchKind::Fuzzy {
                    distance,
                    similarity,
                },
            )
        })
}

fn shortest_then_lexicographic<'a>(candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    candidates.min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
