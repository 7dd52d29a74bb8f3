use std::collections::{BTreeMap, HashSet};

use crate::evidence::EvidenceItem;

/// A `[n]` or `[n, m]` marker located in a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    /// Byte range of the marker including brackets.
    pub start: usize,
    pub end: usize,
    pub ids: Vec<u32>,
}

/// Find citation markers. Brackets holding anything but comma-separated
/// numbers (links, footnotes, `[sic]`) are left alone.
pub fn find_markers(text: &str) -> Vec<Marker> {
    let mut markers = Vec::new();
    let mut from = 0;

    while let Some(open) = text[from..].find('[') {
        let start = from + open;
        let Some(close) = text[start + 1..].find(']') else {
            break;
        };
        let end = start + 1 + close;
        let inner = &text[start + 1..end];

        let ids: Option<Vec<u32>> = inner
            .split(',')
            .map(|part| {
                let part = part.trim();
                if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
                    part.parse::<u32>().ok()
                } else {
                    None
                }
            })
            .collect();

        match ids {
            Some(ids) => {
                markers.push(Marker {
                    start,
                    end: end + 1,
                    ids,
                });
                from = end + 1;
            }
            None => from = start + 1,
        }
    }

    markers
}

/// Every cited id in order of first appearance.
pub fn citation_ids(text: &str) -> Vec<u32> {
    let mut seen = HashSet::new();
    find_markers(text)
        .into_iter()
        .flat_map(|m| m.ids)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Remove markers and collapse the whitespace they leave behind.
pub fn strip_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for marker in find_markers(text) {
        out.push_str(&text[last..marker.start]);
        last = marker.end;
    }
    out.push_str(&text[last..]);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when the text holds nothing but markers and punctuation.
pub fn is_marker_only(text: &str) -> bool {
    !find_markers(text).is_empty()
        && strip_markers(text)
            .chars()
            .all(|c| !c.is_alphanumeric())
}

/// Resolve cited ids against the evidence list (ids are 1-based positions).
///
/// Returns the id → URL map for ids that resolve and, separately, the ids
/// that point at nothing.
pub fn resolve_citations(
    ids: &[u32],
    evidence: &[EvidenceItem],
) -> (BTreeMap<u32, String>, Vec<u32>) {
    let mut resolved = BTreeMap::new();
    let mut unresolved = Vec::new();
    let mut seen = HashSet::new();

    for &id in ids {
        if !seen.insert(id) {
            continue;
        }
        let item = (id as usize)
            .checked_sub(1)
            .and_then(|idx| evidence.get(idx));
        match item {
            Some(item) => {
                resolved.insert(id, item.url.clone());
            }
            None => unresolved.push(id),
        }
    }

    (resolved, unresolved)
}
