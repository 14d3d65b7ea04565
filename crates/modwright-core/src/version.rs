use std::cmp::Ordering;

use semver::Version;

pub const DEFAULT_TAG_PREFIXES: &[&str] = &["v"];

// Strips source-specific tag decorations until no known prefix matches, so
// the result is a fixed point of the function. Longer prefixes win over
// shorter ones that happen to be their own prefix.
pub fn normalize(version: &str, known_prefixes: &[&str]) -> String {
    let mut prefixes: Vec<&str> = known_prefixes
        .iter()
        .copied()
        .filter(|prefix| !prefix.is_empty())
        .collect();
    prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut current = version.trim();
    loop {
        let mut stripped = false;
        for prefix in &prefixes {
            if current.len() > prefix.len() {
                if let Some(rest) = current.strip_prefix(prefix) {
                    current = rest;
                    stripped = true;
                    break;
                }
            }
        }
        if !stripped {
            break;
        }
    }

    current.to_string()
}

// An absent version compares older than anything; two absent versions are
// equal. Tags that do not parse as semver fall back to segment comparison.
pub fn compare(a: &str, b: &str) -> Ordering {
    let a = normalize(a, DEFAULT_TAG_PREFIXES);
    let b = normalize(b, DEFAULT_TAG_PREFIXES);

    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match (Version::parse(&a), Version::parse(&b)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => compare_segments(&a, &b),
        },
    }
}

pub fn upgrade_available(current: &str, latest: &str) -> bool {
    !latest.trim().is_empty() && compare(current, latest) == Ordering::Less
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let a_segments: Vec<&str> = a.split(['.', '-', '+']).collect();
    let b_segments: Vec<&str> = b.split(['.', '-', '+']).collect();

    for (a_segment, b_segment) in a_segments.iter().zip(b_segments.iter()) {
        let ordering = match (a_segment.parse::<u64>(), b_segment.parse::<u64>()) {
            (Ok(a_number), Ok(b_number)) => a_number.cmp(&b_number),
            _ => a_segment.cmp(b_segment),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a_segments.len().cmp(&b_segments.len())
}
