use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRelation {
    Same,
    Upgrade,
    Downgrade,
}

impl VersionRelation {
    pub fn between(installed: &str, candidate: &str) -> Self {
        match compare(candidate, installed) {
            Ordering::Equal => VersionRelation::Same,
            Ordering::Greater => VersionRelation::Upgrade,
            Ordering::Less => VersionRelation::Downgrade,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Text(String),
}

fn segments(raw: &str) -> Vec<Segment> {
    let s = raw.trim();
    let s = s
        .strip_prefix('v')
        .or_else(|| s.strip_prefix('V'))
        .unwrap_or(s);
    s.split(|c: char| matches!(c, '.' | '-' | '+' | '_'))
        .filter(|p| !p.is_empty())
        .map(|p| match p.parse::<u64>() {
            Ok(n) => Segment::Num(n),
            Err(_) => Segment::Text(p.to_ascii_lowercase()),
        })
        .collect()
}

/// Compares plugin version strings.
///
/// Numeric segments compare numerically (`1.10.0 > 1.2.0`), missing trailing
/// numbers count as zero (`1.2 == 1.2.0`), and a qualifier after the numeric
/// core marks a pre-release (`1.0.0 > 1.0.0-SNAPSHOT`).
pub fn compare(a: &str, b: &str) -> Ordering {
    let a = segments(a);
    let b = segments(b);
    let len = a.len().max(b.len());
    for i in 0..len {
        let ord = match (a.get(i), b.get(i)) {
            (Some(Segment::Num(x)), Some(Segment::Num(y))) => x.cmp(y),
            (Some(Segment::Text(x)), Some(Segment::Text(y))) => x.cmp(y),
            // A number outranks a qualifier in the same position: 1.0.1 > 1.0-beta.
            (Some(Segment::Num(_)), Some(Segment::Text(_))) => Ordering::Greater,
            (Some(Segment::Text(_)), Some(Segment::Num(_))) => Ordering::Less,
            (Some(Segment::Num(x)), None) => x.cmp(&0),
            (None, Some(Segment::Num(y))) => 0.cmp(y),
            // Trailing qualifier: pre-release ranks below the bare release.
            (Some(Segment::Text(_)), None) => Ordering::Less,
            (None, Some(Segment::Text(_))) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Best-effort version from an artifact file name, e.g. `plugin-2.0.0.jar`.
pub fn guess_from_file_name(file_name: &str) -> Option<String> {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    let start = stem.char_indices().find_map(|(i, c)| {
        let prev_ok = i == 0 || matches!(stem.as_bytes()[i - 1], b'-' | b'_' | b' ' | b'v' | b'V');
        (c.is_ascii_digit() && prev_ok).then_some(i)
    })?;
    let candidate = &stem[start..];
    if !candidate.contains('.') {
        return None;
    }
    Some(candidate.to_string())
}
