//! Application version numbers.
//!
//! Installed bundles report a marketing version (`CFBundleShortVersionString`)
//! and an optional build number (`CFBundleVersion`). Remote sources report one
//! or both. Comparison is component-wise over runs of digits and letters, so
//! `1.10` sorts after `1.9` and `2.0b1` sorts before `2.0`.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Version {
    pub version: Option<String>,
    pub build: Option<String>,
}

impl Version {
    pub fn new(version: Option<String>, build: Option<String>) -> Self {
        Self {
            version: version.and_then(non_empty),
            build: build.and_then(non_empty),
        }
    }

    pub fn from_version(version: impl Into<String>) -> Self {
        Self::new(Some(version.into()), None)
    }

    /// Package-cask versions encode the build after a comma (`1.2.3,456`).
    pub fn parse_cask(raw: &str) -> Self {
        match raw.split_once(',') {
            Some((version, build)) => Self::new(Some(version.to_string()), Some(build.to_string())),
            None => Self::new(Some(raw.to_string()), None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.version.is_none() && self.build.is_none()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        if let (Some(a), Some(b)) = (&self.version, &other.version) {
            let ordering = compare_strings(a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        match (&self.build, &other.build) {
            (Some(a), Some(b)) => compare_strings(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.version, &self.build) {
            (Some(version), Some(build)) if version != build => write!(f, "{version} ({build})"),
            (Some(version), _) => write!(f, "{version}"),
            (None, Some(build)) => write!(f, "({build})"),
            (None, None) => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Component<'a> {
    Number(&'a str),
    Text(&'a str),
}

fn components(raw: &str) -> Vec<Component<'_>> {
    let mut out = Vec::new();
    // (start offset, run is digits)
    let mut run: Option<(usize, bool)> = None;
    for (idx, ch) in raw.char_indices() {
        let kind = if ch.is_ascii_digit() {
            Some(true)
        } else if ch.is_alphabetic() {
            Some(false)
        } else {
            None
        };
        match (run, kind) {
            (Some((_, current)), Some(next)) if current == next => {}
            (Some((from, current)), _) => {
                out.push(component(&raw[from..idx], current));
                run = kind.map(|next| (idx, next));
            }
            (None, _) => run = kind.map(|next| (idx, next)),
        }
    }
    if let Some((from, digits)) = run {
        out.push(component(&raw[from..], digits));
    }
    out
}

fn component(slice: &str, digit: bool) -> Component<'_> {
    if digit {
        Component::Number(slice.trim_start_matches('0'))
    } else {
        Component::Text(slice)
    }
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_strings(a: &str, b: &str) -> Ordering {
    let left = components(a);
    let right = components(b);
    let len = left.len().max(right.len());
    for idx in 0..len {
        let ordering = match (left.get(idx), right.get(idx)) {
            (Some(Component::Number(x)), Some(Component::Number(y))) => compare_numbers(x, y),
            (Some(Component::Text(x)), Some(Component::Text(y))) => {
                x.to_lowercase().cmp(&y.to_lowercase())
            }
            (Some(Component::Number(_)), Some(Component::Text(_))) => Ordering::Greater,
            (Some(Component::Text(_)), Some(Component::Number(_))) => Ordering::Less,
            (Some(Component::Number(x)), None) if x.is_empty() => Ordering::Equal,
            (Some(Component::Number(_)), None) => Ordering::Greater,
            (None, Some(Component::Number(y))) if y.is_empty() => Ordering::Equal,
            (None, Some(Component::Number(_))) => Ordering::Less,
            // A trailing letter run marks a pre-release (`2.0b1` < `2.0`).
            (Some(Component::Text(_)), None) => Ordering::Less,
            (None, Some(Component::Text(_))) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(raw: &str) -> Version {
        Version::from_version(raw)
    }

    #[test]
    fn compares_numeric_components() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0.1") > v("2.0"));
        assert_eq!(v("1.2"), v("1.2.0"));
        assert_eq!(v("1.02"), v("1.2"));
    }

    #[test]
    fn pre_release_sorts_before_release() {
        assert!(v("2.0b1") < v("2.0"));
        assert!(v("2.0b2") > v("2.0b1"));
        assert!(v("2.0.1") > v("2.0b"));
    }

    #[test]
    fn build_breaks_version_ties() {
        let installed = Version::new(Some("1.2.3".into()), Some("100".into()));
        let remote = Version::parse_cask("1.2.3,101");
        assert!(remote > installed);
        assert_eq!(remote.build.as_deref(), Some("101"));
    }

    #[test]
    fn missing_build_does_not_decide() {
        let installed = Version::new(Some("1.2.3".into()), Some("100".into()));
        assert_eq!(v("1.2.3"), installed);
    }

    #[test]
    fn renders_for_display() {
        assert_eq!(Version::parse_cask("4.1,77").to_string(), "4.1 (77)");
        assert_eq!(v("4.1").to_string(), "4.1");
        assert_eq!(Version::default().to_string(), "unknown");
    }

    #[test]
    fn huge_numbers_do_not_overflow() {
        assert!(v("1.99999999999999999999999") > v("1.9999999999999999999999"));
    }
}
