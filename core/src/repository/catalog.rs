//! Package-cask catalog: decoding, indexing and bundle resolution.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::model::Bundle;
use crate::model::toggle_app_suffix;
use crate::version::Version;

const UNVERSIONED: &str = "latest";

const SCORE_IDENTIFIER: u32 = 10;
const SCORE_FILE_NAME: u32 = 4;
const SCORE_FILE_STEM: u32 = 3;
const SCORE_DISPLAY_NAME: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub token: String,
    pub names: BTreeSet<String>,
    pub bundle_ids: BTreeSet<String>,
    pub version: String,
    pub homepage: Option<String>,
    pub url: Option<String>,
    pub minimum_os: Option<String>,
}

impl CatalogEntry {
    pub fn new(
        token: impl Into<String>,
        version: impl Into<String>,
        names: impl IntoIterator<Item = impl Into<String>>,
        bundle_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            token: token.into(),
            names: names.into_iter().map(Into::into).collect(),
            bundle_ids: bundle_ids.into_iter().map(Into::into).collect(),
            version: version.into(),
            homepage: None,
            url: None,
            minimum_os: None,
        }
    }

    /// Parsed remote version. `None` for unversioned (`latest`) casks, which
    /// can never be reported as outdated.
    pub fn remote_version(&self) -> Option<Version> {
        if self.version.eq_ignore_ascii_case(UNVERSIONED) {
            None
        } else {
            Some(Version::parse_cask(&self.version))
        }
    }

    fn has_name(&self, normalized: &str) -> bool {
        self.names.iter().any(|name| normalize(name) == normalized)
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    token: String,
    version: String,
    #[serde(default, alias = "name")]
    names: Vec<String>,
    #[serde(default, alias = "bundle_id")]
    bundle_ids: Vec<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    minimum_os: Option<String>,
    #[serde(default)]
    artifacts: Vec<Value>,
    #[serde(default)]
    depends_on: Option<Value>,
}

impl RawEntry {
    fn into_entry(self) -> CatalogEntry {
        let mut names: BTreeSet<String> = clean(self.names).collect();
        let mut bundle_ids: BTreeSet<String> = clean(self.bundle_ids).collect();
        for artifact in &self.artifacts {
            names.extend(clean(artifact_strings(artifact, "app")));
            for stanza in ["uninstall", "zap"] {
                if let Some(entries) = artifact.get(stanza).and_then(Value::as_array) {
                    for entry in entries {
                        bundle_ids.extend(clean(artifact_strings(entry, "quit")));
                    }
                }
            }
        }
        let minimum_os = self.minimum_os.or_else(|| {
            self.depends_on
                .as_ref()
                .and_then(|deps| deps.pointer("/macos/>="))
                .and_then(|min| min.as_array().and_then(|list| list.first()).or(Some(min)))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        CatalogEntry {
            token: self.token,
            names,
            bundle_ids,
            version: self.version,
            homepage: self.homepage,
            url: self.url,
            minimum_os,
        }
    }
}

fn clean(values: Vec<String>) -> impl Iterator<Item = String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Strings under `key`, which casks write either as a scalar or a list.
fn artifact_strings(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::String(single)) => vec![single.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Decodes the catalog array element by element. Malformed elements and
/// entries without any name are dropped; a document that is not an array at
/// all yields an empty catalog.
pub fn decode_catalog(bytes: &[u8]) -> Vec<CatalogEntry> {
    let elements: Vec<Value> = match serde_json::from_slice(bytes) {
        Ok(elements) => elements,
        Err(err) => {
            warn!(error = %err, "catalog is not a json array");
            return Vec::new();
        }
    };
    let total = elements.len();
    let entries: Vec<CatalogEntry> = elements
        .into_iter()
        .filter_map(|element| serde_json::from_value::<RawEntry>(element).ok())
        .map(RawEntry::into_entry)
        .filter(|entry| !entry.names.is_empty())
        .collect();
    debug!(total, kept = entries.len(), "decoded catalog");
    entries
}

pub(crate) fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Why a bundle did or did not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Matched(&'a CatalogEntry),
    /// The identifier is on the exclusion list.
    Excluded,
    NoMatch,
    /// Several candidates remained without a unique best score.
    Ambiguous,
}

impl<'a> Resolution<'a> {
    pub fn entry(self) -> Option<&'a CatalogEntry> {
        match self {
            Resolution::Matched(entry) => Some(entry),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, Vec<usize>>,
    by_identifier: HashMap<String, Vec<usize>>,
    excluded: HashSet<String>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>, excluded: HashSet<String>) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_identifier: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            for name in &entry.names {
                let normalized = normalize(name);
                let toggled = toggle_app_suffix(&normalized);
                push_unique(by_name.entry(normalized).or_default(), idx);
                push_unique(by_name.entry(toggled).or_default(), idx);
            }
            for identifier in &entry.bundle_ids {
                push_unique(by_identifier.entry(identifier.clone()).or_default(), idx);
            }
        }
        Self {
            entries,
            by_name,
            by_identifier,
            excluded,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_excluded(&self, identifier: &str) -> bool {
        self.excluded.contains(identifier)
    }

    pub fn resolve(&self, bundle: &Bundle) -> Option<&CatalogEntry> {
        self.resolution(bundle).entry()
    }

    pub fn resolution(&self, bundle: &Bundle) -> Resolution<'_> {
        if self.is_excluded(&bundle.identifier) {
            return Resolution::Excluded;
        }

        let file_name = normalize(&bundle.file_name());
        let file_stem = normalize(&bundle.file_stem());
        let display_name = normalize(&bundle.name);

        let mut indices = Vec::new();
        for key in [&file_name, &file_stem, &display_name] {
            for variant in [key.clone(), toggle_app_suffix(key)] {
                if let Some(hits) = self.by_name.get(&variant) {
                    indices.extend(hits.iter().copied());
                }
            }
        }
        if indices.is_empty() {
            if let Some(hits) = self.by_identifier.get(&bundle.identifier) {
                indices.extend(hits.iter().copied());
            }
        }

        let mut seen_tokens = HashSet::new();
        let candidates: Vec<&CatalogEntry> = indices
            .into_iter()
            .map(|idx| &self.entries[idx])
            .filter(|entry| seen_tokens.insert(entry.token.as_str()))
            .collect();

        match candidates.as_slice() {
            [] => return Resolution::NoMatch,
            [only] => return Resolution::Matched(*only),
            _ => {}
        }

        let by_identifier: Vec<&CatalogEntry> = candidates
            .iter()
            .copied()
            .filter(|entry| entry.bundle_ids.contains(&bundle.identifier))
            .collect();
        if let [only] = by_identifier.as_slice() {
            return Resolution::Matched(*only);
        }

        let mut best: Option<&CatalogEntry> = None;
        let mut best_score = 0;
        let mut tied = false;
        for entry in candidates {
            let mut score = 0;
            if entry.bundle_ids.contains(&bundle.identifier) {
                score += SCORE_IDENTIFIER;
            }
            if entry.has_name(&file_name) {
                score += SCORE_FILE_NAME;
            }
            if entry.has_name(&file_stem) {
                score += SCORE_FILE_STEM;
            }
            if entry.has_name(&display_name) {
                score += SCORE_DISPLAY_NAME;
            }
            if best.is_none() || score > best_score {
                best = Some(entry);
                best_score = score;
                tied = false;
            } else if score == best_score {
                tied = true;
            }
        }

        match best {
            Some(entry) if best_score > 0 && !tied => Resolution::Matched(entry),
            _ => Resolution::Ambiguous,
        }
    }
}

fn push_unique(slot: &mut Vec<usize>, idx: usize) {
    if slot.last() != Some(&idx) {
        slot.push(idx);
    }
}
