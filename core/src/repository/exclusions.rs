use std::collections::HashSet;
use std::io::Cursor;

use plist::Value;
use tracing::warn;

/// Identifiers the package-cask source must never claim. Shipped with the
/// crate and refreshed from the network.
pub const BUNDLED_EXCLUSIONS: &[u8] = include_bytes!("../../resources/unsupported_apps.plist");

/// Decodes a plist whose root is an array of strings. Anything else yields
/// an empty set.
pub fn decode_exclusions(bytes: &[u8]) -> HashSet<String> {
    parse_exclusions(bytes).unwrap_or_default()
}

/// Like [`decode_exclusions`], but `None` when `bytes` is not a plist string
/// array at all.
pub fn parse_exclusions(bytes: &[u8]) -> Option<HashSet<String>> {
    let value = match Value::from_reader(Cursor::new(bytes)) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "exclusion list is not a valid plist");
            return None;
        }
    };
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_string)
            .map(|identifier| identifier.trim().to_string())
            .filter(|identifier| !identifier.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bundled_list_decodes() {
        let excluded = decode_exclusions(BUNDLED_EXCLUSIONS);
        assert!(excluded.contains("com.apple.Safari"));
        assert!(excluded.len() > 5);
    }

    #[test]
    fn non_array_root_is_empty() {
        let dict = br#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>a</key><string>b</string></dict></plist>"#;
        assert!(decode_exclusions(dict).is_empty());
        assert!(decode_exclusions(b"garbage").is_empty());
        assert_eq!(parse_exclusions(dict), None);
        assert_eq!(parse_exclusions(b"garbage"), None);
    }

    #[test]
    fn empty_array_is_a_valid_list() {
        let empty = br#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><array/></plist>"#;
        assert_eq!(parse_exclusions(empty), Some(HashSet::new()));
    }
}
