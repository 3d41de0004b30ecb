//! Vendor update feeds ("appcasts"): an RSS document whose first `<item>`
//! describes the newest release.

use std::borrow::Cow;

use chrono::DateTime;
use chrono::Utc;
use quick_xml::Reader;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;

use crate::error::CheckError;
use crate::version::Version;

const ORIGIN: &str = "update feed";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub version: Option<String>,
    pub short_version: Option<String>,
    pub minimum_os: Option<String>,
    pub description: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub release_notes_link: Option<String>,
    pub download_url: Option<String>,
}

impl FeedItem {
    /// The short version string is the user-facing version; the plain
    /// version then serves as the build number.
    pub fn remote_version(&self) -> Version {
        match &self.short_version {
            Some(short) => Version::new(Some(short.clone()), self.version.clone()),
            None => Version::new(self.version.clone(), None),
        }
    }

    pub fn minimum_os_version(&self) -> Option<Version> {
        self.minimum_os
            .as_ref()
            .map(Version::from_version)
            .filter(|version| !version.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Version,
    ShortVersion,
    MinimumOs,
    Description,
    PubDate,
    ReleaseNotesLink,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"sparkle:version" => Some(Field::Version),
            b"sparkle:shortVersionString" => Some(Field::ShortVersion),
            b"sparkle:minimumSystemVersion" => Some(Field::MinimumOs),
            b"description" => Some(Field::Description),
            b"pubDate" => Some(Field::PubDate),
            b"sparkle:releaseNotesLink" => Some(Field::ReleaseNotesLink),
            _ => None,
        }
    }
}

#[derive(Default)]
struct ItemBuilder {
    item: FeedItem,
    notes_links: Vec<(Option<String>, String)>,
}

impl ItemBuilder {
    fn set(&mut self, field: Field, value: String, lang: Option<String>) {
        let value = value.trim().to_string();
        if value.is_empty() {
            return;
        }
        let item = &mut self.item;
        match field {
            Field::Version => item.version = Some(value),
            Field::ShortVersion => item.short_version = Some(value),
            Field::MinimumOs => item.minimum_os = Some(value),
            Field::Description => item.description = Some(value),
            Field::PubDate => {
                item.pub_date = DateTime::parse_from_rfc2822(&value)
                    .ok()
                    .map(|date| date.with_timezone(&Utc));
            }
            Field::ReleaseNotesLink => self.notes_links.push((lang, value)),
        }
    }

    fn enclosure(&mut self, element: &BytesStart<'_>) {
        for attr in element.attributes().flatten() {
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            let value = value.into_owned();
            match attr.key.as_ref() {
                b"url" => self.item.download_url = Some(value),
                tag => {
                    // Enclosure attributes only fill fields the item did not set.
                    if let Some(field) = Field::from_tag(tag) {
                        if !self.has(field) {
                            self.set(field, value, None);
                        }
                    }
                }
            }
        }
    }

    fn has(&self, field: Field) -> bool {
        let item = &self.item;
        match field {
            Field::Version => item.version.is_some(),
            Field::ShortVersion => item.short_version.is_some(),
            Field::MinimumOs => item.minimum_os.is_some(),
            Field::Description => item.description.is_some(),
            Field::PubDate => item.pub_date.is_some(),
            Field::ReleaseNotesLink => !self.notes_links.is_empty(),
        }
    }

    fn build(mut self, locale: Option<&str>) -> FeedItem {
        self.item.release_notes_link = select_release_notes_link(&self.notes_links, locale);
        self.item
    }
}

fn lang_of(element: &BytesStart<'_>) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"xml:lang")
        .and_then(|attr| attr.unescape_value().ok().map(Cow::into_owned))
}

/// Parses the first `<item>` of an appcast. A feed without items is a
/// not-found; malformed XML is an invalid response.
pub fn parse_feed(bytes: &[u8], locale: Option<&str>) -> Result<FeedItem, CheckError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut builder: Option<ItemBuilder> = None;
    let mut current: Option<(Field, Option<String>)> = None;
    let mut text = String::new();
    // Elements nested inside the open field, e.g. unescaped HTML.
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| CheckError::invalid_response(ORIGIN, err))?;
        match event {
            Event::Start(element) if current.is_some() => {
                depth += 1;
                text.push('<');
                text.push_str(&String::from_utf8_lossy(&element));
                text.push('>');
            }
            Event::Start(element) => {
                let name = element.name();
                let tag = name.as_ref();
                match builder.as_mut() {
                    None => {
                        if tag == b"item" {
                            builder = Some(ItemBuilder::default());
                        }
                    }
                    Some(item) if tag == b"enclosure" => item.enclosure(&element),
                    Some(_) => {
                        if let Some(field) = Field::from_tag(tag) {
                            current = Some((field, lang_of(&element)));
                            text.clear();
                            depth = 0;
                        }
                    }
                }
            }
            Event::Empty(element) if current.is_some() => {
                text.push('<');
                text.push_str(&String::from_utf8_lossy(&element));
                text.push_str("/>");
            }
            Event::Empty(element) => {
                if let Some(item) = builder.as_mut() {
                    if element.name().as_ref() == b"enclosure" {
                        item.enclosure(&element);
                    }
                }
            }
            Event::Text(content) => {
                if current.is_some() {
                    let unescaped = content
                        .unescape()
                        .map_err(|err| CheckError::invalid_response(ORIGIN, err))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(content) => {
                if current.is_some() {
                    text.push_str(&String::from_utf8_lossy(&content.into_inner()));
                }
            }
            Event::End(element) if depth > 0 => {
                depth -= 1;
                text.push_str("</");
                text.push_str(&String::from_utf8_lossy(element.name().as_ref()));
                text.push('>');
            }
            Event::End(element) => {
                if element.name().as_ref() == b"item" {
                    if let Some(item) = builder.take() {
                        return Ok(item.build(locale));
                    }
                } else if let (Some(item), Some((field, lang))) = (&mut builder, current.take()) {
                    item.set(field, std::mem::take(&mut text), lang);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match builder {
        Some(_) => Err(CheckError::invalid_response(ORIGIN, "unterminated item")),
        None => Err(CheckError::NotFound("feed has no items".to_string())),
    }
}

fn language(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Picks a release-notes link: the active locale's language first, then
/// English, then the first link offered.
pub fn select_release_notes_link(
    candidates: &[(Option<String>, String)],
    locale: Option<&str>,
) -> Option<String> {
    let find = |wanted: &str| {
        candidates.iter().find(|(lang, _)| {
            lang.as_deref()
                .is_some_and(|lang| language(lang) == wanted)
        })
    };

    locale
        .map(language)
        .and_then(|wanted| find(&wanted))
        .or_else(|| find("en"))
        .or_else(|| candidates.first())
        .map(|(_, url)| url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const APPCAST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0" xmlns:sparkle="http://www.andymatuschak.org/xml-namespaces/sparkle">
  <channel>
    <title>Example</title>
    <description>Channel description</description>
    <item>
      <title>Version 2.1</title>
      <description><![CDATA[<h2>New</h2><p>Things &amp; stuff</p>]]></description>
      <pubDate>Tue, 03 Sep 2024 10:15:00 +0200</pubDate>
      <sparkle:minimumSystemVersion>12.0</sparkle:minimumSystemVersion>
      <sparkle:releaseNotesLink>https://example.com/notes.html</sparkle:releaseNotesLink>
      <sparkle:releaseNotesLink xml:lang="de">https://example.com/de/notes.html</sparkle:releaseNotesLink>
      <enclosure url="https://example.com/Example-2.1.zip"
                 sparkle:version="210"
                 sparkle:shortVersionString="2.1"
                 length="1000" type="application/octet-stream"/>
    </item>
    <item>
      <title>Version 2.0</title>
      <enclosure url="https://example.com/Example-2.0.zip" sparkle:version="200"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn unescaped_html_description_is_kept_whole() {
        let feed = r#"<rss><channel><item>
  <sparkle:version>3.0</sparkle:version>
  <description><p>Faster <b>sync</b></p><br/> and fixes</description>
  <pubDate>Tue, 03 Sep 2024 10:15:00 +0200</pubDate>
</item></channel></rss>"#;
        let item = parse_feed(feed.as_bytes(), None).expect("parse");
        let description = item.description.expect("description");
        assert!(description.starts_with("<p>Faster"));
        assert!(description.contains("<b>sync</b></p><br/>"));
        assert!(description.ends_with("and fixes"));
        assert_eq!(item.version.as_deref(), Some("3.0"));
        assert!(item.pub_date.is_some());
    }

    #[test]
    fn parses_first_item_with_enclosure_attributes() {
        let item = parse_feed(APPCAST.as_bytes(), Some("de-DE")).expect("parse");
        assert_eq!(item.version.as_deref(), Some("210"));
        assert_eq!(item.short_version.as_deref(), Some("2.1"));
        assert_eq!(item.minimum_os.as_deref(), Some("12.0"));
        assert_eq!(
            item.description.as_deref(),
            Some("<h2>New</h2><p>Things &amp; stuff</p>")
        );
        assert_eq!(
            item.download_url.as_deref(),
            Some("https://example.com/Example-2.1.zip")
        );
        assert_eq!(
            item.release_notes_link.as_deref(),
            Some("https://example.com/de/notes.html")
        );
        assert_eq!(
            item.pub_date.map(|date| date.to_rfc3339()),
            Some("2024-09-03T08:15:00+00:00".to_string())
        );
        assert_eq!(
            item.remote_version(),
            Version::new(Some("2.1".into()), Some("210".into()))
        );
    }

    #[test]
    fn child_elements_take_precedence_over_enclosure() {
        let feed = r#"<rss><channel><item>
            <sparkle:version>5</sparkle:version>
            <enclosure url="u" sparkle:version="4"/>
        </item></channel></rss>"#;
        let item = parse_feed(feed.as_bytes(), None).expect("parse");
        assert_eq!(item.version.as_deref(), Some("5"));
        assert_eq!(item.remote_version(), Version::from_version("5"));
    }

    #[test]
    fn empty_and_broken_feeds() {
        assert_matches!(
            parse_feed(b"<rss><channel></channel></rss>", None),
            Err(CheckError::NotFound(_))
        );
        assert_matches!(
            parse_feed(b"<rss><channel><item><title>x</title>", None),
            Err(CheckError::InvalidResponse { .. })
        );
    }

    #[test]
    fn release_notes_language_preference() {
        let links = vec![
            (None, "default".to_string()),
            (Some("en".to_string()), "english".to_string()),
            (Some("fr-CA".to_string()), "french".to_string()),
        ];
        assert_eq!(
            select_release_notes_link(&links, Some("fr_FR")),
            Some("french".to_string())
        );
        assert_eq!(
            select_release_notes_link(&links, Some("ja")),
            Some("english".to_string())
        );
        assert_eq!(
            select_release_notes_link(&links[..1], Some("ja")),
            Some("default".to_string())
        );
        assert_eq!(select_release_notes_link(&[], None), None);
    }
}
