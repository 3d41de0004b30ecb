use reqwest::Client;
use tracing::debug;

use crate::error::CheckError;
use crate::error::FetchError;
use crate::error::Result;
use crate::feed::FeedItem;
use crate::feed::parse_feed;
use crate::model::Bundle;
use crate::model::ReleaseNotes;
use crate::model::Source;
use crate::model::Update;
use crate::model::UpdateAction;

pub struct VendorFeedCheck {
    bundle: Bundle,
    client: Client,
    locale: Option<String>,
}

impl VendorFeedCheck {
    pub fn new(bundle: Bundle, client: Client, locale: Option<String>) -> Self {
        Self {
            bundle,
            client,
            locale,
        }
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub async fn execute(&self) -> Result<Update> {
        let Some(url) = self.bundle.feed_url.as_deref() else {
            return Err(CheckError::MissingFeedUrl(self.bundle.name.clone()));
        };
        debug!(bundle = %self.bundle.identifier, url, "fetching update feed");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }
        let body = response.bytes().await.map_err(FetchError::from)?;
        let item = parse_feed(&body, self.locale.as_deref())?;
        update_from_item(item, &self.bundle)
    }
}

fn update_from_item(item: FeedItem, bundle: &Bundle) -> Result<Update> {
    let remote_version = item.remote_version();
    if remote_version.is_empty() {
        return Err(CheckError::invalid_response(
            "update feed",
            format!("no version in the newest item for {}", bundle.name),
        ));
    }
    let mut update = Update::new(
        remote_version,
        Source::VendorFeed,
        UpdateAction::BuiltIn {
            download_url: item.download_url.clone(),
        },
    );
    update.minimum_os = item.minimum_os_version();
    update.release_date = item.pub_date;
    update.release_notes = match (item.release_notes_link, item.description) {
        (Some(link), _) => Some(ReleaseNotes::Url(link)),
        (None, Some(html)) => Some(ReleaseNotes::Html(html)),
        (None, None) => None,
    };
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    fn bundle(feed_url: Option<String>) -> Bundle {
        let bundle = Bundle::new(
            "/Applications/Example.app",
            "Example",
            "com.example",
            Version::from_version("1.0"),
            Source::VendorFeed,
        );
        match feed_url {
            Some(url) => bundle.with_feed_url(url),
            None => bundle,
        }
    }

    #[tokio::test]
    async fn fetches_and_converts_newest_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/appcast.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<rss><channel><item>
                    <description>Faster</description>
                    <enclosure url="https://example.com/Example-2.0.zip"
                               sparkle:version="200" sparkle:shortVersionString="2.0"/>
                </item></channel></rss>"#,
            ))
            .mount(&server)
            .await;

        let check = VendorFeedCheck::new(
            bundle(Some(format!("{}/appcast.xml", server.uri()))),
            Client::new(),
            None,
        );
        let update = check.execute().await.expect("update");
        assert_eq!(
            update.remote_version,
            Version::new(Some("2.0".into()), Some("200".into()))
        );
        assert_eq!(
            update.action,
            UpdateAction::BuiltIn {
                download_url: Some("https://example.com/Example-2.0.zip".to_string())
            }
        );
        assert_eq!(
            update.release_notes,
            Some(ReleaseNotes::Html("Faster".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_feed_url_and_http_errors() {
        let check = VendorFeedCheck::new(bundle(None), Client::new(), None);
        assert_eq!(
            check.execute().await,
            Err(CheckError::MissingFeedUrl("Example".to_string()))
        );

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let check = VendorFeedCheck::new(bundle(Some(server.uri())), Client::new(), None);
        assert_matches!(check.execute().await, Err(CheckError::Unavailable(_)));
    }
}
