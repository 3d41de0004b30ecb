use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckError>;

/// Outcome of a single failed update check.
///
/// Stored per app and fanned out to every waiter of a shared lookup, so it
/// is `Clone` and carries rendered messages instead of source errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("no update information found for {0}")]
    NotFound(String),
    #[error("update information is unavailable: {0}")]
    Unavailable(String),
    #[error("more than one catalog entry matches {0}")]
    AmbiguousMatch(String),
    #[error("update check was cancelled")]
    Cancelled,
    #[error("{0} does not declare an update feed")]
    MissingFeedUrl(String),
    #[error("invalid response from {origin}: {message}")]
    InvalidResponse { origin: String, message: String },
}

impl CheckError {
    /// Ambiguous matches and malformed remote data are reported to users
    /// the same way as a missing entry.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CheckError::NotFound(_)
                | CheckError::AmbiguousMatch(_)
                | CheckError::MissingFeedUrl(_)
                | CheckError::InvalidResponse { .. }
        )
    }

    pub(crate) fn invalid_response(origin: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidResponse {
            origin: origin.into(),
            message: message.to_string(),
        }
    }
}

/// Failure fetching a remote resource through [`crate::resource::ResourceFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FetchError> for CheckError {
    fn from(err: FetchError) -> Self {
        CheckError::Unavailable(err.to_string())
    }
}

/// Failure of one batched metadata lookup. Cached for the process lifetime
/// and delivered to every waiter of the key, hence `Clone`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Request(String),
    #[error("lookup returned status {0}")]
    Status(u16),
    #[error("lookup response could not be decoded: {0}")]
    Decode(String),
    #[error("result unavailable")]
    ResultUnavailable,
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LookupError::Decode(err.to_string())
        } else {
            LookupError::Request(err.to_string())
        }
    }
}

impl LookupError {
    pub(crate) fn into_check_error(self, identifier: &str) -> CheckError {
        match self {
            LookupError::ResultUnavailable => CheckError::NotFound(identifier.to_string()),
            LookupError::Decode(message) => CheckError::invalid_response("app store", message),
            other => CheckError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read bundle info at {path}: {source}")]
    Plist {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preferences io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preferences are not valid json: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory")]
    NoHomeDirectory,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
