//! Update checking for installed application bundles.
//!
//! [`CheckCoordinator`] drives one check per bundle against the bundle's
//! update source and records the results in an [`AppStateStore`].

pub mod checkers;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod feed;
pub mod http;
pub mod job;
pub mod lookup;
pub mod model;
pub mod preferences;
pub mod repository;
pub mod resource;
pub mod state;
pub mod version;

pub use checkers::CheckContext;
pub use checkers::UpdateCheck;
pub use config::UptickConfig;
pub use config::find_uptick_home;
pub use coordinator::CheckCoordinator;
pub use coordinator::CheckEvent;
pub use coordinator::CoordinatorState;
pub use discovery::BundleDiscovery;
pub use discovery::DirectoryScanner;
pub use error::CheckError;
pub use job::JobState;
pub use job::StatefulJob;
pub use lookup::LookupBatcher;
pub use model::Bundle;
pub use model::Source;
pub use model::Update;
pub use model::UpdateAction;
pub use preferences::PreferenceFile;
pub use preferences::PreferenceStore;
pub use repository::RepositoryCache;
pub use state::App;
pub use state::AppStateStore;
pub use version::Version;
