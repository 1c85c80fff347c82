#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod dependency;
pub mod matching;
pub mod record;
pub mod version;

pub use dependency::{
    normalize_dist_name, Dependency, DependencyError, InstalledDependency, RegistryDependency,
    Requirements, Source, UrlDependency,
};
pub use matching::{
    find_by_requirements, find_by_uuid, record_satisfies, select_better_fit, Candidate,
};
pub use record::{EnvMetadata, EnvOptions, EnvRecord, Installed};
pub use version::{compare_versions, satisfies, try_satisfies, Constraint, VersionError};
