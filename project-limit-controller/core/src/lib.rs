//! Project request limits.
//!
//! Users are limited in the number of projects they may request. The limit that applies to a user
//! is chosen from an ordered list of tiers: the first tier whose selector matches the user's labels
//! determines the maximum number of projects that user may own. Users that match no tier, or that
//! match a tier without a maximum, are not limited.
//!
//! The number of projects a user currently owns is read from a cache that is maintained
//! independently of admission (see `CountProjects`). The cache may lag the cluster's true state,
//! so a burst of concurrent requests from a single user may briefly exceed the user's limit.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod admission;
pub mod limits;

pub use self::{
    admission::{
        AdmitError, BuildError, CountProjects, Denial, LookupError, LookupUserLabels,
        ProjectRequestLimit, Verdict,
    },
    limits::{ConfigError, ProjectLimits, ResolvedLimit, Tier},
};
pub use project_limit_controller_k8s_api::{Labels, Selector};
