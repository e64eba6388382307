use crate::limits::{ProjectLimits, ResolvedLimit};
use project_limit_controller_k8s_api::{user, Labels};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time;
use tracing::{debug, trace};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves the labels of a requesting user.
#[async_trait::async_trait]
pub trait LookupUserLabels: Send + Sync {
    async fn user_labels(&self, username: &str) -> Result<Labels, LookupError>;
}

/// Reports the number of projects a requester currently owns.
///
/// Implementations read from a local cache and must not block on I/O.
pub trait CountProjects: Send + Sync {
    fn projects_for_requester(&self, requester: &str) -> usize;
}

/// Decides whether a user may request another project.
///
/// The limits are immutable once the engine is built, so a single engine may be shared by any
/// number of concurrent admission requests.
#[derive(Clone)]
pub struct ProjectRequestLimit {
    limits: ProjectLimits,
    users: Arc<dyn LookupUserLabels>,
    projects: Arc<dyn CountProjects>,
    lookup_timeout: Duration,
}

/// Collects the collaborators required by `ProjectRequestLimit`.
pub struct Builder {
    limits: ProjectLimits,
    users: Option<Arc<dyn LookupUserLabels>>,
    projects: Option<Arc<dyn CountProjects>>,
    lookup_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(Denial),
}

/// Describes a request that would exceed the requester's limit.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("user {requester} cannot create more than {max_projects} project(s) (limit from tier {tier})")]
pub struct Denial {
    pub requester: String,

    /// The position of the tier that set the limit.
    pub tier: usize,
    pub max_projects: u64,

    /// The number of projects the requester owned when the request was evaluated.
    pub count: usize,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("a user label lookup must be configured")]
    MissingUserLabels,

    #[error("a project cache must be configured")]
    MissingProjectCounts,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("user {0} not found")]
    NotFound(String),

    #[error("failed to get user {username}: {source}")]
    Failed {
        username: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// A failure to evaluate a request. This is distinct from a denial: the requester's limit was
/// never determined.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("request has no requesting user")]
    MissingRequester,

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("timed out after {timeout:?} looking up user {username}")]
    LookupTimeout { username: String, timeout: Duration },
}

// === impl ProjectRequestLimit ===

impl ProjectRequestLimit {
    pub fn builder(limits: ProjectLimits) -> Builder {
        Builder {
            limits,
            users: None,
            projects: None,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn limits(&self) -> &ProjectLimits {
        &self.limits
    }

    /// Evaluates a project request on behalf of `requester`.
    pub async fn admit(&self, requester: &str) -> Result<Verdict, AdmitError> {
        if requester.is_empty() {
            return Err(AdmitError::MissingRequester);
        }

        if self.limits.is_empty() {
            trace!("No limits configured");
            return Ok(Verdict::Allow);
        }

        // Service accounts have no user resource and are not limited.
        if user::is_service_account(requester) {
            trace!(%requester, "Service accounts are unlimited");
            return Ok(Verdict::Allow);
        }

        let (tier, max_projects) = match self.max_projects_by_requester(requester).await? {
            ResolvedLimit::Limited { tier, max_projects } => (tier, max_projects),
            ResolvedLimit::Unlimited { tier } => {
                debug!(%requester, tier, "Unlimited");
                return Ok(Verdict::Allow);
            }
            ResolvedLimit::Unmatched => {
                debug!(%requester, "No tier selects requester");
                return Ok(Verdict::Allow);
            }
        };

        let count = self.projects.projects_for_requester(requester);
        if (count as u64) < max_projects {
            debug!(%requester, tier, max_projects, count, "Below limit");
            return Ok(Verdict::Allow);
        }

        Ok(Verdict::Deny(Denial {
            requester: requester.to_string(),
            tier,
            max_projects,
            count,
        }))
    }

    async fn max_projects_by_requester(&self, username: &str) -> Result<ResolvedLimit, AdmitError> {
        let labels = time::timeout(self.lookup_timeout, self.users.user_labels(username))
            .await
            .map_err(|_| AdmitError::LookupTimeout {
                username: username.to_string(),
                timeout: self.lookup_timeout,
            })??;
        trace!(?labels, %username);
        Ok(self.limits.resolve(&labels))
    }
}

// === impl Builder ===

impl Builder {
    pub fn with_user_labels(mut self, users: impl LookupUserLabels + 'static) -> Self {
        self.users = Some(Arc::new(users));
        self
    }

    pub fn with_project_counts(mut self, projects: impl CountProjects + 'static) -> Self {
        self.projects = Some(Arc::new(projects));
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Fails unless every collaborator has been provided.
    pub fn build(self) -> Result<ProjectRequestLimit, BuildError> {
        let Self {
            limits,
            users,
            projects,
            lookup_timeout,
        } = self;
        Ok(ProjectRequestLimit {
            limits,
            users: users.ok_or(BuildError::MissingUserLabels)?,
            projects: projects.ok_or(BuildError::MissingProjectCounts)?,
            lookup_timeout,
        })
    }
}

// === impl Verdict ===

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}
