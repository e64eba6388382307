//! Projects are backed by cluster-scoped `Namespace` resources. The user that requested a project
//! is recorded in an annotation when the project is provisioned.

use crate::{Namespace, ResourceExt};

/// Identifies the user on whose behalf a project was created.
pub const REQUESTER_ANNOTATION: &str = "openshift.io/requester";

/// The API group that serves `ProjectRequest` resources.
pub const API_GROUP: &str = "project.openshift.io";

/// The resource name of project-creation requests.
pub const PROJECT_REQUESTS: &str = "projectrequests";

const TERMINATING_PHASE: &str = "Terminating";

/// Returns the requester that owns the project, if the project is annotated.
pub fn requester(ns: &Namespace) -> Option<&str> {
    ns.annotations()
        .get(REQUESTER_ANNOTATION)
        .map(String::as_str)
        .filter(|r| !r.is_empty())
}

/// Namespaces that are being torn down no longer count against their owner.
pub fn is_terminating(ns: &Namespace) -> bool {
    ns.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map_or(false, |phase| phase == TERMINATING_PHASE)
}
