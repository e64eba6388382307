use crate::{
    core::{AdmitError, Denial, ProjectRequestLimit, Verdict},
    k8s::project,
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::{admission::Operation, DynamicObject};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Validates project requests against the requester's project limit.
#[derive(Clone)]
pub struct Admission {
    limits: ProjectRequestLimit,
    metrics: AdmissionMetrics,
}

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    requests: Family<VerdictLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct VerdictLabels {
    verdict: &'static str,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            let bytes = req.into_body().collect().await?.to_bytes();
            admission.review(&bytes).await
        })
    }
}

impl Admission {
    pub fn new(limits: ProjectRequestLimit, metrics: AdmissionMetrics) -> Self {
        Self { limits, metrics }
    }

    async fn review(self, body: &[u8]) -> Result<Response<Body>, Error> {
        let review: Review = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse request body");
                return json_response(AdmissionResponse::invalid(error).into_review());
            }
        };
        trace!(?review);

        let rsp = match review.try_into() {
            Ok(req) => {
                debug!(?req);
                self.admit(req).await
            }
            Err(error) => {
                warn!(%error, "Invalid admission request");
                AdmissionResponse::invalid(error)
            }
        };
        debug!(?rsp);
        json_response(rsp.into_review())
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        // Only project creation is limited. Everything else passes through untouched.
        if !is_project_request(&req) {
            trace!(resource = %req.resource.resource, operation = ?req.operation, "Skipping");
            self.metrics.observe("bypass");
            return rsp;
        }

        let requester = req.user_info.username.as_deref().unwrap_or_default();
        match self.limits.admit(requester).await {
            Ok(Verdict::Allow) => {
                debug!(%requester, "Allowed");
                self.metrics.observe("allow");
                rsp
            }
            Ok(Verdict::Deny(denial)) => {
                info!(
                    %requester,
                    tier = denial.tier,
                    max_projects = denial.max_projects,
                    count = denial.count,
                    "Denied"
                );
                self.metrics.observe("deny");
                forbidden(rsp, denial)
            }
            Err(error) => {
                warn!(%requester, %error, "Failed to evaluate project request");
                self.metrics.observe("error");
                internal_error(rsp, error)
            }
        }
    }
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<VerdictLabels, Counter>::default();
        reg.register(
            "requests",
            "Total number of admission requests by verdict",
            requests.clone(),
        );
        Self { requests }
    }

    fn observe(&self, verdict: &'static str) {
        self.requests.get_or_create(&VerdictLabels { verdict }).inc();
    }
}

fn is_project_request(req: &AdmissionRequest) -> bool {
    matches!(req.operation, Operation::Create)
        && (req.resource.group.is_empty() || req.resource.group == project::API_GROUP)
        && req.resource.resource == project::PROJECT_REQUESTS
}

/// Policy denials are reported as `Forbidden` so that clients can distinguish them from failures to
/// evaluate the request.
fn forbidden(rsp: AdmissionResponse, denial: Denial) -> AdmissionResponse {
    let mut rsp = rsp.deny(denial);
    rsp.result.code = http::StatusCode::FORBIDDEN.as_u16();
    rsp.result.reason = "Forbidden".to_string();
    rsp
}

fn internal_error(rsp: AdmissionResponse, error: AdmitError) -> AdmissionResponse {
    let mut rsp = rsp.deny(error);
    rsp.result.code = http::StatusCode::INTERNAL_SERVER_ERROR.as_u16();
    rsp.result.reason = "InternalError".to_string();
    rsp
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{CountProjects, LookupError, LookupUserLabels, ProjectLimits},
        k8s::Labels,
    };
    use std::{collections::HashMap, iter::FromIterator};

    struct Users(HashMap<&'static str, Labels>);

    #[async_trait::async_trait]
    impl LookupUserLabels for Users {
        async fn user_labels(&self, username: &str) -> Result<Labels, LookupError> {
            self.0
                .get(username)
                .cloned()
                .ok_or_else(|| LookupError::NotFound(username.to_string()))
        }
    }

    struct Projects(HashMap<&'static str, usize>);

    impl CountProjects for Projects {
        fn projects_for_requester(&self, requester: &str) -> usize {
            self.0.get(requester).copied().unwrap_or(0)
        }
    }

    fn mk_admission() -> (Admission, Registry) {
        let limits = ProjectLimits::from_yaml(
            r#"
apiVersion: v1
kind: ProjectRequestLimitConfig
limits:
- selector:
    platinum: "yes"
- selector:
    gold: "yes"
  maxProjects: 10
- maxProjects: 1
"#,
        )
        .expect("limits must parse");
        let engine = ProjectRequestLimit::builder(limits)
            .with_user_labels(Users(
                vec![
                    ("alice", Labels::from_iter(Some(("gold", "yes")))),
                    ("bob", Labels::from_iter(Some(("platinum", "yes")))),
                    ("carol", Labels::default()),
                ]
                .into_iter()
                .collect(),
            ))
            .with_project_counts(Projects(
                vec![("alice", 10), ("bob", 1000)].into_iter().collect(),
            ))
            .build()
            .expect("engine must build");
        let mut prom = Registry::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        (Admission::new(engine, metrics), prom)
    }

    fn mk_request(
        group: &str,
        resource: &str,
        operation: &str,
        username: Option<&str>,
    ) -> AdmissionRequest {
        let review: Review = serde_json::from_value(serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "4264aaf2-ee5e-4a3e-8e7e-7b3b5e5b7e7e",
                "kind": { "group": group, "version": "v1", "kind": "ProjectRequest" },
                "resource": { "group": group, "version": "v1", "resource": resource },
                "name": "my-project",
                "operation": operation,
                "userInfo": match username {
                    Some(name) => serde_json::json!({ "username": name }),
                    None => serde_json::json!({}),
                },
                "object": {
                    "apiVersion": "project.openshift.io/v1",
                    "kind": "ProjectRequest",
                    "metadata": { "name": "my-project" },
                },
                "dryRun": false,
            },
        }))
        .expect("review must parse");
        review.try_into().expect("review must have a request")
    }

    fn metric(prom: &Registry, verdict: &str) -> bool {
        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, prom).expect("metrics must encode");
        text.lines()
            .any(|l| l == format!("admission_requests_total{{verdict=\"{verdict}\"}} 1"))
    }

    #[tokio::test]
    async fn allows_below_limit() {
        let (admission, prom) = mk_admission();
        let rsp = admission
            .admit(mk_request(
                project::API_GROUP,
                project::PROJECT_REQUESTS,
                "CREATE",
                Some("carol"),
            ))
            .await;
        assert!(rsp.allowed);
        assert!(metric(&prom, "allow"));
    }

    #[tokio::test]
    async fn allows_unlimited_tier() {
        let (admission, _) = mk_admission();
        let rsp = admission
            .admit(mk_request("", project::PROJECT_REQUESTS, "CREATE", Some("bob")))
            .await;
        assert!(rsp.allowed);
    }

    #[tokio::test]
    async fn forbids_at_limit() {
        let (admission, prom) = mk_admission();
        let rsp = admission
            .admit(mk_request(
                project::API_GROUP,
                project::PROJECT_REQUESTS,
                "CREATE",
                Some("alice"),
            ))
            .await;
        assert!(!rsp.allowed);
        assert_eq!(rsp.result.code, 403);
        assert_eq!(rsp.result.reason, "Forbidden");
        assert_eq!(
            rsp.result.message,
            "user alice cannot create more than 10 project(s) (limit from tier 1)"
        );
        assert!(metric(&prom, "deny"));
    }

    #[tokio::test]
    async fn lookup_failures_are_internal_errors() {
        let (admission, prom) = mk_admission();
        let rsp = admission
            .admit(mk_request(
                project::API_GROUP,
                project::PROJECT_REQUESTS,
                "CREATE",
                Some("mallory"),
            ))
            .await;
        assert!(!rsp.allowed);
        assert_eq!(rsp.result.code, 500);
        assert_eq!(rsp.result.reason, "InternalError");
        assert_eq!(rsp.result.message, "user mallory not found");
        assert!(metric(&prom, "error"));
    }

    #[tokio::test]
    async fn missing_username_is_an_internal_error() {
        let (admission, _) = mk_admission();
        let rsp = admission
            .admit(mk_request(
                project::API_GROUP,
                project::PROJECT_REQUESTS,
                "CREATE",
                None,
            ))
            .await;
        assert!(!rsp.allowed);
        assert_eq!(rsp.result.code, 500);
    }

    #[tokio::test]
    async fn bypasses_other_requests() {
        let (admission, prom) = mk_admission();
        for (group, resource, operation) in [
            (project::API_GROUP, project::PROJECT_REQUESTS, "DELETE"),
            (project::API_GROUP, "projects", "CREATE"),
            ("", "namespaces", "CREATE"),
            ("apps", "deployments", "UPDATE"),
        ] {
            let rsp = admission
                .clone()
                .admit(mk_request(group, resource, operation, Some("alice")))
                .await;
            assert!(rsp.allowed, "{group}/{resource} {operation}");
        }
        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &prom).unwrap();
        assert!(text.contains("admission_requests_total{verdict=\"bypass\"} 4"), "{text}");
    }

    #[tokio::test]
    async fn rejects_unparseable_reviews() {
        let (admission, _) = mk_admission();
        let rsp = admission.review(b"not json").await.expect("must respond");
        assert_eq!(rsp.status(), http::StatusCode::OK);

        let body = rsp.into_body().collect().await.unwrap().to_bytes();
        let review: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(review["response"]["allowed"], false);
    }
}
