use crate::{labels::Map, ObjectMeta};
use k8s_openapi::ClusterResourceScope;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// A `user.openshift.io/v1` User.
///
/// Only the metadata is consulted when admitting project requests; the labels on a user select
/// the limit tier that applies to them.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

impl User {
    pub fn labels(&self) -> Map {
        self.metadata.labels.clone().unwrap_or_default()
    }
}

impl kube::Resource for User {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "User".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "user.openshift.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "users".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Returns true if `username` names a service account, i.e.
/// `system:serviceaccount:<namespace>:<name>`.
///
/// Service accounts have no `User` resource.
pub fn is_service_account(username: &str) -> bool {
    match username.strip_prefix(SERVICE_ACCOUNT_PREFIX) {
        Some(rest) => match rest.split_once(':') {
            Some((ns, name)) => !ns.is_empty() && !name.is_empty() && !name.contains(':'),
            None => false,
        },
        None => false,
    }
}
