use crate::{
    core::{LookupError, LookupUserLabels},
    k8s::{self, Labels},
};
use tracing::trace;

/// Looks up users' labels from the API server.
#[derive(Clone)]
pub(crate) struct UserLabels {
    api: k8s::Api<k8s::User>,
}

impl UserLabels {
    pub fn new(client: k8s::Client) -> Self {
        Self {
            api: k8s::Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl LookupUserLabels for UserLabels {
    async fn user_labels(&self, username: &str) -> Result<Labels, LookupError> {
        let user = self
            .api
            .get_opt(username)
            .await
            .map_err(|error| LookupError::Failed {
                username: username.to_string(),
                source: error.into(),
            })?
            .ok_or_else(|| LookupError::NotFound(username.to_string()))?;
        trace!(?user.metadata.labels, %username, "Found user");
        Ok(Labels::from(user.metadata.labels))
    }
}
