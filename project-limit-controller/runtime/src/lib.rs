#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use project_limit_controller_core as core;
pub use project_limit_controller_k8s_api as k8s;
pub use project_limit_controller_k8s_index as index;

mod admission;
mod args;
mod users;

pub use self::args::Args;

/// Serves project counts from the project index.
#[derive(Clone, Debug)]
struct ProjectCache(index::SharedIndex);

impl ProjectCache {
    pub fn new(index: index::SharedIndex) -> Self {
        Self(index)
    }
}

impl core::CountProjects for ProjectCache {
    fn projects_for_requester(&self, requester: &str) -> usize {
        self.0.read().projects_for_requester(requester)
    }
}
