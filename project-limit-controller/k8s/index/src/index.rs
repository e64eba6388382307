use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kubert::index::{ClusterRemoved, IndexClusterResource};
use parking_lot::RwLock;
use project_limit_controller_k8s_api::{self as k8s, project, ResourceExt};
use std::{collections::hash_map::Entry, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, info_span, trace};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds project ownership. Owned and updated by a single task that processes namespace watch
/// events.
#[derive(Debug)]
pub struct Index {
    /// The requester of each counted project, by project name.
    projects: HashMap<String, String>,

    /// The names of the projects owned by each requester.
    by_requester: HashMap<String, HashSet<String>>,

    /// Set once the initial namespace listing has been indexed.
    synced: watch::Sender<bool>,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Returns the number of projects owned by `requester`.
    pub fn projects_for_requester(&self, requester: &str) -> usize {
        self.by_requester.get(requester).map_or(0, |names| names.len())
    }

    /// Returns the number of counted projects.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Returns the number of requesters that own at least one project.
    pub fn requesters(&self) -> usize {
        self.by_requester.len()
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Watches for the initial namespace listing to be indexed.
    pub fn synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    /// Records that `requester` owns the named project. Returns true if the index changed.
    fn insert(&mut self, name: String, requester: &str) -> bool {
        match self.projects.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get() == requester {
                    return false;
                }
                let prior = entry.insert(requester.to_string());
                debug!(%prior, "Requester changed");
                Self::forget(&mut self.by_requester, &prior, &name);
            }
            Entry::Vacant(entry) => {
                entry.insert(requester.to_string());
            }
        }

        self.by_requester
            .entry(requester.to_string())
            .or_default()
            .insert(name);
        true
    }

    /// Removes the named project from all counts. Returns true if the index changed.
    fn remove(&mut self, name: &str) -> bool {
        match self.projects.remove(name) {
            Some(requester) => {
                Self::forget(&mut self.by_requester, &requester, name);
                true
            }
            None => false,
        }
    }

    fn forget(by_requester: &mut HashMap<String, HashSet<String>>, requester: &str, name: &str) {
        if let Some(names) = by_requester.get_mut(requester) {
            names.remove(name);
            if names.is_empty() {
                by_requester.remove(requester);
            }
        }
    }
}

impl Default for Index {
    fn default() -> Self {
        Self {
            projects: HashMap::default(),
            by_requester: HashMap::default(),
            synced: watch::Sender::new(false),
        }
    }
}

impl IndexClusterResource<k8s::Namespace> for Index {
    fn apply(&mut self, ns: k8s::Namespace) {
        let name = ns.name_unchecked();
        let _span = info_span!("apply", %name).entered();

        // Namespaces without a requester are not projects that anyone owns, and terminating
        // namespaces no longer count against their owner.
        let requester = if project::is_terminating(&ns) {
            None
        } else {
            project::requester(&ns)
        };

        match requester {
            Some(requester) => {
                if self.insert(name, requester) {
                    debug!(%requester, count = self.projects_for_requester(requester), "Indexed");
                }
            }
            None => {
                if self.remove(&name) {
                    debug!("Unindexed");
                } else {
                    trace!("Ignored");
                }
            }
        }
    }

    fn delete(&mut self, name: String) {
        let _span = info_span!("delete", %name).entered();
        if self.remove(&name) {
            debug!("Deleted");
        }
    }

    fn reset(&mut self, nss: Vec<k8s::Namespace>, removed: ClusterRemoved) {
        let _span = info_span!("reset").entered();

        for name in removed.into_iter() {
            if self.remove(&name) {
                debug!(%name, "Removed defunct project");
            }
        }
        for ns in nss.into_iter() {
            self.apply(ns);
        }

        debug!(
            projects = self.projects.len(),
            requesters = self.by_requester.len(),
            "Reset"
        );
        self.synced.send_replace(true);
    }
}
