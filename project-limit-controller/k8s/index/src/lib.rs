//! Project ownership index.
//!
//! Projects are backed by cluster-scoped `Namespace` resources annotated with the name of the user
//! that requested them. This crate maintains an in-memory index of those namespaces keyed by
//! requester so that admission can count a user's projects without querying the API server:
//!
//! ```text
//! [ Namespace ] --(openshift.io/requester)--> [ requester ] -> { project names }
//! ```
//!
//! The index is written by a single task that processes namespace watch events and may be read
//! concurrently by any number of admission requests. It mirrors the cluster's state as of the last
//! event it processed and may therefore lag behind the API server.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;
pub mod metrics;


pub use self::index::{Index, SharedIndex};
