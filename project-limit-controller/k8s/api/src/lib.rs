#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod project;
pub mod user;

pub use self::{
    labels::{Labels, Selector},
    user::User,
};
pub use k8s_openapi::api::core::v1::{Namespace, NamespaceSpec, NamespaceStatus};
pub use kube::{
    api::{Api, ObjectMeta, ResourceExt},
    Client, Error, Resource,
};
