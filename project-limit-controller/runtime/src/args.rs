use crate::{
    admission::{Admission, AdmissionMetrics},
    core::{ProjectLimits, ProjectRequestLimit},
    index, k8s,
    users::UserLabels,
    ProjectCache,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::path::{Path, PathBuf};
use tokio::time::Duration;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "project-limit",
    about = "Limits the number of projects each user may request"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "project_limit=info,warn",
        env = "PROJECT_LIMIT_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Path to a `ProjectRequestLimitConfig` document.
    #[clap(long, env = "PROJECT_LIMIT_CONTROLLER_CONFIG")]
    config: PathBuf,

    /// Bounds the time spent looking up a requesting user's labels.
    #[clap(long, default_value = "5000")]
    user_lookup_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            config,
            user_lookup_timeout_ms,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        // Configuration errors are fatal; no requests are served with a partial policy.
        let limits = load_limits(&config).await?;

        // Build the index that tracks the projects owned by each requester.
        let project_index = index::Index::shared();

        let mut prom = <Registry>::default();
        index::metrics::register(
            prom.sub_registry_with_prefix("project_index"),
            project_index.clone(),
        );
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        log_limits(&limits);

        // Spawn the namespace watch. The initial listing rebuilds the index and subsequent events
        // update it incrementally.
        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(project_index.clone(), namespaces)
                .instrument(info_span!("namespaces")),
        );

        let limits = ProjectRequestLimit::builder(limits)
            .with_user_labels(UserLabels::new(runtime.client()))
            .with_project_counts(ProjectCache::new(project_index.clone()))
            .with_lookup_timeout(Duration::from_millis(user_lookup_timeout_ms))
            .build()?;

        // Don't admit requests against a partially populated index.
        let mut synced = project_index.read().synced();
        info!("Waiting for projects to be indexed");
        synced
            .wait_for(|synced| *synced)
            .await
            .context("project index was dropped")?;
        info!(projects = project_index.read().len(), "Projects indexed");

        let admission = Admission::new(limits, admission_metrics);
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn load_limits(path: &Path) -> Result<ProjectLimits> {
    let doc = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    ProjectLimits::from_yaml(&doc).with_context(|| format!("invalid config {}", path.display()))
}

fn log_limits(limits: &ProjectLimits) {
    if limits.is_empty() {
        warn!("No project limits configured; all project requests will be admitted");
        return;
    }

    for (tier, t) in limits.iter().enumerate() {
        match t.max_projects {
            Some(max_projects) => info!(tier, selector = %t.selector, max_projects, "Limit"),
            None => info!(tier, selector = %t.selector, "Unlimited"),
        }
    }

    if !limits.has_catch_all() {
        warn!("Users not selected by any limit may request an unlimited number of projects");
    }
}
