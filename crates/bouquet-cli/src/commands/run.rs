//! Run command - start the shoot and addon instance controllers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bouquet_controller::{
    Controller, ControllerError, Informer, InstanceReconciler, Reconcile, ShootReconciler,
    wants_addons,
};
use bouquet_core::{AddonInstance, AddonManifest, Shoot};
use bouquet_engine::Engine;
use bouquet_kube::{ClusterApi, KubeCluster, KubeConnector, SharedRestMapper, TargetResolver};
use clap::Args;
use kube::Api;
use kube::runtime::watcher;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::error::{CliError, Result};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// YAML file with controller settings; flags take precedence
    #[arg(long, env = "BOUQUET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Kubeconfig of the garden cluster (defaults to in-cluster or ~/.kube/config)
    #[arg(long, env = "BOUQUET_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Workers per controller [default: 2]
    #[arg(long, env = "BOUQUET_WORKERS")]
    pub workers: Option<usize>,

    /// How often the local REST mapper is rebuilt [default: 60s]
    #[arg(long, env = "BOUQUET_MAPPER_REFRESH", value_parser = humantime::parse_duration)]
    pub mapper_refresh: Option<Duration>,

    /// Reuse a shoot's REST mapper for this long [default: 0s, disabled]
    #[arg(long, env = "BOUQUET_REMOTE_MAPPER_TTL", value_parser = humantime::parse_duration)]
    pub remote_mapper_ttl: Option<Duration>,

    /// Gardener project holding the seed credentials
    #[arg(long, env = "BOUQUET_PROJECT")]
    pub project: Option<String>,

    /// Treat undefined template variables as errors
    #[arg(long, env = "BOUQUET_STRICT_TEMPLATES")]
    pub strict_templates: bool,
}

/// Settings from the config file (if any) with flags applied on top
pub fn resolve_config(args: &RunArgs) -> Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };

    if let Some(kubeconfig) = &args.kubeconfig {
        config.kubeconfig = Some(kubeconfig.clone());
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(refresh) = args.mapper_refresh {
        config.mapper_refresh = refresh;
    }
    if let Some(ttl) = args.remote_mapper_ttl {
        config.remote_mapper_ttl = ttl;
    }
    if let Some(project) = &args.project {
        config.project = Some(project.clone());
    }
    config.strict_templates |= args.strict_templates;

    config.validate()?;
    Ok(config)
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    info!(
        workers = config.workers,
        mapper_refresh = %humantime::format_duration(config.mapper_refresh),
        remote_mapper_ttl = %humantime::format_duration(config.remote_mapper_ttl),
        project = config.project.as_deref().unwrap_or("-"),
        "starting bouquet"
    );

    let local = KubeCluster::connect(config.kubeconfig.as_deref())
        .await
        .map_err(|error| CliError::Connect { error })?;
    let client = local.client().clone();
    let local = Arc::new(local);

    let mapper = SharedRestMapper::new(
        local
            .discover()
            .await
            .map_err(|error| CliError::Connect { error })?,
    );
    info!(mappings = mapper.current().len(), "REST mapper ready");

    let shutdown = CancellationToken::new();
    let signals = spawn_signal_handler(shutdown.clone())?;
    let refresh = mapper.spawn_refresh(Arc::clone(&local), config.mapper_refresh, shutdown.clone());

    let resolver = TargetResolver::new(Arc::clone(&local), mapper, KubeConnector)
        .with_project(config.project.clone())
        .with_remote_mapper_ttl(config.remote_mapper_ttl);
    let engine = Engine::builder().strict(config.strict_templates).build();

    let manifests = Informer::new(
        Api::<AddonManifest>::all(client.clone()),
        watcher::Config::default(),
    );
    let instances = Informer::new(
        Api::<AddonInstance>::all(client.clone()),
        watcher::Config::default(),
    );
    let shoots = Informer::new(Api::<Shoot>::all(client), watcher::Config::default());

    let instance_controller = Controller::new(
        InstanceReconciler::new(manifests.store(), resolver).with_engine(engine),
        instances.store(),
    )
    .with_cache(manifests.store());
    let shoot_controller = Controller::new(
        ShootReconciler::new(Arc::clone(&local), manifests.store()),
        shoots.store(),
    )
    .with_cache(manifests.store());

    let instances = instances.subscribe(instance_controller.queue());
    let shoots = shoots.subscribe_filtered(shoot_controller.queue(), wants_addons);

    let informers = [
        tokio::spawn(instances.run(shutdown.clone())),
        tokio::spawn(manifests.run(shutdown.clone())),
        tokio::spawn(shoots.run(shutdown.clone())),
    ];

    let (instance_result, shoot_result) = tokio::join!(
        supervise(instance_controller, config.workers, shutdown.clone()),
        supervise(shoot_controller, config.workers, shutdown.clone()),
    );

    shutdown.cancel();
    for handle in informers {
        join_quietly(handle).await;
    }
    join_quietly(refresh).await;
    join_quietly(signals).await;

    instance_result.map_err(|error| CliError::Controller {
        controller: "addon-instance",
        error,
    })?;
    shoot_result.map_err(|error| CliError::Controller {
        controller: "shoot",
        error,
    })?;

    info!("shutdown complete");
    Ok(())
}

/// Run a controller; if it stops on its own, stop everything else too
async fn supervise<R: Reconcile>(
    controller: Controller<R>,
    workers: usize,
    shutdown: CancellationToken,
) -> std::result::Result<(), ControllerError> {
    match controller.run(workers, shutdown.clone()).await {
        Err(ControllerError::CacheSyncFailed { controller: name }) if shutdown.is_cancelled() => {
            info!(controller = %name, "stopped before caches synced");
            Ok(())
        }
        Err(e) => {
            shutdown.cancel();
            Err(e)
        }
        Ok(()) => Ok(()),
    }
}

async fn join_quietly(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!(error = %e, "background task failed");
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) -> Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate()).map_err(CliError::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(CliError::Signal)?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    }))
}
