//! Interconnect controller binary

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::info;

use interconnect_common::telemetry::{init_telemetry, TelemetryConfig};
use interconnect_controller::{Config, Controller, KubeConfigMapClient};
use interconnect_router::RouterConfig;
use interconnect_secrets::{
    watch_secrets, Callback, KubeSecretUpdater, ProfilesWatcher, SecretSync, SecretsCache,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The kube client negotiates TLS through rustls; aws-lc-rs is the only
    // provider we ship.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let config = Arc::new(Config::parse());

    init_telemetry(TelemetryConfig {
        service_name: "interconnect-controller".to_string(),
        format: config.log_format(),
        ..Default::default()
    })?;

    let client = Client::try_default().await?;
    let stop = CancellationToken::new();

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &config.namespace);
    let watch = watch_secrets(secrets.clone(), config.watcher_config(), stop.clone());
    watch.cache.ready().await?;
    info!(namespace = %config.namespace, "Secret cache ready");
    let cache: Arc<dyn SecretsCache> = Arc::new(watch.cache.clone());

    let tracker = ProfilesWatcher::new(
        &config.namespace,
        cache.clone(),
        Arc::new(KubeSecretUpdater::new(secrets)),
        config.clone(),
        stop.clone(),
    );
    let on_update: Callback = Box::new(|profile: &str| {
        info!(profile = %profile, "SslProfile material updated, router reload required");
    });
    let sync = Arc::new(SecretSync::new(cache, Some(on_update), stop.clone()));
    let access = config.router_access().desired_config(
        &config.target_groups,
        &config.profile_path,
        &config.router_options(),
    );

    let mut initial = RouterConfig::initial(
        &config.router_id,
        &config.site_id,
        &config.site_version,
        config.edge,
        config.hello_max_age,
    );
    initial.add_health_and_metrics_listener(config.health_port);

    let config_maps: Api<ConfigMap> = Api::namespaced(client, &config.namespace);
    let mut controller = Controller::new(
        &config.config_map,
        Arc::new(KubeConfigMapClient::new(config_maps)),
        initial,
        tracker,
        sync,
        access,
    );
    controller.start().await?;

    let shutdown = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        shutdown.cancel();
    });

    controller.run(watch.events, stop).await;
    watch.task.await?;
    Ok(())
}
