use std::process::ExitCode;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use scandium_core::model::{Model, ModelConfig};
use scandium_core::reconcile;
use scandium_hub::breaker::BreakerConfig;
use scandium_hub::{jobs, Hub, HubConfig};
use tokio::sync::watch;
use url::Url;

mod hubsync;
pub mod server;

#[derive(Clone)]
pub struct AppState {
    pub model: Model,
    pub hub: Hub,
}

#[derive(clap::Args, Debug)]
#[command(about = "Run the scan coordinator", args_conflicts_with_subcommands = true)]
pub struct Run {
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(short = 'p', long = "port", default_value_t = 8080)]
    pub port: u16,

    /// Maximum number of layer scans in flight at once, from dispatch to
    /// the scan client through hub-side processing.
    #[arg(long, env = "SCANDIUM_CONCURRENT_SCAN_LIMIT", default_value_t = 2)]
    pub concurrent_scan_limit: usize,

    #[arg(long, env = "SCANDIUM_HUB_URL")]
    pub hub_url: Url,

    #[arg(long, env = "SCANDIUM_HUB_USER", default_value = "sysadmin")]
    pub hub_user: String,

    #[arg(long, default_value = "30s")]
    pub hub_login_interval: humantime::Duration,

    /// How often the hub's code locations are re-listed into the cache.
    #[arg(long, default_value = "2m")]
    pub hub_refresh_interval: humantime::Duration,

    /// How often in-progress scans are polled for completion.
    #[arg(long, default_value = "20s")]
    pub hub_completion_interval: humantime::Duration,

    /// How often the hub check queue is drained.
    #[arg(long, default_value = "10s")]
    pub hub_check_interval: humantime::Duration,

    /// How often one complete layer's results are re-fetched from the hub.
    #[arg(long, default_value = "5m")]
    pub results_refresh_interval: humantime::Duration,
}

impl Run {
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        // environment only; a flag would leak the password into process
        // listings
        let hub_password = std::env::var("SCANDIUM_HUB_PASSWORD")
            .context("SCANDIUM_HUB_PASSWORD must be set")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (model, model_task) = Model::spawn(
            ModelConfig::new(self.concurrent_scan_limit),
            shutdown_rx.clone(),
        );

        let (hub, completions) = Hub::new(HubConfig {
            base_url: self.hub_url,
            user: self.hub_user,
            password: hub_password,
            login_interval: self.hub_login_interval.into(),
            refresh_interval: self.hub_refresh_interval.into(),
            completion_interval: self.hub_completion_interval.into(),
            breaker: BreakerConfig::default(),
        })?;

        let mut tasks = jobs::spawn(hub.clone(), shutdown_rx.clone());
        tasks.push(tokio::spawn(reconcile::run(model.clone(), completions)));
        tasks.push(tokio::spawn(hubsync::forward_availability(
            hub.availability(),
            model.clone(),
        )));
        tasks.push(tokio::spawn(hubsync::hub_check_loop(
            model.clone(),
            hub.clone(),
            self.hub_check_interval.into(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(hubsync::results_refresh_loop(
            model.clone(),
            hub.clone(),
            self.results_refresh_interval.into(),
            shutdown_rx,
        )));
        tasks.push(model_task);

        let state = web::Data::new(AppState { model, hub });

        log::info!("listening on {}:{}", self.bind, self.port);
        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .configure(server::config)
        })
        .bind((self.bind.as_str(), self.port))?
        .run()
        .await?;

        // server is gone; stop the jobs and the model loop
        let _ = shutdown_tx.send(true);
        for task in tasks {
            let _ = task.await;
        }

        Ok(ExitCode::SUCCESS)
    }
}
