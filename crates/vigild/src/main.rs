use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

mod alerts;
mod config;
mod dbus_interface;
mod pipeline;
mod presence;
mod store;

use config::Config;
use dbus_interface::VigilService;
use pipeline::{spawn_pipeline, Gallery, PipelineConfig, TrackBoard};
use presence::{spawn_presence_actor, PresenceBoard, PresenceConfig};
use store::{spawn_store_worker, Store};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    // The only fatal failure point: configuration.
    let config = Config::load().context("loading configuration")?;

    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;

    let employees = store.load_employees().await.context("loading employee roster")?;
    store.ensure_presence_rows().await.context("seeding presence rows")?;
    let templates = store.load_templates().await.context("loading face templates")?;
    tracing::info!(
        employees = employees.len(),
        templates = templates.len(),
        cameras = config.cameras.len(),
        "roster loaded"
    );

    let gallery: Gallery = Arc::new(RwLock::new(templates));
    let tracks: TrackBoard = Arc::new(RwLock::new(HashMap::new()));

    let (writer, store_join) = spawn_store_worker(store.clone(), config.store_queue_depth);

    let board = PresenceBoard::new(
        PresenceConfig {
            absence_timeout: chrono::Duration::seconds(config.absence_timeout_secs as i64),
            alert_after: chrono::Duration::seconds(config.absence_alert_secs as i64),
            event_interval: chrono::Duration::seconds(config.event_interval_secs as i64),
        },
        &employees,
    );
    let (presence, presence_join) = spawn_presence_actor(
        board,
        writer.clone(),
        std::time::Duration::from_secs(config.sweep_interval_secs.max(1)),
    );

    let mut pipelines = HashMap::new();
    let mut pipeline_joins = Vec::new();
    for camera in &config.cameras {
        let (handle, join) = spawn_pipeline(
            camera.clone(),
            PipelineConfig {
                quality: vigil_core::QualityGate::new(config.quality.clone()),
                tracker: config.tracker.clone(),
                similarity_threshold: config.similarity_threshold,
                queue_depth: config.frame_queue_depth,
            },
            Arc::clone(&gallery),
            presence.clone(),
            Arc::clone(&tracks),
        );
        pipelines.insert(camera.id, handle);
        pipeline_joins.push(join);
    }

    let service = VigilService {
        pipelines: pipelines.clone(),
        presence: presence.clone(),
        store,
        tracks,
        gallery,
        started_at: Utc::now(),
    };

    let _conn = zbus::connection::Builder::system()
        .context("connecting to system bus")?
        .name("org.freedesktop.Vigil1")
        .context("claiming bus name")?
        .serve_at("/org/freedesktop/Vigil1", service)
        .context("registering object")?
        .build()
        .await
        .context("starting D-Bus service")?;

    tracing::info!("vigild ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("vigild shutting down");

    // Drop the bus connection first: the service owns handle clones
    // that would otherwise keep the actor and worker alive.
    drop(_conn);

    // Retire every camera's tracks deterministically, then let the
    // presence actor and store worker drain.
    for pipeline in pipelines.values() {
        pipeline.stop();
    }
    for join in pipeline_joins {
        let _ = join.await;
    }
    drop(presence);
    let _ = presence_join.await;
    drop(writer);
    let _ = store_join.await;

    tracing::info!("vigild stopped");
    Ok(())
}
