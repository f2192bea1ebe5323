use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil employee presence CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status: employee presence and camera counters
    Status,
    /// List live tracks for a camera
    Tracks {
        /// Camera id from the roster
        #[arg(short, long)]
        camera: i64,
    },
    /// Delete persisted event/alert history in an inclusive date range
    Prune {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: String,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: String,
    },
    /// Re-read face templates from the store
    ReloadTemplates,
}

#[zbus::proxy(
    interface = "org.freedesktop.Vigil1",
    default_service = "org.freedesktop.Vigil1",
    default_path = "/org/freedesktop/Vigil1"
)]
trait Vigil {
    async fn status(&self) -> zbus::Result<String>;
    async fn active_tracks(&self, camera_id: i64) -> zbus::Result<String>;
    async fn prune_history(&self, from: &str, to: &str) -> zbus::Result<u64>;
    async fn reload_templates(&self) -> zbus::Result<u32>;
}

/// Re-indent a JSON payload for terminal output.
fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::system()
        .await
        .context("connecting to system bus (is vigild running?)")?;
    let proxy = VigilProxy::new(&conn).await?;

    match cli.command {
        Commands::Status => {
            let status = proxy.status().await.context("querying status")?;
            println!("{}", pretty(&status));
        }
        Commands::Tracks { camera } => {
            let tracks = proxy
                .active_tracks(camera)
                .await
                .context("querying active tracks")?;
            println!("{}", pretty(&tracks));
        }
        Commands::Prune { from, to } => {
            let deleted = proxy
                .prune_history(&from, &to)
                .await
                .context("pruning history")?;
            println!("deleted {deleted} rows");
        }
        Commands::ReloadTemplates => {
            let count = proxy.reload_templates().await.context("reloading templates")?;
            println!("{count} templates loaded");
        }
    }

    Ok(())
}
