use anyhow::Result;
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.kiosk.Rollcall1",
    default_service = "org.kiosk.Rollcall1",
    default_path = "/org/kiosk/Rollcall1"
)]
trait Rollcall {
    async fn start(&self, shift: &str) -> zbus::Result<()>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn snapshot(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start scanning for a session
    Start {
        /// Session/shift label (e.g., "Morning", "Afternoon", "All")
        shift: String,
    },
    /// Stop scanning
    Stop,
    /// Show daemon status
    Status,
    /// Show the current track snapshot
    Snapshot,
    /// Poll and print track snapshots until interrupted
    Watch {
        /// Poll interval in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session().await?;
    let proxy = RollcallProxy::new(&conn).await?;

    match cli.command {
        Commands::Start { shift } => {
            proxy.start(&shift).await?;
            println!("Scanning started for shift: {shift}");
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("Scanning stopped");
        }
        Commands::Status => {
            println!("{}", pretty(&proxy.status().await?));
        }
        Commands::Snapshot => {
            println!("{}", pretty(&proxy.snapshot().await?));
        }
        Commands::Watch { interval_ms } => {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                println!("{}", pretty(&proxy.snapshot().await?));
            }
        }
    }

    Ok(())
}

/// Re-indent a JSON payload for terminal output; passes malformed input
/// through untouched.
fn pretty(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}
