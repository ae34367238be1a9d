use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use craft_core::{validate, MinecraftServer, ResourceDescriptor, ServerKey};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "craftctl", version, about = "Minecraft servers on Kubernetes")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace for `status` (server files carry their own)
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a server file and print its resource descriptor
    Render {
        /// Server definition (YAML or JSON)
        file: String,
        /// Print the Kubernetes objects instead of the descriptor
        #[arg(long = "manifests", action = ArgAction::SetTrue)]
        manifests: bool,
    },
    /// Print the RCON startup commands for a radius and border size
    Commands {
        #[arg(long = "pregen-radius", allow_negative_numbers = true)]
        pregen_radius: Option<i32>,
        #[arg(long = "world-border", allow_negative_numbers = true)]
        world_border: Option<i32>,
    },
    /// Server-side apply the objects for a server file
    Apply {
        file: String,
        /// Ask the API server to validate without persisting
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Show server status through the metrics cache
    Status {
        /// Server name
        name: String,
        /// Poll every N seconds until interrupted
        #[arg(long = "watch")]
        watch: Option<u64>,
    },
}

/// Logs from `CRAFT_LOG` (default `info`); Prometheus exporter on
/// `CRAFT_METRICS_ADDR` when set. craftctl runs without metrics if the
/// exporter cannot start.
fn init_telemetry() {
    let filter = std::env::var("CRAFT_LOG")
        .ok()
        .and_then(|env| tracing_subscriber::EnvFilter::from_str(&env).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    let Ok(addr) = std::env::var("CRAFT_METRICS_ADDR") else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(()) => info!(%addr, "serving craftctl cache and apply metrics"),
            Err(e) => warn!(%addr, error = %e, "cannot serve craftctl metrics; cache and apply counters are dropped"),
        },
        Err(e) => warn!(%addr, error = %e, "CRAFT_METRICS_ADDR is not a socket address; craftctl metrics disabled"),
    }
}

/// Read, parse and validate a server definition. JSON parses as YAML.
fn load_server(path: &str) -> Result<MinecraftServer> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let server: MinecraftServer = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path))?;
    validate(&server).with_context(|| format!("validating {}", path))?;
    Ok(server)
}

fn print<T: serde::Serialize + std::fmt::Debug>(output: Output, v: &T) -> Result<()> {
    match output {
        Output::Human => println!("{:#?}", v),
        Output::Json => println!("{}", serde_json::to_string_pretty(v)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(v)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { file, manifests } => {
            let server = load_server(&file)?;
            let desc = ResourceDescriptor::from(&server);
            info!(server = %desc.key(), manifests, "render invoked");
            if manifests {
                let m = craft_kubehub::render(&desc);
                match cli.output {
                    Output::Json => println!("{}", serde_json::to_string_pretty(&m)?),
                    _ => print!("{}", m.to_yaml()?),
                }
            } else {
                print(cli.output, &desc)?;
            }
        }
        Commands::Commands { pregen_radius, world_border } => {
            println!("{}", craft_core::rcon_startup_commands(pregen_radius, world_border));
        }
        Commands::Apply { file, dry_run } => {
            let server = load_server(&file)?;
            let desc = ResourceDescriptor::from(&server);
            info!(server = %desc.key(), dry_run, "apply invoked");
            let client = craft_kubehub::get_kube_client().await?;
            match craft_kubehub::apply(client, &craft_kubehub::render(&desc), dry_run).await {
                Ok(outcome) => match cli.output {
                    Output::Human => {
                        for o in &outcome.objects {
                            let rv = o.resource_version.as_deref().unwrap_or("-");
                            println!("{} {}/{} • rv {}{}", o.kind, desc.namespace, o.name, rv, if dry_run { " (dry-run)" } else { "" });
                        }
                    }
                    _ => print(cli.output, &outcome)?,
                },
                Err(e) => {
                    error!(error = ?e, "apply failed");
                    return Err(e);
                }
            }
        }
        Commands::Status { name, watch } => {
            let client = craft_kubehub::get_kube_client().await?;
            let cache = craft_cache::server_metrics_cache::<craft_kubehub::ServerStatus>(Arc::new(craft_kubehub::KubeStatusLoader::new(client)));
            let key = ServerKey::new(cli.namespace.clone(), name);
            info!(server = %key, watch = ?watch, "status invoked");
            let Some(secs) = watch else {
                let status = cache.get(&key).await?;
                return print(cli.output, &status);
            };
            let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match cache.get(&key).await {
                            Ok(s) => match cli.output {
                                Output::Human => println!(
                                    "{} • {}/{} ready • {} • observed {}",
                                    key,
                                    s.ready_replicas,
                                    s.replicas,
                                    if s.is_running() { "running" } else { "not running" },
                                    s.observed_at
                                ),
                                _ => print(cli.output, &s)?,
                            },
                            Err(e) => eprintln!("status error: {}", e),
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("interrupted; stopping status watch");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}
