use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::info;

use vantage_api::{DashboardApi, InProcApi};
use vantage_core::{CacheAction, ObjectKey, ResourceViewer};
use vantage_store::MemoryCache;
use vantage_watch::InformerCache;

#[derive(Parser, Debug)]
#[command(name = "vantagectl", version, about = "Vantage cluster dashboard CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    /// Path to a kubeconfig file (default: inferred from the environment)
    #[arg(long = "kubeconfig", global = true)]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List resource kinds that support list+watch
    Resources,
    /// List cached objects for a GVK key, e.g. "v1/Pod" or "apps/v1/Deployment"
    Ls {
        gvk: String,
    },
    /// Show events involving an object
    Events {
        gvk: String,
        name: String,
    },
    /// Build the dependency graph around an object
    Graph {
        gvk: String,
        name: String,
    },
    /// Mirror the namespace into a cache and print mutations until Ctrl-C
    Watch,
}

fn init_tracing() {
    let env = std::env::var("VANTAGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VANTAGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid VANTAGE_METRICS_ADDR; expected host:port");
        }
    }
}

fn key_for(namespace: &str, gvk_key: &str, name: &str) -> Result<ObjectKey> {
    let gvk = vantage_watch::parse_gvk_key(gvk_key)?;
    let api_version = if gvk.group.is_empty() {
        gvk.version
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    };
    Ok(ObjectKey::new(namespace, api_version, gvk.kind, name))
}

fn print_graph(viewer: &ResourceViewer) {
    println!("selected: {}", viewer.selected);
    for (id, node) in &viewer.objects {
        println!(
            "{} • {} {} • {}",
            id, node.kind, node.name, node.status
        );
    }
    for (from, edges) in &viewer.dag {
        for edge in edges {
            println!("{} -> {} ({})", from, edge.node, edge.edge);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let client = vantage_watch::client(cli.kubeconfig.as_deref()).await?;
    let (done_tx, done_rx) = watch::channel(false);

    match cli.command {
        Commands::Resources => {
            let kinds = vantage_watch::discover(client).await?;
            match cli.output {
                Output::Human => {
                    for kind in &kinds {
                        println!("{} • namespaced", kind.gvk_key());
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&kinds)?),
            }
        }
        Commands::Ls { gvk } => {
            let key = key_for(&cli.namespace, &gvk, "")?;
            let api = InProcApi::new(Arc::new(InformerCache::new(client, done_rx)));
            let objects = api.list(key).await?;
            match cli.output {
                Output::Human => {
                    for object in &objects {
                        let name = object
                            .pointer("/metadata/name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        println!("{}/{}", gvk, name);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&objects)?),
            }
            let _ = done_tx.send(true);
        }
        Commands::Events { gvk, name } => {
            let key = key_for(&cli.namespace, &gvk, &name)?;
            let api = InProcApi::new(Arc::new(InformerCache::new(client, done_rx)));
            let events = api.events(key).await?;
            match cli.output {
                Output::Human => {
                    for event in &events {
                        let field = |p: &str| {
                            event.pointer(p).and_then(|v| v.as_str()).unwrap_or("-").to_string()
                        };
                        println!(
                            "{} • {} • {}",
                            field("/lastTimestamp"),
                            field("/reason"),
                            field("/message")
                        );
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&events)?),
            }
            let _ = done_tx.send(true);
        }
        Commands::Graph { gvk, name } => {
            let key = key_for(&cli.namespace, &gvk, &name)?;
            let api = InProcApi::new(Arc::new(InformerCache::new(client, done_rx)));
            let viewer = api.resource_viewer(key).await?;
            match cli.output {
                Output::Human => print_graph(&viewer),
                Output::Json => println!("{}", serde_json::to_string_pretty(&viewer)?),
            }
            let _ = done_tx.send(true);
        }
        Commands::Watch => {
            let (notify_tx, mut notify_rx) = mpsc::channel(256);
            let cache = Arc::new(MemoryCache::with_notifications(notify_tx, done_rx.clone()));
            let pipeline =
                vantage_watch::start(client, &cli.namespace, cache, done_rx).await?;
            info!(ns = %cli.namespace, "watching; Ctrl-C to stop");
            loop {
                tokio::select! {
                    note = notify_rx.recv() => match note {
                        Some(note) => {
                            let sign = match note.action {
                                CacheAction::Store => '+',
                                CacheAction::Update => '~',
                                CacheAction::Delete => '-',
                            };
                            println!("{} {}", sign, note.key);
                        }
                        None => break,
                    },
                    _ = signal::ctrl_c() => break,
                }
            }
            let _ = done_tx.send(true);
            pipeline.stopped().await;
        }
    }

    Ok(())
}
