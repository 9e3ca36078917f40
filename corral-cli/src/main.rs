use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(about = "Corral CLI - cluster administration tools")]
#[command(version)]
struct Cli {
    /// Control-plane API URL
    #[arg(
        long,
        global = true,
        default_value = "http://localhost:8000",
        env = "CORRAL_API_URL"
    )]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a node to the cluster
    AddNode {
        /// Unique ID for the node
        node_id: String,

        /// CPU capacity of the node
        #[arg(long = "cpu", default_value = "100")]
        cpu_capacity: u32,
    },

    /// Remove a node; its pods are rescheduled onto survivors
    RemoveNode {
        /// ID of the node to remove
        node_id: String,
    },

    /// Schedule a pod on the cluster
    SchedulePod {
        /// Unique ID for the pod
        pod_id: String,

        /// CPU request for the pod
        #[arg(long = "cpu", default_value = "10")]
        cpu_request: u32,
    },

    /// List all nodes with health and pod placement
    ListNodes,

    /// Show pods waiting for capacity
    PendingPods,

    /// Show the rescheduled-pods report (consumes it)
    RescheduledPods,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let base_url = cli.api_url.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::AddNode {
            node_id,
            cpu_capacity,
        } => {
            let response = client
                .post(format!("{}/add_node", base_url))
                .json(&serde_json::json!({
                    "node_id": node_id,
                    "cpu_capacity": cpu_capacity,
                }))
                .send()
                .await?;
            print_outcome(response).await?;
        }

        Commands::RemoveNode { node_id } => {
            let response = client
                .post(format!("{}/remove_node", base_url))
                .json(&serde_json::json!({ "node_id": node_id }))
                .send()
                .await?;
            print_outcome(response).await?;
        }

        Commands::SchedulePod {
            pod_id,
            cpu_request,
        } => {
            let response = client
                .post(format!("{}/schedule_pod", base_url))
                .json(&serde_json::json!({
                    "pod_id": pod_id,
                    "cpu_request": cpu_request,
                }))
                .send()
                .await?;
            print_outcome(response).await?;
        }

        Commands::ListNodes => {
            let response = client
                .get(format!("{}/list_nodes", base_url))
                .send()
                .await?;
            if !response.status().is_success() {
                println!("✗ Error: could not retrieve node list");
                std::process::exit(1);
            }
            print_node_tree(response.json().await?);
        }

        Commands::PendingPods => {
            let response = client
                .get(format!("{}/get_pending_pods", base_url))
                .send()
                .await?;
            let body: serde_json::Value = response.json().await?;
            print_pending(&body);
        }

        Commands::RescheduledPods => {
            let response = client
                .get(format!("{}/get_rescheduled_pods", base_url))
                .send()
                .await?;
            let body: serde_json::Value = response.json().await?;
            print_rescheduled(&body);
        }
    }

    Ok(())
}

/// Print the server's message or error with a glyph; exits non-zero on
/// any non-2xx status
async fn print_outcome(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();

    if status.is_success() {
        let message = body
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("ok");
        println!("✓ Success: {}", message);
        Ok(())
    } else {
        let error = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        println!("✗ Error: {}", error);
        std::process::exit(1);
    }
}

fn print_node_tree(nodes: serde_json::Value) {
    let Some(nodes) = nodes.as_object() else {
        println!("No nodes found in the cluster.");
        return;
    };
    if nodes.is_empty() {
        println!("No nodes found in the cluster.");
        return;
    }

    println!("\n=== Cluster Status ===");
    let mut ids: Vec<&String> = nodes.keys().collect();
    ids.sort();

    for node_id in ids {
        let info = &nodes[node_id];
        let health = info
            .get("health")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown");
        let glyph = if health == "Healthy" { "✓" } else { "✗" };

        let container_id = info
            .get("container_id")
            .and_then(|v| v.as_str())
            .unwrap_or("N/A");
        let container_short: String = container_id.chars().take(12).collect();

        let pods = info
            .get("pods")
            .and_then(|v| v.as_array())
            .map(|pods| {
                pods.iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        println!("\nNode: {} [{} {}]", node_id, glyph, health);
        println!("├── Container ID: {}", container_short);
        println!(
            "├── CPU Capacity: {}",
            info.get("cpu_capacity").and_then(|v| v.as_u64()).unwrap_or(0)
        );
        println!(
            "├── CPU Available: {}",
            info.get("cpu_available").and_then(|v| v.as_u64()).unwrap_or(0)
        );
        println!(
            "└── Pods: {}",
            if pods.is_empty() { "None" } else { pods.as_str() }
        );
    }
}

fn print_pending(body: &serde_json::Value) {
    let pending = body
        .get("pending_pods")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    if pending.is_empty() {
        println!("No pending pods.");
        return;
    }

    println!("Pending pods:");
    let mut ids: Vec<&String> = pending.keys().collect();
    ids.sort();
    for pod_id in ids {
        let cpu = pending[pod_id]
            .get("cpu_request")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        println!("  - {} (cpu: {})", pod_id, cpu);
    }
}

fn print_rescheduled(body: &serde_json::Value) {
    let report = body
        .get("rescheduled_pods")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    if report.is_empty() {
        println!("No rescheduled pods.");
        return;
    }

    println!("Rescheduled pods:");
    let mut ids: Vec<&String> = report.keys().collect();
    ids.sort();
    for pod_id in ids {
        let entry = &report[pod_id];
        let old_node = entry.get("old_node").and_then(|v| v.as_str()).unwrap_or("?");
        let new_node = entry.get("new_node").and_then(|v| v.as_str()).unwrap_or("-");
        let status = entry.get("status").and_then(|v| v.as_str()).unwrap_or("?");
        let glyph = if status == "rescheduled" || status == "already_rescheduled" {
            "✓"
        } else {
            "✗"
        };
        println!("  {} {}: {} -> {} [{}]", glyph, pod_id, old_node, new_node, status);
    }
}
