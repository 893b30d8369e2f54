// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! mystack-controller CLI
//!
//! Creates, deletes or inspects one user's stack on the Kubernetes cluster
//! selected by `KUBECONFIG` (or in-cluster configuration).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use mystack_controller::backend::KubeBackend;
use mystack_controller::cluster::{ClusterBuilder, CreateOptions};
use mystack_controller::config::Config;
use mystack_controller::stack::compile_config;

#[derive(Debug, Parser)]
#[command(name = "mystack-controller", version, about = "Manage per-user application stacks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the user's stack and wait for it to come up
    Create(StackArgs),
    /// Delete the user's stack
    Delete(StackArgs),
    /// Print the current status of the user's stack
    Status(StackArgs),
}

#[derive(Debug, clap::Args)]
struct StackArgs {
    /// Owner username
    username: String,
    /// Stack configuration file (YAML)
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mystack_controller=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        namespace_prefix = %config.namespace_prefix,
        rollback_on_failure = config.rollback_on_failure,
        kubeconfig = ?config.kubeconfig,
        "Configuration loaded"
    );

    let (command, args) = match &cli.command {
        Command::Create(args) => ("create", args),
        Command::Delete(args) => ("delete", args),
        Command::Status(args) => ("status", args),
    };

    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let stack = compile_config(&text)?;
    let cluster = ClusterBuilder::new()
        .namespace_prefix(config.namespace_prefix.clone())
        .build(&stack, &args.username)?;

    let backend = KubeBackend::from_config(&config).await?;
    info!(command, namespace = %cluster.namespace.name, "Connected to cluster");

    let result = match &cli.command {
        Command::Create(_) => {
            cluster
                .create_with(&backend, &CreateOptions::from_config(&config))
                .await
        }
        Command::Delete(_) => cluster.delete(&backend).await,
        Command::Status(_) => match cluster.status(&backend).await {
            Ok(status) => {
                info!(ready = status.is_ready(), "Status fetched");
                println!("{}", serde_json::to_string_pretty(&status)?);
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!(code = e.error_code(), error = %e, "{} failed", command);
        return Err(e.into());
    }

    info!(command, "Done");
    Ok(())
}
