//! Sync command - one directory to registry group reconciliation
//!
//! Renames registry groups linked to a prefixed gsuite group and creates
//! registry groups for unlinked gsuite groups that have members. Registry
//! groups whose gsuite group disappeared are left untouched.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use clap::builder::BoolishValueParser;
use colored::Colorize;
use group_sync::config::{DEFAULT_DIRECTORY_BASE_URL, DirectoryConfig, RegistryConfig};
use group_sync::{GroupSyncConfig, GroupSyncService, SyncReport};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::output;

#[derive(Args)]
pub struct SyncArgs {
    /// The base url of the CI API to communicate with
    #[arg(long, env = "API_BASE_URL")]
    pub api_base_url: String,

    /// The id of the client as configured in the CI API
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: String,

    /// The secret of the client as configured in the CI API
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// The domain used by gsuite
    #[arg(long, env = "GSUITE_DOMAIN")]
    pub gsuite_domain: String,

    /// Gsuite admin the service account impersonates
    #[arg(long, env = "GSUITE_ADMIN_EMAIL")]
    pub gsuite_admin_email: String,

    /// Only gsuite groups starting with this prefix are synced
    #[arg(long, env = "GSUITE_GROUP_PREFIX")]
    pub gsuite_group_prefix: String,

    /// Base url of the gsuite Admin SDK
    #[arg(long, env = "GSUITE_API_BASE_URL", default_value = DEFAULT_DIRECTORY_BASE_URL)]
    pub directory_base_url: String,

    /// Service account key file with domain-wide delegation
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Maximum number of gsuite member listings in flight
    #[arg(long, env = "SYNC_CONCURRENCY", default_value_t = 10)]
    pub concurrency: usize,

    /// Compute changes without writing to the registry
    #[arg(long, env = "SYNC_DRY_RUN", value_parser = BoolishValueParser::new())]
    pub dry_run: bool,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn to_config(&self) -> GroupSyncConfig {
        GroupSyncConfig {
            registry: RegistryConfig {
                base_url: self.api_base_url.clone(),
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
            },
            directory: DirectoryConfig {
                domain: self.gsuite_domain.clone(),
                admin_email: self.gsuite_admin_email.clone(),
                group_prefix: self.gsuite_group_prefix.clone(),
                credentials_path: self.credentials.clone(),
                base_url: self.directory_base_url.clone(),
            },
            concurrency: self.concurrency,
            dry_run: self.dry_run,
            ..GroupSyncConfig::default()
        }
    }
}

pub async fn run(args: SyncArgs) -> Result<()> {
    let config = args.to_config();
    config.validate().context("Invalid sync configuration")?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let service = GroupSyncService::connect(config)
        .await
        .context("Failed connecting to the registry and gsuite")?;
    let report = service
        .sync_all(&cancel)
        .await
        .context("Group sync failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.dry_run {
        output::header("Group Sync (dry run)");
    } else {
        output::header("Group Sync");
    }
    println!();

    output::subheader("Fetched");
    println!("  {} {}", "Organizations:".dimmed(), report.organizations_fetched);
    println!("  {} {}", "Registry groups:".dimmed(), report.registry_groups_fetched);
    println!("  {} {}", "Users:".dimmed(), report.users_fetched);
    println!("  {} {}", "Gsuite groups:".dimmed(), report.directory_groups_fetched);
    println!("  {} {}", "Gsuite members:".dimmed(), report.directory_members_fetched);
    println!();

    output::subheader("Changes");
    println!(
        "  {} {} ({} renamed)",
        "Updated:".dimmed(),
        report.groups_updated.to_string().cyan(),
        report.groups_renamed
    );
    println!("  {} {}", "Created:".dimmed(), report.groups_created.to_string().green());
    println!(
        "  {} {}",
        "Skipped (no members):".dimmed(),
        report.groups_skipped_empty.to_string().yellow()
    );
    println!(
        "  {} {}",
        "Without gsuite group:".dimmed(),
        report.groups_unmatched
    );
    println!();

    if report.dry_run && report.changes() > 0 {
        output::hint("Remove --dry-run to apply changes");
    } else if report.changes() == 0 {
        output::success("Registry already in sync");
    } else {
        output::success("Sync complete");
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, cancelling sync");
        },
        () = terminate => {
            tracing::info!("Received terminate signal, cancelling sync");
        },
    }

    cancel.cancel();
}
