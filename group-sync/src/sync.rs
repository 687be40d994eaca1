use crate::config::GroupSyncConfig;
use crate::directory::{DirectoryApi, GoogleDirectoryClient, fetch_prefixed_groups};
use crate::error::{GroupSyncError, GroupSyncResult};
use crate::members::MemberFetcher;
use crate::pagination::PartialFetch;
use crate::reconcile::Reconciler;
use crate::registry::{
    RegistryApi, RegistryClient, fetch_all_groups, fetch_all_organizations, fetch_all_users
};
use crate::telemetry::RunTimer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Runs one full reconciliation: fresh fetch of both sides, then updates
/// and creates against the registry.
pub struct GroupSyncService {
    config: GroupSyncConfig,
    registry: Arc<dyn RegistryApi>,
    directory: Arc<dyn DirectoryApi>
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub organizations_fetched: u32,
    pub registry_groups_fetched: u32,
    pub users_fetched: u32,
    pub directory_groups_fetched: u32,
    pub directory_members_fetched: u32,
    pub groups_updated: u32,
    pub groups_renamed: u32,
    pub groups_created: u32,
    pub groups_skipped_empty: u32,
    pub groups_unmatched: u32
}

impl SyncReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn changes(&self) -> u32 {
        self.groups_updated + self.groups_created
    }
}

/// Races `fut` against cancellation of the run.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> GroupSyncResult<T>
where
    F: Future<Output = GroupSyncResult<T>>
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(GroupSyncError::Cancelled),
        result = fut => result
    }
}

impl GroupSyncService {
    pub fn new(
        config: GroupSyncConfig,
        registry: Arc<dyn RegistryApi>,
        directory: Arc<dyn DirectoryApi>
    ) -> Self {
        Self {
            config,
            registry,
            directory
        }
    }

    /// Logs in to the registry and loads the directory service account from
    /// the configuration.
    pub async fn connect(config: GroupSyncConfig) -> GroupSyncResult<Self> {
        config.validate()?;

        let registry = RegistryClient::connect(&config).await?;
        info!(base_url = %config.registry.base_url, "Authenticated against registry");

        let directory = GoogleDirectoryClient::from_config(&config)?;

        Ok(Self::new(config, Arc::new(registry), Arc::new(directory)))
    }

    #[instrument(skip_all, fields(dry_run = self.config.dry_run))]
    pub async fn sync_all(&self, cancel: &CancellationToken) -> GroupSyncResult<SyncReport> {
        let timer = RunTimer::new();
        match self.run(cancel).await {
            Ok(report) => {
                timer.finish("success");
                Ok(report)
            }
            Err(e) => {
                timer.finish(if matches!(e, GroupSyncError::Cancelled) {
                    "cancelled"
                } else {
                    "failure"
                });
                error!(error = %e, "Group sync failed");
                Err(e)
            }
        }
    }

    async fn run(&self, cancel: &CancellationToken) -> GroupSyncResult<SyncReport> {
        let mut report = SyncReport::new();
        report.dry_run = self.config.dry_run;
        info!("Starting group sync");

        let page_size = self.config.page_size;
        let max_pages = self.config.max_pages;
        let registry = self.registry.as_ref();
        let directory = self.directory.as_ref();

        let organizations = until_cancelled(cancel, async {
            fetch_all_organizations(registry, page_size, max_pages)
                .await
                .map_err(PartialFetch::into_error)
        })
        .await?;
        report.organizations_fetched = organizations.len() as u32;
        info!(count = organizations.len(), "Fetched organizations");

        let groups = until_cancelled(cancel, async {
            fetch_all_groups(registry, page_size, max_pages)
                .await
                .map_err(PartialFetch::into_error)
        })
        .await?;
        report.registry_groups_fetched = groups.len() as u32;
        info!(count = groups.len(), "Fetched groups");

        let users = until_cancelled(cancel, async {
            fetch_all_users(registry, page_size, max_pages)
                .await
                .map_err(PartialFetch::into_error)
        })
        .await?;
        report.users_fetched = users.len() as u32;
        info!(count = users.len(), "Fetched users");

        let directory_config = &self.config.directory;
        let directory_groups = until_cancelled(cancel, async {
            fetch_prefixed_groups(
                directory,
                &directory_config.domain,
                &directory_config.group_prefix,
                max_pages
            )
            .await
            .map_err(PartialFetch::into_error)
        })
        .await?;
        report.directory_groups_fetched = directory_groups.len() as u32;
        info!(
            count = directory_groups.len(),
            prefix = %directory_config.group_prefix,
            "Fetched gsuite groups"
        );

        let membership = MemberFetcher::new(self.directory.clone(), self.config.concurrency)
            .with_max_pages(max_pages)
            .fetch_all(directory_groups, cancel)
            .await?;
        report.directory_members_fetched = membership.member_count() as u32;

        Reconciler::new(self.registry.clone(), directory_config.group_prefix.clone())
            .with_dry_run(self.config.dry_run)
            .reconcile(&groups, &membership, &mut report, cancel)
            .await?;

        report.complete();
        info!(
            groups_updated = report.groups_updated,
            groups_renamed = report.groups_renamed,
            groups_created = report.groups_created,
            groups_skipped_empty = report.groups_skipped_empty,
            groups_unmatched = report.groups_unmatched,
            "Group sync completed"
        );

        Ok(report)
    }
}
