//! Fetches the members of many directory groups with a bounded number of
//! requests in flight.
//!
//! A fetch counts against the limit until the dispatching task has joined
//! it, so at most `concurrency` member listings are outstanding at once and
//! dispatch blocks while the limit is reached. Finished fetches are only ever
//! consumed by the dispatching task, which owns the resulting
//! [`MembershipMap`].

use crate::config::DEFAULT_MAX_PAGES;
use crate::directory::{DirectoryApi, fetch_group_members};
use crate::error::{GroupSyncError, GroupSyncResult};
use crate::model::{DirectoryGroup, DirectoryMember, MembershipMap};
use crate::pagination::PartialFetch;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

type FetchOutcome = (DirectoryGroup, GroupSyncResult<Vec<DirectoryMember>>);

pub struct MemberFetcher {
    directory: Arc<dyn DirectoryApi>,
    concurrency: usize,
    max_pages: u32
}

impl MemberFetcher {
    pub fn new(directory: Arc<dyn DirectoryApi>, concurrency: usize) -> Self {
        Self {
            directory,
            concurrency: concurrency.max(1),
            max_pages: DEFAULT_MAX_PAGES
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetches every group's members.
    ///
    /// After the first failure no further groups are dispatched; fetches
    /// already running are awaited and their results dropped, then the first
    /// error is returned. Cancelling `cancel` aborts and awaits every running
    /// fetch before returning [`GroupSyncError::Cancelled`].
    #[instrument(skip_all, fields(groups = groups.len(), concurrency = self.concurrency))]
    pub async fn fetch_all(
        &self,
        groups: Vec<DirectoryGroup>,
        cancel: &CancellationToken
    ) -> GroupSyncResult<MembershipMap> {
        let mut tasks: JoinSet<FetchOutcome> = JoinSet::new();
        let mut collected = Collected::default();

        'dispatch: for group in groups {
            while tasks.len() >= self.concurrency {
                match next_outcome(&mut tasks, cancel).await {
                    None => return cancelled(tasks).await,
                    Some(Some(joined)) => collected.accept(joined),
                    Some(None) => break
                }
            }
            if collected.failed() {
                debug!("Member fetch failed, not dispatching remaining groups");
                break 'dispatch;
            }
            if cancel.is_cancelled() {
                return cancelled(tasks).await;
            }

            let directory = self.directory.clone();
            let max_pages = self.max_pages;
            tasks.spawn(async move {
                let result = fetch_group_members(directory.as_ref(), &group.email, max_pages)
                    .await
                    .map_err(PartialFetch::into_error);
                (group, result)
            });
        }

        loop {
            match next_outcome(&mut tasks, cancel).await {
                None => return cancelled(tasks).await,
                Some(Some(joined)) => collected.accept(joined),
                Some(None) => break
            }
        }

        collected.finish()
    }
}

/// Next finished fetch, `Some(None)` once nothing is outstanding, or `None`
/// when the run was cancelled first.
async fn next_outcome(
    tasks: &mut JoinSet<FetchOutcome>,
    cancel: &CancellationToken
) -> Option<Option<Result<FetchOutcome, JoinError>>> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        joined = tasks.join_next() => Some(joined)
    }
}

async fn cancelled(mut tasks: JoinSet<FetchOutcome>) -> GroupSyncResult<MembershipMap> {
    warn!(in_flight = tasks.len(), "Member fetch cancelled, aborting in-flight requests");
    tasks.shutdown().await;
    Err(GroupSyncError::Cancelled)
}

#[derive(Default)]
struct Collected {
    membership: MembershipMap,
    first_error: Option<GroupSyncError>
}

impl Collected {
    fn failed(&self) -> bool {
        self.first_error.is_some()
    }

    fn accept(&mut self, joined: Result<FetchOutcome, JoinError>) {
        match joined {
            Ok((group, Ok(members))) => {
                if self.failed() {
                    return;
                }
                debug!(group = %group.email, members = members.len(), "Fetched directory group members");
                self.membership.insert(group, members);
            }
            Ok((group, Err(e))) => {
                warn!(group = %group.email, error = %e, "Failed fetching directory group members");
                self.first_error.get_or_insert(e);
            }
            Err(e) => {
                error!(error = %e, "Member fetch task panicked");
                self.first_error
                    .get_or_insert(GroupSyncError::TaskError(e.to_string()));
            }
        }
    }

    fn finish(self) -> GroupSyncResult<MembershipMap> {
        if let Some(e) = self.first_error {
            return Err(e);
        }
        info!(
            groups = self.membership.len(),
            members = self.membership.member_count(),
            "Fetched directory group members"
        );
        Ok(self.membership)
    }
}
