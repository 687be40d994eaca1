use crate::error::{GroupSyncError, GroupSyncResult};
use crate::matcher::{display_name, has_registry_match, matching_directory_groups, new_registry_group};
use crate::model::{MembershipMap, RegistryGroup};
use crate::registry::RegistryApi;
use crate::sync::{SyncReport, until_cancelled};
use crate::telemetry::Telemetry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum GroupAction {
    /// Send the registry group back with the directory group's name.
    Update {
        group_id: String,
        group: RegistryGroup,
        previous_name: String,
        directory_email: String
    },
    /// Mirror an unmatched directory group that has members.
    Create {
        group: RegistryGroup,
        member_count: usize
    },
    /// Unmatched directory group without members; nothing is created.
    SkipEmpty { directory_email: String }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub actions: Vec<GroupAction>,
    /// Registry groups without any directory counterpart. They are left alone.
    pub unmatched_registry_groups: usize
}

impl ReconcilePlan {
    pub fn updates(&self) -> impl Iterator<Item = &GroupAction> {
        self.actions
            .iter()
            .filter(|a| matches!(a, GroupAction::Update { .. }))
    }

    pub fn creates(&self) -> impl Iterator<Item = &GroupAction> {
        self.actions
            .iter()
            .filter(|a| matches!(a, GroupAction::Create { .. }))
    }
}

/// Decides every registry call for one run without issuing any.
///
/// All updates come before all creates. A registry group matching several
/// directory groups gets one update per match in directory order, so the
/// last match determines the name the registry ends up with.
pub fn plan(registry_groups: &[RegistryGroup], membership: &MembershipMap, prefix: &str) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for registry_group in registry_groups {
        let mut matched = false;
        let mut current = registry_group.clone();

        for directory_group in matching_directory_groups(registry_group, membership) {
            matched = true;

            let Some(group_id) = registry_group.id.clone() else {
                warn!(
                    group_name = %registry_group.name,
                    "Matched registry group has no id, cannot update it"
                );
                continue;
            };

            let previous_name = current.name.clone();
            current.name = display_name(directory_group, prefix);
            plan.actions.push(GroupAction::Update {
                group_id,
                group: current.clone(),
                previous_name,
                directory_email: directory_group.email.clone()
            });
        }

        if !matched {
            debug!(group_name = %registry_group.name, "No directory group for registry group");
            plan.unmatched_registry_groups += 1;
        }
    }

    for entry in membership.iter() {
        if has_registry_match(&entry.group, registry_groups) {
            continue;
        }

        if entry.members.is_empty() {
            plan.actions.push(GroupAction::SkipEmpty {
                directory_email: entry.group.email.clone()
            });
        } else {
            plan.actions.push(GroupAction::Create {
                group: new_registry_group(&entry.group, prefix),
                member_count: entry.members.len()
            });
        }
    }

    plan
}

/// Applies reconciliation plans through the registry API.
pub struct Reconciler {
    registry: Arc<dyn RegistryApi>,
    group_prefix: String,
    dry_run: bool
}

impl Reconciler {
    pub fn new(registry: Arc<dyn RegistryApi>, group_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            group_prefix: group_prefix.into(),
            dry_run: false
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn reconcile(
        &self,
        registry_groups: &[RegistryGroup],
        membership: &MembershipMap,
        report: &mut SyncReport,
        cancel: &CancellationToken
    ) -> GroupSyncResult<()> {
        let plan = plan(registry_groups, membership, &self.group_prefix);
        info!(
            actions = plan.actions.len(),
            unmatched_registry_groups = plan.unmatched_registry_groups,
            dry_run = self.dry_run,
            "Planned group reconciliation"
        );
        self.apply(&plan, report, cancel).await
    }

    /// Issues the plan's calls in order and stops at the first failure.
    pub async fn apply(
        &self,
        plan: &ReconcilePlan,
        report: &mut SyncReport,
        cancel: &CancellationToken
    ) -> GroupSyncResult<()> {
        report.groups_unmatched += plan.unmatched_registry_groups as u32;

        for action in &plan.actions {
            if cancel.is_cancelled() {
                return Err(GroupSyncError::Cancelled);
            }

            match action {
                GroupAction::Update {
                    group_id,
                    group,
                    previous_name,
                    directory_email
                } => {
                    if !self.dry_run {
                        until_cancelled(cancel, self.registry.update_group(group_id, group)).await?;
                        Telemetry::record_group_updated();
                    }
                    report.groups_updated += 1;
                    if previous_name != &group.name {
                        report.groups_renamed += 1;
                    }
                    debug!(
                        group_id = %group_id,
                        group_name = %group.name,
                        directory_group = %directory_email,
                        "Updated registry group"
                    );
                }
                GroupAction::Create {
                    group,
                    member_count
                } => {
                    if !self.dry_run {
                        until_cancelled(cancel, self.registry.create_group(group)).await?;
                        Telemetry::record_group_created();
                    }
                    report.groups_created += 1;
                    info!(
                        group_name = %group.name,
                        members = member_count,
                        "Created registry group"
                    );
                }
                GroupAction::SkipEmpty { directory_email } => {
                    report.groups_skipped_empty += 1;
                    debug!(directory_group = %directory_email, "Skipping directory group without members");
                }
            }
        }

        Ok(())
    }
}
