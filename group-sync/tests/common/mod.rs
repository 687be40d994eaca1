use async_trait::async_trait;
use group_sync::config::{DirectoryConfig, RegistryConfig};
use group_sync::model::{
    DirectoryGroup, DirectoryMember, GroupIdentity, RegistryGroup, RegistryOrganization,
    RegistryUser
};
use group_sync::pagination::{Page, TokenPage};
use group_sync::registry::RegistryApi;
use group_sync::directory::DirectoryApi;
use group_sync::{GroupSyncConfig, GroupSyncError, GroupSyncResult};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const PREFIX: &str = "eng-";

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCall {
    Create(RegistryGroup),
    Update(String, RegistryGroup)
}

/// In-memory registry that applies creates and updates to its own state.
#[derive(Default)]
pub struct FakeRegistry {
    groups: Mutex<Vec<RegistryGroup>>,
    calls: Mutex<Vec<RegistryCall>>,
    fail_create: Mutex<Option<String>>,
    next_id: AtomicUsize
}

impl FakeRegistry {
    pub fn with_groups(groups: Vec<RegistryGroup>) -> Self {
        let registry = Self::default();
        *registry.groups.lock().unwrap() = groups;
        registry
    }

    pub fn failing_create(self, name: &str) -> Self {
        *self.fail_create.lock().unwrap() = Some(name.to_string());
        self
    }

    pub fn groups(&self) -> Vec<RegistryGroup> {
        self.groups.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn page_of<T: Clone>(items: &[T], page: u32, size: u32) -> Page<T> {
    let size = size.max(1) as usize;
    let total_pages = items.len().div_ceil(size).max(1) as u32;
    let start = (page.saturating_sub(1) as usize) * size;
    Page {
        items: items.iter().skip(start).take(size).cloned().collect(),
        total_pages
    }
}

#[async_trait]
impl RegistryApi for FakeRegistry {
    async fn list_groups(&self, page: u32, size: u32) -> GroupSyncResult<Page<RegistryGroup>> {
        Ok(page_of(&self.groups.lock().unwrap(), page, size))
    }

    async fn list_users(&self, page: u32, size: u32) -> GroupSyncResult<Page<RegistryUser>> {
        let users: Vec<RegistryUser> = Vec::new();
        Ok(page_of(&users, page, size))
    }

    async fn list_organizations(
        &self,
        page: u32,
        size: u32
    ) -> GroupSyncResult<Page<RegistryOrganization>> {
        let organizations: Vec<RegistryOrganization> = Vec::new();
        Ok(page_of(&organizations, page, size))
    }

    async fn create_group(&self, group: &RegistryGroup) -> GroupSyncResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(RegistryCall::Create(group.clone()));

        if self.fail_create.lock().unwrap().as_deref() == Some(group.name.as_str()) {
            return Err(GroupSyncError::ApiError {
                status: 500,
                url: "/api/groups".to_string(),
                body: "boom".to_string()
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut created = group.clone();
        created.id = Some(format!("created-{id}"));
        self.groups.lock().unwrap().push(created);
        Ok(())
    }

    async fn update_group(&self, group_id: &str, group: &RegistryGroup) -> GroupSyncResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(RegistryCall::Update(group_id.to_string(), group.clone()));

        let mut groups = self.groups.lock().unwrap();
        match groups.iter_mut().find(|g| g.id.as_deref() == Some(group_id)) {
            Some(existing) => {
                *existing = group.clone();
                existing.id = Some(group_id.to_string());
                Ok(())
            }
            None => Err(GroupSyncError::ApiError {
                status: 404,
                url: format!("/api/groups/{group_id}"),
                body: "not found".to_string()
            })
        }
    }
}

/// Directory with per-group members that records how many member listings
/// run at the same time.
#[derive(Default)]
pub struct FakeDirectory {
    groups: Vec<DirectoryGroup>,
    members: HashMap<String, Vec<DirectoryMember>>,
    failing: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    member_calls: Mutex<Vec<String>>
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, email: &str, name: &str, member_ids: &[&str]) -> Self {
        self.groups.push(DirectoryGroup::new(email, name));
        self.members.insert(
            email.to_string(),
            member_ids.iter().map(|id| DirectoryMember::new(*id)).collect()
        );
        self
    }

    pub fn failing(mut self, email: &str) -> Self {
        self.failing.insert(email.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn directory_groups(&self) -> Vec<DirectoryGroup> {
        self.groups.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn member_calls(&self) -> Vec<String> {
        self.member_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectoryApi for FakeDirectory {
    async fn list_groups(
        &self,
        _domain: &str,
        page_token: Option<&str>
    ) -> GroupSyncResult<TokenPage<DirectoryGroup>> {
        // Two groups per page so the token loop gets exercised.
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + 2).min(self.groups.len());
        Ok(TokenPage {
            items: self.groups[start..end].to_vec(),
            next_page_token: (end < self.groups.len()).then(|| end.to_string())
        })
    }

    async fn list_members(
        &self,
        group_email: &str,
        _page_token: Option<&str>
    ) -> GroupSyncResult<TokenPage<DirectoryMember>> {
        self.member_calls
            .lock()
            .unwrap()
            .push(group_email.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.contains(group_email) {
            return Err(GroupSyncError::ApiError {
                status: 500,
                url: format!("/admin/directory/v1/groups/{group_email}/members"),
                body: "backend error".to_string()
            });
        }

        Ok(TokenPage {
            items: self.members.get(group_email).cloned().unwrap_or_default(),
            next_page_token: None
        })
    }
}

pub fn gsuite_identity(email: &str) -> GroupIdentity {
    GroupIdentity {
        provider: "gsuite".to_string(),
        id: email.to_string(),
        name: String::new()
    }
}

pub fn registry_group(id: &str, name: &str, directory_email: &str) -> RegistryGroup {
    let mut group = RegistryGroup::new(name, vec![gsuite_identity(directory_email)]);
    group.id = Some(id.to_string());
    group
}

pub fn config(concurrency: usize) -> GroupSyncConfig {
    GroupSyncConfig {
        registry: RegistryConfig {
            base_url: "http://registry.invalid".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string()
        },
        directory: DirectoryConfig {
            domain: "example.com".to_string(),
            admin_email: "admin@example.com".to_string(),
            group_prefix: PREFIX.to_string(),
            credentials_path: None,
            base_url: "http://directory.invalid".to_string()
        },
        concurrency,
        ..GroupSyncConfig::default()
    }
}
