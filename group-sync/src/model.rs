use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Links a registry group to a group in an external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupIdentity {
    pub provider: String,
    pub id: String,
    #[serde(default)]
    pub name: String
}

/// A group as stored by the registry.
///
/// Fields the sync does not own are kept in `extra` so an update sends them
/// back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub identities: Vec<GroupIdentity>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>
}

impl RegistryGroup {
    pub fn new(name: impl Into<String>, identities: Vec<GroupIdentity>) -> Self {
        Self {
            id: None,
            name: name.into(),
            identities,
            extra: serde_json::Map::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub identities: Vec<GroupIdentity>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryOrganization {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
    pub total_pages: u32,
    #[serde(default)]
    pub total_items: u32
}

/// Envelope of every registry list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    pub pagination: Pagination
}

/// A directory group; `email` is its stable external id and `name` still
/// carries the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryGroup {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Reported as a decimal string by the Admin SDK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_members_count: Option<String>
}

impl DirectoryGroup {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            id: None,
            description: None,
            direct_members_count: None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMember {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>
}

impl DirectoryMember {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            role: None,
            kind: None,
            status: None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembers {
    pub group: DirectoryGroup,
    pub members: Vec<DirectoryMember>
}

/// Directory groups with their members, keyed by group email.
///
/// Iteration follows key order so the reconciliation order does not depend on
/// which member fetch finished first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipMap {
    entries: BTreeMap<String, GroupMembers>
}

impl MembershipMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: DirectoryGroup, members: Vec<DirectoryMember>) {
        self.entries
            .insert(group.email.clone(), GroupMembers { group, members });
    }

    pub fn get(&self, email: &str) -> Option<&GroupMembers> {
        self.entries.get(email)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.entries.values().map(|e| e.members.len()).sum()
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, GroupMembers> {
        self.entries.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &DirectoryGroup> {
        self.entries.values().map(|e| &e.group)
    }
}

impl FromIterator<(DirectoryGroup, Vec<DirectoryMember>)> for MembershipMap {
    fn from_iter<I: IntoIterator<Item = (DirectoryGroup, Vec<DirectoryMember>)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (group, members) in iter {
            map.insert(group, members);
        }
        map
    }
}
