//! Equivalence between registry groups and directory groups.
//!
//! A registry group mirrors a directory group when it carries an identity
//! with the directory provider tag and the directory group's email as id.
//! Nothing prevents two registry groups from claiming the same email, or one
//! registry group from claiming several; callers act on every match.

use crate::model::{DirectoryGroup, GroupIdentity, MembershipMap, RegistryGroup};

/// Provider tag identifying directory-backed identities on registry groups.
pub const DIRECTORY_PROVIDER: &str = "gsuite";

pub fn matches(registry_group: &RegistryGroup, directory_group: &DirectoryGroup) -> bool {
    registry_group
        .identities
        .iter()
        .any(|i| i.provider == DIRECTORY_PROVIDER && i.id == directory_group.email)
}

/// Directory groups of `membership` that `registry_group` mirrors, in map order.
pub fn matching_directory_groups<'a>(
    registry_group: &'a RegistryGroup,
    membership: &'a MembershipMap
) -> impl Iterator<Item = &'a DirectoryGroup> + 'a {
    membership
        .groups()
        .filter(move |directory_group| matches(registry_group, directory_group))
}

pub fn has_registry_match(directory_group: &DirectoryGroup, registry_groups: &[RegistryGroup]) -> bool {
    registry_groups.iter().any(|g| matches(g, directory_group))
}

/// Registry display name for a directory group: its name without the prefix.
pub fn display_name(directory_group: &DirectoryGroup, prefix: &str) -> String {
    directory_group
        .name
        .strip_prefix(prefix)
        .unwrap_or(&directory_group.name)
        .to_string()
}

/// The registry group to create for an unmatched directory group.
pub fn new_registry_group(directory_group: &DirectoryGroup, prefix: &str) -> RegistryGroup {
    RegistryGroup::new(
        display_name(directory_group, prefix),
        vec![GroupIdentity {
            provider: DIRECTORY_PROVIDER.to_string(),
            id: directory_group.email.clone(),
            name: directory_group.name.clone()
        }]
    )
}
