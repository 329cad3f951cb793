//! Reverse index from package to the groups containing it

use curfew_api::GroupLimit;
use curfew_util::{GroupId, PackageName};
use std::collections::HashMap;

/// Immutable package -> groups map, built once per membership change and
/// replaced wholesale
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupIndex {
    by_package: HashMap<PackageName, Vec<GroupId>>,
}

impl GroupIndex {
    pub fn build(groups: &[GroupLimit]) -> Self {
        let mut by_package: HashMap<PackageName, Vec<GroupId>> = HashMap::new();
        for group in groups {
            for member in &group.members {
                by_package
                    .entry(member.clone())
                    .or_default()
                    .push(group.id.clone());
            }
        }
        Self { by_package }
    }

    /// Groups containing `package`, in configuration order
    pub fn groups_of(&self, package: &str) -> &[GroupId] {
        self.by_package
            .get(package)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn packages(&self) -> impl Iterator<Item = &PackageName> {
        self.by_package.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, members: &[&str]) -> GroupLimit {
        GroupLimit {
            id: GroupId::new(id),
            name: id.to_uppercase(),
            limit_minutes: 30,
            members: members.iter().map(|m| PackageName::new(*m)).collect(),
            is_strict: false,
            active_periods: Default::default(),
        }
    }

    #[test]
    fn package_in_several_groups() {
        let index = GroupIndex::build(&[
            group("social", &["com.chat", "com.feed"]),
            group("evening", &["com.feed", "com.video"]),
        ]);

        assert_eq!(index.groups_of("com.chat"), &[GroupId::new("social")]);
        assert_eq!(
            index.groups_of("com.feed"),
            &[GroupId::new("social"), GroupId::new("evening")]
        );
        assert!(index.groups_of("com.other").is_empty());
        assert_eq!(index.packages().count(), 3);
    }
}
