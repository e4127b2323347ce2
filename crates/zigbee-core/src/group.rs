//! Group table
//!
//! A group is a 16-bit multicast id with a dynamic membership of
//! (device, endpoint) pairs. Members are weak references: removing an
//! endpoint cascades its memberships out.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use zigbee_wire::Eui64;

/// A single multicast group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: u16,
    pub name: String,
    /// (device, endpoint) members
    pub members: BTreeSet<(Eui64, u8)>,
}

impl Group {
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            members: BTreeSet::new(),
        }
    }
}

/// All groups known to the controller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Groups {
    groups: BTreeMap<u16, Group>,
}

impl Groups {
    pub fn get(&self, group_id: u16) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Create a group if it does not exist; returns true when created
    pub fn add(&mut self, group_id: u16, name: &str) -> bool {
        if self.groups.contains_key(&group_id) {
            return false;
        }
        self.groups.insert(group_id, Group::new(group_id, name));
        true
    }

    /// Add a member, creating the group when needed; returns true when the
    /// membership is new
    pub fn add_member(&mut self, group_id: u16, ieee: Eui64, endpoint: u8) -> bool {
        let group = self
            .groups
            .entry(group_id)
            .or_insert_with(|| Group::new(group_id, ""));
        group.members.insert((ieee, endpoint))
    }

    /// Remove a member; returns true when it was present
    pub fn remove_member(&mut self, group_id: u16, ieee: Eui64, endpoint: u8) -> bool {
        match self.groups.get_mut(&group_id) {
            Some(group) => group.members.remove(&(ieee, endpoint)),
            None => false,
        }
    }

    /// Remove a group entirely; returns its members if it existed
    pub fn remove(&mut self, group_id: u16) -> Option<Group> {
        self.groups.remove(&group_id)
    }

    /// Cascade a device out of every group; returns the affected
    /// (group, endpoint) memberships
    pub fn remove_device(&mut self, ieee: Eui64) -> Vec<(u16, u8)> {
        let mut removed = Vec::new();
        for group in self.groups.values_mut() {
            let stale: Vec<(Eui64, u8)> = group
                .members
                .iter()
                .filter(|(member, _)| *member == ieee)
                .copied()
                .collect();
            for member in stale {
                group.members.remove(&member);
                removed.push((group.id, member.1));
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_members() {
        let mut groups = Groups::default();
        let ieee = Eui64::from(0x1122_3344_5566_7788);

        assert!(groups.add(0x0002, "living room"));
        assert!(!groups.add(0x0002, "living room"));
        assert!(groups.add_member(0x0002, ieee, 1));
        assert!(!groups.add_member(0x0002, ieee, 1));

        assert!(groups.remove_member(0x0002, ieee, 1));
        assert!(!groups.remove_member(0x0002, ieee, 1));
    }

    #[test]
    fn test_add_member_creates_group() {
        let mut groups = Groups::default();
        groups.add_member(0x0010, Eui64::from(0x1), 2);
        assert_eq!(groups.get(0x0010).unwrap().members.len(), 1);
    }

    #[test]
    fn test_device_removal_cascades() {
        let mut groups = Groups::default();
        let gone = Eui64::from(0xAAAA);
        let kept = Eui64::from(0xBBBB);
        groups.add_member(0x0001, gone, 1);
        groups.add_member(0x0001, gone, 2);
        groups.add_member(0x0001, kept, 1);
        groups.add_member(0x0002, gone, 1);

        let removed = groups.remove_device(gone);
        assert_eq!(removed.len(), 3);
        assert_eq!(groups.get(0x0001).unwrap().members.len(), 1);
        assert!(groups.get(0x0002).unwrap().members.is_empty());
    }
}
