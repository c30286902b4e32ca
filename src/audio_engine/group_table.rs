// FILE: src\audio_engine\group_table.rs
// =====================================

use crate::looper::{NUM_GROUPS, NUM_TRACKS};

/// Which tracks belong to which group. Holds associations only; audio stays in
/// the track store, so one track can sit in several groups at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupTable {
    members: [[bool; NUM_TRACKS]; NUM_GROUPS],
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, group: usize, track: usize) {
        self.members[group][track] = true;
    }

    pub fn unassign(&mut self, group: usize, track: usize) {
        self.members[group][track] = false;
    }

    pub fn contains(&self, group: usize, track: usize) -> bool {
        self.members[group][track]
    }

    /// Track ids in `group`, in slot order.
    pub fn tracks(&self, group: usize) -> impl Iterator<Item = usize> + '_ {
        self.members[group]
            .iter()
            .enumerate()
            .filter_map(|(track, &member)| member.then_some(track))
    }

    pub fn clear(&mut self) {
        self.members = [[false; NUM_TRACKS]; NUM_GROUPS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_can_live_in_several_groups() {
        let mut table = GroupTable::new();
        table.assign(0, 5);
        table.assign(2, 5);
        assert!(table.contains(0, 5));
        assert!(table.contains(2, 5));
        assert!(!table.contains(1, 5));

        table.unassign(0, 5);
        assert!(!table.contains(0, 5));
        assert!(table.contains(2, 5));
    }

    #[test]
    fn tracks_lists_members_in_order() {
        let mut table = GroupTable::new();
        table.assign(1, 9);
        table.assign(1, 2);
        table.assign(3, 4);
        assert_eq!(table.tracks(1).collect::<Vec<_>>(), vec![2, 9]);
    }

    #[test]
    fn clear_drops_every_association() {
        let mut table = GroupTable::new();
        table.assign(0, 0);
        table.assign(3, 15);
        table.clear();
        assert_eq!(table, GroupTable::new());
    }
}
