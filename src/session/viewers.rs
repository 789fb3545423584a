use std::collections::HashSet;
use std::sync::Mutex;

use crate::utils::lock;

/// Result of adding a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    /// The set was empty before
    First,
    Joined,
    AlreadyPresent,
}

/// Result of removing a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leave {
    /// The set is empty now
    Last,
    Left,
    Absent,
}

/// Set of viewers currently watching the live preview
#[derive(Debug, Default)]
pub struct ViewerRegistry {
    viewers: Mutex<HashSet<String>>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str) -> Join {
        let mut viewers = lock(&self.viewers);
        if viewers.contains(id) {
            return Join::AlreadyPresent;
        }
        viewers.insert(id.to_owned());
        if viewers.len() == 1 {
            Join::First
        } else {
            Join::Joined
        }
    }

    pub fn remove(&self, id: &str) -> Leave {
        let mut viewers = lock(&self.viewers);
        if !viewers.remove(id) {
            Leave::Absent
        } else if viewers.is_empty() {
            Leave::Last
        } else {
            Leave::Left
        }
    }

    /// Drop every viewer, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut viewers = lock(&self.viewers);
        let count = viewers.len();
        viewers.clear();
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.viewers).contains(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.viewers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.viewers).is_empty()
    }
}
