use serde::{Deserialize, Serialize};

use crate::id::ChildId;

/// The slice of a child's account the safety core needs: identity, age
/// (for age-appropriate phrasing), and the parent to notify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildProfile {
    pub child_id: ChildId,
    pub parent_id: String,
    pub age: u8,
}

impl ChildProfile {
    pub fn new(child_id: ChildId, parent_id: impl Into<String>, age: u8) -> Self {
        Self {
            child_id,
            parent_id: parent_id.into(),
            age,
        }
    }

    /// Younger children get simpler, gentler phrasing.
    pub fn is_young(&self) -> bool {
        self.age < 9
    }
}
