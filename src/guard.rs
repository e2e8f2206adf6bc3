//! Tracks which users are in the middle of a DM confession.

use std::sync::Arc;

use dashmap::DashSet;
use serenity::model::id::UserId;

#[derive(Clone, Default)]
pub struct ConfessionGuard {
    confessing: Arc<DashSet<UserId>>,
}

impl ConfessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `user_id` as confessing. Returns `None` if they already are.
    pub fn try_begin(&self, user_id: UserId) -> Option<GuardTicket> {
        self.confessing.insert(user_id).then(|| GuardTicket {
            confessing: Arc::clone(&self.confessing),
            user_id,
        })
    }

    pub fn is_confessing(&self, user_id: UserId) -> bool {
        self.confessing.contains(&user_id)
    }
}

/// Held for the length of one conversation; the user is released on drop.
pub struct GuardTicket {
    confessing: Arc<DashSet<UserId>>,
    user_id: UserId,
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        self.confessing.remove(&self.user_id);
    }
}
