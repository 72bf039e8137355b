//! First-come-first-served matchmaking queue
//!
//! An ordered list of user ids. Pairing is strict FIFO by enqueue order;
//! client-provided timestamps are ignored. Liveness of popped entries is
//! checked by the hub, which re-enqueues a still-live survivor at the head.

use std::collections::VecDeque;
use std::sync::RwLock;
use tracing::debug;

use crate::error::{HubError, HubResult as Result};
use crate::types::UserId;

/// FIFO queue of waiting users
#[derive(Debug, Default)]
pub struct MatchQueue {
    entries: RwLock<VecDeque<UserId>>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, VecDeque<UserId>>> {
        self.entries
            .write()
            .map_err(|_| HubError::internal("failed to acquire queue lock"))
    }

    /// Add a user to the tail. No-op when already queued.
    ///
    /// Returns true if the queue changed.
    pub fn enqueue(&self, user_id: UserId) -> Result<bool> {
        let mut entries = self.lock()?;
        if entries.contains(&user_id) {
            debug!(user_id = %user_id, "User already queued, enqueue ignored");
            return Ok(false);
        }
        entries.push_back(user_id);
        debug!(user_id = %user_id, depth = entries.len(), "User enqueued");
        Ok(true)
    }

    /// Remove a user wherever they are. Returns true if present.
    pub fn leave(&self, user_id: UserId) -> Result<bool> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|id| *id != user_id);
        Ok(entries.len() != before)
    }

    /// Pop the two users at the head, if the queue holds at least two.
    pub fn take_pair(&self) -> Result<Option<(UserId, UserId)>> {
        let mut entries = self.lock()?;
        if entries.len() < 2 {
            return Ok(None);
        }
        match (entries.pop_front(), entries.pop_front()) {
            (Some(first), Some(second)) => Ok(Some((first, second))),
            _ => Ok(None),
        }
    }

    /// Put a user back at the head, preserving their position for the next
    /// pairing attempt.
    pub fn requeue_front(&self, user_id: UserId) -> Result<()> {
        let mut entries = self.lock()?;
        if !entries.contains(&user_id) {
            entries.push_front(user_id);
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .map_err(|_| HubError::internal("failed to acquire queue lock"))?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, user_id: UserId) -> Result<bool> {
        Ok(self
            .entries
            .read()
            .map_err(|_| HubError::internal("failed to acquire queue lock"))?
            .contains(&user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn enqueue_is_fifo_and_deduplicated() {
        let queue = MatchQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        assert!(queue.enqueue(a).unwrap());
        assert!(queue.enqueue(b).unwrap());
        assert!(!queue.enqueue(a).unwrap(), "duplicate enqueue is a no-op");
        assert!(queue.enqueue(c).unwrap());
        assert_eq!(queue.len().unwrap(), 3);

        assert_eq!(queue.take_pair().unwrap(), Some((a, b)));
        assert_eq!(queue.take_pair().unwrap(), None, "one entry left");
        assert!(queue.contains(c).unwrap());
    }

    #[test]
    fn leave_removes_from_any_position() {
        let queue = MatchQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        for id in [a, b, c] {
            queue.enqueue(id).unwrap();
        }

        assert!(queue.leave(b).unwrap());
        assert!(!queue.leave(b).unwrap());
        assert_eq!(queue.take_pair().unwrap(), Some((a, c)));
    }

    #[test]
    fn requeue_front_preserves_position() {
        let queue = MatchQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        for id in [a, b, c] {
            queue.enqueue(id).unwrap();
        }

        // a and b popped; b's peer was dead, so b goes back to the head.
        let (first, _dead) = queue.take_pair().unwrap().unwrap();
        assert_eq!(first, a);
        queue.requeue_front(first).unwrap();

        assert_eq!(queue.take_pair().unwrap(), Some((a, c)));
    }

    #[test]
    fn requeue_front_never_duplicates() {
        let queue = MatchQueue::new();
        let a = Uuid::new_v4();
        queue.enqueue(a).unwrap();
        queue.requeue_front(a).unwrap();
        assert_eq!(queue.len().unwrap(), 1);
    }
}
