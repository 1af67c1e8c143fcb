use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use uuid::Uuid;

use super::EditorKind;
use crate::error::AppError;

type Key = (Uuid, EditorKind);

/// Submissions currently running, one slot per user and editor.
#[derive(Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<Key>>>,
}

/// Holds the slot until dropped.
#[must_use]
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<Key>>>,
    key: Key,
}

impl InFlight {
    pub fn try_begin(&self, user_id: Uuid, kind: EditorKind) -> Result<InFlightGuard, AppError> {
        let key = (user_id, kind);
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key) {
            return Err(AppError::Busy);
        }
        Ok(InFlightGuard {
            active: Arc::clone(&self.active),
            key,
        })
    }

    pub fn is_active(&self, user_id: Uuid, kind: EditorKind) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(user_id, kind))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}
