//! The session an engine is bound to.
//!
//! Establishing a session is the embedder's business. The engine only needs
//! to know who the local profile is and whether the session is still alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use threadline_core::ProfileId;

use crate::error::{EngineError, Result};

/// A cheap, cloneable handle to the current session.
#[derive(Debug, Clone)]
pub struct Session {
    profile_id: ProfileId,
    active: Arc<AtomicBool>,
}

impl Session {
    pub fn new(profile_id: ProfileId) -> Self {
        Self {
            profile_id,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The local user's profile.
    pub fn profile_id(&self) -> &ProfileId {
        &self.profile_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// End the session. Every clone observes it.
    pub fn end(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(EngineError::SessionGone)
        }
    }
}
