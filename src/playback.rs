//! Exclusive playback coordination
//!
//! Post lists assume at most one media item plays with sound at a time. The
//! platform player asks for exclusivity before unmuting and releases it when
//! paused, dismissed or scrolled away; granting a new request displaces the
//! previous holder.

use std::sync::Mutex;

use tokio::sync::watch;

/// Grants exclusive audible playback to one media item at a time
pub struct PlaybackCoordinator {
    current: Mutex<Option<String>>,
    current_tx: watch::Sender<Option<String>>,
}

impl Default for PlaybackCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackCoordinator {
    /// Create a coordinator with nothing playing
    pub fn new() -> Self {
        let (current_tx, _) = watch::channel(None);
        Self {
            current: Mutex::new(None),
            current_tx,
        }
    }

    /// Claim exclusive playback for `id`, displacing any current holder
    ///
    /// Observers see the change and mute themselves when displaced.
    pub fn request_exclusive(&self, id: &str) {
        let mut current = self.current.lock().expect("playback lock poisoned");
        *current = Some(id.to_string());
        let _ = self.current_tx.send(current.clone());
    }

    /// Release exclusivity if `id` still holds it
    ///
    /// A stale release from a displaced player is a no-op.
    pub fn release(&self, id: &str) {
        let mut current = self.current.lock().expect("playback lock poisoned");
        if current.as_deref() == Some(id) {
            *current = None;
            let _ = self.current_tx.send(None);
        }
    }

    /// The id currently holding exclusivity
    pub fn current(&self) -> Option<String> {
        self.current.lock().expect("playback lock poisoned").clone()
    }

    /// Observe holder changes
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.current_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_displaces_holder() {
        let coordinator = PlaybackCoordinator::new();
        coordinator.request_exclusive("video-1");
        coordinator.request_exclusive("video-2");
        assert_eq!(coordinator.current().as_deref(), Some("video-2"));
    }

    #[test]
    fn test_stale_release_is_noop() {
        let coordinator = PlaybackCoordinator::new();
        coordinator.request_exclusive("video-1");
        coordinator.request_exclusive("video-2");

        // video-1 was displaced; its release must not silence video-2.
        coordinator.release("video-1");
        assert_eq!(coordinator.current().as_deref(), Some("video-2"));

        coordinator.release("video-2");
        assert_eq!(coordinator.current(), None);
    }
}
