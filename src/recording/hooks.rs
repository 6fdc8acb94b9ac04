// src/recording/hooks.rs
//! Host page lifecycle hooks
//!
//! Listener registrations are owned handles: dropping a `ListenerHandle`
//! unsubscribes it. `LifecycleHooks` holds the set acquired on start so
//! releasing them on stop cannot forget one.

use serde_json::{Map, Value};
use std::fmt;

use crate::recording::session::SessionChangeReason;

/// Host notifications the recorder can listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeUnload,
    Offline,
    Online,
    VisibilityChange,
    FeatureFlags,
    EventCaptured,
    SessionId,
}

/// Hooks acquired by `start()`. The session id listener is held separately.
pub const LIFECYCLE_HOOKS: [HookKind; 6] = [
    HookKind::BeforeUnload,
    HookKind::Offline,
    HookKind::Online,
    HookKind::VisibilityChange,
    HookKind::FeatureFlags,
    HookKind::EventCaptured,
];

/// A notification delivered by the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    BeforeUnload,
    Offline,
    Online,
    VisibilityChange {
        visible: bool,
    },
    FeatureFlags {
        flags: Vec<String>,
        variants: Map<String, Value>,
    },
    EventCaptured {
        event_name: String,
        properties: Map<String, Value>,
    },
    SessionIdChanged {
        session_id: String,
        window_id: String,
        reason: Option<SessionChangeReason>,
    },
}

impl HostEvent {
    pub fn kind(&self) -> HookKind {
        match self {
            HostEvent::BeforeUnload => HookKind::BeforeUnload,
            HostEvent::Offline => HookKind::Offline,
            HostEvent::Online => HookKind::Online,
            HostEvent::VisibilityChange { .. } => HookKind::VisibilityChange,
            HostEvent::FeatureFlags { .. } => HookKind::FeatureFlags,
            HostEvent::EventCaptured { .. } => HookKind::EventCaptured,
            HostEvent::SessionIdChanged { .. } => HookKind::SessionId,
        }
    }
}

/// Registered listener, unsubscribed on drop
pub struct ListenerHandle {
    kind: HookKind,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    pub fn new(kind: HookKind, unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Handle with nothing to undo
    pub fn detached(kind: HookKind) -> Self {
        Self {
            kind,
            unsubscribe: None,
        }
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("kind", &self.kind)
            .finish()
    }
}

/// The page the recorder runs in
pub trait HostEnvironment: Send + Sync {
    /// Current page URL, if there is one
    fn current_url(&self) -> Option<String>;

    fn listen(&self, kind: HookKind) -> ListenerHandle;
}

/// Listener handles held while recording
#[derive(Debug, Default)]
pub struct LifecycleHooks {
    handles: Vec<ListenerHandle>,
}

impl LifecycleHooks {
    pub fn acquire(host: &dyn HostEnvironment, kinds: &[HookKind]) -> Self {
        Self {
            handles: kinds.iter().map(|kind| host.listen(*kind)).collect(),
        }
    }

    pub fn is_listening(&self, kind: HookKind) -> bool {
        self.handles.iter().any(|h| h.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Unsubscribe everything
    pub fn release(&mut self) {
        self.handles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHost {
        active: Arc<AtomicUsize>,
    }

    impl HostEnvironment for CountingHost {
        fn current_url(&self) -> Option<String> {
            None
        }

        fn listen(&self, kind: HookKind) -> ListenerHandle {
            self.active.fetch_add(1, Ordering::SeqCst);
            let active = self.active.clone();
            ListenerHandle::new(kind, move || {
                active.fetch_sub(1, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let active = Arc::new(AtomicUsize::new(0));
        let host = CountingHost {
            active: active.clone(),
        };

        let mut hooks = LifecycleHooks::acquire(&host, &LIFECYCLE_HOOKS);
        assert_eq!(active.load(Ordering::SeqCst), LIFECYCLE_HOOKS.len());
        assert!(hooks.is_listening(HookKind::Offline));
        assert!(!hooks.is_listening(HookKind::SessionId));

        hooks.release();
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert!(hooks.is_empty());

        // releasing twice is harmless
        hooks.release();
    }

    #[test]
    fn test_drop_unsubscribes() {
        let active = Arc::new(AtomicUsize::new(0));
        let host = CountingHost {
            active: active.clone(),
        };
        {
            let _hooks = LifecycleHooks::acquire(&host, &[HookKind::Online]);
            assert_eq!(active.load(Ordering::SeqCst), 1);
        }
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(HostEvent::Offline.kind(), HookKind::Offline);
        assert_eq!(
            HostEvent::VisibilityChange { visible: true }.kind(),
            HookKind::VisibilityChange
        );
    }
}
