//! Single-active-session state and transient resource ownership.
//!
//! The [`SessionStateStore`] is owned by the coordinator rather than living
//! in a global, so "one active session" is a property of the instance. It
//! owns the current [`CaptureSession`], every [`ResourceHandle`] created for
//! it, and the last result. [`SessionStateStore::clear`] runs at the start of
//! every pipeline run so nothing from a failed or partial attempt survives
//! into the next.

use crate::mode::Mode;
use crate::output::RecognitionResult;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Components whose per-session state the store resets on clear.
pub trait Resettable: Send + Sync {
    fn reset(&self);
}

type RevokeFn = dyn Fn() + Send + Sync;

/// An externally revocable transient resource (a temp preview file, say).
///
/// Clones share one released flag: the revoke function runs at most once no
/// matter how many clones call [`ResourceHandle::release`].
#[derive(Clone)]
pub struct ResourceHandle {
    id: Uuid,
    label: String,
    location: Option<PathBuf>,
    revoke: Arc<RevokeFn>,
    released: Arc<AtomicBool>,
}

impl ResourceHandle {
    pub fn new(label: impl Into<String>, revoke: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            location: None,
            revoke: Arc::new(revoke),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach the path the resource is reachable at.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn location(&self) -> Option<&std::path::Path> {
        self.location.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Invoke the revoke function unless some clone already did.
    ///
    /// Returns true if this call performed the release.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        trace!("Releasing resource {} ({})", self.label, self.id);
        (self.revoke)();
        true
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("location", &self.location)
            .field("released", &self.is_released())
            .finish()
    }
}

/// One user-initiated capture-to-result attempt.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub mode: Mode,
    /// What the input came from: a file name, `canvas` or `camera`.
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub transient_resources: Vec<ResourceHandle>,
}

/// Owner of the active session, its resources and the cached result.
#[derive(Default)]
pub struct SessionStateStore {
    session: Option<CaptureSession>,
    /// Handles registered while no session was open.
    orphans: Vec<ResourceHandle>,
    result: Option<Arc<RecognitionResult>>,
    resettables: Vec<Arc<dyn Resettable>>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Components reset on every [`clear`](Self::clear), in registration order.
    pub fn register_resettable(&mut self, component: Arc<dyn Resettable>) {
        self.resettables.push(component);
    }

    /// Open a fresh session, releasing whatever the previous one held.
    pub fn begin_session(&mut self, mode: Mode, source: impl Into<String>) {
        self.release_all();
        self.session = Some(CaptureSession {
            mode,
            source: source.into(),
            started_at: Utc::now(),
            transient_resources: Vec::new(),
        });
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// Take ownership of a handle. Registering the same handle twice is a no-op.
    pub fn register_resource(&mut self, handle: ResourceHandle) {
        let bucket = match self.session.as_mut() {
            Some(s) => &mut s.transient_resources,
            None => &mut self.orphans,
        };
        if bucket.iter().any(|h| h.id() == handle.id()) {
            debug!("Resource {} already registered", handle.id());
            return;
        }
        bucket.push(handle);
    }

    /// Number of handles currently held.
    pub fn resource_count(&self) -> usize {
        self.orphans.len()
            + self
                .session
                .as_ref()
                .map_or(0, |s| s.transient_resources.len())
    }

    /// Release and forget every held handle.
    pub fn release_all(&mut self) {
        let session_handles = self
            .session
            .as_mut()
            .map(|s| std::mem::take(&mut s.transient_resources))
            .unwrap_or_default();
        let orphans = std::mem::take(&mut self.orphans);
        let mut released = 0usize;
        for handle in session_handles.iter().chain(orphans.iter()) {
            if handle.release() {
                released += 1;
            }
        }
        if released > 0 {
            debug!("Released {} transient resources", released);
        }
    }

    pub fn set_result(&mut self, result: Arc<RecognitionResult>) {
        self.result = Some(result);
    }

    pub fn result(&self) -> Option<Arc<RecognitionResult>> {
        self.result.clone()
    }

    /// Release every handle, reset registered components, then drop all state.
    pub fn clear(&mut self) {
        self.release_all();
        for component in &self.resettables {
            component.reset();
        }
        self.session = None;
        self.result = None;
    }
}

impl Drop for SessionStateStore {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for SessionStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateStore")
            .field("session", &self.session)
            .field("orphans", &self.orphans.len())
            .field("has_result", &self.result.is_some())
            .field("resettables", &self.resettables.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counted(counter: &Arc<AtomicUsize>) -> ResourceHandle {
        let c = Arc::clone(counter);
        ResourceHandle::new("test", move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    struct CountingReset(AtomicUsize);

    impl Resettable for CountingReset {
        fn reset(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn clear_revokes_each_handle_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut store = SessionStateStore::new();
        store.begin_session(Mode::Upload, "a.png");
        store.register_resource(counted(&counter));
        store.register_resource(counted(&counter));

        store.clear();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        store.clear();
        assert_eq!(counter.load(Ordering::SeqCst), 2, "second clear must not revoke again");
    }

    #[test]
    fn double_registration_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut store = SessionStateStore::new();
        store.begin_session(Mode::Camera, "camera");
        let handle = counted(&counter);
        store.register_resource(handle.clone());
        store.register_resource(handle);
        assert_eq!(store.resource_count(), 1);

        store.clear();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_release_flag() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = counted(&counter);
        let b = a.clone();
        assert!(a.release());
        assert!(!b.release());
        assert!(b.is_released());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handles_without_session_are_still_released() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut store = SessionStateStore::new();
        store.register_resource(counted(&counter));
        store.clear();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_resets_components_and_state() {
        let component = Arc::new(CountingReset(AtomicUsize::new(0)));
        let mut store = SessionStateStore::new();
        store.register_resettable(component.clone());
        store.begin_session(Mode::Draw, "canvas");

        store.clear();
        assert_eq!(component.0.load(Ordering::SeqCst), 1);
        assert!(store.session().is_none());
        assert!(store.result().is_none());
    }

    #[test]
    fn begin_session_releases_previous_handles() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut store = SessionStateStore::new();
        store.begin_session(Mode::Upload, "a");
        store.register_resource(counted(&counter));
        store.begin_session(Mode::Upload, "b");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(store.session().unwrap().source, "b");
    }

    #[test]
    fn drop_releases_outstanding_handles() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut store = SessionStateStore::new();
            store.begin_session(Mode::Upload, "a");
            store.register_resource(counted(&counter));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
