// this_file: src/queue.rs
//! Face queue contract shared by the disk and askface tiers.

use crate::face::{Face, FaceImages};
use std::sync::{Arc, RwLock};

/// Receives the outcome of a face load.
pub trait FaceQueueListener: Send + Sync {
    /// The face images are available
    fn face_loaded(&self, face: &Arc<Face>, images: &FaceImages);

    /// The face could not be loaded by this queue
    fn face_failed(&self, face: &Arc<Face>);
}

/// Asynchronous source of face images.
///
/// `load_face` returns immediately; the outcome is reported to the listeners
/// at most once per load that actually started work.
pub trait FaceQueue: Send + Sync {
    /// Forget all pending requests; late results are discarded
    fn reset(&self);

    /// Request the images of a face
    fn load_face(&self, face: Arc<Face>);

    /// Register a listener
    fn add_listener(&self, listener: Arc<dyn FaceQueueListener>);

    /// Unregister a listener previously passed to `add_listener`
    fn remove_listener(&self, listener: &Arc<dyn FaceQueueListener>);
}

/// Copy-on-write observer list.
///
/// Notification iterates over a snapshot, so listeners may be added or
/// removed concurrently, including from within a callback.
pub struct Listeners<L: ?Sized> {
    inner: RwLock<Arc<Vec<Arc<L>>>>,
}

impl<L: ?Sized> Listeners<L> {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Append a listener
    pub fn add(&self, listener: Arc<L>) {
        let mut guard = self.inner.write().expect("listener list lock poisoned");
        let mut listeners = Vec::clone(&guard);
        listeners.push(listener);
        *guard = Arc::new(listeners);
    }

    /// Remove a listener by identity; returns whether it was registered
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut guard = self.inner.write().expect("listener list lock poisoned");
        let Some(index) = guard
            .iter()
            .position(|l| Arc::as_ptr(l) as *const () == target)
        else {
            return false;
        };
        let mut listeners = Vec::clone(&guard);
        listeners.remove(index);
        *guard = Arc::new(listeners);
        true
    }

    /// Current listeners
    pub fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
        Arc::clone(&self.inner.read().expect("listener list lock poisoned"))
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.inner.read().expect("listener list lock poisoned").len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl Listeners<dyn FaceQueueListener> {
    /// Report a loaded face to every listener
    pub fn fire_loaded(&self, face: &Arc<Face>, images: &FaceImages) {
        for listener in self.snapshot().iter() {
            listener.face_loaded(face, images);
        }
    }

    /// Report a failed face to every listener
    pub fn fire_failed(&self, face: &Arc<Face>) {
        for listener in self.snapshot().iter() {
            listener.face_failed(face);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording listener shared by the queue tests.

    use super::*;
    use std::sync::{Condvar, Mutex};
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Event {
        Loaded(u32),
        Failed(u32),
    }

    #[derive(Default)]
    pub(crate) struct RecordingListener {
        events: Mutex<Vec<Event>>,
        changed: Condvar,
    }

    impl RecordingListener {
        pub(crate) fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        /// Wait until at least `count` events arrived.
        pub(crate) fn wait_for(&self, count: usize) -> Vec<Event> {
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut events = self.events.lock().unwrap();
            while events.len() < count {
                let timeout = deadline.saturating_duration_since(Instant::now());
                assert!(!timeout.is_zero(), "timed out waiting for {} events: {:?}", count, *events);
                events = self.changed.wait_timeout(events, timeout).unwrap().0;
            }
            events.clone()
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
            self.changed.notify_all();
        }
    }

    impl FaceQueueListener for RecordingListener {
        fn face_loaded(&self, face: &Arc<Face>, _images: &FaceImages) {
            self.push(Event::Loaded(face.id()));
        }

        fn face_failed(&self, face: &Arc<Face>) {
            self.push(Event::Failed(face.id()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Event, RecordingListener};
    use super::*;
    use image::RgbaImage;

    #[test]
    fn fires_to_all_listeners() {
        let listeners: Listeners<dyn FaceQueueListener> = Listeners::new();
        let a = Arc::new(RecordingListener::default());
        let b = Arc::new(RecordingListener::default());
        listeners.add(a.clone());
        listeners.add(b.clone());

        let face = Arc::new(Face::new(3, "x", 0));
        listeners.fire_loaded(&face, &FaceImages::from_original(RgbaImage::new(8, 8)));
        listeners.fire_failed(&face);

        assert_eq!(a.events(), vec![Event::Loaded(3), Event::Failed(3)]);
        assert_eq!(b.events(), a.events());
    }

    #[test]
    fn remove_by_identity() {
        let listeners: Listeners<dyn FaceQueueListener> = Listeners::new();
        let a: Arc<dyn FaceQueueListener> = Arc::new(RecordingListener::default());
        let b: Arc<dyn FaceQueueListener> = Arc::new(RecordingListener::default());
        listeners.add(a.clone());
        listeners.add(b.clone());

        assert!(listeners.remove(&a));
        assert!(!listeners.remove(&a));
        assert_eq!(listeners.len(), 1);
        assert!(listeners.remove(&b));
        assert!(listeners.is_empty());
    }

    #[test]
    fn snapshot_is_stable_across_changes() {
        let listeners: Listeners<dyn FaceQueueListener> = Listeners::new();
        listeners.add(Arc::new(RecordingListener::default()));
        let snapshot = listeners.snapshot();
        listeners.add(Arc::new(RecordingListener::default()));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(listeners.len(), 2);
    }
}
