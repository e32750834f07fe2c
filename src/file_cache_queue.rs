// this_file: src/file_cache_queue.rs
//! Face queue backed by the disk caches.
//!
//! All loads and saves run on one worker thread, so disk access is strictly
//! serialized. Each reset bumps a generation counter; tasks queued before the
//! reset notice the mismatch and finish without reporting anything.

use crate::error::{Error, Result};
use crate::face::{Face, FaceImages};
use crate::image_cache::ImageCaches;
use crate::logging::Timer;
use crate::queue::{FaceQueue, FaceQueueListener, Listeners};
use log::{debug, error, trace};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

enum Task {
    Load { face: Arc<Face>, generation: u64 },
    Save { face: Arc<Face>, images: FaceImages },
    Flush(Sender<()>),
}

struct Shared {
    caches: ImageCaches,
    generation: AtomicU64,
    /// Identity of the latest load task queued or running, per face id.
    pending: Mutex<HashMap<u32, Arc<Face>>>,
    listeners: Listeners<dyn FaceQueueListener>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Removes a face from the pending set when its load task ends, unless a
/// reset or a newer identity replaced it meanwhile.
struct PendingGuard<'a> {
    shared: &'a Shared,
    face: &'a Face,
    generation: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self
            .shared
            .pending
            .lock()
            .expect("pending faces mutex poisoned");
        if self.shared.is_current(self.generation) {
            remove_if_same(&mut pending, self.face);
        }
    }
}

fn remove_if_same(pending: &mut HashMap<u32, Arc<Face>>, face: &Face) {
    if pending
        .get(&face.id())
        .is_some_and(|queued| queued.same_identity(face))
    {
        pending.remove(&face.id());
    }
}

/// Loads faces from [`ImageCaches`] on a dedicated worker thread.
pub struct FileCacheFaceQueue {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FileCacheFaceQueue {
    /// Start the worker thread
    pub fn new(caches: ImageCaches) -> Result<Self> {
        let shared = Arc::new(Shared {
            caches,
            generation: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            listeners: Listeners::new(),
        });

        let (sender, receiver) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("facecache-disk".to_owned())
            .spawn(move || worker_loop(&worker_shared, receiver))
            .map_err(|e| Error::Worker(format!("Failed to start disk cache worker: {}", e)))?;

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Write all three variants of a face to the caches in the background
    pub fn save_face(&self, face: Arc<Face>, images: FaceImages) {
        if !self.submit(Task::Save { face, images }) {
            debug!("Disk cache worker unavailable; save skipped");
        }
    }

    /// Block until every task submitted before this call has finished
    pub fn flush(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.submit(Task::Flush(done_tx)) {
            let _ = done_rx.recv();
        }
    }

    /// Number of faces with an outstanding load task
    pub fn pending_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .expect("pending faces mutex poisoned")
            .len()
    }

    fn submit(&self, task: Task) -> bool {
        let sender = self.sender.lock().expect("disk queue sender mutex poisoned");
        match sender.as_ref() {
            Some(sender) => match sender.send(task) {
                Ok(()) => true,
                Err(_) => {
                    error!("Disk cache worker has stopped");
                    false
                }
            },
            None => false,
        }
    }
}

impl FaceQueue for FileCacheFaceQueue {
    fn reset(&self) {
        let mut pending = self
            .shared
            .pending
            .lock()
            .expect("pending faces mutex poisoned");
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Disk queue reset to generation {} ({} loads dropped)",
            generation,
            pending.len()
        );
        pending.clear();
    }

    fn load_face(&self, face: Arc<Face>) {
        let generation = {
            let mut pending = self
                .shared
                .pending
                .lock()
                .expect("pending faces mutex poisoned");
            match pending.get(&face.id()) {
                Some(queued) if queued.same_identity(&face) => {
                    trace!("Face {} already queued for disk load", face);
                    return;
                }
                Some(queued) => debug!("Face {} supersedes queued {}", face, queued),
                None => {}
            }
            pending.insert(face.id(), Arc::clone(&face));
            self.shared.generation.load(Ordering::SeqCst)
        };

        let task = Task::Load {
            face: Arc::clone(&face),
            generation,
        };
        if !self.submit(task) {
            // Nothing will ever complete this load; let the next tier try.
            {
                let mut pending = self
                    .shared
                    .pending
                    .lock()
                    .expect("pending faces mutex poisoned");
                if self.shared.is_current(generation) {
                    remove_if_same(&mut pending, &face);
                }
            }
            self.shared.listeners.fire_failed(&face);
        }
    }

    fn add_listener(&self, listener: Arc<dyn FaceQueueListener>) {
        self.shared.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn FaceQueueListener>) {
        self.shared.listeners.remove(listener);
    }
}

impl Drop for FileCacheFaceQueue {
    fn drop(&mut self) {
        if let Ok(sender) = self.sender.get_mut() {
            sender.take();
        }
        if let Ok(worker) = self.worker.get_mut() {
            if let Some(handle) = worker.take() {
                // The last owner may be a listener running on the worker itself.
                if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                    error!("Disk cache worker panicked");
                }
            }
        }
    }
}

fn worker_loop(shared: &Shared, receiver: Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        match task {
            Task::Load { face, generation } => run_load(shared, face, generation),
            Task::Save { face, images } => {
                let _timer = Timer::new(format!("Saving face {} to disk cache", face));
                if catch_unwind(AssertUnwindSafe(|| shared.caches.save_all(&face, &images)))
                    .is_err()
                {
                    error!("Saving face {} panicked", face);
                }
            }
            Task::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Disk cache worker exiting");
}

fn run_load(shared: &Shared, face: Arc<Face>, generation: u64) {
    if !shared.is_current(generation) {
        trace!("Skipping stale disk load of face {}", face);
        return;
    }
    let pending = PendingGuard {
        shared,
        face: &face,
        generation,
    };

    let loaded = {
        let _timer = Timer::new(format!("Loading face {} from disk cache", face));
        catch_unwind(AssertUnwindSafe(|| shared.caches.load_all(&face)))
    };

    if !shared.is_current(generation) {
        trace!("Discarding disk load of face {} after reset", face);
        return;
    }
    // Listeners may request the same face again.
    drop(pending);

    let outcome = catch_unwind(AssertUnwindSafe(|| match loaded {
        Ok(Some(images)) => shared.listeners.fire_loaded(&face, &images),
        Ok(None) => shared.listeners.fire_failed(&face),
        Err(_) => {
            error!("Loading face {} from disk cache panicked", face);
            shared.listeners.fire_failed(&face);
        }
    }));
    if outcome.is_err() {
        error!("Listener panicked while handling face {}", face);
    }
}
