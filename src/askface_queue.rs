// this_file: src/askface_queue.rs
//! Face queue fetching images from the server with "askface" requests.
//!
//! At most `limit` requests are outstanding at any time; further faces wait
//! in a queue that serves the most recently requested face first. Requesting
//! a waiting face again moves it to the front. Each server response frees a
//! slot for the next waiting face.

use crate::face::{is_valid_face_id, Face, FaceImages};
use crate::queue::{FaceQueue, FaceQueueListener, Listeners};
use log::{debug, trace, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Default bound on simultaneously outstanding askface requests.
pub const CONCURRENT_ASKFACE_COMMANDS: usize = 8;

/// Outbound half of the server connection.
pub trait AskfaceSender: Send + Sync {
    /// Ask the server for the image data of a face; the answer arrives later
    /// through [`AskfaceFaceQueue::face_received`], or never.
    fn send_askface(&self, face_id: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Queued with this sequence number; higher is more recent.
    Waiting(u64),
    InFlight,
}

#[derive(Debug)]
struct PendingFace {
    face: Arc<Face>,
    slot: Slot,
}

#[derive(Debug, Default)]
struct AskfaceState {
    /// Every requested face, waiting or in flight.
    pending: HashMap<u32, PendingFace>,
    /// Waiting faces by sequence number.
    waiting: BTreeMap<u64, u32>,
    in_flight: usize,
    next_seq: u64,
}

impl AskfaceState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Add a face or move it to the front; returns whether it was new.
    ///
    /// A newer identity for a pending id takes over its slot, so the reply
    /// is attributed to the content the server currently has.
    fn enqueue(&mut self, face: Arc<Face>) -> bool {
        let seq = self.next_seq();
        let id = face.id();
        match self.pending.get_mut(&id) {
            Some(entry) => {
                if !entry.face.same_identity(&face) {
                    entry.face = face;
                }
                if let Slot::Waiting(old) = entry.slot {
                    entry.slot = Slot::Waiting(seq);
                    self.waiting.remove(&old);
                    self.waiting.insert(seq, id);
                }
                false
            }
            None => {
                self.pending.insert(
                    id,
                    PendingFace {
                        face,
                        slot: Slot::Waiting(seq),
                    },
                );
                self.waiting.insert(seq, id);
                true
            }
        }
    }

    /// Move waiting faces in flight until the limit is reached.
    fn drain(&mut self, limit: usize) -> Vec<u32> {
        let mut dispatched = Vec::new();
        while self.in_flight < limit {
            let Some((_, id)) = self.waiting.pop_last() else {
                break;
            };
            if let Some(entry) = self.pending.get_mut(&id) {
                entry.slot = Slot::InFlight;
                self.in_flight += 1;
                dispatched.push(id);
            }
        }
        dispatched
    }

    /// Remove an in-flight face; waiting or unknown faces are left alone.
    fn complete(&mut self, face_id: u32) -> Option<Arc<Face>> {
        let in_flight = matches!(
            self.pending.get(&face_id),
            Some(entry) if entry.slot == Slot::InFlight
        );
        if !in_flight {
            return None;
        }
        self.in_flight -= 1;
        self.pending.remove(&face_id).map(|entry| entry.face)
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.waiting.clear();
        self.in_flight = 0;
    }
}

/// Requests faces from the server with bounded concurrency.
pub struct AskfaceFaceQueue {
    sender: Arc<dyn AskfaceSender>,
    limit: usize,
    state: Mutex<AskfaceState>,
    generation: AtomicU64,
    listeners: Listeners<dyn FaceQueueListener>,
}

impl AskfaceFaceQueue {
    /// Create a queue sending through `sender` with at most `limit` requests
    /// in flight (clamped to at least one)
    pub fn new(sender: Arc<dyn AskfaceSender>, limit: usize) -> Self {
        Self {
            sender,
            limit: limit.max(1),
            state: Mutex::new(AskfaceState::default()),
            generation: AtomicU64::new(0),
            listeners: Listeners::new(),
        }
    }

    /// Create a queue with [`CONCURRENT_ASKFACE_COMMANDS`]
    pub fn with_default_limit(sender: Arc<dyn AskfaceSender>) -> Self {
        Self::new(sender, CONCURRENT_ASKFACE_COMMANDS)
    }

    /// Bound on in-flight requests
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Handle image data sent by the server for `face_id`.
    ///
    /// Data for a face without an outstanding request is logged and dropped.
    pub fn face_received(&self, face_id: u32, payload: &[u8]) {
        let (face, dispatched, generation) = {
            let mut state = self.state.lock().expect("askface state mutex poisoned");
            let face = state.complete(face_id);
            let dispatched = state.drain(self.limit);
            (face, dispatched, self.generation.load(Ordering::SeqCst))
        };
        self.dispatch(dispatched);

        let Some(face) = face else {
            warn!("Received unexpected image for face {}", face_id);
            return;
        };

        let decoded = FaceImages::decode(payload);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Dropping image for face {} received before reset", face);
            return;
        }

        match decoded {
            Ok(images) => {
                debug!("Received face {} ({} bytes)", face, payload.len());
                self.listeners.fire_loaded(&face, &images);
            }
            Err(e) => {
                warn!("Invalid image data for face {}: {}", face, e);
                self.listeners.fire_failed(&face);
            }
        }
    }

    /// Number of requested faces not yet answered
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .expect("askface state mutex poisoned")
            .pending
            .len()
    }

    /// Number of requests sent to the server and not yet answered
    pub fn in_flight_count(&self) -> usize {
        self.state
            .lock()
            .expect("askface state mutex poisoned")
            .in_flight
    }

    /// Waiting face ids in the order they will be sent
    pub fn waiting_ids(&self) -> Vec<u32> {
        self.state
            .lock()
            .expect("askface state mutex poisoned")
            .waiting
            .values()
            .rev()
            .copied()
            .collect()
    }

    fn dispatch(&self, face_ids: Vec<u32>) {
        for face_id in face_ids {
            trace!("Sending askface {}", face_id);
            self.sender.send_askface(face_id);
        }
    }
}

impl FaceQueue for AskfaceFaceQueue {
    fn reset(&self) {
        let mut state = self.state.lock().expect("askface state mutex poisoned");
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Askface queue reset ({} pending, {} in flight dropped)",
            state.pending.len(),
            state.in_flight
        );
        state.clear();
    }

    fn load_face(&self, face: Arc<Face>) {
        if !is_valid_face_id(face.id()) {
            warn!("Refusing to request invalid face {}", face);
            self.listeners.fire_failed(&face);
            return;
        }

        let dispatched = {
            let mut state = self.state.lock().expect("askface state mutex poisoned");
            if !state.enqueue(face) {
                return;
            }
            state.drain(self.limit)
        };
        self.dispatch(dispatched);
    }

    fn add_listener(&self, listener: Arc<dyn FaceQueueListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn FaceQueueListener>) {
        self.listeners.remove(listener);
    }
}
