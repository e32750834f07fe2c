// this_file: src/faces_queue.rs
//! Two-tier face queue: disk cache first, then the server.
//!
//! A disk miss forwards the face to the askface queue. Faces received from the
//! server are reported and also written back to the disk cache.
//!
//! Only the identity most recently requested for an id is escalated to the
//! server or saved; an identity superseded by a new checksum is dropped.

use crate::askface_queue::{AskfaceFaceQueue, AskfaceSender};
use crate::config::FacesConfig;
use crate::error::Result;
use crate::face::{is_valid_face_id, Face, FaceImages};
use crate::file_cache_queue::FileCacheFaceQueue;
use crate::image_cache::ImageCaches;
use crate::queue::{FaceQueue, FaceQueueListener, Listeners};
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::{Arc, Weak};

struct Tiers {
    file_cache: FileCacheFaceQueue,
    askface: AskfaceFaceQueue,
    listeners: Listeners<dyn FaceQueueListener>,
    /// Latest identity requested per id; cleared on reset.
    requested: DashMap<u32, Arc<Face>>,
}

impl Tiers {
    fn is_latest(&self, face: &Face) -> bool {
        self.requested
            .get(&face.id())
            .is_some_and(|latest| latest.same_identity(face))
    }
}

struct DiskTierListener(Weak<Tiers>);

impl FaceQueueListener for DiskTierListener {
    fn face_loaded(&self, face: &Arc<Face>, images: &FaceImages) {
        if let Some(tiers) = self.0.upgrade() {
            debug!("Face {} loaded from disk cache", face);
            tiers.listeners.fire_loaded(face, images);
        }
    }

    fn face_failed(&self, face: &Arc<Face>) {
        if let Some(tiers) = self.0.upgrade() {
            if !tiers.is_latest(face) {
                debug!("Face {} superseded, not asking server", face);
                return;
            }
            debug!("Face {} not in disk cache, asking server", face);
            tiers.askface.load_face(Arc::clone(face));
        }
    }
}

struct ServerTierListener(Weak<Tiers>);

impl FaceQueueListener for ServerTierListener {
    fn face_loaded(&self, face: &Arc<Face>, images: &FaceImages) {
        if let Some(tiers) = self.0.upgrade() {
            if tiers.is_latest(face) {
                tiers.file_cache.save_face(Arc::clone(face), images.clone());
            } else {
                debug!("Not caching superseded face {}", face);
            }
            tiers.listeners.fire_loaded(face, images);
        }
    }

    fn face_failed(&self, face: &Arc<Face>) {
        if let Some(tiers) = self.0.upgrade() {
            tiers.listeners.fire_failed(face);
        }
    }
}

/// Disk cache backed by server requests.
pub struct FacesQueue {
    tiers: Arc<Tiers>,
}

impl FacesQueue {
    /// Chain a disk queue over `caches` with an askface queue over `sender`
    pub fn new(sender: Arc<dyn AskfaceSender>, caches: ImageCaches, limit: usize) -> Result<Self> {
        let tiers = Arc::new(Tiers {
            file_cache: FileCacheFaceQueue::new(caches)?,
            askface: AskfaceFaceQueue::new(sender, limit),
            listeners: Listeners::new(),
            requested: DashMap::new(),
        });
        tiers
            .file_cache
            .add_listener(Arc::new(DiskTierListener(Arc::downgrade(&tiers))));
        tiers
            .askface
            .add_listener(Arc::new(ServerTierListener(Arc::downgrade(&tiers))));
        Ok(Self { tiers })
    }

    /// Chain using the on-disk caches and limits from `config`
    pub fn from_config(sender: Arc<dyn AskfaceSender>, config: &FacesConfig) -> Result<Self> {
        Self::new(
            sender,
            ImageCaches::on_disk(config)?,
            config.concurrent_askface_commands,
        )
    }

    /// Image data received from the server
    pub fn face_received(&self, face_id: u32, payload: &[u8]) {
        self.tiers.askface.face_received(face_id, payload);
    }

    /// Wait until queued disk loads and saves have finished
    pub fn flush(&self) {
        self.tiers.file_cache.flush();
    }

    /// The disk tier
    pub fn file_cache(&self) -> &FileCacheFaceQueue {
        &self.tiers.file_cache
    }

    /// The server tier
    pub fn askface(&self) -> &AskfaceFaceQueue {
        &self.tiers.askface
    }
}

impl FaceQueue for FacesQueue {
    fn reset(&self) {
        self.tiers.requested.clear();
        self.tiers.file_cache.reset();
        self.tiers.askface.reset();
    }

    fn load_face(&self, face: Arc<Face>) {
        if !is_valid_face_id(face.id()) {
            warn!("Not loading invalid face {}", face);
            self.tiers.listeners.fire_failed(&face);
            return;
        }
        self.tiers.requested.insert(face.id(), Arc::clone(&face));
        self.tiers.file_cache.load_face(face);
    }

    fn add_listener(&self, listener: Arc<dyn FaceQueueListener>) {
        self.tiers.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn FaceQueueListener>) {
        self.tiers.listeners.remove(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_cache::MemoryImageCache;
    use crate::queue::testing::{Event, RecordingListener};
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<u32>>,
    }

    impl AskfaceSender for RecordingSender {
        fn send_askface(&self, face_id: u32) {
            self.sent.lock().unwrap().push(face_id);
        }
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(32, 32, Rgba([1, 2, 3, 255]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct Fixture {
        queue: FacesQueue,
        sender: Arc<RecordingSender>,
        listener: Arc<RecordingListener>,
        original: Arc<MemoryImageCache>,
        caches: ImageCaches,
    }

    fn fixture() -> Fixture {
        let original = Arc::new(MemoryImageCache::new());
        let caches = ImageCaches::new(
            original.clone(),
            Arc::new(MemoryImageCache::new()),
            Arc::new(MemoryImageCache::new()),
        );
        let sender = Arc::new(RecordingSender::default());
        let queue = FacesQueue::new(sender.clone(), caches.clone(), 8).unwrap();
        let listener = Arc::new(RecordingListener::default());
        queue.add_listener(listener.clone());
        Fixture {
            queue,
            sender,
            listener,
            original,
            caches,
        }
    }

    #[test]
    fn disk_miss_falls_back_to_server_and_saves() {
        let f = fixture();
        let face = Arc::new(Face::new(42, "sword_01", 7));
        f.queue.load_face(face.clone());
        f.queue.flush();
        assert_eq!(*f.sender.sent.lock().unwrap(), vec![42]);
        assert!(f.listener.events().is_empty());

        f.queue.face_received(42, &png());
        assert_eq!(f.listener.events(), vec![Event::Loaded(42)]);

        f.queue.flush();
        assert_eq!(f.original.save_count(), 1);
        assert!(f.caches.load_all(&face).is_some());
    }

    #[test]
    fn disk_hit_skips_server() {
        let f = fixture();
        let face = Arc::new(Face::new(42, "sword_01", 7));
        f.caches
            .save_all(&face, &FaceImages::from_original(RgbaImage::new(16, 16)));
        f.queue.load_face(face);
        assert_eq!(f.listener.wait_for(1), vec![Event::Loaded(42)]);
        assert!(f.sender.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn bad_server_data_fails() {
        let f = fixture();
        f.queue.load_face(Arc::new(Face::new(9, "broken", 0)));
        f.queue.flush();
        f.queue.face_received(9, b"nope");
        assert_eq!(f.listener.events(), vec![Event::Failed(9)]);
        f.queue.flush();
        assert_eq!(f.original.save_count(), 0);
    }

    #[test]
    fn superseded_identity_is_neither_requested_nor_cached() {
        let f = fixture();
        let old = Arc::new(Face::new(8, "boots", 1));
        let new = Arc::new(Face::new(8, "boots", 2));
        f.queue.load_face(old.clone());
        f.queue.load_face(new.clone());
        f.queue.flush();
        assert_eq!(*f.sender.sent.lock().unwrap(), vec![8]);

        f.queue.face_received(8, &png());
        assert_eq!(f.listener.events(), vec![Event::Loaded(8)]);
        f.queue.flush();
        assert!(f.caches.load_all(&new).is_some());
        assert!(f.caches.load_all(&old).is_none());
    }

    #[test]
    fn invalid_face_never_touches_disk() {
        let f = fixture();
        f.queue.load_face(Arc::new(Face::new(70000, "bogus", 0)));
        assert_eq!(f.listener.events(), vec![Event::Failed(70000)]);
        f.queue.flush();
        assert_eq!(f.original.load_count(), 0);
        assert!(f.sender.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_clears_both_tiers() {
        let f = fixture();
        f.queue.load_face(Arc::new(Face::new(1, "a", 0)));
        f.queue.flush();
        assert_eq!(f.queue.askface().pending_count(), 1);

        f.queue.reset();
        assert_eq!(f.queue.askface().pending_count(), 0);
        assert_eq!(f.queue.file_cache().pending_count(), 0);

        f.queue.face_received(1, &png());
        f.queue.flush();
        assert!(f.listener.events().is_empty());
        assert!(f.original.is_empty());
    }
}
