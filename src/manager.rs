// this_file: src/manager.rs
//! Public façade of the face pipeline.
//!
//! [`FacesManager::get_images`] never blocks: it answers from the resolved
//! cache or hands out a sentinel and asks the queue for the real images.
//! Listeners hear about every face whose images changed.

use crate::config::FacesConfig;
use crate::error::{Error, Result};
use crate::face::{Face, FaceImages, FaceRegistry, EMPTY_FACE_ID};
use crate::memory_cache::{ResolvedCacheStats, ResolvedFaceCache};
use crate::queue::{FaceQueue, FaceQueueListener, Listeners};
use crate::scale::downscaled_len;
use image::{Rgba, RgbaImage};
use log::{debug, info, trace};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, RwLock, Weak};

/// Notified when the images of a face changed.
pub trait FacesManagerListener: Send + Sync {
    /// `face` has new images; anything showing it should be redrawn
    fn face_updated(&self, face: &Arc<Face>);
}

const PLACEHOLDER_BACKGROUND: Rgba<u8> = Rgba([48, 48, 48, 255]);
const PLACEHOLDER_BORDER: Rgba<u8> = Rgba([128, 128, 128, 255]);
const PLACEHOLDER_GLYPH: Rgba<u8> = Rgba([255, 215, 0, 255]);

const QUESTION_MARK: [&str; 7] = [
    ".###.", //
    "#...#", //
    "....#", //
    "...#.", //
    "..#..", //
    ".....", //
    "..#..",
];

/// Draw the built-in "unknown face" image: a question mark on a dark square.
pub fn placeholder_image(size: u32) -> RgbaImage {
    let mut image = RgbaImage::from_pixel(size, size, PLACEHOLDER_BACKGROUND);
    if size == 0 {
        return image;
    }
    for i in 0..size {
        image.put_pixel(i, 0, PLACEHOLDER_BORDER);
        image.put_pixel(i, size - 1, PLACEHOLDER_BORDER);
        image.put_pixel(0, i, PLACEHOLDER_BORDER);
        image.put_pixel(size - 1, i, PLACEHOLDER_BORDER);
    }

    let cell = (size / 10).max(1);
    let x0 = size.saturating_sub(5 * cell) / 2;
    let y0 = size.saturating_sub(7 * cell) / 2;
    for (row, line) in QUESTION_MARK.iter().enumerate() {
        for (col, _) in line.bytes().enumerate().filter(|(_, b)| *b == b'#') {
            for dy in 0..cell {
                for dx in 0..cell {
                    let x = x0 + col as u32 * cell + dx;
                    let y = y0 + row as u32 * cell + dy;
                    if x < size && y < size {
                        image.put_pixel(x, y, PLACEHOLDER_GLYPH);
                    }
                }
            }
        }
    }
    image
}

/// Fully transparent images for unoccupied squares.
pub fn empty_face_images(square_size: u32) -> FaceImages {
    FaceImages::new(
        RgbaImage::new(square_size, square_size),
        RgbaImage::new(square_size * 2, square_size * 2),
        RgbaImage::new(downscaled_len(square_size), downscaled_len(square_size)),
    )
}

fn unknown_face_images(config: &FacesConfig) -> Result<FaceImages> {
    match &config.unknown_image {
        Some(path) => load_unknown_image(path),
        None => Ok(FaceImages::from_original(placeholder_image(config.square_size))),
    }
}

fn load_unknown_image(path: &Path) -> Result<FaceImages> {
    let bytes = std::fs::read(path)?;
    FaceImages::decode(&bytes).map_err(|e| {
        Error::Config(format!(
            "Unusable unknown image {}: {}",
            path.display(),
            e
        ))
    })
}

enum Outcome {
    Updated,
    Retry(Arc<Face>),
    Ignored,
}

/// Forwards queue results to the manager without keeping it alive.
struct QueueBridge(Weak<FacesManager>);

impl FaceQueueListener for QueueBridge {
    fn face_loaded(&self, face: &Arc<Face>, images: &FaceImages) {
        if let Some(manager) = self.0.upgrade() {
            manager.resolve(face, images.clone());
        }
    }

    fn face_failed(&self, face: &Arc<Face>) {
        if let Some(manager) = self.0.upgrade() {
            debug!("Face {} could not be loaded, showing unknown image", face);
            let unknown = manager.unknown.clone();
            manager.resolve(face, unknown);
        }
    }
}

/// Resolves face ids to images.
pub struct FacesManager {
    registry: FaceRegistry,
    resolved: ResolvedFaceCache,
    queue: Arc<dyn FaceQueue>,
    empty_face: Arc<Face>,
    empty: FaceImages,
    unknown: FaceImages,
    listeners: Listeners<dyn FacesManagerListener>,
    /// Held for reading while a result is applied, for writing by `reset`.
    epoch: RwLock<()>,
    bridge: Arc<dyn FaceQueueListener>,
}

impl FacesManager {
    /// Create a manager that loads missing faces through `queue`
    pub fn new(queue: Arc<dyn FaceQueue>, config: &FacesConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.memory_cache_capacity)
            .ok_or_else(|| Error::Config("memory_cache_capacity must be positive".to_string()))?;
        let empty = empty_face_images(config.square_size);
        let unknown = unknown_face_images(config)?;

        let manager = Arc::new_cyclic(|weak: &Weak<FacesManager>| {
            let bridge: Arc<dyn FaceQueueListener> = Arc::new(QueueBridge(weak.clone()));
            FacesManager {
                registry: FaceRegistry::new(),
                resolved: ResolvedFaceCache::new(capacity),
                queue,
                empty_face: Arc::new(Face::new(EMPTY_FACE_ID, "empty", 0)),
                empty,
                unknown,
                listeners: Listeners::new(),
                epoch: RwLock::new(()),
                bridge,
            }
        });
        manager.queue.add_listener(Arc::clone(&manager.bridge));
        info!(
            "Face manager ready (square size {}, {} faces in memory)",
            config.square_size, capacity
        );
        Ok(manager)
    }

    /// Record a face announced by the server.
    ///
    /// Images resolved for an earlier identity with the same id are dropped.
    pub fn define_face(&self, id: u32, name: impl Into<String>, checksum: u32) -> Arc<Face> {
        let _epoch = self.epoch.read().expect("face manager epoch lock poisoned");
        let face = self.registry.define(id, name, checksum);
        if self.resolved.remove(id).is_some() {
            debug!("Face {} redefined, dropping resolved images", face);
        }
        face
    }

    /// Images for a face id; returns immediately.
    ///
    /// Id 0 yields the empty images. A face that is not resolved yet yields
    /// the unknown images and is requested from the queue.
    pub fn get_images(&self, face_id: u32) -> FaceImages {
        if face_id == EMPTY_FACE_ID {
            return self.empty.clone();
        }
        if let Some(images) = self.resolved.get(face_id) {
            return images;
        }
        let face = self.registry.get_or_create(face_id);
        trace!("Face {} not resolved, requesting", face);
        self.queue.load_face(face);
        self.unknown.clone()
    }

    /// Image as delivered by the server
    pub fn get_original(&self, face_id: u32) -> Arc<RgbaImage> {
        Arc::clone(self.get_images(face_id).original())
    }

    /// Double size image
    pub fn get_scaled(&self, face_id: u32) -> Arc<RgbaImage> {
        Arc::clone(self.get_images(face_id).scaled())
    }

    /// Magic map image
    pub fn get_magic_map(&self, face_id: u32) -> Arc<RgbaImage> {
        Arc::clone(self.get_images(face_id).magic_map())
    }

    /// Face identity for an id, requesting its images if necessary.
    ///
    /// Id 0 yields a fixed empty face that is never registered.
    pub fn get_face(&self, face_id: u32) -> Arc<Face> {
        if face_id == EMPTY_FACE_ID {
            return Arc::clone(&self.empty_face);
        }
        self.get_images(face_id);
        self.registry.get_or_create(face_id)
    }

    /// Like [`FacesManager::get_face`] but `None` for the empty face
    pub fn get_face_opt(&self, face_id: u32) -> Option<Arc<Face>> {
        if face_id == EMPTY_FACE_ID {
            return None;
        }
        Some(self.get_face(face_id))
    }

    /// The images shown for id 0
    pub fn empty_images(&self) -> &FaceImages {
        &self.empty
    }

    /// The images shown while a face is unresolved or after it failed
    pub fn unknown_images(&self) -> &FaceImages {
        &self.unknown
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn FacesManagerListener>) {
        self.listeners.add(listener);
    }

    /// Unregister a listener; returns whether it was registered
    pub fn remove_listener(&self, listener: &Arc<dyn FacesManagerListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Forget all faces and pending requests, e.g. after reconnecting.
    pub fn reset(&self) {
        let _epoch = self.epoch.write().expect("face manager epoch lock poisoned");
        info!(
            "Resetting face manager ({} faces known)",
            self.registry.len()
        );
        self.registry.clear();
        self.resolved.clear();
        self.queue.reset();
    }

    /// Resolved cache statistics
    pub fn cache_stats(&self) -> ResolvedCacheStats {
        self.resolved.stats()
    }

    /// Number of face identities known for this connection
    pub fn known_faces(&self) -> usize {
        self.registry.len()
    }

    fn resolve(&self, face: &Arc<Face>, images: FaceImages) {
        let outcome = {
            let _epoch = self.epoch.read().expect("face manager epoch lock poisoned");
            if self.registry.is_current(face) {
                self.resolved.insert(face.id(), images);
                Outcome::Updated
            } else {
                trace!("Discarding result for stale face {}", face);
                match self.registry.get(face.id()) {
                    Some(current) if !self.resolved.contains(current.id()) => {
                        Outcome::Retry(current)
                    }
                    _ => Outcome::Ignored,
                }
            }
        };

        match outcome {
            Outcome::Updated => self.fire_face_updated(face),
            // The id was redefined while the old identity was loading.
            Outcome::Retry(current) => self.queue.load_face(current),
            Outcome::Ignored => {}
        }
    }

    fn fire_face_updated(&self, face: &Arc<Face>) {
        for listener in self.listeners.snapshot().iter() {
            listener.face_updated(face);
        }
    }
}

impl Drop for FacesManager {
    fn drop(&mut self) {
        self.queue.remove_listener(&self.bridge);
    }
}
