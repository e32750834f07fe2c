// this_file: src/face.rs
//! Face identities, their image bundles and the id registry.

use crate::error::{Error, Result};
use crate::logging::Timer;
use crate::scale::{scale2x, scale8d};
use dashmap::DashMap;
use image::RgbaImage;
use log::warn;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Id of the empty face; never fetched.
pub const EMPTY_FACE_ID: u32 = 0;

/// Largest face id the server may assign.
pub const MAX_FACE_ID: u32 = 65535;

/// Whether `id` may be requested from the server.
pub fn is_valid_face_id(id: u32) -> bool {
    (1..=MAX_FACE_ID).contains(&id)
}

/// Identity of one server graphic.
///
/// Two faces are the same face when their ids match. The disk caches address
/// images by [`Face::cache_key`] instead.
#[derive(Debug, Clone)]
pub struct Face {
    id: u32,
    name: String,
    checksum: u32,
}

impl Face {
    /// Create a face identity
    pub fn new(id: u32, name: impl Into<String>, checksum: u32) -> Self {
        Self {
            id,
            name: name.into(),
            checksum,
        }
    }

    /// Server assigned id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Face name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content version announced by the server
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Key used to address this face's images in a disk cache
    pub fn cache_key(&self) -> (&str, u32) {
        (&self.name, self.checksum)
    }

    /// Whether both describe the same content: same id, name and checksum
    pub fn same_identity(&self, other: &Face) -> bool {
        self.id == other.id && self.checksum == other.checksum && self.name == other.name
    }
}

impl PartialEq for Face {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Face {}

impl Hash for Face {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Face {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.name)
    }
}

/// The three image variants of a face.
///
/// Cloning is cheap; the pixel buffers are shared.
#[derive(Debug, Clone)]
pub struct FaceImages {
    original: Arc<RgbaImage>,
    scaled: Arc<RgbaImage>,
    magic_map: Arc<RgbaImage>,
}

impl FaceImages {
    /// Bundle three already computed variants
    pub fn new(original: RgbaImage, scaled: RgbaImage, magic_map: RgbaImage) -> Self {
        Self {
            original: Arc::new(original),
            scaled: Arc::new(scaled),
            magic_map: Arc::new(magic_map),
        }
    }

    /// Derive the scaled and magic map variants from an original image
    pub fn from_original(original: RgbaImage) -> Self {
        let scaled = scale2x(&original);
        let magic_map = scale8d(&original);
        Self::new(original, scaled, magic_map)
    }

    /// Decode server image data (normally PNG) and derive all variants
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let original = image::load_from_memory(payload)?.to_rgba8();
        if original.width() == 0 || original.height() == 0 {
            return Err(Error::FaceData(format!(
                "image has zero size ({}x{})",
                original.width(),
                original.height()
            )));
        }
        let _timer = Timer::new(format!(
            "Scaling {}x{} face",
            original.width(),
            original.height()
        ));
        Ok(Self::from_original(original))
    }

    /// Image as delivered by the server
    pub fn original(&self) -> &Arc<RgbaImage> {
        &self.original
    }

    /// Double size image used by the map view
    pub fn scaled(&self) -> &Arc<RgbaImage> {
        &self.scaled
    }

    /// One-eighth size image used by the magic map
    pub fn magic_map(&self) -> &Arc<RgbaImage> {
        &self.magic_map
    }

    /// Whether both bundles share the same pixel buffers
    pub fn ptr_eq(&self, other: &FaceImages) -> bool {
        Arc::ptr_eq(&self.original, &other.original)
            && Arc::ptr_eq(&self.scaled, &other.scaled)
            && Arc::ptr_eq(&self.magic_map, &other.magic_map)
    }

    /// Approximate decoded size in bytes
    pub fn byte_size(&self) -> usize {
        self.original.as_raw().len() + self.scaled.as_raw().len() + self.magic_map.as_raw().len()
    }
}

/// Face identities known for the current connection.
#[derive(Debug, Default)]
pub struct FaceRegistry {
    faces: DashMap<u32, Arc<Face>>,
}

impl FaceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a face announced by the server, replacing any previous identity
    pub fn define(&self, id: u32, name: impl Into<String>, checksum: u32) -> Arc<Face> {
        let face = Arc::new(Face::new(id, name, checksum));
        self.faces.insert(id, Arc::clone(&face));
        face
    }

    /// Look up a face
    pub fn get(&self, id: u32) -> Option<Arc<Face>> {
        self.faces.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a face, creating a placeholder identity for unannounced ids
    pub fn get_or_create(&self, id: u32) -> Arc<Face> {
        let entry = self.faces.entry(id).or_insert_with(|| {
            warn!("Creating face object for unknown face {}", id);
            Arc::new(Face::new(id, format!("face#{}", id), 0))
        });
        Arc::clone(entry.value())
    }

    /// Whether `face` is still the identity registered for its id
    pub fn is_current(&self, face: &Arc<Face>) -> bool {
        self.faces
            .get(&face.id())
            .map(|entry| Arc::ptr_eq(entry.value(), face))
            .unwrap_or(false)
    }

    /// Number of known faces
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    /// Whether no face is known
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Forget all faces
    pub fn clear(&self) {
        self.faces.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn face_equality_uses_id() {
        let a = Face::new(42, "sword_01", 7);
        let b = Face::new(42, "sword_02", 9);
        let c = Face::new(43, "sword_01", 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.cache_key(), c.cache_key());
        assert_eq!(a.to_string(), "42:sword_01");
    }

    #[test]
    fn same_identity_compares_content_version() {
        let a = Face::new(8, "boots", 1);
        assert!(a.same_identity(&Face::new(8, "boots", 1)));
        assert!(!a.same_identity(&Face::new(8, "boots", 2)));
        assert!(!a.same_identity(&Face::new(8, "shoes", 1)));
        assert!(!a.same_identity(&Face::new(9, "boots", 1)));
    }

    #[test]
    fn valid_face_ids() {
        assert!(!is_valid_face_id(EMPTY_FACE_ID));
        assert!(is_valid_face_id(1));
        assert!(is_valid_face_id(MAX_FACE_ID));
        assert!(!is_valid_face_id(MAX_FACE_ID + 1));
    }

    #[test]
    fn images_from_original_derive_variants() {
        let images = FaceImages::from_original(RgbaImage::from_pixel(32, 32, Rgba([1, 2, 3, 255])));
        assert_eq!(images.original().dimensions(), (32, 32));
        assert_eq!(images.scaled().dimensions(), (64, 64));
        assert_eq!(images.magic_map().dimensions(), (4, 4));
        assert_eq!(images.byte_size(), (32 * 32 + 64 * 64 + 4 * 4) * 4);
        assert!(images.ptr_eq(&images.clone()));
    }

    #[test]
    fn decode_png_payload() {
        let mut png = Vec::new();
        RgbaImage::from_pixel(32, 16, Rgba([0, 255, 0, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let images = FaceImages::decode(&png).unwrap();
        assert_eq!(images.original().dimensions(), (32, 16));
        assert_eq!(images.scaled().dimensions(), (64, 32));
        assert_eq!(images.magic_map().dimensions(), (4, 2));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(FaceImages::decode(b"not an image"), Err(Error::Image(_))));
        assert!(FaceImages::decode(&[]).is_err());
    }

    #[test]
    fn registry_define_and_lookup() {
        let registry = FaceRegistry::new();
        assert!(registry.get(42).is_none());
        let face = registry.define(42, "sword_01", 7);
        let found = registry.get(42).unwrap();
        assert!(Arc::ptr_eq(&face, &found));
        assert!(registry.is_current(&face));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_creates_placeholder_identity() {
        let registry = FaceRegistry::new();
        let face = registry.get_or_create(17);
        assert_eq!(face.name(), "face#17");
        assert_eq!(face.checksum(), 0);
        assert!(Arc::ptr_eq(&face, &registry.get_or_create(17)));
    }

    #[test]
    fn redefinition_makes_old_identity_stale() {
        let registry = FaceRegistry::new();
        let old = registry.define(5, "a", 1);
        let new = registry.define(5, "a", 2);
        assert!(!registry.is_current(&old));
        assert!(registry.is_current(&new));

        registry.clear();
        assert!(!registry.is_current(&new));
        assert!(registry.is_empty());
    }
}
