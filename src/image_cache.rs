// this_file: src/image_cache.rs
//! Persistent image caches addressed by face name and checksum.
//!
//! A cache never reports errors to its caller: a missing, empty or corrupt
//! entry is a miss, and a failed write only costs a future miss.

use crate::config::FacesConfig;
use crate::error::Result;
use crate::face::{Face, FaceImages};
use image::{ImageFormat, RgbaImage};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Storage for one image variant.
pub trait ImageCache: Send + Sync {
    /// Load the image stored for `face`, or `None` on any kind of miss
    fn load(&self, face: &Face) -> Option<RgbaImage>;

    /// Store the image for `face`; failures are logged and otherwise ignored
    fn save(&self, face: &Face, image: &RgbaImage);
}

/// Turn a face name into a single safe file name component.
///
/// Percent-encoding keeps the mapping one-to-one, so distinct names never
/// share a file. A leading dot is encoded too, which rules out `.` and `..`.
pub fn encode_name(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    let encoded = urlencoding::encode(name);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}

/// Directory of PNG files, one per face.
///
/// Files are named `<name>.<checksum>.png` so a new checksum never hits an
/// outdated image.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open a cache directory, creating it if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing the image of `face`
    pub fn path_for(&self, face: &Face) -> PathBuf {
        let (name, checksum) = face.cache_key();
        self.dir
            .join(format!("{}.{:08x}.png", encode_name(name), checksum))
    }

    /// Write the image for `face`, reporting failures; returns the file written
    pub fn store(&self, face: &Face, image: &RgbaImage) -> Result<PathBuf> {
        let path = self.path_for(face);
        let mut encoded = Vec::new();
        image.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;

        let tmp = path.with_extension("png.tmp");
        fs::write(&tmp, &encoded)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(path)
    }
}

impl ImageCache for FileCache {
    fn load(&self, face: &Face) -> Option<RgbaImage> {
        let path = self.path_for(face);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cache miss for face {}: {}", face, path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return None;
            }
        };

        if data.is_empty() {
            warn!("Ignoring empty cache file {}", path.display());
            return None;
        }

        match image::load_from_memory_with_format(&data, ImageFormat::Png) {
            Ok(decoded) => {
                let image = decoded.to_rgba8();
                if image.width() == 0 || image.height() == 0 {
                    warn!("Ignoring zero-size cache file {}", path.display());
                    None
                } else {
                    Some(image)
                }
            }
            Err(e) => {
                warn!("Ignoring corrupt cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save(&self, face: &Face, image: &RgbaImage) {
        match self.store(face, image) {
            Ok(path) => debug!("Saved face {} to {}", face, path.display()),
            Err(e) => warn!("Cannot save face {} to {}: {}", face, self.dir.display(), e),
        }
    }
}

/// In-process cache; contents are lost with the instance.
#[derive(Debug, Default)]
pub struct MemoryImageCache {
    images: Mutex<HashMap<(String, u32), RgbaImage>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryImageCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored images
    pub fn len(&self) -> usize {
        self.images.lock().expect("memory image cache mutex poisoned").len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `load` calls so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ImageCache for MemoryImageCache {
    fn load(&self, face: &Face) -> Option<RgbaImage> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let (name, checksum) = face.cache_key();
        self.images
            .lock()
            .expect("memory image cache mutex poisoned")
            .get(&(name.to_string(), checksum))
            .cloned()
    }

    fn save(&self, face: &Face, image: &RgbaImage) {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let (name, checksum) = face.cache_key();
        self.images
            .lock()
            .expect("memory image cache mutex poisoned")
            .insert((name.to_string(), checksum), image.clone());
    }
}

/// One cache per image variant.
#[derive(Clone)]
pub struct ImageCaches {
    pub original: Arc<dyn ImageCache>,
    pub scaled: Arc<dyn ImageCache>,
    pub magic_map: Arc<dyn ImageCache>,
}

impl ImageCaches {
    /// Bundle three caches
    pub fn new(
        original: Arc<dyn ImageCache>,
        scaled: Arc<dyn ImageCache>,
        magic_map: Arc<dyn ImageCache>,
    ) -> Self {
        Self {
            original,
            scaled,
            magic_map,
        }
    }

    /// File caches below the configured cache directory
    pub fn on_disk(config: &FacesConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(FileCache::new(config.original_dir())?),
            Arc::new(FileCache::new(config.scaled_dir())?),
            Arc::new(FileCache::new(config.magic_map_dir())?),
        ))
    }

    /// Load all three variants; any miss makes the whole face a miss
    pub fn load_all(&self, face: &Face) -> Option<FaceImages> {
        let original = self.original.load(face)?;
        let scaled = self.scaled.load(face)?;
        let magic_map = self.magic_map.load(face)?;
        Some(FaceImages::new(original, scaled, magic_map))
    }

    /// Store all three variants
    pub fn save_all(&self, face: &Face, images: &FaceImages) {
        self.original.save(face, images.original());
        self.scaled.save(face, images.scaled());
        self.magic_map.save(face, images.magic_map());
    }
}

impl std::fmt::Debug for ImageCaches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCaches").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::tempdir;

    fn test_image() -> RgbaImage {
        let mut image = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));
        image.put_pixel(1, 2, Rgba([200, 0, 0, 128]));
        image
    }

    #[test]
    fn encode_keeps_simple_names() {
        assert_eq!(encode_name("sword_01"), "sword_01");
        assert_eq!(encode_name("bug.111"), "bug.111");
    }

    #[test]
    fn encode_blocks_traversal() {
        assert_eq!(encode_name("../etc/passwd"), "%2E.%2Fetc%2Fpasswd");
        assert_eq!(encode_name("a/b\\c"), "a%2Fb%5Cc");
        assert_eq!(encode_name(".."), "%2E.");
        assert_eq!(encode_name(""), "%");
    }

    #[test]
    fn distinct_names_never_share_a_file() {
        let names = ["a b", "a/b", "a_b", "a%20b", "%2E", ".", "", "%"];
        let encoded: std::collections::HashSet<String> =
            names.iter().map(|name| encode_name(name)).collect();
        assert_eq!(encoded.len(), names.len());

        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let spaced = Face::new(1, "a b", 3);
        let underscored = Face::new(2, "a_b", 3);
        cache.save(&spaced, &test_image());
        assert!(cache.load(&spaced).is_some());
        assert!(cache.load(&underscored).is_none());
        assert_ne!(cache.path_for(&spaced), cache.path_for(&underscored));
    }

    #[test]
    fn file_cache_round_trip() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("cache")).unwrap();
        let face = Face::new(42, "sword_01", 7);

        assert!(cache.load(&face).is_none());
        cache.save(&face, &test_image());
        assert!(cache.path_for(&face).ends_with("sword_01.00000007.png"));
        assert_eq!(cache.load(&face).unwrap(), test_image());
    }

    #[test]
    fn file_cache_checksum_change_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache.save(&Face::new(1, "door", 1), &test_image());
        assert!(cache.load(&Face::new(1, "door", 2)).is_none());
        assert!(cache.load(&Face::new(9, "door", 1)).is_some());
    }

    #[test]
    fn file_cache_ignores_empty_and_corrupt_files() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let empty = Face::new(1, "empty", 0);
        let corrupt = Face::new(2, "corrupt", 0);
        fs::write(cache.path_for(&empty), b"").unwrap();
        fs::write(cache.path_for(&corrupt), b"\x89PNG garbage").unwrap();

        assert!(cache.load(&empty).is_none());
        assert!(cache.load(&corrupt).is_none());
    }

    #[test]
    fn file_cache_save_failure_is_swallowed() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("gone")).unwrap();
        fs::remove_dir(cache.dir()).unwrap();
        let face = Face::new(3, "lost", 0);
        cache.save(&face, &test_image());
        assert!(cache.load(&face).is_none());
    }

    #[test]
    fn memory_cache_counts_calls() {
        let cache = MemoryImageCache::new();
        let face = Face::new(1, "a", 0);
        assert!(cache.load(&face).is_none());
        cache.save(&face, &test_image());
        assert_eq!(cache.load(&face).unwrap(), test_image());
        assert_eq!(cache.load_count(), 2);
        assert_eq!(cache.save_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn load_all_requires_every_variant() {
        let original = Arc::new(MemoryImageCache::new());
        let scaled = Arc::new(MemoryImageCache::new());
        let magic_map = Arc::new(MemoryImageCache::new());
        let caches = ImageCaches::new(original.clone(), scaled.clone(), magic_map.clone());
        let face = Face::new(1, "a", 0);

        caches.save_all(&face, &FaceImages::from_original(test_image()));
        assert!(caches.load_all(&face).is_some());

        let other = Face::new(2, "b", 0);
        original.save(&other, &test_image());
        scaled.save(&other, &test_image());
        assert!(caches.load_all(&other).is_none());
    }
}
