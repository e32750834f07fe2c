// this_file: src/lib.rs
//! Facecache - face image pipeline for game clients
//!
//! This library provides functionality for:
//! - A registry of server-announced face identities
//! - Scale2x magnification and 8x majority downsampling
//! - Disk caches of original, scaled and magic map images
//! - A single-worker disk queue and a bounded askface request queue
//! - A non-blocking manager handing out images or placeholders

pub mod askface_queue;
pub mod config;
pub mod error;
pub mod face;
pub mod faces_queue;
pub mod file_cache_queue;
pub mod image_cache;
pub mod logging;
pub mod manager;
pub mod memory_cache;
pub mod queue;
pub mod scale;

// Re-export commonly used types
pub use askface_queue::{AskfaceFaceQueue, AskfaceSender, CONCURRENT_ASKFACE_COMMANDS};
pub use config::FacesConfig;
pub use error::{Error, Result};
pub use face::{Face, FaceImages, FaceRegistry, EMPTY_FACE_ID, MAX_FACE_ID};
pub use faces_queue::FacesQueue;
pub use file_cache_queue::FileCacheFaceQueue;
pub use image_cache::{FileCache, ImageCache, ImageCaches, MemoryImageCache};
pub use manager::{FacesManager, FacesManagerListener};
pub use queue::{FaceQueue, FaceQueueListener};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
