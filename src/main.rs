// this_file: src/main.rs
//! Facecache CLI - face image scaling and disk cache tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecache::config::FacesConfig;
use facecache::{logging, Face, FaceImages, FileCache, ImageCache};
use image::RgbaImage;
use log::{debug, error, info};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Facecache - face image scaling and disk cache tool
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set log level (error, warn, info, debug, trace); debug builds default to debug
    #[arg(short = 'l', long, global = true, default_value = logging::default_level())]
    log_level: String,

    /// Enable quiet mode (only errors)
    #[arg(short = 'q', long, global = true, conflicts_with = "log_level")]
    quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the 2x and magic map variants of a PNG
    Scale {
        /// Source PNG
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving <stem>.x2.png and <stem>.mm.png
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Store a PNG and its derived variants in the disk caches
    Import {
        /// Configuration file naming the cache directory
        #[arg(short, long)]
        config: PathBuf,

        /// Face name
        #[arg(short, long)]
        name: String,

        /// Face checksum
        #[arg(long, default_value_t = 0)]
        checksum: u32,

        /// Source PNG
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show which variants of a face are cached
    Inspect {
        /// Configuration file naming the cache directory
        #[arg(short, long)]
        config: PathBuf,

        /// Face name
        #[arg(short, long)]
        name: String,

        /// Face checksum
        #[arg(long, default_value_t = 0)]
        checksum: u32,
    },

    /// Validate a configuration file
    Validate {
        /// Input file (uses stdin if not specified)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet { "error".to_string() } else { cli.log_level.clone() };
    logging::init_logging(&log_level, cli.quiet, true);

    match cli.command {
        Commands::Scale { input, output_dir } => scale_file(&input, &output_dir)?,
        Commands::Import {
            config,
            name,
            checksum,
            input,
        } => import_face(&config, Face::new(0, name, checksum), &input)?,
        Commands::Inspect {
            config,
            name,
            checksum,
        } => inspect_face(&config, &Face::new(0, name, checksum))?,
        Commands::Validate { input } => validate_config(input)?,
        Commands::Version => {
            println!("facecache version {}", facecache::VERSION);
            println!("Face image pipeline with Scale2x and magic map scaling");
        }
    }

    Ok(())
}

fn read_face_png(path: &Path) -> Result<FaceImages> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let images =
        FaceImages::decode(&bytes).with_context(|| format!("decoding {}", path.display()))?;
    debug!(
        "Decoded {} ({}x{})",
        path.display(),
        images.original().width(),
        images.original().height()
    );
    Ok(images)
}

fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))
}

/// Scale one PNG into the output directory
fn scale_file(input: &Path, output_dir: &Path) -> Result<()> {
    let t0 = Instant::now();
    let images = read_face_png(input)?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("{} has no usable file name", input.display()))?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let scaled_path = output_dir.join(format!("{}.x2.png", stem));
    let magic_map_path = output_dir.join(format!("{}.mm.png", stem));
    save_png(images.scaled(), &scaled_path)?;
    save_png(images.magic_map(), &magic_map_path)?;

    info!("Scaled {} in {:?}", input.display(), t0.elapsed());
    println!(
        "{} ({}x{})",
        scaled_path.display(),
        images.scaled().width(),
        images.scaled().height()
    );
    println!(
        "{} ({}x{})",
        magic_map_path.display(),
        images.magic_map().width(),
        images.magic_map().height()
    );
    Ok(())
}

fn variant_dirs(config: &FacesConfig) -> [(&'static str, PathBuf); 3] {
    [
        ("original", config.original_dir()),
        ("scaled", config.scaled_dir()),
        ("magic_map", config.magic_map_dir()),
    ]
}

/// Populate all three disk caches for a face
fn import_face(config_path: &Path, face: Face, input: &Path) -> Result<()> {
    let config = FacesConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let images = read_face_png(input)?;

    let variants = [images.original(), images.scaled(), images.magic_map()];
    for ((label, dir), image) in variant_dirs(&config).into_iter().zip(variants) {
        let cache = FileCache::new(&dir)?;
        let path = cache.store(&face, image)?;
        println!("{}: {}", label, path.display());
    }
    info!("Imported {} ({})", face.name(), input.display());
    Ok(())
}

/// Report the cached variants of a face
fn inspect_face(config_path: &Path, face: &Face) -> Result<()> {
    let config = FacesConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let mut cached = 0;
    for (label, dir) in variant_dirs(&config) {
        if !dir.is_dir() {
            println!("{}: missing (no directory {})", label, dir.display());
            continue;
        }
        let cache = FileCache::new(&dir)?;
        match cache.load(face) {
            Some(image) => {
                cached += 1;
                println!(
                    "{}: {}x{} {}",
                    label,
                    image.width(),
                    image.height(),
                    cache.path_for(face).display()
                );
            }
            None => println!("{}: missing", label),
        }
    }
    println!("{}/3 variants cached", cached);
    Ok(())
}

/// Validate a configuration file
fn validate_config(input: Option<PathBuf>) -> Result<()> {
    let result = match input {
        Some(path) => FacesConfig::from_file(path),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            FacesConfig::from_json_str(&buffer)
        }
    };

    match result {
        Ok(config) => {
            println!("✓ Valid configuration");
            println!("  Cache directory: {}", config.cache_dir.display());
            println!(
                "  Concurrent askface commands: {}",
                config.concurrent_askface_commands
            );
            println!("  Memory cache capacity: {}", config.memory_cache_capacity);
            println!("  Square size: {}", config.square_size);
            Ok(())
        }
        Err(e) => {
            error!("Invalid configuration: {}", e);
            println!("✗ Invalid configuration: {}", e);
            Err(e.into())
        }
    }
}
