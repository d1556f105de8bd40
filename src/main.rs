//! # pod-shuffle
//!
//! A personal audio player that learns from what you skip. Each track in
//! the library carries an embedding; the player keeps a taste vector, moves
//! it towards tracks you finish and away from tracks you skip, and always
//! plays the unplayed track closest to it.
//!
//! ## Usage
//!
//! ```bash
//! # Play with the adaptive queue
//! pod-shuffle play ~/Music/embeddings.json
//!
//! # Plain shuffle, quieter
//! pod-shuffle play ~/Music/embeddings.json --mode shuffle --volume 0.5
//!
//! # What does the library contain?
//! pod-shuffle info ~/Music/embeddings.json
//!
//! # Which files still need embeddings?
//! pod-shuffle scan ~/Music --library ~/Music/embeddings.json
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use pod_shuffle::cli::{self, Command};
use pod_shuffle::completion;
use pod_shuffle::config::{PlayerConfig, QueueMode};
use pod_shuffle::controller::LineController;
use pod_shuffle::library::{discover, LibraryFile, AUDIO_EXTENSIONS};
use pod_shuffle::{
    AdaptiveQueue, AudioOutput, CodecAdapter, LearningContext, Library, MusicQueue, Player,
    PlayerControls, ShuffledQueue, SymphoniaCodec,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Main entry point.
///
/// Initializes logging, parses command-line arguments, and routes commands.
///
/// # Logging
///
/// Controlled via `RUST_LOG`:
/// - `RUST_LOG=debug pod-shuffle play` - Enable debug logging
/// - `RUST_LOG=pod_shuffle::queue=debug pod-shuffle play` - Learning steps only
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    match args.command {
        Command::Play {
            library,
            mode,
            volume,
            sample_rate,
            buffer_ms,
            dry_run,
        } => {
            let mut config = PlayerConfig::load()?;
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(volume) = volume {
                config.initial_volume = volume;
            }
            if let Some(rate) = sample_rate {
                config.output_sample_rate = rate;
            }
            if let Some(ms) = buffer_ms {
                config.buffer_ms = ms;
            }
            config.validate()?;

            let library = library
                .or_else(|| config.library.clone())
                .ok_or_else(|| anyhow!("No library given and none set in the config file"))?;
            play(&library, &config, dry_run)?;
        }
        Command::Info { library } => {
            show_info(&library)?;
        }
        Command::Scan { dir, library } => {
            let library = match library {
                Some(path) => Some(path),
                None => PlayerConfig::load()?.library,
            };
            scan(&dir, library.as_deref())?;
        }
        Command::Completion { shell } => {
            completion::print_completions(shell);
        }
    }

    Ok(())
}

fn load_library(path: &Path) -> Result<Arc<Library>> {
    let library = Library::load(path)
        .with_context(|| format!("Failed to load library {}", path.display()))?;
    if library.is_empty() {
        bail!("Library {} has no playable entries", path.display());
    }
    Ok(Arc::new(library))
}

fn play(library_path: &Path, config: &PlayerConfig, dry_run: bool) -> Result<()> {
    let library = load_library(library_path)?;
    info!(
        "Loaded {} tracks ({}-d embeddings)",
        library.len(),
        library.dim()
    );

    let codec: Arc<dyn CodecAdapter> = Arc::new(SymphoniaCodec);
    let mut rng = rand::thread_rng();
    let queue: Box<dyn MusicQueue> = match config.mode {
        QueueMode::Adaptive => Box::new(AdaptiveQueue::new(
            library,
            codec,
            LearningContext::default(),
            &mut rng,
        )),
        QueueMode::Shuffle => Box::new(ShuffledQueue::new(library, codec, &mut rng)),
    };

    let output = if dry_run {
        AudioOutput::detached(config.output_sample_rate, config.output_block())
    } else {
        AudioOutput::open(config.output_sample_rate, config.output_block())
            .context("Failed to open audio output")?
    };

    let running = Arc::new(AtomicBool::new(true));
    let renderer = if output.is_detached() {
        Some(spawn_renderer(&output, config, Arc::clone(&running))?)
    } else {
        None
    };

    let player = Player::new(queue, output.handle(), config.player_options());
    let result = player
        .play()
        .context("Nothing to play")
        .and_then(|()| {
            LineController::new(io::stdin().lock())
                .run(&player)
                .context("Controller failed")
        });

    player.stop();
    running.store(false, Ordering::Release);
    if let Some(renderer) = renderer {
        if renderer.join().is_err() {
            warn!("Renderer thread panicked");
        }
    }
    result
}

/// Pull blocks from a detached output at the pace a device would.
fn spawn_renderer(
    output: &AudioOutput,
    config: &PlayerConfig,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let handle = output.handle();
    let frames = output.block_frames();
    let pace = config.output_block();
    debug!("Dry run: rendering {frames} frames every {pace:?}");

    thread::Builder::new()
        .name("dry-run-render".to_string())
        .spawn(move || {
            let mut block = vec![[0.0; 2]; frames];
            while running.load(Ordering::Acquire) {
                handle.render_into(&mut block);
                thread::sleep(pace);
            }
        })
        .context("Failed to start render thread")
}

fn show_info(path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read library {}", path.display()))?;
    let file: LibraryFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid library file {}", path.display()))?;

    let listed = file.files.len();
    let missing = file
        .files
        .keys()
        .filter(|relative| !file.dir.join(relative).is_file())
        .count();
    let dir = file.dir.clone();
    let library = Library::from_file(file);

    println!("Library:    {}", path.display());
    println!("Base dir:   {}", dir.display());
    println!("Listed:     {listed}");
    println!("Playable:   {}", library.len());
    println!("Missing:    {missing}");
    println!("Rejected:   {}", listed.saturating_sub(missing + library.len()));
    println!("Dimension:  {}", library.dim());
    Ok(())
}

fn scan(dir: &Path, library: Option<&Path>) -> Result<()> {
    let files = discover(dir, AUDIO_EXTENSIONS)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;
    info!("Found {} audio files under {}", files.len(), dir.display());

    let without: Vec<PathBuf> = match library {
        Some(path) => Library::load(path)
            .with_context(|| format!("Failed to load library {}", path.display()))?
            .missing_from(&files),
        None => {
            warn!("No library given; every file is listed");
            files
        }
    };

    for path in &without {
        println!("{}", path.display());
    }
    eprintln!("{} of the scanned files have no embedding", without.len());
    Ok(())
}
