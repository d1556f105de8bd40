//! # Embedding Library
//!
//! Loads the JSON library produced by the desktop embedding extractor and
//! turns it into an immutable [`Library`]: absolute track paths mapped to
//! L2-normalized embedding vectors.
//!
//! ## File Format
//!
//! ```json
//! {
//!   "dir": "/home/user/Music",
//!   "Files": { "artist/album/track.flac": [0.12, -0.03, ...] }
//! }
//! ```
//!
//! Relative paths are resolved against `dir`. Entries whose file no longer
//! exists, or whose vector has the wrong length, are dropped with a warning
//! rather than failing the whole load.

use crate::algorithm::{self, EMBEDDING_DIM};
use crate::error::{PlayerError, Result};
use log::{debug, info, warn};
use path_absolutize::Absolutize;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// File extensions treated as playable audio during discovery.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a"];

/// Shared, read-only embedding vector.
pub type Embedding = Arc<[f32]>;

/// On-disk representation of the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryFile {
    pub dir: PathBuf,
    #[serde(rename = "Files", alias = "files")]
    pub files: HashMap<String, Vec<f32>>,
}

/// Normalized embeddings keyed by absolute track path.
#[derive(Debug, Clone, Default)]
pub struct Library {
    dir: PathBuf,
    dim: usize,
    tracks: BTreeMap<PathBuf, Embedding>,
}

impl Library {
    /// Read and validate a library file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    /// Individual bad entries are dropped, not reported as errors.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PlayerError::Library(format!(
                "library file '{}' does not exist",
                path.display()
            )));
        }

        let raw = fs::read_to_string(path)?;
        let file: LibraryFile = serde_json::from_str(&raw)?;
        info!(
            "Read library {} ({} entries, base {})",
            path.display(),
            file.files.len(),
            file.dir.display()
        );
        Ok(Self::from_file(file))
    }

    /// Resolve and validate an already parsed library file.
    #[must_use]
    pub fn from_file(file: LibraryFile) -> Self {
        let dir = file.dir;
        let entries = file.files.into_iter().filter_map(|(relative, vector)| {
            let joined = dir.join(&relative);
            let full = match joined.absolutize() {
                Ok(path) => path.into_owned(),
                Err(e) => {
                    warn!("Cannot resolve '{}': {e}", joined.display());
                    return None;
                }
            };
            if full.is_file() {
                Some((full, vector))
            } else {
                warn!(
                    "Removing '{}' from library as file does not exist on local drive",
                    full.display()
                );
                None
            }
        });

        let mut library = Self::from_entries(entries, EMBEDDING_DIM);
        library.dir = dir;
        library
    }

    /// Build a library from raw `(path, vector)` pairs without touching the
    /// filesystem. Vectors whose length differs from `dim` are dropped.
    pub fn from_entries<I, P>(entries: I, dim: usize) -> Self
    where
        I: IntoIterator<Item = (P, Vec<f32>)>,
        P: Into<PathBuf>,
    {
        let mut accepted: Vec<(PathBuf, Vec<f32>)> = entries
            .into_iter()
            .map(|(path, vector)| (path.into(), vector))
            .filter(|(path, vector)| {
                let ok = vector.len() == dim;
                if !ok {
                    warn!(
                        "Dropping '{}': embedding has {} dimensions, expected {dim}",
                        path.display(),
                        vector.len()
                    );
                }
                ok
            })
            .collect();

        accepted
            .par_iter_mut()
            .for_each(|(_, vector)| algorithm::normalize(vector));

        let tracks: BTreeMap<PathBuf, Embedding> = accepted
            .into_iter()
            .map(|(path, vector)| (path, Embedding::from(vector)))
            .collect();
        debug!("Library holds {} tracks of dimension {dim}", tracks.len());

        Self {
            dir: PathBuf::new(),
            dim,
            tracks,
        }
    }

    /// Base directory the library was resolved against.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// All track paths, in sorted order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.tracks.keys().cloned().collect()
    }

    #[must_use]
    pub fn embedding(&self, path: &Path) -> Option<&Embedding> {
        self.tracks.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Embedding)> {
        self.tracks.iter()
    }

    /// Paths among `files` that have no embedding in this library.
    #[must_use]
    pub fn missing_from(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        let known: HashSet<&PathBuf> = self.tracks.keys().collect();
        files
            .iter()
            .filter(|path| !known.contains(path))
            .cloned()
            .collect()
    }
}

/// Recursively find files under `root` whose extension is in `extensions`
/// (case-insensitive). Results are sorted.
///
/// # Errors
///
/// Returns an error if `root` cannot be walked.
pub fn discover(root: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| PlayerError::Library(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));
        if matches {
            let path = entry.path().absolutize()?.into_owned();
            found.push(path);
        }
    }
    found.sort();
    debug!("Discovered {} audio files under {}", found.len(), root.display());
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    #[test]
    fn test_from_entries_normalizes() {
        let library = Library::from_entries(
            vec![("a.flac", vec![3.0, 4.0]), ("b.flac", vec![0.0, 2.0])],
            2,
        );

        assert_eq!(library.len(), 2);
        for (_, embedding) in library.iter() {
            assert_abs_diff_eq!(algorithm::norm(embedding), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_from_entries_drops_wrong_dimension() {
        let library = Library::from_entries(
            vec![("a.flac", vec![1.0, 0.0]), ("b.flac", vec![1.0, 0.0, 0.0])],
            2,
        );

        assert_eq!(library.paths(), vec![PathBuf::from("a.flac")]);
    }

    #[test]
    fn test_load_drops_missing_files() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::write(temp.path().join("present.flac"), b"")?;

        let mut files = HashMap::new();
        files.insert("present.flac".to_string(), vec![1.0; EMBEDDING_DIM]);
        files.insert("gone.flac".to_string(), vec![1.0; EMBEDDING_DIM]);
        let file = LibraryFile {
            dir: temp.path().to_path_buf(),
            files,
        };
        let json_path = temp.path().join("library.json");
        fs::write(&json_path, serde_json::to_string(&file)?)?;

        let library = Library::load(&json_path)?;

        assert_eq!(library.len(), 1);
        let only = &library.paths()[0];
        assert!(only.ends_with("present.flac"));
        assert!(only.is_absolute());
        Ok(())
    }

    #[test]
    fn test_load_missing_library_file() {
        let result = Library::load(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(PlayerError::Library(_))));
    }

    #[test]
    fn test_discover_filters_extensions() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::create_dir_all(temp.path().join("album"))?;
        fs::write(temp.path().join("album/one.FLAC"), b"")?;
        fs::write(temp.path().join("album/two.mp3"), b"")?;
        fs::write(temp.path().join("cover.jpg"), b"")?;

        let found = discover(temp.path(), AUDIO_EXTENSIONS)?;

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| !p.ends_with("cover.jpg")));
        Ok(())
    }

    #[test]
    fn test_missing_from_reports_unknown_files() {
        let library = Library::from_entries(vec![("/m/a.flac", vec![1.0])], 1);
        let files = vec![PathBuf::from("/m/a.flac"), PathBuf::from("/m/b.flac")];

        assert_eq!(library.missing_from(&files), vec![PathBuf::from("/m/b.flac")]);
    }
}
