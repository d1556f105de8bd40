//! # Play Queues
//!
//! A queue owns the navigation state of a listening session: the tracks
//! already played (`history`), the one playing now (`current`) and the ones
//! picked but not yet started (`lookahead`). Only `current` ever holds an open
//! decoder.
//!
//! ## Variants
//!
//! - [`ShuffledQueue`]: the library shuffled once, played front to back.
//! - [`AdaptiveQueue`]: keeps a taste vector in embedding space, nudges it
//!   toward tracks that were listened through and away from tracks that were
//!   skipped, and picks each next track as the unseen one closest to it.
//!
//! Both implement [`MusicQueue`], which is all the player sees.
//!
//! ## Failure Handling
//!
//! A track that cannot be opened is logged, marked unplayable and skipped.
//! Running out of playable tracks is reported as `None`, never as an error.

use crate::algorithm::{self, LearningContext};
use crate::library::{Embedding, Library};
use crate::source::CodecAdapter;
use crate::track::Track;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Navigation over a session's tracks.
pub trait MusicQueue: Send {
    /// The active track, or `None` when nothing is loaded.
    fn current(&self) -> Option<&Track>;

    fn current_mut(&mut self) -> Option<&mut Track>;

    /// Advance after `current` was played for `playtime` (a fraction in
    /// `[0, 1]`). Returns the new current track, or `None` when no playable
    /// track remains.
    fn next(&mut self, playtime: f32) -> Option<&mut Track>;

    /// Step back to the most recent history entry. With empty history nothing
    /// changes and `None` is returned.
    fn previous(&mut self) -> Option<&mut Track>;

    /// `true` when no track is waiting in the lookahead.
    fn is_empty(&self) -> bool;

    /// Drop every track waiting in the lookahead.
    fn clear(&mut self);

    /// Paths already played, oldest first.
    fn history(&self) -> &[PathBuf];

    /// Paths picked but not yet played, next first.
    fn lookahead(&self) -> Vec<&Path>;
}

/// History, current and lookahead shared by both queue variants.
struct Deck {
    library: Arc<Library>,
    codec: Arc<dyn CodecAdapter>,
    history: Vec<PathBuf>,
    current: Option<Track>,
    lookahead: VecDeque<PathBuf>,
    unplayable: HashSet<PathBuf>,
}

impl Deck {
    fn new(library: Arc<Library>, codec: Arc<dyn CodecAdapter>) -> Self {
        Self {
            library,
            codec,
            history: Vec::new(),
            current: None,
            lookahead: VecDeque::new(),
            unplayable: HashSet::new(),
        }
    }

    /// Open `path`, recording it as unplayable on failure.
    fn open(&mut self, path: &Path) -> Option<Track> {
        let embedding = self.library.embedding(path).cloned();
        match Track::load(path, embedding, Arc::clone(&self.codec)) {
            Ok(track) => Some(track),
            Err(e) => {
                warn!("Skipping unplayable track: {e}");
                self.unplayable.insert(path.to_path_buf());
                None
            }
        }
    }

    /// Close `current` and move it to history.
    fn retire_current(&mut self) {
        if let Some(mut track) = self.current.take() {
            track.close();
            self.history.push(track.path().to_path_buf());
        }
    }

    /// Pop lookahead entries until one opens.
    fn promote_lookahead(&mut self) -> bool {
        while let Some(path) = self.lookahead.pop_front() {
            if let Some(track) = self.open(&path) {
                info!("Now playing {}", path.display());
                self.current = Some(track);
                return true;
            }
        }
        false
    }

    fn rewind(&mut self) -> Option<&mut Track> {
        let path = self.history.pop()?;
        match self.open(&path) {
            Some(track) => {
                if let Some(mut old) = self.current.replace(track) {
                    old.close();
                    self.lookahead.push_front(old.path().to_path_buf());
                }
                info!("Back to {}", path.display());
            }
            None => {
                self.unplayable.remove(&path);
                self.history.push(path);
            }
        }
        self.current.as_mut()
    }

    fn clear(&mut self) -> Vec<PathBuf> {
        self.lookahead.drain(..).collect()
    }

    fn lookahead(&self) -> Vec<&Path> {
        self.lookahead.iter().map(PathBuf::as_path).collect()
    }
}

/// The library in one random order.
pub struct ShuffledQueue {
    deck: Deck,
}

impl ShuffledQueue {
    /// Shuffle `library` and open the first playable track.
    pub fn new<R: Rng>(
        library: Arc<Library>,
        codec: Arc<dyn CodecAdapter>,
        rng: &mut R,
    ) -> Self {
        let mut order = library.paths();
        order.shuffle(rng);

        let mut deck = Deck::new(library, codec);
        deck.lookahead = order.into();
        deck.promote_lookahead();
        debug!("Shuffled queue with {} tracks waiting", deck.lookahead.len());
        Self { deck }
    }
}

impl MusicQueue for ShuffledQueue {
    fn current(&self) -> Option<&Track> {
        self.deck.current.as_ref()
    }

    fn current_mut(&mut self) -> Option<&mut Track> {
        self.deck.current.as_mut()
    }

    fn next(&mut self, _playtime: f32) -> Option<&mut Track> {
        if self.deck.lookahead.is_empty() {
            return None;
        }
        self.deck.retire_current();
        self.deck.promote_lookahead();
        self.deck.current.as_mut()
    }

    fn previous(&mut self) -> Option<&mut Track> {
        self.deck.rewind()
    }

    fn is_empty(&self) -> bool {
        self.deck.lookahead.is_empty()
    }

    fn clear(&mut self) {
        self.deck.clear();
    }

    fn history(&self) -> &[PathBuf] {
        &self.deck.history
    }

    fn lookahead(&self) -> Vec<&Path> {
        self.deck.lookahead()
    }
}

/// Embedding-driven queue that learns from how much of each track was heard.
pub struct AdaptiveQueue {
    deck: Deck,
    /// Library entries in shuffled order; selection ties go to the earliest.
    order: Vec<(PathBuf, Embedding)>,
    /// history ∪ current ∪ lookahead.
    seen: HashSet<PathBuf>,
    taste: Vec<f32>,
    inertia: f32,
    context: LearningContext,
}

impl AdaptiveQueue {
    /// Shuffle `library`, seed the taste vector from the first
    /// `context.seed_tracks` entries and open the first playable one.
    pub fn new<R: Rng>(
        library: Arc<Library>,
        codec: Arc<dyn CodecAdapter>,
        context: LearningContext,
        rng: &mut R,
    ) -> Self {
        let mut order: Vec<(PathBuf, Embedding)> = library
            .iter()
            .map(|(path, embedding)| (path.clone(), Arc::clone(embedding)))
            .collect();
        order.shuffle(rng);

        let taste = algorithm::seed_taste(
            order
                .iter()
                .take(context.seed_tracks)
                .map(|(_, embedding)| &embedding[..]),
            library.dim(),
            rng,
        );

        let mut queue = Self {
            deck: Deck::new(library, codec),
            order,
            seen: HashSet::new(),
            taste,
            inertia: 1.0,
            context,
        };

        for index in 0..queue.order.len() {
            let path = queue.order[index].0.clone();
            if let Some(track) = queue.deck.open(&path) {
                info!("Starting adaptive session with {}", path.display());
                queue.seen.insert(path);
                queue.deck.current = Some(track);
                break;
            }
        }
        queue
    }

    /// The current taste vector (unit length).
    #[must_use]
    pub fn taste(&self) -> &[f32] {
        &self.taste
    }

    #[must_use]
    pub fn inertia(&self) -> f32 {
        self.inertia
    }

    /// Tracks that failed to open this session.
    #[must_use]
    pub fn unplayable(&self) -> &HashSet<PathBuf> {
        &self.deck.unplayable
    }

    fn is_candidate(&self, path: &Path) -> bool {
        !self.seen.contains(path) && !self.deck.unplayable.contains(path)
    }

    fn has_candidate(&self) -> bool {
        self.order.iter().any(|(path, _)| self.is_candidate(path))
    }

    /// Unseen, playable track closest to the taste vector.
    fn select_best(&self) -> Option<PathBuf> {
        let (paths, embeddings): (Vec<&PathBuf>, Vec<&[f32]>) = self
            .order
            .iter()
            .filter(|(path, _)| self.is_candidate(path))
            .map(|(path, embedding)| (path, &embedding[..]))
            .unzip();

        let best = algorithm::best_match(&self.taste, &embeddings)?;
        debug!(
            "Selected {} (similarity {:.3}) from {} candidates",
            paths[best].display(),
            algorithm::dot(&self.taste, embeddings[best]),
            paths.len()
        );
        Some(paths[best].clone())
    }

    /// Fold the listening outcome of `current` into the taste vector.
    fn learn(&mut self, playtime: f32) {
        self.inertia += playtime;
        let Some(embedding) = self
            .deck
            .current
            .as_ref()
            .and_then(|track| track.embedding().cloned())
        else {
            return;
        };

        let lr = algorithm::learning_rate(self.inertia, &self.context);
        let score = algorithm::feedback_score(playtime, &self.context);
        algorithm::update_taste(&mut self.taste, &embedding, lr * score);
        debug!("{playtime:.3} | {score:.3} | {lr:.3} | {:.3}", self.inertia);
    }
}

impl MusicQueue for AdaptiveQueue {
    fn current(&self) -> Option<&Track> {
        self.deck.current.as_ref()
    }

    fn current_mut(&mut self) -> Option<&mut Track> {
        self.deck.current.as_mut()
    }

    fn next(&mut self, playtime: f32) -> Option<&mut Track> {
        if self.deck.lookahead.is_empty() && !self.has_candidate() {
            info!("Every track in the library has been played");
            return None;
        }

        // Picked against the taste that was in effect while `current` played.
        if self.deck.lookahead.is_empty() {
            if let Some(path) = self.select_best() {
                self.seen.insert(path.clone());
                self.deck.lookahead.push_back(path);
            }
        }

        self.learn(playtime.clamp(0.0, 1.0));
        self.deck.retire_current();

        loop {
            if self.deck.promote_lookahead() {
                return self.deck.current.as_mut();
            }
            // Everything picked so far failed to open.
            let path = self.select_best()?;
            self.seen.insert(path.clone());
            self.deck.lookahead.push_back(path);
        }
    }

    fn previous(&mut self) -> Option<&mut Track> {
        self.deck.rewind()
    }

    fn is_empty(&self) -> bool {
        self.deck.lookahead.is_empty()
    }

    fn clear(&mut self) {
        for path in self.deck.clear() {
            self.seen.remove(&path);
        }
    }

    fn history(&self) -> &[PathBuf] {
        &self.deck.history
    }

    fn lookahead(&self) -> Vec<&Path> {
        self.deck.lookahead()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Format, MemoryCodec};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const DIM: usize = 6;

    fn embedding(seed: usize) -> Vec<f32> {
        (0..DIM)
            .map(|i| ((seed * 7 + i * 3) % 11) as f32 - 5.0 + seed as f32 * 0.01)
            .collect()
    }

    fn fixture(count: usize, playable: usize) -> (Arc<Library>, Arc<MemoryCodec>) {
        let mut codec = MemoryCodec::new();
        let entries: Vec<(String, Vec<f32>)> = (0..count)
            .map(|i| {
                let path = format!("/music/{i:02}.flac");
                if i < playable {
                    codec.insert_silence(&path, 64, Format::new(44_100, 2));
                }
                (path, embedding(i))
            })
            .collect();
        (
            Arc::new(Library::from_entries(entries, DIM)),
            Arc::new(codec),
        )
    }

    fn adaptive(count: usize, playable: usize, seed: u64) -> (AdaptiveQueue, Arc<MemoryCodec>) {
        let (library, codec) = fixture(count, playable);
        let mut rng = StdRng::seed_from_u64(seed);
        let queue =
            AdaptiveQueue::new(library, codec.clone(), LearningContext::default(), &mut rng);
        (queue, codec)
    }

    fn current_path(queue: &dyn MusicQueue) -> Option<PathBuf> {
        queue.current().map(|track| track.path().to_path_buf())
    }

    #[test]
    fn test_adaptive_never_repeats_until_exhausted() {
        let (mut queue, _) = adaptive(20, 20, 3);
        let mut played = vec![current_path(&queue).expect("first track")];

        while let Some(track) = queue.next(0.8) {
            played.push(track.path().to_path_buf());
        }

        let unique: HashSet<_> = played.iter().collect();
        assert_eq!(played.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_taste_stays_normalized() {
        let (mut queue, _) = adaptive(12, 12, 9);
        assert_abs_diff_eq!(algorithm::norm(queue.taste()), 1.0, epsilon = 1e-5);

        for playtime in [0.0, 0.1, 0.5, 0.9, 1.0, 0.3] {
            queue.next(playtime);
            assert_abs_diff_eq!(algorithm::norm(queue.taste()), 1.0, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(queue.inertia(), 1.0 + 2.8, epsilon = 1e-5);
    }

    #[test]
    fn test_next_picks_closest_to_taste_before_learning() {
        let (mut queue, _) = adaptive(5, 5, 11);
        let first = current_path(&queue).expect("first track");
        let finished = queue
            .current()
            .and_then(Track::embedding)
            .cloned()
            .expect("embedding");
        let taste_before = queue.taste().to_vec();

        let expected = queue
            .order
            .iter()
            .filter(|(path, _)| *path != first)
            .max_by(|a, b| {
                let score = |entry: &(PathBuf, Embedding)| algorithm::dot(&taste_before, &entry.1);
                score(a).total_cmp(&score(b))
            })
            .map(|(path, _)| path.clone());

        let mut expected_taste = taste_before.clone();
        let context = LearningContext::default();
        let lr = algorithm::learning_rate(1.1, &context);
        let score = algorithm::feedback_score(0.1, &context);
        algorithm::update_taste(&mut expected_taste, &finished, lr * score);

        let chosen = queue.next(0.1).map(|track| track.path().to_path_buf());

        assert_eq!(chosen, expected);
        assert_eq!(queue.history(), &[first]);
        for (got, want) in queue.taste().iter().zip(&expected_taste) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_initial_taste_averages_first_shuffled_tracks() {
        let (library, codec) = fixture(8, 8);
        let context = LearningContext::default();
        let queue = AdaptiveQueue::new(
            Arc::clone(&library),
            codec,
            context,
            &mut StdRng::seed_from_u64(21),
        );

        let mut replay = StdRng::seed_from_u64(21);
        let mut order: Vec<(PathBuf, Embedding)> = library
            .iter()
            .map(|(path, embedding)| (path.clone(), Arc::clone(embedding)))
            .collect();
        order.shuffle(&mut replay);
        assert_eq!(
            queue.order.iter().map(|(path, _)| path).collect::<Vec<_>>(),
            order.iter().map(|(path, _)| path).collect::<Vec<_>>()
        );

        let seeded = |count: usize, rng: &mut StdRng| {
            algorithm::seed_taste(
                order[..count].iter().map(|(_, embedding)| &embedding[..]),
                DIM,
                rng,
            )
        };
        let expected = seeded(context.seed_tracks, &mut replay.clone());
        let one_too_many = seeded(context.seed_tracks + 1, &mut replay.clone());

        for (got, want) in queue.taste().iter().zip(&expected) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-6);
        }
        assert!(queue
            .taste()
            .iter()
            .zip(&one_too_many)
            .any(|(got, other)| (got - other).abs() > 1e-4));
    }

    #[test]
    fn test_inertia_grows_without_an_embedding() {
        let (mut queue, codec) = adaptive(3, 3, 10);
        let path = current_path(&queue).expect("first track");
        let bare = Track::load(&path, None, codec).expect("reopen");
        if let Some(mut old) = queue.deck.current.replace(bare) {
            old.close();
        }
        let taste = queue.taste().to_vec();

        queue.learn(0.6);

        assert_abs_diff_eq!(queue.inertia(), 1.6, epsilon = 1e-6);
        assert_eq!(queue.taste(), taste.as_slice());
    }

    #[test]
    fn test_previous_then_next_round_trip() {
        let (mut queue, _) = adaptive(6, 6, 5);
        queue.next(1.0);
        let before_current = current_path(&queue);
        let before_history = queue.history().to_vec();

        let advanced = queue.next(0.4).map(|track| track.path().to_path_buf());
        let back = queue.previous().map(|track| track.path().to_path_buf());

        assert_eq!(back, before_current);
        assert_eq!(queue.history(), before_history.as_slice());
        assert_eq!(queue.lookahead(), vec![advanced.as_deref().expect("advanced")]);

        let forward = queue.next(0.0).map(|track| track.path().to_path_buf());
        assert_eq!(forward, advanced);
    }

    #[test]
    fn test_previous_with_empty_history_changes_nothing() {
        let (mut queue, _) = adaptive(3, 3, 1);
        let current = current_path(&queue);
        let taste = queue.taste().to_vec();

        assert!(queue.previous().is_none());
        assert_eq!(current_path(&queue), current);
        assert_eq!(queue.taste(), taste.as_slice());
    }

    #[test]
    fn test_exhausted_library_leaves_state_unchanged() {
        let (mut queue, _) = adaptive(3, 3, 2);
        queue.next(1.0);
        queue.next(1.0);
        let history = queue.history().to_vec();
        let current = current_path(&queue);
        let taste = queue.taste().to_vec();
        let inertia = queue.inertia();

        assert!(queue.next(1.0).is_none());
        assert_eq!(queue.history(), history.as_slice());
        assert_eq!(current_path(&queue), current);
        assert_eq!(queue.taste(), taste.as_slice());
        assert_eq!(queue.inertia(), inertia);
    }

    #[test]
    fn test_unplayable_tracks_are_skipped() {
        let (mut queue, _) = adaptive(6, 3, 8);
        let mut played: Vec<PathBuf> = current_path(&queue).into_iter().collect();
        while let Some(track) = queue.next(0.7) {
            played.push(track.path().to_path_buf());
        }

        let playable: HashSet<PathBuf> = (0..3)
            .map(|i| PathBuf::from(format!("/music/{i:02}.flac")))
            .collect();
        assert_eq!(played.len(), 3);
        assert_eq!(played.into_iter().collect::<HashSet<_>>(), playable);
        assert_eq!(queue.unplayable().len(), 3);
    }

    #[test]
    fn test_retired_tracks_are_closed() {
        let (mut queue, codec) = adaptive(4, 4, 4);
        let first = current_path(&queue).expect("first track");
        queue.next(1.0);

        assert_eq!(codec.closes(&first), 1);
        assert!(queue.current().is_some_and(Track::is_open));
    }

    #[test]
    fn test_clear_discards_lookahead_and_frees_candidates() {
        let (mut queue, _) = adaptive(4, 4, 6);
        queue.next(1.0);
        queue.previous();
        assert!(!queue.is_empty());

        queue.clear();

        assert!(queue.is_empty());
        assert!(queue.has_candidate());
    }

    #[test]
    fn test_shuffled_plays_every_track_once() {
        let (library, codec) = fixture(10, 10);
        let mut rng = StdRng::seed_from_u64(12);
        let mut queue = ShuffledQueue::new(library, codec, &mut rng);
        let mut played = vec![current_path(&queue).expect("first track")];

        while let Some(track) = queue.next(0.0) {
            played.push(track.path().to_path_buf());
        }

        let unique: HashSet<_> = played.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(queue.is_empty());
        assert_eq!(queue.history().len(), 9);
    }

    #[test]
    fn test_shuffled_previous_restores_order() {
        let (library, codec) = fixture(5, 5);
        let mut rng = StdRng::seed_from_u64(13);
        let mut queue = ShuffledQueue::new(library, codec, &mut rng);
        let first = current_path(&queue);
        let second = queue.next(0.5).map(|track| track.path().to_path_buf());

        assert_eq!(queue.previous().map(|track| track.path().to_path_buf()), first);
        assert_eq!(queue.next(0.5).map(|track| track.path().to_path_buf()), second);
    }
}
