//! Content aggregation and card segmentation.
//!
//! The [`ContentAggregator`] owns two pieces of state:
//!
//! - the **buffer**: text typed on the device since the last card, grown by
//!   appending each incremental delta the device pushes;
//! - the **history**: the cards produced so far, oldest first, bounded to
//!   `max_card_count` entries.
//!
//! # Segmentation (for beginners)
//!
//! "Segmentation" closes the buffer into one or more cards.  It is triggered
//! either explicitly by the device (single mode) or by an idle timer when no
//! text has arrived for `segment_interval` (continuous mode).  Before a card
//! is produced the content is normalised and filtered:
//!
//! ```text
//! "。！ Hello world"  ──clean──►  "Hello world"  ──meaningful?──► yes ──► card
//! "   "              ──clean──►  ""             ──meaningful?──► no  ──► dropped
//! ```
//!
//! Content longer than `max_card_length` *characters* is split into several
//! consecutive cards.  Lengths are counted in `char`s, not bytes, so a card of
//! Chinese text is cut at the same visual length as a card of ASCII text.
//!
//! # Thread safety
//!
//! All state sits behind a single `std::sync::Mutex`.  None of the operations
//! await or perform I/O, so a blocking mutex held for a few microseconds is
//! appropriate even when called from async tasks.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Punctuation stripped from the front of a card.
///
/// These are the marks a speech/IME engine tends to emit at the start of a new
/// utterance, left over from the end of the previous one.
const LEADING_PUNCTUATION: &[char] = &['。', '！', '？', '，', '、', '.', '!', '?', ','];

/// Fixed configuration for a [`ContentAggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Idle time after the last append before the timer path segments.
    pub segment_interval: Duration,
    /// Maximum number of cards retained in history.
    pub max_card_count: usize,
    /// Maximum characters per card; longer content is split.
    pub max_card_length: usize,
}

impl Default for AggregatorConfig {
    /// | Field            | Default |
    /// |------------------|---------|
    /// | segment_interval | 2 s     |
    /// | max_card_count   | 50      |
    /// | max_card_length  | 1000    |
    fn default() -> Self {
        Self {
            segment_interval: Duration::from_secs(2),
            max_card_count: 50,
            max_card_length: 1000,
        }
    }
}

/// Mutable state guarded as one unit.
#[derive(Debug)]
struct AggregatorState {
    buffer: String,
    last_input_at: Instant,
    history: VecDeque<String>,
}

/// Buffers incremental text and turns it into bounded cards.
#[derive(Debug)]
pub struct ContentAggregator {
    config: AggregatorConfig,
    state: Mutex<AggregatorState>,
}

impl ContentAggregator {
    /// Creates an empty aggregator with fixed configuration.
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AggregatorState {
                buffer: String::new(),
                last_input_at: Instant::now(),
                history: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> AggregatorConfig {
        self.config
    }

    /// Appends `delta` to the buffer and restarts the idle clock.
    ///
    /// No filtering happens here: whitespace-only deltas are kept, because
    /// they may separate words typed in later deltas.
    pub fn update_content(&self, delta: &str) {
        let mut state = self.lock();
        state.buffer.push_str(delta);
        state.last_input_at = Instant::now();
    }

    /// Returns a snapshot of the current buffer.
    pub fn current_content(&self) -> String {
        self.lock().buffer.clone()
    }

    /// Returns a snapshot of the card history, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.lock().history.iter().cloned().collect()
    }

    /// Closes `content` into one or more cards.
    ///
    /// Returns every card produced by this call, in order.  An empty vector
    /// means the content was filtered as meaningless.  The buffer is cleared
    /// in every case.
    pub fn add_card(&self, content: &str) -> Vec<String> {
        let mut state = self.lock();
        self.add_card_locked(&mut state, content)
    }

    /// Segments the buffer if it has been idle for longer than
    /// `segment_interval`, as one atomic step.
    ///
    /// Checking [`should_segment`](Self::should_segment) and then calling
    /// [`add_card`](Self::add_card) separately would discard any delta
    /// appended between the two calls; this method cannot.
    pub fn segment_if_idle(&self) -> Vec<String> {
        self.segment_if_idle_at(Instant::now())
    }

    /// [`segment_if_idle`](Self::segment_if_idle) evaluated at an explicit instant.
    pub fn segment_if_idle_at(&self, now: Instant) -> Vec<String> {
        let mut state = self.lock();
        if !Self::is_idle(&state, now, self.config.segment_interval) {
            return Vec::new();
        }
        let content = std::mem::take(&mut state.buffer);
        self.add_card_locked(&mut state, &content)
    }

    /// Returns `true` when the buffer is non-empty and has been idle for
    /// longer than `segment_interval`.
    pub fn should_segment(&self) -> bool {
        self.should_segment_at(Instant::now())
    }

    /// [`should_segment`](Self::should_segment) evaluated at an explicit instant.
    pub fn should_segment_at(&self, now: Instant) -> bool {
        let state = self.lock();
        Self::is_idle(&state, now, self.config.segment_interval)
    }

    /// Empties the buffer and the history and restarts the idle clock.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.buffer.clear();
        state.history.clear();
        state.last_input_at = Instant::now();
    }

    fn add_card_locked(&self, state: &mut AggregatorState, content: &str) -> Vec<String> {
        state.buffer.clear();

        let cleaned = clean_leading_punctuation(content);
        if !is_content_meaningful(&cleaned) {
            debug!("filtered meaningless content: {content:?}");
            return Vec::new();
        }

        let produced = if cleaned.chars().count() > self.config.max_card_length {
            split_by_chars(&cleaned, self.config.max_card_length)
        } else {
            vec![cleaned]
        };

        state.history.extend(produced.iter().cloned());
        while state.history.len() > self.config.max_card_count {
            state.history.pop_front();
        }

        produced
    }

    fn is_idle(state: &AggregatorState, now: Instant, interval: Duration) -> bool {
        !state.buffer.is_empty() && now.saturating_duration_since(state.last_input_at) > interval
    }

    /// Locks the state, recovering from poisoning.
    ///
    /// A panic while the lock was held cannot leave the state structurally
    /// invalid (every mutation is a single push/clear), so the poisoned guard
    /// is used as-is.
    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Pure helpers ──────────────────────────────────────────────────────────────

/// Strips surrounding whitespace, then any leading run of sentence
/// punctuation, each mark together with the whitespace that follows it.
///
/// ```rust
/// use airinput_core::domain::aggregator::clean_leading_punctuation;
///
/// assert_eq!(clean_leading_punctuation("。！Hello"), "Hello");
/// assert_eq!(clean_leading_punctuation("   ，world"), "world");
/// ```
pub fn clean_leading_punctuation(content: &str) -> String {
    let mut rest = content.trim();
    while let Some(stripped) = rest.strip_prefix(LEADING_PUNCTUATION) {
        rest = stripped.trim_start();
    }
    rest.to_string()
}

/// Returns `false` for content that must never become a card:
/// the empty string, whitespace only, or a single whitespace/punctuation
/// character.
pub fn is_content_meaningful(content: &str) -> bool {
    if content.trim().is_empty() {
        return false;
    }

    let mut chars = content.chars();
    match (chars.next(), chars.next()) {
        (Some(only), None) => !(only.is_whitespace() || is_punctuation(only)),
        _ => true,
    }
}

/// Splits `content` into consecutive chunks of at most `max_chars` characters.
///
/// A `max_chars` of zero is treated as one so the split always terminates.
pub fn split_by_chars(content: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// One character in the Unicode punctuation categories (Pc, Pd, Ps, Pe, Pi,
/// Pf, Po).  Symbols such as `+` or `=` are not punctuation.
static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\p{P}$").expect("valid punctuation pattern"));

fn is_punctuation(c: char) -> bool {
    let mut buf = [0u8; 4];
    PUNCTUATION.is_match(c.encode_utf8(&mut buf))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
