//! Segmentation mode: who decides when the buffer becomes a card.
//!
//! - [`SegmentationMode::Single`]: the device sends an explicit segmentation
//!   request after each utterance.  The idle timer is ignored.
//! - [`SegmentationMode::Continuous`]: the relay segments on its own once the
//!   buffer has been idle for the configured interval.
//!
//! The mode is held by a [`SegmentationModeController`] that is shared
//! explicitly with the timer task and the request handlers.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a mode string is neither `single` nor `continuous`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown segmentation mode: {0:?} (expected \"single\" or \"continuous\")")]
pub struct ModeParseError(pub String);

/// The two segmentation policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// Device-driven: one card per explicit request.
    #[default]
    Single,
    /// Timer-driven: a card whenever the buffer goes idle.
    Continuous,
}

impl SegmentationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentationMode::Single => "single",
            SegmentationMode::Continuous => "continuous",
        }
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentationMode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(SegmentationMode::Single),
            "continuous" => Ok(SegmentationMode::Continuous),
            other => Err(ModeParseError(other.to_string())),
        }
    }
}

/// Holds the active [`SegmentationMode`].
///
/// Backed by an `AtomicBool` (`true` = single); reads and writes are
/// independent, so no lock is needed.
#[derive(Debug)]
pub struct SegmentationModeController {
    single: AtomicBool,
}

impl SegmentationModeController {
    pub fn new(initial: SegmentationMode) -> Self {
        Self {
            single: AtomicBool::new(initial == SegmentationMode::Single),
        }
    }

    pub fn mode(&self) -> SegmentationMode {
        if self.single.load(Ordering::Acquire) {
            SegmentationMode::Single
        } else {
            SegmentationMode::Continuous
        }
    }

    /// Sets the mode and returns the previous one.
    pub fn set(&self, mode: SegmentationMode) -> SegmentationMode {
        let was_single = self
            .single
            .swap(mode == SegmentationMode::Single, Ordering::AcqRel);
        if was_single {
            SegmentationMode::Single
        } else {
            SegmentationMode::Continuous
        }
    }

    /// `true` when the idle timer is allowed to segment.
    pub fn is_timer_driven(&self) -> bool {
        self.mode() == SegmentationMode::Continuous
    }
}

impl Default for SegmentationModeController {
    fn default() -> Self {
        Self::new(SegmentationMode::default())
    }
}
