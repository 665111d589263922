//! Voice activity detection
//!
//! Turns the per-frame decibel stream into debounced speech events.
//! Speech starts on the first loud frame; it only ends after quiet frames
//! have persisted for the whole silence window. While the session sleeps the
//! detector only watches for a loud frame to arm the wake debounce.
//!
//! Timers are deadlines; the owner polls them with [`VoiceActivityDetector::poll`].

use std::time::{Duration, Instant};

/// Default loudness threshold in dB
pub const DEFAULT_SILENCE_THRESHOLD_DB: f32 = -50.0;

/// Default silence needed to end an utterance
pub const DEFAULT_SILENCE_TIME: Duration = Duration::from_millis(1500);

/// Default delay between a loud frame and waking from sleep
pub const DEFAULT_WAKE_DEBOUNCE: Duration = Duration::from_millis(300);

/// Detector tuning
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Frames above this level count as speech
    pub silence_threshold_db: f32,
    /// Silence that confirms the end of an utterance
    pub silence_time: Duration,
    /// Loud-frame debounce before waking
    pub wake_debounce: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: DEFAULT_SILENCE_THRESHOLD_DB,
            silence_time: DEFAULT_SILENCE_TIME,
            wake_debounce: DEFAULT_WAKE_DEBOUNCE,
        }
    }
}

/// What a frame changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    /// Nothing changed
    None,
    /// Speech began
    SpeechStart,
    /// First quiet frame while speaking; silence timer armed
    SilencePending,
    /// Loud frame while the silence timer was pending; timer cancelled
    SpeechResumed,
    /// Loud frame while sleeping; wake debounce armed
    WakePending,
}

/// A timer that came due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTimeout {
    /// Silence persisted; speech ended
    SilenceConfirmed,
    /// Sustained sound while sleeping
    Wake,
}

/// Debounced speech/silence classifier
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    speaking: bool,
    wake_detect: bool,
    silence_deadline: Option<Instant>,
    wake_deadline: Option<Instant>,
}

impl VoiceActivityDetector {
    /// Create a detector in the awake, not-speaking state
    #[must_use]
    pub const fn new(config: VadConfig) -> Self {
        Self {
            config,
            speaking: false,
            wake_detect: false,
            silence_deadline: None,
            wake_deadline: None,
        }
    }

    /// Whether a level counts as speech
    #[must_use]
    pub fn is_loud(&self, db: f32) -> bool {
        db > self.config.silence_threshold_db
    }

    /// Feed one frame level
    pub fn observe(&mut self, db: f32, now: Instant) -> VadTransition {
        let loud = self.is_loud(db);

        if self.wake_detect {
            if loud && self.wake_deadline.is_none() {
                tracing::debug!(db, "sound while sleeping, arming wake");
                self.wake_deadline = Some(now + self.config.wake_debounce);
                return VadTransition::WakePending;
            }
            return VadTransition::None;
        }

        match (loud, self.speaking) {
            (true, false) => {
                self.speaking = true;
                self.silence_deadline = None;
                tracing::debug!(db, "speech start");
                VadTransition::SpeechStart
            }
            (false, true) if self.silence_deadline.is_none() => {
                self.silence_deadline = Some(now + self.config.silence_time);
                tracing::debug!(db, "possible speech end, awaiting confirmation");
                VadTransition::SilencePending
            }
            (true, true) if self.silence_deadline.is_some() => {
                self.silence_deadline = None;
                tracing::debug!(db, "speech resumed");
                VadTransition::SpeechResumed
            }
            _ => VadTransition::None,
        }
    }

    /// Fire the earliest due timer, if any
    pub fn poll(&mut self, now: Instant) -> Option<VadTimeout> {
        if self.wake_deadline.is_some_and(|d| d <= now) {
            self.wake_deadline = None;
            return Some(VadTimeout::Wake);
        }
        if self.silence_deadline.is_some_and(|d| d <= now) {
            self.silence_deadline = None;
            self.speaking = false;
            tracing::debug!("speech end confirmed");
            return Some(VadTimeout::SilenceConfirmed);
        }
        None
    }

    /// Earliest pending deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.silence_deadline, self.wake_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Switch to wake-detect mode; speech tracking and timers are dropped
    pub fn enter_wake_detect(&mut self) {
        self.reset();
        self.wake_detect = true;
    }

    /// Return to normal detection, not speaking, no timers
    pub fn reset(&mut self) {
        self.speaking = false;
        self.wake_detect = false;
        self.silence_deadline = None;
        self.wake_deadline = None;
    }

    /// Whether speech is in progress
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Whether the silence confirmation timer is armed
    #[must_use]
    pub const fn silence_pending(&self) -> bool {
        self.silence_deadline.is_some()
    }
}
