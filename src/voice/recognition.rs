//! Speech recognition session management
//!
//! The transcription engine itself is an external capability behind the
//! [`Recognizer`] trait. [`RecognitionSession`] wraps it with the resilience
//! rules: retry-on-start, debounced restarts, benign error suppression,
//! fallback to local-only capture and suppression of events that arrive
//! after an intentional stop.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default delay before restarting the engine after an error or unexpected end
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(500);

/// Default number of automatic restarts before giving up
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;

/// A transcript produced by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerOptions {
    /// BCP-47 language tag
    pub language: String,
    /// Keep recognizing across pauses
    pub continuous: bool,
    /// Emit partial transcripts
    pub interim_results: bool,
}

impl Default for RecognizerOptions {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_string(),
            continuous: false,
            interim_results: true,
        }
    }
}

/// Engine-level failure to initialize or start
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RecognizerError(pub String);

/// A continuous transcription capability
///
/// Results, errors and session boundaries are reported asynchronously as
/// [`RecognitionEvent`]s by whoever drives the session.
pub trait Recognizer {
    /// Create or recreate the underlying engine
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be created
    fn initialize(&mut self, options: &RecognizerOptions) -> Result<(), RecognizerError>;

    /// Begin a recognition session
    ///
    /// # Errors
    ///
    /// Returns error if the engine refuses to start
    fn start(&mut self) -> Result<(), RecognizerError>;

    /// Request the session to end; the engine confirms with [`RecognitionEvent::Ended`]
    fn stop(&mut self);
}

/// Error codes reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecognitionErrorCode {
    NoSpeech,
    Aborted,
    Network,
    AudioCapture,
    NotAllowed,
    ServiceNotAllowed,
    Other(String),
}

/// How an error code is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected; never surfaced
    Benign,
    /// Retry once, then fall back to local capture
    Network,
    /// Ends the session
    Fatal,
    /// Debounced restart
    Transient,
}

impl RecognitionErrorCode {
    /// Parse an engine error string (`no-speech`, `network`, ...)
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code {
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            "network" => Self::Network,
            "audio-capture" => Self::AudioCapture,
            "not-allowed" | "permission-denied" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Engine error string
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::Network => "network",
            Self::AudioCapture => "audio-capture",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::Other(code) => code,
        }
    }

    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NoSpeech | Self::Aborted => ErrorClass::Benign,
            Self::Network => ErrorClass::Network,
            Self::AudioCapture | Self::NotAllowed | Self::ServiceNotAllowed => ErrorClass::Fatal,
            Self::Other(_) => ErrorClass::Transient,
        }
    }
}

impl fmt::Display for RecognitionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous engine notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Started,
    Result(RecognitionResult),
    Error(RecognitionErrorCode),
    Ended,
}

/// What the session made of an engine event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Stale or unexpected; drop it
    Ignored,
    /// Engine confirmed start
    Started,
    /// New transcript
    Result(RecognitionResult),
    /// Benign error
    Suppressed,
    /// Restart timer armed
    RestartScheduled,
    /// Live transcription abandoned; audio capture continues
    FellBackToLocal(RecognitionErrorCode),
    /// Session-ending error; the engine has been stopped
    Fatal(RecognitionErrorCode),
    /// Restarts used up
    Exhausted(RecognitionErrorCode),
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub recognizer: RecognizerOptions,
    pub restart_delay: Duration,
    pub max_restart_attempts: u32,
    pub fallback_to_local_capture: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            recognizer: RecognizerOptions::default(),
            restart_delay: DEFAULT_RESTART_DELAY,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            fallback_to_local_capture: true,
        }
    }
}

/// Resilient wrapper around a [`Recognizer`]
pub struct RecognitionSession {
    engine: Option<Box<dyn Recognizer>>,
    options: SessionOptions,
    initialized: bool,
    active: bool,
    engine_running: bool,
    local_only: bool,
    pending_ends: u32,
    restart_at: Option<Instant>,
    restart_attempts: u32,
    network_retried: bool,
}

impl RecognitionSession {
    /// Wrap an engine
    #[must_use]
    pub fn new(engine: Box<dyn Recognizer>, options: SessionOptions) -> Self {
        Self {
            engine: Some(engine),
            options,
            initialized: false,
            active: false,
            engine_running: false,
            local_only: false,
            pending_ends: 0,
            restart_at: None,
            restart_attempts: 0,
            network_retried: false,
        }
    }

    /// A session with no engine: audio is captured but never transcribed
    #[must_use]
    pub fn local_only(options: SessionOptions) -> Self {
        Self {
            engine: None,
            options,
            initialized: true,
            active: false,
            engine_running: false,
            local_only: true,
            pending_ends: 0,
            restart_at: None,
            restart_attempts: 0,
            network_retried: false,
        }
    }

    /// Start recognizing
    ///
    /// Idempotent. A failed start reinitializes the engine and retries once.
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be started after the retry
    pub fn start(&mut self) -> Result<(), RecognizerError> {
        if self.active && (self.engine_running || self.local_only) {
            return Ok(());
        }

        // Ends still owed by a stopped engine keep being absorbed
        self.restart_at = None;

        let Some(engine) = self.engine.as_mut().filter(|_| !self.local_only) else {
            self.active = true;
            tracing::debug!("recognition running local-only");
            return Ok(());
        };

        if !self.initialized {
            engine.initialize(&self.options.recognizer)?;
            self.initialized = true;
        }

        if let Err(e) = engine.start() {
            tracing::warn!(error = %e, "recognizer failed to start, reinitializing");
            engine.initialize(&self.options.recognizer)?;
            engine.start()?;
        }

        self.active = true;
        self.engine_running = true;
        tracing::debug!(language = %self.options.recognizer.language, "recognition started");
        Ok(())
    }

    /// Stop recognizing
    ///
    /// Safe to call at any time. Every engine event up to the engine's end
    /// confirmation is ignored afterwards, even if the session is started
    /// again before that confirmation arrives.
    pub fn stop(&mut self) {
        self.active = false;
        self.restart_at = None;
        self.halt_engine();
    }

    /// Stop and force the engine to be recreated on next start
    ///
    /// Also gives live transcription another chance after a fallback.
    pub fn reinitialize(&mut self) {
        self.stop();
        if self.engine.is_some() {
            self.initialized = false;
            self.local_only = false;
        }
        self.restart_attempts = 0;
        self.network_retried = false;
    }

    /// Abandon live transcription but keep the session active
    pub fn fall_back_to_local(&mut self) {
        self.halt_engine();
        self.restart_at = None;
        self.local_only = true;
        tracing::warn!("falling back to local-only audio capture");
    }

    /// Interpret an engine event
    pub fn handle(&mut self, event: RecognitionEvent, now: Instant) -> EventOutcome {
        if self.pending_ends > 0 {
            if event == RecognitionEvent::Ended {
                self.pending_ends -= 1;
            }
            tracing::trace!(?event, "ignoring event from stopped session");
            return EventOutcome::Ignored;
        }
        if !self.active || self.local_only {
            return EventOutcome::Ignored;
        }

        match event {
            RecognitionEvent::Started => EventOutcome::Started,
            RecognitionEvent::Result(result) => {
                self.restart_attempts = 0;
                self.network_retried = false;
                EventOutcome::Result(result)
            }
            RecognitionEvent::Error(code) => self.handle_error(code, now),
            RecognitionEvent::Ended => {
                self.engine_running = false;
                if self.restart_at.is_some() {
                    return EventOutcome::RestartScheduled;
                }
                tracing::debug!("recognition ended unexpectedly");
                self.schedule_restart(now, RecognitionErrorCode::Other("ended".to_string()))
            }
        }
    }

    fn handle_error(&mut self, code: RecognitionErrorCode, now: Instant) -> EventOutcome {
        match code.class() {
            ErrorClass::Benign => {
                tracing::debug!(%code, "benign recognition error");
                EventOutcome::Suppressed
            }
            ErrorClass::Fatal => {
                tracing::error!(%code, "fatal recognition error");
                self.stop();
                EventOutcome::Fatal(code)
            }
            ErrorClass::Network => {
                if !self.network_retried {
                    self.network_retried = true;
                    self.halt_engine();
                    tracing::warn!("recognition network error, retrying");
                    self.arm_restart(now);
                    EventOutcome::RestartScheduled
                } else if self.options.fallback_to_local_capture {
                    self.fall_back_to_local();
                    EventOutcome::FellBackToLocal(code)
                } else {
                    self.stop();
                    EventOutcome::Exhausted(code)
                }
            }
            ErrorClass::Transient => {
                self.halt_engine();
                self.schedule_restart(now, code)
            }
        }
    }

    fn schedule_restart(&mut self, now: Instant, cause: RecognitionErrorCode) -> EventOutcome {
        if self.restart_attempts >= self.options.max_restart_attempts {
            tracing::warn!(%cause, attempts = self.restart_attempts, "recognition restarts exhausted");
            if self.options.fallback_to_local_capture {
                self.fall_back_to_local();
            } else {
                self.stop();
            }
            return EventOutcome::Exhausted(cause);
        }
        tracing::debug!(%cause, attempt = self.restart_attempts + 1, "scheduling recognition restart");
        self.arm_restart(now);
        EventOutcome::RestartScheduled
    }

    fn arm_restart(&mut self, now: Instant) {
        if self.restart_at.is_none() {
            self.restart_attempts += 1;
            self.restart_at = Some(now + self.options.restart_delay);
        }
    }

    /// Whether a scheduled restart is due
    #[must_use]
    pub fn restart_due(&self, now: Instant) -> bool {
        self.restart_at.is_some_and(|d| d <= now)
    }

    /// Run a due restart
    ///
    /// # Errors
    ///
    /// Returns error if the engine refuses to start
    pub fn perform_restart(&mut self) -> Result<(), RecognizerError> {
        self.restart_at = None;
        if !self.active || self.local_only {
            return Ok(());
        }
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };

        if let Err(e) = engine.start() {
            self.active = false;
            self.engine_running = false;
            return Err(e);
        }
        self.engine_running = true;
        tracing::debug!("recognition restarted");
        Ok(())
    }

    fn halt_engine(&mut self) {
        if self.engine_running {
            if let Some(engine) = self.engine.as_mut() {
                engine.stop();
                self.pending_ends += 1;
            }
            self.engine_running = false;
        }
    }

    /// Pending restart deadline
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        self.restart_at
    }

    /// Whether the session should be producing results
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether stop was requested and the engine has not confirmed yet
    #[must_use]
    pub const fn is_stopping(&self) -> bool {
        self.pending_ends > 0
    }

    /// Whether live transcription is unavailable
    #[must_use]
    pub const fn is_local_only(&self) -> bool {
        self.local_only
    }

    /// Update language and mode for the next initialization
    pub fn set_options(&mut self, options: SessionOptions) {
        if options.recognizer != self.options.recognizer {
            self.initialized = self.engine.is_none();
        }
        self.options = options;
    }
}
