//! Turn-taking and sleep/wake controller
//!
//! [`SpeechSession`] owns the microphone, the analyser, the detector and the
//! recognition session, and moves through [`SessionState`]s:
//!
//! ```text
//! idle ─start─► listening ─speech─► userSpeaking ⇄ recognizing
//!  ▲                │                                  │ silence confirmed
//!  │                │ no speech                        ▼
//!  │                ▼                              aiProcessing
//!  │            sleeping ─wake─► listening             │ set_ai_speaking(true)
//!  │                                                   ▼
//!  └──────────── set_ai_speaking(false) ────────── aiSpeaking
//! ```
//!
//! The controller never blocks and never reads the clock. Every input carries
//! the `Instant` it happened at; timers are deadlines the owner polls through
//! [`SpeechSession::poll_timers`] when [`SpeechSession::next_deadline`] passes.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::analyzer::VolumeAnalyzer;
use super::capture::{AudioFrame, AudioInput, CaptureError};
use super::conversation::{ConversationLog, ConversationTurn};
use super::recognition::{
    EventOutcome, RecognitionErrorCode, RecognitionEvent, RecognitionResult, RecognitionSession,
};
use super::vad::{VadTimeout, VadTransition, VoiceActivityDetector};
use super::wav;
use crate::config::SpeechConfig;

/// Conversational state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Not capturing
    Idle,
    /// Capturing, waiting for speech
    Listening,
    /// Speech in progress
    UserSpeaking,
    /// Speech paused, waiting for the silence to be confirmed
    Recognizing,
    /// Utterance handed off, waiting for the AI
    AiProcessing,
    /// AI reply being played
    AiSpeaking,
    /// Only watching for sound to wake up
    Sleeping,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::UserSpeaking => "userSpeaking",
            Self::Recognizing => "recognizing",
            Self::AiProcessing => "aiProcessing",
            Self::AiSpeaking => "aiSpeaking",
            Self::Sleeping => "sleeping",
        }
    }

    /// Whether the user side of the turn is live
    #[must_use]
    pub const fn is_listening(self) -> bool {
        matches!(self, Self::Listening | Self::UserSpeaking | Self::Recognizing)
    }

    /// Whether the AI side of the turn is live
    #[must_use]
    pub const fn is_ai_turn(self) -> bool {
        matches!(self, Self::AiProcessing | Self::AiSpeaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A packaged user utterance ready for the AI
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: Uuid,
    /// 16-bit mono PCM WAV
    pub audio_wav: Vec<u8>,
    pub transcript: String,
    /// Conversation up to and including this utterance, oldest first
    pub conversation_context: Vec<ConversationTurn>,
}

/// Classified, user-visible session failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Microphone could not be acquired
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Live transcription could not be started
    #[error("speech recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    /// The recognition engine reported a non-benign error
    #[error("speech recognition failed: {0}")]
    Recognition(RecognitionErrorCode),

    /// The utterance could not be encoded
    #[error("failed to package audio: {0}")]
    Packaging(String),
}

/// Notifications emitted by the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A transcript from the recognition engine
    Result(RecognitionResult),
    SpeechStart,
    SpeechEnd,
    /// End of utterance confirmed; fired right before packaging
    Silence,
    /// The single hand-off point to the application
    SendToAi(Utterance),
    StatusChange(SessionState),
    Sleep,
    WakeUp,
    Error(SessionError),
}

/// Receiver of [`SessionEvent`]s
///
/// Called synchronously from inside the controller; implementations must
/// return quickly and must not call back into the session.
pub trait SessionObserver {
    fn notify(&mut self, event: SessionEvent);
}

impl<F> SessionObserver for F
where
    F: FnMut(SessionEvent),
{
    fn notify(&mut self, event: SessionEvent) {
        self(event);
    }
}

/// The speech interaction controller
pub struct SpeechSession {
    config: SpeechConfig,
    input: Box<dyn AudioInput>,
    recognition: RecognitionSession,
    observer: Box<dyn SessionObserver>,
    analyzer: VolumeAnalyzer,
    vad: VoiceActivityDetector,
    state: SessionState,
    utterance: Option<Vec<AudioFrame>>,
    current_transcript: String,
    conversation: ConversationLog,
    no_speech_at: Option<Instant>,
    auto_restart_at: Option<Instant>,
}

impl SpeechSession {
    /// Create an idle session
    pub fn new(
        config: SpeechConfig,
        input: Box<dyn AudioInput>,
        mut recognition: RecognitionSession,
        observer: impl SessionObserver + 'static,
    ) -> Self {
        recognition.set_options(config.session_options());
        Self {
            vad: VoiceActivityDetector::new(config.vad_config()),
            conversation: ConversationLog::new(config.max_conversation_turns),
            config,
            input,
            recognition,
            observer: Box::new(observer),
            analyzer: VolumeAnalyzer::new(),
            state: SessionState::Idle,
            utterance: None,
            current_transcript: String::new(),
            no_speech_at: None,
            auto_restart_at: None,
        }
    }

    /// Begin listening
    ///
    /// No-op while already listening. From `Sleeping` this wakes the session.
    /// From an AI turn it abandons the turn and listens again.
    ///
    /// # Errors
    ///
    /// Returns the classified failure, which has also been delivered as
    /// [`SessionEvent::Error`]; the session is left `Idle`
    pub fn start(&mut self, now: Instant) -> Result<(), SessionError> {
        match self.state {
            SessionState::Sleeping => {
                self.wake_up(now);
                Ok(())
            }
            SessionState::Listening | SessionState::UserSpeaking | SessionState::Recognizing => {
                Ok(())
            }
            SessionState::Idle | SessionState::AiProcessing | SessionState::AiSpeaking => {
                self.begin_listening(now)
            }
        }
    }

    fn begin_listening(&mut self, now: Instant) -> Result<(), SessionError> {
        self.auto_restart_at = None;

        if let Err(e) = self.input.open(&self.config.capture_constraints()) {
            tracing::error!(error = %e, "microphone acquisition failed");
            return Err(self.fail(SessionError::Capture(e)));
        }

        if let Err(e) = self.recognition.start() {
            if !self.config.fallback_to_local_capture {
                tracing::error!(error = %e, "speech recognition unavailable");
                return Err(self.fail(SessionError::RecognitionUnavailable(e.0)));
            }
            tracing::warn!(error = %e, "speech recognition unavailable, capturing audio only");
            self.recognition.fall_back_to_local();
            if let Err(e) = self.recognition.start() {
                return Err(self.fail(SessionError::RecognitionUnavailable(e.0)));
            }
        }

        self.vad.reset();
        self.analyzer.reset();
        self.utterance = None;
        self.current_transcript.clear();
        self.no_speech_at = Some(now + self.config.no_speech_timeout());
        self.set_state(SessionState::Listening);
        Ok(())
    }

    /// Stop everything and go `Idle`
    ///
    /// Safe in any state. A pending utterance is discarded, never packaged.
    pub fn stop(&mut self) {
        self.halt();
        self.set_state(SessionState::Idle);
    }

    fn halt(&mut self) {
        self.recognition.stop();
        self.input.close();
        self.vad.reset();
        if self.utterance.take().is_some() {
            tracing::debug!("discarding in-flight utterance");
        }
        self.no_speech_at = None;
        self.auto_restart_at = None;
    }

    /// Report an error and settle in `Idle`
    fn fail(&mut self, error: SessionError) -> SessionError {
        self.stop();
        self.emit(SessionEvent::Error(error.clone()));
        error
    }

    /// Feed one captured frame
    pub fn process_frame(&mut self, frame: &[f32], now: Instant) {
        if !self.state.is_listening() && self.state != SessionState::Sleeping {
            return;
        }

        let db = self.analyzer.analyze(frame);
        let transition = self.vad.observe(db, now);

        if self.state == SessionState::Sleeping {
            return;
        }

        match transition {
            VadTransition::SpeechStart => {
                self.no_speech_at = None;
                self.utterance = Some(Vec::new());
                self.emit(SessionEvent::SpeechStart);
                self.set_state(SessionState::UserSpeaking);
            }
            VadTransition::SilencePending => {
                if self.state == SessionState::UserSpeaking {
                    self.set_state(SessionState::Recognizing);
                }
            }
            VadTransition::SpeechResumed => {
                if self.state == SessionState::Recognizing {
                    self.set_state(SessionState::UserSpeaking);
                }
            }
            VadTransition::None | VadTransition::WakePending => {}
        }

        if let Some(buffer) = self.utterance.as_mut() {
            buffer.push(frame.to_vec());
        }
    }

    /// Feed one recognition engine event
    pub fn handle_recognition(&mut self, event: RecognitionEvent, now: Instant) {
        match self.recognition.handle(event, now) {
            EventOutcome::Ignored | EventOutcome::Suppressed | EventOutcome::RestartScheduled => {}
            EventOutcome::Started => self.rearm_no_speech(now),
            EventOutcome::Result(result) => {
                self.current_transcript.clone_from(&result.transcript);
                self.rearm_no_speech(now);
                self.emit(SessionEvent::Result(result));
            }
            EventOutcome::FellBackToLocal(code) => {
                tracing::warn!(%code, "live transcription lost, continuing with audio only");
            }
            EventOutcome::Fatal(code) => {
                self.fail(SessionError::Recognition(code));
            }
            EventOutcome::Exhausted(code) => {
                if self.recognition.is_active() {
                    self.emit(SessionEvent::Error(SessionError::Recognition(code)));
                } else {
                    self.fail(SessionError::Recognition(code));
                }
            }
        }
    }

    fn rearm_no_speech(&mut self, now: Instant) {
        if self.state == SessionState::Listening {
            self.no_speech_at = Some(now + self.config.no_speech_timeout());
        }
    }

    /// Fire every timer due at `now`
    pub fn poll_timers(&mut self, now: Instant) {
        if self.recognition.restart_due(now) {
            if let Err(e) = self.recognition.perform_restart() {
                tracing::error!(error = %e, "recognition restart failed");
                self.fail(SessionError::RecognitionUnavailable(e.0));
            }
        }

        while let Some(timeout) = self.vad.poll(now) {
            match timeout {
                VadTimeout::SilenceConfirmed => {
                    if matches!(
                        self.state,
                        SessionState::UserSpeaking | SessionState::Recognizing
                    ) {
                        self.finish_utterance();
                    }
                }
                VadTimeout::Wake => {
                    tracing::info!("sound detected while sleeping");
                    self.wake_up(now);
                }
            }
        }

        if self.no_speech_at.is_some_and(|d| d <= now) {
            self.no_speech_at = None;
            if self.state.is_listening() || self.state == SessionState::Idle {
                tracing::info!(
                    timeout_ms = self.config.no_speech_timeout_ms,
                    "no speech, going to sleep"
                );
                self.sleep();
            }
        }

        if self.auto_restart_at.is_some_and(|d| d <= now) {
            self.auto_restart_at = None;
            if self.state == SessionState::Idle {
                // Failure is already reported and leaves the session idle
                let _ = self.begin_listening(now);
            }
        }
    }

    /// Earliest pending timer
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.vad.next_deadline(),
            self.recognition.next_deadline(),
            self.no_speech_at,
            self.auto_restart_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn finish_utterance(&mut self) {
        self.emit(SessionEvent::SpeechEnd);
        self.emit(SessionEvent::Silence);

        self.recognition.stop();
        self.input.close();
        self.vad.reset();
        self.no_speech_at = None;

        let frames = self.utterance.take().unwrap_or_default();
        let samples = wav::merge(&frames);
        let audio_wav = match wav::encode_wav(&samples, self.config.sample_rate) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "utterance packaging failed");
                self.fail(SessionError::Packaging(e.to_string()));
                return;
            }
        };

        let transcript = std::mem::take(&mut self.current_transcript)
            .trim()
            .to_string();
        if !transcript.is_empty() {
            self.conversation.push(ConversationTurn::user(transcript.clone()));
        }
        // The context handed off ends with this utterance's own turn
        let utterance = Utterance {
            id: Uuid::new_v4(),
            audio_wav,
            transcript,
            conversation_context: self.conversation.to_vec(),
        };

        tracing::info!(
            id = %utterance.id,
            samples = samples.len(),
            transcript = %utterance.transcript,
            "utterance ready"
        );
        self.set_state(SessionState::AiProcessing);
        self.emit(SessionEvent::SendToAi(utterance));
    }

    /// Go to sleep, keeping only wake detection running
    ///
    /// No-op when already sleeping.
    pub fn sleep(&mut self) {
        if self.state == SessionState::Sleeping {
            return;
        }

        self.recognition.stop();
        self.utterance = None;
        self.no_speech_at = None;
        self.auto_restart_at = None;

        if let Err(e) = self.input.open(&self.config.capture_constraints()) {
            tracing::error!(error = %e, "microphone unavailable for wake detection");
            self.fail(SessionError::Capture(e));
            return;
        }

        self.vad.enter_wake_detect();
        self.analyzer.reset();
        self.set_state(SessionState::Sleeping);
        self.emit(SessionEvent::Sleep);
    }

    /// Wake up and listen again
    ///
    /// No-op unless sleeping.
    pub fn wake_up(&mut self, now: Instant) {
        if self.state != SessionState::Sleeping {
            return;
        }

        tracing::info!("waking up");
        self.emit(SessionEvent::WakeUp);
        self.recognition.reinitialize();
        // Failure is already reported and leaves the session idle
        let _ = self.begin_listening(now);
    }

    /// Signal the AI turn starting or finishing
    ///
    /// `true` is honoured from any state and abandons any utterance in
    /// flight. `false` only applies during an AI turn. `text` is recorded
    /// as the assistant's turn.
    pub fn set_ai_speaking(&mut self, speaking: bool, text: Option<&str>, now: Instant) {
        if !speaking && !self.state.is_ai_turn() {
            return;
        }

        if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
            self.conversation.push(ConversationTurn::assistant(text));
        }

        if speaking {
            self.halt();
            self.set_state(SessionState::AiSpeaking);
            return;
        }

        self.set_state(SessionState::Idle);
        if self.config.auto_restart {
            self.auto_restart_at = Some(now + self.config.auto_restart_delay());
        } else {
            self.no_speech_at = Some(now + self.config.no_speech_timeout());
        }
    }

    /// Cut the AI turn short
    pub fn interrupt_ai_response(&mut self, now: Instant) {
        if self.state.is_ai_turn() {
            tracing::info!("AI response interrupted");
            self.set_ai_speaking(false, None, now);
        }
    }

    #[must_use]
    pub const fn status(&self) -> SessionState {
        self.state
    }

    /// Latest transcript of the current utterance
    #[must_use]
    pub fn current_transcript(&self) -> &str {
        &self.current_transcript
    }

    #[must_use]
    pub fn conversation_context(&self) -> Vec<ConversationTurn> {
        self.conversation.to_vec()
    }

    pub fn clear_conversation_context(&mut self) {
        self.conversation.clear();
    }

    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.state.is_listening()
    }

    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.state == SessionState::Sleeping
    }

    #[must_use]
    pub const fn is_waiting_for_response(&self) -> bool {
        self.state.is_ai_turn()
    }

    /// Whether an utterance buffer is being filled
    #[must_use]
    pub const fn has_utterance(&self) -> bool {
        self.utterance.is_some()
    }

    /// Toggle listening again automatically after each AI turn
    pub fn set_continuous_mode(&mut self, enabled: bool) {
        self.config.auto_restart = enabled;
    }

    #[must_use]
    pub const fn recognition(&self) -> &RecognitionSession {
        &self.recognition
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "session state changed");
        self.state = state;
        self.emit(SessionEvent::StatusChange(state));
    }

    fn emit(&mut self, event: SessionEvent) {
        self.observer.notify(event);
    }
}
