//! Voice processing module
//!
//! Microphone capture, volume analysis, voice activity detection, speech
//! recognition resilience and the turn-taking controller that ties them
//! together. Packaged utterances leave through [`SessionEvent::SendToAi`].

mod analyzer;
mod capture;
mod conversation;
mod recognition;
mod runtime;
mod session;
mod vad;
pub mod wav;

pub use analyzer::{AnalyzerConfig, SILENCE_FLOOR_DB, VolumeAnalyzer, magnitude_to_db};
pub use capture::{
    AudioFrame, AudioInput, CaptureConstraints, CaptureError, FRAME_SIZE, FrameChunker,
    MicrophoneInput, SAMPLE_RATE,
};
pub use conversation::{ConversationLog, ConversationTurn, Role};
pub use recognition::{
    DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_RESTART_DELAY, ErrorClass, EventOutcome,
    RecognitionErrorCode, RecognitionEvent, RecognitionResult, RecognitionSession, Recognizer,
    RecognizerError, RecognizerOptions, SessionOptions,
};
pub use runtime::{Command, SessionHandle, SessionRuntime};
pub use session::{
    SessionError, SessionEvent, SessionObserver, SessionState, SpeechSession, Utterance,
};
pub use vad::{
    DEFAULT_SILENCE_THRESHOLD_DB, DEFAULT_SILENCE_TIME, DEFAULT_WAKE_DEBOUNCE, VadConfig,
    VadTimeout, VadTransition, VoiceActivityDetector,
};
