//! Skyris voice - speech interaction engine for the Skyris owl companion
//!
//! This library provides:
//! - Microphone capture and FFT volume analysis
//! - Debounced voice activity detection
//! - A resilient speech recognition session
//! - The sleep/wake turn-taking controller
//! - WAV packaging and the AI backend client
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Microphone        │   Recognition engine   │
//! └──────────────┬─────────────┴───────────┬────────────┘
//!        frames  │                 events  │
//! ┌──────────────▼─────────────────────────▼────────────┐
//! │                 Session runtime                      │
//! │   Analyzer  │  VAD  │  Controller  │  Timers         │
//! └────────────────────────┬────────────────────────────┘
//!                          │ SessionEvent::SendToAi (WAV)
//! ┌────────────────────────▼────────────────────────────┐
//! │              Skyris AI backend (HTTP)                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod voice;

pub use backend::{BackendClient, BackendReply};
pub use config::{BackendConfig, Config, SpeechConfig};
pub use error::{Error, Result};
pub use voice::{SessionEvent, SessionHandle, SessionRuntime, SessionState, SpeechSession};
