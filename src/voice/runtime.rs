//! Single-mailbox driver for [`SpeechSession`]
//!
//! Audio frames, recognition events, control commands and timer deadlines
//! are all funnelled into one `select!` loop, so the controller sees a
//! totally ordered stream of inputs. The runtime is not `Send` (audio streams
//! and engines are owned by it) and must be awaited on the task that created
//! it; [`SessionHandle`] is the `Send` side used by everything else.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use super::capture::AudioFrame;
use super::conversation::ConversationTurn;
use super::recognition::RecognitionEvent;
use super::session::{SessionError, SessionState, SpeechSession};
use crate::{Error, Result};

/// Upper bound on how long the loop sleeps with no timer pending
const IDLE_WAKEUP: Duration = Duration::from_secs(60);

/// Control messages accepted by the runtime
#[derive(Debug)]
pub enum Command {
    Start(oneshot::Sender<std::result::Result<(), SessionError>>),
    Stop,
    Sleep,
    WakeUp,
    SetAiSpeaking {
        speaking: bool,
        text: Option<String>,
    },
    InterruptAiResponse,
    SetContinuousMode(bool),
    ClearConversationContext,
    Status(oneshot::Sender<SessionState>),
    CurrentTranscript(oneshot::Sender<String>),
    ConversationContext(oneshot::Sender<Vec<ConversationTurn>>),
    Shutdown,
}

/// Cloneable control surface of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Start listening; resolves once the microphone and recognizer are up
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] with the classified failure, or
    /// [`Error::SessionClosed`] if the runtime has exited
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await??;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub fn sleep(&self) -> Result<()> {
        self.send(Command::Sleep)
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub fn wake_up(&self) -> Result<()> {
        self.send(Command::WakeUp)
    }

    /// Signal the AI turn starting (`true`) or finishing (`false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub fn set_ai_speaking(&self, speaking: bool, text: Option<String>) -> Result<()> {
        self.send(Command::SetAiSpeaking { speaking, text })
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub fn interrupt_ai_response(&self) -> Result<()> {
        self.send(Command::InterruptAiResponse)
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub fn set_continuous_mode(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetContinuousMode(enabled))
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub fn clear_conversation_context(&self) -> Result<()> {
        self.send(Command::ClearConversationContext)
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub async fn status(&self) -> Result<SessionState> {
        self.request(Command::Status).await
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub async fn current_transcript(&self) -> Result<String> {
        self.request(Command::CurrentTranscript).await
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has exited
    pub async fn conversation_context(&self) -> Result<Vec<ConversationTurn>> {
        self.request(Command::ConversationContext).await
    }

    /// Stop the session and end the runtime loop
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the runtime has already exited
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// Owns a [`SpeechSession`] and drives it from its inputs
pub struct SessionRuntime {
    session: SpeechSession,
    commands: mpsc::UnboundedReceiver<Command>,
    frames: mpsc::UnboundedReceiver<AudioFrame>,
    recognition: mpsc::UnboundedReceiver<RecognitionEvent>,
}

impl SessionRuntime {
    /// Wrap a session fed by the given frame and recognition channels
    #[must_use]
    pub fn new(
        session: SpeechSession,
        frames: mpsc::UnboundedReceiver<AudioFrame>,
        recognition: mpsc::UnboundedReceiver<RecognitionEvent>,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Self {
            session,
            commands: rx,
            frames,
            recognition,
        };
        (runtime, SessionHandle { commands: tx })
    }

    /// Run until shutdown or until every handle is dropped
    #[allow(clippy::future_not_send)]
    pub async fn run(mut self) {
        tracing::debug!("session runtime started");

        loop {
            self.session.poll_timers(Instant::now());

            let wake_at = self
                .session
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => break,
                        Some(command) => self.apply(command),
                    }
                }
                Some(frame) = self.frames.recv() => {
                    self.session.process_frame(&frame, Instant::now());
                }
                Some(event) = self.recognition.recv() => {
                    tracing::trace!(?event, "recognition event");
                    self.session.handle_recognition(event, Instant::now());
                }
                () = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at)) => {}
            }
        }

        self.session.stop();
        tracing::debug!("session runtime stopped");
    }

    fn apply(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Start(reply) => {
                let _ = reply.send(self.session.start(now));
            }
            Command::Stop => self.session.stop(),
            Command::Sleep => self.session.sleep(),
            Command::WakeUp => self.session.wake_up(now),
            Command::SetAiSpeaking { speaking, text } => {
                self.session.set_ai_speaking(speaking, text.as_deref(), now);
            }
            Command::InterruptAiResponse => self.session.interrupt_ai_response(now),
            Command::SetContinuousMode(enabled) => self.session.set_continuous_mode(enabled),
            Command::ClearConversationContext => self.session.clear_conversation_context(),
            Command::Status(reply) => {
                let _ = reply.send(self.session.status());
            }
            Command::CurrentTranscript(reply) => {
                let _ = reply.send(self.session.current_transcript().to_string());
            }
            Command::ConversationContext(reply) => {
                let _ = reply.send(self.session.conversation_context());
            }
            // Handled by the loop
            Command::Shutdown => {}
        }
    }
}
