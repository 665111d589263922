//! Skyris AI backend client
//!
//! Hands packaged utterances to the multimodal generation endpoint and
//! returns the owl's reply.

use std::time::Duration;

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::voice::Utterance;
use crate::{Error, Result};

/// Multimodal generation endpoint
const GENERATE_PATH: &str = "/api/generate-multimodal";

/// The engine has no speech output, so replies are always text only
const WITH_AUDIO: bool = false;

/// Liveness endpoint
const HEALTHCHECK_PATH: &str = "/api/healthcheck";

/// Reply from the generation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReply {
    /// What the owl says
    #[serde(default)]
    pub text: String,

    /// Emotion tag for the reply
    #[serde(default = "default_emotion")]
    pub emotion: String,
}

fn default_emotion() -> String {
    "neutral".to_string()
}

/// Client for the Skyris AI backend
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    audio_style: String,
}

impl BackendClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            audio_style: config.audio_style.clone(),
        })
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send an utterance and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the backend answers with a
    /// non-success status, or the reply is not valid JSON
    pub async fn generate(&self, utterance: &Utterance) -> Result<BackendReply> {
        let url = format!("{}{GENERATE_PATH}", self.base_url);

        let audio = Part::bytes(utterance.audio_wav.clone())
            .file_name(format!("{}.wav", utterance.id))
            .mime_str("audio/wav")?;

        let form = Form::new()
            .text("prompt", utterance.transcript.clone())
            .text("voice_input", utterance.transcript.clone())
            .text("with_audio", WITH_AUDIO.to_string())
            .text("audio_style", self.audio_style.clone())
            .text(
                "conversation_context",
                serde_json::to_string(&utterance.conversation_context)?,
            )
            .part("audio_file", audio);

        tracing::debug!(
            url = %url,
            id = %utterance.id,
            bytes = utterance.audio_wav.len(),
            "sending utterance to backend"
        );

        let response = self.client.post(&url).multipart(form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("{status} - {body}")));
        }

        let reply: BackendReply = response.json().await?;
        tracing::info!(emotion = %reply.emotion, "backend replied");
        Ok(reply)
    }

    /// Check that the backend is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend is unhealthy
    pub async fn healthcheck(&self) -> Result<()> {
        let url = format!("{}{HEALTHCHECK_PATH}", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Backend(format!(
                "healthcheck failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}
