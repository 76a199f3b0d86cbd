//! Speech-to-text

use async_openai::{
    config::OpenAIConfig,
    types::{AudioInput, CreateTranscriptionRequestArgs},
    Client,
};
use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

const WAV_HEADER_LEN: usize = 44;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("No audio was recorded")]
    EmptyAudio,

    #[error("Audio is corrupt: {0}")]
    Corrupt(String),

    #[error("Transcription service failed: {0}")]
    Service(String),
}

impl TranscriptionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            TranscriptionError::EmptyAudio => "No audio was captured. Please try recording again.",
            TranscriptionError::Corrupt(_) => "The audio could not be read. Please try recording again.",
            TranscriptionError::Service(_) => "Could not transcribe audio. Please try again.",
        }
    }
}

impl From<async_openai::error::OpenAIError> for TranscriptionError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        TranscriptionError::Service(err.to_string())
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe 16-bit mono PCM (or a complete WAV file) to text
    async fn transcribe(&self, audio: &[u8], sample_rate: u32) -> Result<String, TranscriptionError>;
}

/// Wrap raw 16-bit mono PCM in a WAV container. Input that already starts with
/// a RIFF header is returned unchanged.
pub fn to_wav(audio: &[u8], sample_rate: u32) -> Result<Vec<u8>, TranscriptionError> {
    if audio.is_empty() {
        return Err(TranscriptionError::EmptyAudio);
    }
    if audio.starts_with(b"RIFF") {
        if audio.len() <= WAV_HEADER_LEN {
            return Err(TranscriptionError::EmptyAudio);
        }
        return Ok(audio.to_vec());
    }
    if sample_rate == 0 {
        return Err(TranscriptionError::Corrupt("sample rate must be positive".to_string()));
    }
    if audio.len() % 2 != 0 {
        return Err(TranscriptionError::Corrupt(format!(
            "{} bytes is not a whole number of 16-bit samples",
            audio.len()
        )));
    }
    let data_len = u32::try_from(audio.len())
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or_else(|| TranscriptionError::Corrupt("audio exceeds the WAV size limit".to_string()))?;

    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate
        .checked_mul(u32::from(block_align))
        .ok_or_else(|| TranscriptionError::Corrupt(format!("sample rate {} is out of range", sample_rate)))?;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + audio.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(audio);
    Ok(wav)
}

/// Whisper transcription through the OpenAI audio API
#[derive(Clone)]
pub struct OpenAiTranscriber {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(client: Client<OpenAIConfig>) -> Self {
        Self {
            client,
            model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(Client::new())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: &[u8], sample_rate: u32) -> Result<String, TranscriptionError> {
        let wav = to_wav(audio, sample_rate)?;
        let bytes = wav.len();

        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8("audio.wav".to_string(), wav))
            .model(self.model.as_str())
            .build()?;
        let response = self.client.audio().transcribe(request).await?;

        let text = response.text.trim().to_string();
        tracing::info!(bytes, sample_rate, chars = text.len(), "Transcribed audio");
        Ok(text)
    }
}
