//! Providers-configuration endpoint
//!
//! The server advertises which text-to-speech, speech-to-text and LLM
//! providers an interview may use. The chosen speech-to-text provider decides
//! whether utterances are sent in batch or streaming mode.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::session::TranscriptionMode;
use crate::transport::ProviderSelection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    #[serde(default)]
    pub models: Vec<ProviderModel>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Set by servers that flag streaming speech-to-text explicitly
    #[serde(default)]
    pub is_streaming: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDefaults {
    pub tts_provider: Option<String>,
    pub stt_provider: Option<String>,
    pub llm_provider: Option<String>,
}

/// Everything `GET /api/providers` returns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCatalog {
    #[serde(default)]
    pub tts: BTreeMap<String, ProviderInfo>,
    #[serde(default)]
    pub stt: BTreeMap<String, ProviderInfo>,
    #[serde(default)]
    pub llm: BTreeMap<String, ProviderInfo>,
    #[serde(default)]
    pub defaults: ProviderDefaults,
}

impl ProviderCatalog {
    /// Fill unset providers and models from the catalog defaults
    pub fn resolve(&self, requested: &ProviderSelection) -> ProviderSelection {
        let mut selection = requested.clone();

        fill(
            &mut selection.tts_provider,
            &mut selection.tts_model,
            &self.tts,
            &self.defaults.tts_provider,
        );
        fill(
            &mut selection.stt_provider,
            &mut selection.stt_model,
            &self.stt,
            &self.defaults.stt_provider,
        );
        fill(
            &mut selection.llm_provider,
            &mut selection.llm_model,
            &self.llm,
            &self.defaults.llm_provider,
        );

        selection
    }

    /// Transcription mode implied by a speech-to-text provider
    pub fn mode_for_stt(&self, provider: Option<&str>) -> TranscriptionMode {
        let Some(id) = provider else {
            return TranscriptionMode::Batch;
        };

        let flagged = self
            .stt
            .get(id)
            .and_then(|info| info.is_streaming)
            .unwrap_or(false);

        if flagged || id.ends_with("_streaming") {
            TranscriptionMode::Streaming
        } else {
            TranscriptionMode::Batch
        }
    }
}

fn fill(
    provider: &mut Option<String>,
    model: &mut Option<String>,
    catalog: &BTreeMap<String, ProviderInfo>,
    default: &Option<String>,
) {
    if provider.is_none() {
        *provider = default.clone();
    }

    if model.is_none() {
        *model = provider
            .as_ref()
            .and_then(|id| catalog.get(id))
            .and_then(|info| info.default_model.clone());
    }
}

/// HTTP client for the providers endpoint
pub struct ProvidersClient {
    base_url: String,
    client: reqwest::Client,
}

impl ProvidersClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Fetch the provider catalog
    pub async fn fetch(&self) -> Result<ProviderCatalog> {
        let url = format!("{}/api/providers", self.base_url);
        debug!("Fetching providers from {}", url);

        let catalog: ProviderCatalog = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .context("Providers endpoint returned an error")?
            .json()
            .await
            .context("Failed to parse provider catalog")?;

        info!(
            "Fetched providers: {} tts, {} stt, {} llm",
            catalog.tts.len(),
            catalog.stt.len(),
            catalog.llm.len()
        );

        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "tts": {
            "elevenlabs": {
                "name": "ElevenLabs",
                "models": [{"id": "eleven_turbo_v2", "name": "Turbo v2"}],
                "default_model": "eleven_turbo_v2"
            }
        },
        "stt": {
            "whisper": {
                "name": "Whisper",
                "models": [{"id": "whisper-1", "name": "Whisper v1"}],
                "default_model": "whisper-1"
            },
            "elevenlabs_streaming": {
                "name": "ElevenLabs realtime",
                "models": [],
                "default_model": null
            },
            "deepgram": {"name": "Deepgram", "is_streaming": true}
        },
        "llm": {
            "openai": {
                "name": "OpenAI",
                "models": [{"id": "gpt-4o", "name": "GPT-4o"}],
                "default_model": "gpt-4o"
            }
        },
        "defaults": {
            "tts_provider": "elevenlabs",
            "stt_provider": "whisper",
            "llm_provider": "openai"
        }
    }"#;

    fn catalog() -> ProviderCatalog {
        serde_json::from_str(CATALOG).unwrap()
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let selection = catalog().resolve(&ProviderSelection::default());

        assert_eq!(selection.tts_provider.as_deref(), Some("elevenlabs"));
        assert_eq!(selection.tts_model.as_deref(), Some("eleven_turbo_v2"));
        assert_eq!(selection.stt_provider.as_deref(), Some("whisper"));
        assert_eq!(selection.stt_model.as_deref(), Some("whisper-1"));
        assert_eq!(selection.llm_model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_resolve_keeps_explicit_choices() {
        let requested = ProviderSelection {
            stt_provider: Some("elevenlabs_streaming".to_string()),
            llm_model: Some("gpt-4o-mini".to_string()),
            ..Default::default()
        };
        let selection = catalog().resolve(&requested);

        assert_eq!(selection.stt_provider.as_deref(), Some("elevenlabs_streaming"));
        assert_eq!(selection.stt_model, None);
        assert_eq!(selection.llm_model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_mode_for_stt() {
        let catalog = catalog();
        assert_eq!(catalog.mode_for_stt(Some("whisper")), TranscriptionMode::Batch);
        assert_eq!(
            catalog.mode_for_stt(Some("elevenlabs_streaming")),
            TranscriptionMode::Streaming
        );
        assert_eq!(catalog.mode_for_stt(Some("deepgram")), TranscriptionMode::Streaming);
        assert_eq!(catalog.mode_for_stt(None), TranscriptionMode::Batch);
    }
}
