//! HTTP cloud synthesis adapter.
//!
//! Posts text to a remote synthesis endpoint and hands back the encoded
//! audio bytes. The endpoint contract is `GET {base}/synthesize?text=…&voice=…`
//! returning an audio body.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::CloudSynthesizer;
use crate::config::CloudConfig;
use crate::error::{Result, SpeechError};

pub struct HttpCloudSynthesizer {
    endpoint: String,
    client: Client,
}

impl HttpCloudSynthesizer {
    pub fn new(config: &CloudConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl CloudSynthesizer for HttpCloudSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/synthesize", self.endpoint);
        debug!("Cloud synthesis request ({voice_id}): {} chars", text.len());

        let resp = self
            .client
            .get(&url)
            .query(&[("text", text), ("voice", voice_id)])
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    SpeechError::SynthesisFailed(format!(
                        "cannot connect to cloud endpoint {}",
                        self.endpoint
                    ))
                } else if e.is_timeout() {
                    SpeechError::SynthesisFailed("cloud synthesis timed out".into())
                } else {
                    SpeechError::SynthesisFailed(format!("cloud request failed: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            return Err(SpeechError::SynthesisFailed(format!(
                "cloud endpoint returned status {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SpeechError::SynthesisFailed(format!("cloud response body: {e}")))?;

        if bytes.is_empty() {
            return Err(SpeechError::SynthesisFailed(
                "cloud endpoint returned an empty body".into(),
            ));
        }

        Ok(bytes.to_vec())
    }

    fn voices(&self) -> Vec<(String, String)> {
        CLOUD_VOICES
            .iter()
            .map(|(name, id)| (format!("Cloud {name}"), (*id).to_string()))
            .collect()
    }
}

/// Language voices the remote endpoint accepts.
const CLOUD_VOICES: &[(&str, &str)] = &[
    ("English (US)", "en"),
    ("English (UK)", "en-uk"),
    ("English (AU)", "en-au"),
    ("Spanish", "es"),
    ("French", "fr"),
    ("German", "de"),
    ("Italian", "it"),
    ("Portuguese", "pt"),
    ("Japanese", "ja"),
    ("Korean", "ko"),
    ("Chinese", "zh"),
];
