//! Local synthesis adapter driving an espeak-ng style subprocess.
//!
//! The utterance call plays through the synthesizer's own audio path and
//! blocks until it finishes; rendering writes a WAV instead. Voice discovery
//! parses `--voices` output under a bounded wait because a wedged synthesizer
//! must not hang the catalog.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

use super::{LocalSynthesizer, UtteranceOptions};
use crate::config::LocalConfig;
use crate::error::{Result, SpeechError};

pub struct EspeakSynthesizer {
    binary: String,
    timeout: Duration,
}

impl EspeakSynthesizer {
    pub fn new(config: &LocalConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn utterance_args(opts: &UtteranceOptions) -> Vec<String> {
        // espeak amplitude runs 0..=200 with 100 as normal; volume 0.0..=1.0
        // maps onto the full scale.
        let amplitude = ((opts.volume * 200.0).round() as i64).clamp(0, 200);

        let mut args = vec![
            "-s".to_string(),
            opts.rate.to_string(),
            "-a".to_string(),
            amplitude.to_string(),
        ];
        if let Some(voice_id) = &opts.voice_id {
            args.push("-v".to_string());
            args.push(voice_id.clone());
        }
        args
    }

    fn run(&self, args: &[String], text: &str) -> Result<()> {
        debug!("Running {} {:?}", self.binary, args);

        let output = Command::new(&self.binary)
            .args(args)
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            let err = String::from_utf8_lossy(&output.stderr);
            Err(SpeechError::SynthesisFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                err.trim()
            )))
        }
    }
}

impl LocalSynthesizer for EspeakSynthesizer {
    fn speak_blocking(&self, text: &str, opts: &UtteranceOptions) -> Result<()> {
        self.run(&Self::utterance_args(opts), text)
    }

    fn render_to_file(&self, text: &str, opts: &UtteranceOptions, out: &Path) -> Result<()> {
        let mut args = Self::utterance_args(opts);
        args.push("-w".to_string());
        args.push(out.to_string_lossy().into_owned());
        self.run(&args, text)
    }

    fn list_voices(&self) -> Result<Vec<(String, String)>> {
        let mut child = Command::new(&self.binary)
            .arg("--voices")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SpeechError::SynthesisFailed(format!(
                    "{} --voices timed out after {:?}",
                    self.binary, self.timeout
                )));
            }
        };

        let output = child.wait_with_output()?;
        if !status.success() {
            return Err(SpeechError::SynthesisFailed(format!(
                "{} --voices exited with {status}",
                self.binary
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_voice_listing(&stdout))
    }
}

/// Parse `--voices` table rows into (name, id) pairs.
///
/// Columns: Pty Language Age/Gender VoiceName File [Other Languages]
fn parse_voice_listing(listing: &str) -> Vec<(String, String)> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            Some((fields[3].to_string(), fields[1].to_string()))
        })
        .collect()
}
