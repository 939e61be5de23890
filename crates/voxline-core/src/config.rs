//! Configuration loading and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level Voxline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<SttConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,
}

/// Audio contract shared with every collaborator.
///
/// Defaults match telephony media streams: 8 kHz, 16-bit linear PCM, mono,
/// with a 256-sample Silero window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_bytes_per_sample")]
    pub bytes_per_sample: u32,

    /// Samples per VAD inference window (256 at 8 kHz, 512 at 16 kHz).
    #[serde(default = "default_vad_window_samples")]
    pub vad_window_samples: u32,

    /// Speech probability above which a window counts as speech.
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,

    /// Trailing silence required before an end marker is emitted.
    #[serde(default = "default_vad_min_silence_ms")]
    pub vad_min_silence_ms: u32,

    /// Padding applied around detected speech boundaries.
    #[serde(default = "default_vad_speech_pad_ms")]
    pub vad_speech_pad_ms: u32,

    /// Segments shorter than this are classified as back-channels.
    #[serde(default = "default_interruption_threshold_ms")]
    pub interruption_threshold_ms: u32,

    /// Orchestrator sleep between idle checks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_sample_rate() -> u32 {
    8000
}
fn default_channels() -> u16 {
    1
}
fn default_bytes_per_sample() -> u32 {
    2
}
fn default_vad_window_samples() -> u32 {
    256
}
fn default_vad_threshold() -> f32 {
    0.73
}
fn default_vad_min_silence_ms() -> u32 {
    350
}
fn default_vad_speech_pad_ms() -> u32 {
    30
}
fn default_interruption_threshold_ms() -> u32 {
    600
}
fn default_tick_interval_ms() -> u64 {
    10
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bytes_per_sample: default_bytes_per_sample(),
            vad_window_samples: default_vad_window_samples(),
            vad_threshold: default_vad_threshold(),
            vad_min_silence_ms: default_vad_min_silence_ms(),
            vad_speech_pad_ms: default_vad_speech_pad_ms(),
            interruption_threshold_ms: default_interruption_threshold_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl AudioConfig {
    /// Bytes in one VAD window.
    pub fn window_bytes(&self) -> usize {
        (self.vad_window_samples * self.bytes_per_sample) as usize
    }

    /// Convert a duration in milliseconds to a sample count.
    pub fn samples_for_ms(&self, ms: u32) -> u64 {
        u64::from(self.sample_rate) * u64::from(ms) / 1000
    }

    pub fn min_silence_samples(&self) -> u64 {
        self.samples_for_ms(self.vad_min_silence_ms)
    }

    pub fn speech_pad_samples(&self) -> u64 {
        self.samples_for_ms(self.vad_speech_pad_ms)
    }
}

/// Speech-to-text provider (Groq/OpenAI-compatible transcription API).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SttConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Language-model provider (OpenAI-compatible chat completions API).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Text-to-speech provider (ElevenLabs streaming websocket).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Provider output format token, e.g. `ulaw_8000` for telephony.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Inbound media payload encoding on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    /// G.711 μ-law, decoded to linear PCM before entering the core.
    #[default]
    Mulaw,
    /// Already 16-bit little-endian linear PCM.
    Pcm16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    #[serde(default)]
    pub media_format: MediaFormat,
}

fn default_gateway_port() -> u16 {
    8080
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: None,
            port: default_gateway_port(),
            media_format: MediaFormat::default(),
        }
    }
}

/// Resolve a secret: inline value first, then the named environment variable.
fn resolve_secret_field(value: &Option<String>, env_name: &Option<String>) -> Option<String> {
    if let Some(v) = value {
        if !v.is_empty() {
            return Some(v.clone());
        }
    }
    env_name
        .as_ref()
        .and_then(|name| std::env::var(name).ok())
        .filter(|v| !v.is_empty())
}

/// Substitute `${ENV_VAR}` references in raw config text.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoxlineError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxlineError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or_else(default_gateway_port)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_defaults_match_telephony_contract() {
        let audio = AudioConfig::default();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.vad_window_samples, 256);
        assert_eq!(audio.window_bytes(), 512);
        assert_eq!(audio.min_silence_samples(), 2800);
        assert_eq!(audio.speech_pad_samples(), 240);
        assert_eq!(audio.samples_for_ms(audio.interruption_threshold_ms), 4800);
    }

    #[test]
    fn parses_partial_config() {
        let raw = r#"{
            audio: { sample_rate: 16000, vad_window_samples: 512 },
            gateway: { port: 9000, media_format: "pcm16" },
        }"#;
        let config: Config = json5::from_str(raw).unwrap();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.window_bytes(), 1024);
        // Unspecified fields fall back to defaults
        assert_eq!(config.audio.vad_threshold, 0.73);
        assert_eq!(config.gateway_port(), 9000);
        assert_eq!(
            config.gateway.unwrap().media_format,
            MediaFormat::Pcm16
        );
    }

    #[test]
    fn env_substitution_replaces_references() {
        std::env::set_var("VOXLINE_TEST_KEY", "sk-test");
        let substituted = substitute_env_vars(r#"{"stt": {"api_key": "${VOXLINE_TEST_KEY}"}}"#);
        assert!(substituted.contains("sk-test"));
    }

    #[test]
    fn inline_key_wins_over_env() {
        std::env::set_var("VOXLINE_OTHER_KEY", "from-env");
        let stt = SttConfig {
            api_key: Some("inline".into()),
            api_key_env: Some("VOXLINE_OTHER_KEY".into()),
            base_url: None,
            model: None,
            language: None,
        };
        assert_eq!(stt.resolve_api_key().as_deref(), Some("inline"));

        let stt_env_only = SttConfig {
            api_key: None,
            api_key_env: Some("VOXLINE_OTHER_KEY".into()),
            base_url: None,
            model: None,
            language: None,
        };
        assert_eq!(stt_env_only.resolve_api_key().as_deref(), Some("from-env"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/voxline.json")).unwrap();
        assert_eq!(config.audio.sample_rate, 8000);
        assert!(config.stt.is_none());
    }
}
