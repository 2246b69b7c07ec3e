use anyhow::{Context, Result};

/// Avatar batch synthesis endpoint used when `SPEECH_ENDPOINT` is unset.
pub const DEFAULT_SPEECH_ENDPOINT: &str = "https://eastus2.api.cognitive.microsoft.com";
const DEFAULT_OPENAI_API_VERSION: &str = "2024-02-01";
const DEFAULT_OPENAI_DEPLOYMENT: &str = "gpt-4";

/// Application configuration loaded from environment variables.
/// Fails at startup if the language-model variables are missing; speech settings are optional.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_endpoint: String,
    pub openai_api_key: String,
    pub openai_api_version: String,
    pub openai_deployment: String,
    pub speech: SpeechSettings,
    pub port: u16,
    pub rust_log: String,
}

/// Azure Speech settings. Every field may be absent: the service degrades to
/// plain chat when nothing is configured, and to plain TTS when only the avatar
/// prerequisites are missing.
#[derive(Debug, Clone, Default)]
pub struct SpeechSettings {
    pub subscription_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            openai_endpoint: require_env("AZURE_OPENAI_ENDPOINT")?,
            openai_api_key: require_env("AZURE_OPENAI_API_KEY")?,
            openai_api_version: optional_env("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_OPENAI_API_VERSION.to_string()),
            openai_deployment: optional_env("AZURE_OPENAI_DEPLOYMENT")
                .unwrap_or_else(|| DEFAULT_OPENAI_DEPLOYMENT.to_string()),
            speech: SpeechSettings {
                subscription_key: optional_env("AZURE_SPEECH_KEY"),
                region: optional_env("AZURE_SPEECH_REGION"),
                endpoint: optional_env("SPEECH_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_SPEECH_ENDPOINT.to_string()),
            },
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

impl SpeechSettings {
    /// Plain TTS needs both the subscription key and the region.
    pub fn tts_credentials(&self) -> Option<(&str, &str)> {
        match (&self.subscription_key, &self.region) {
            (Some(key), Some(region)) => Some((key.as_str(), region.as_str())),
            _ => None,
        }
    }

    /// Names of the speech variables that are not set, for the one-time startup warning.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.subscription_key.is_none() {
            missing.push("AZURE_SPEECH_KEY");
        }
        if self.region.is_none() {
            missing.push("AZURE_SPEECH_REGION");
        }
        missing
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Treats empty values the same as unset ones.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tts_credentials_require_key_and_region() {
        let settings = SpeechSettings {
            subscription_key: Some("key".to_string()),
            region: None,
            endpoint: DEFAULT_SPEECH_ENDPOINT.to_string(),
        };
        assert!(settings.tts_credentials().is_none());
        assert_eq!(settings.missing(), vec!["AZURE_SPEECH_REGION"]);
    }

    #[test]
    fn test_fully_configured_speech_has_nothing_missing() {
        let settings = SpeechSettings {
            subscription_key: Some("key".to_string()),
            region: Some("eastus2".to_string()),
            endpoint: DEFAULT_SPEECH_ENDPOINT.to_string(),
        };
        assert_eq!(settings.tts_credentials(), Some(("key", "eastus2")));
        assert!(settings.missing().is_empty());
    }
}
