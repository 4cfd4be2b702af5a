use secrecy::{ExposeSecret, Secret};

use crate::configuration::AiSettings;

/// Handle on the generative AI provider
///
/// Configured once when the worker starts, then passed to whoever needs it.
#[derive(Clone)]
pub struct GenerativeAiClient {
    api_key: Secret<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum GenerativeAiClientError {
    #[error("The generative AI api key is not configured")]
    MissingApiKey,
}

impl GenerativeAiClient {
    pub fn try_new(settings: &AiSettings) -> Result<Self, GenerativeAiClientError> {
        if settings.api_key.expose_secret().trim().is_empty() {
            return Err(GenerativeAiClientError::MissingApiKey);
        }

        Ok(Self {
            api_key: settings.api_key.clone(),
        })
    }

    pub fn api_key(&self) -> &Secret<String> {
        &self.api_key
    }
}

impl std::fmt::Debug for GenerativeAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerativeAiClient")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
