//! Provider configuration loader.

use oc_llm::LlmClient;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Stored key value meaning "read the key from `env_key`".
pub const API_KEY_PLACEHOLDER: &str = "put-your-key-here";
pub const CONFIG_PATH_ENV: &str = "OC_PROVIDERS_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub provider_name: String,
    pub api_url: String,
    #[serde(default)]
    pub api_key: ApiKey,
    #[serde(default)]
    pub models: Vec<ModelAlias>,
}

#[derive(Clone, Default, Deserialize)]
pub struct ApiKey {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub env_key: Option<String>,
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("key", &"<redacted>")
            .field("env_key", &self.env_key)
            .finish()
    }
}

/// Logical model name mapped to the id sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelAlias {
    pub alias: String,
    pub model: String,
}

/// One entry of the flat model menu across all providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderModel {
    pub index: usize,
    pub provider: String,
    pub alias: String,
}

impl fmt::Display for ProviderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.alias)
    }
}

impl ProvidersConfig {
    /// Read, parse and validate the providers file. `.env` is loaded first
    /// so referenced key variables can come from it.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(error = %e, "no .env loaded");
        }
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read providers config {}: {e}", path.display()))?;

        let cfg = Self::from_toml_str(&contents)
            .map_err(|e| anyhow::anyhow!("providers config {}: {e}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            providers = cfg.providers.len(),
            "providers config loaded"
        );
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(contents).map_err(|e| anyhow::anyhow!("parse: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut names = HashSet::new();
        for (i, p) in self.providers.iter().enumerate() {
            if p.provider_name.trim().is_empty() {
                return Err(anyhow::anyhow!("providers[{i}].provider_name is required"));
            }
            if p.api_url.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "providers[{i}].api_url is required ({})",
                    p.provider_name
                ));
            }
            if !names.insert(p.provider_name.as_str()) {
                return Err(anyhow::anyhow!(
                    "duplicate provider_name {:?}",
                    p.provider_name
                ));
            }
            let mut aliases = HashSet::new();
            for m in &p.models {
                if !aliases.insert(m.alias.as_str()) {
                    return Err(anyhow::anyhow!(
                        "duplicate model alias {:?} for provider {:?}",
                        m.alias,
                        p.provider_name
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.provider_name == name)
    }

    /// Every `provider/alias` pair, numbered in file order.
    pub fn provider_models(&self) -> Vec<ProviderModel> {
        self.providers
            .iter()
            .flat_map(|p| p.models.iter().map(move |m| (p, m)))
            .enumerate()
            .map(|(index, (p, m))| ProviderModel {
                index,
                provider: p.provider_name.clone(),
                alias: m.alias.clone(),
            })
            .collect()
    }

    /// Provider and model behind a [`ProviderModel::index`].
    pub fn provider_model(&self, index: usize) -> Option<(&ProviderConfig, &ModelAlias)> {
        self.providers
            .iter()
            .flat_map(|p| p.models.iter().map(move |m| (p, m)))
            .nth(index)
    }
}

impl ProviderConfig {
    pub fn model(&self, alias: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|m| m.alias == alias)
            .map(|m| m.model.as_str())
    }

    pub fn model_aliases(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.alias.as_str())
    }

    pub fn client(&self) -> LlmClient {
        LlmClient::new(&self.api_url, &self.api_key.resolve())
    }
}

impl ApiKey {
    /// The stored key, or the `env_key` variable when the stored key is the
    /// placeholder. A missing variable resolves to an empty key.
    pub fn resolve(&self) -> String {
        if self.key != API_KEY_PLACEHOLDER {
            return self.key.clone();
        }
        let Some(env_key) = self.env_key.as_deref() else {
            return self.key.clone();
        };
        match std::env::var(env_key) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(env_key, "api key environment variable is not set");
                String::new()
            }
        }
    }
}

pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".omnichat").join("providers.toml")
}
