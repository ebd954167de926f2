//! Provider registry: model-prefix routing and per-request credentials.
//!
//! Built once at startup from the configured providers; read-only afterwards
//! and shared across request tasks. A request's `model` string is matched
//! against every configured prefix and the longest match wins.

use std::sync::Arc;

use crate::adapters::{Adapter, AnthropicAdapter, GeminiAdapter, OpenAiAdapter};
use crate::config::{ProviderConfig, ProviderKind, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::presets::ProviderPreset;

/// Everything the dispatcher needs to know about one configured provider.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub model_prefixes: Vec<String>,
    pub supports_streaming: bool,
}

impl ProviderDescriptor {
    /// Resolve the upstream credential for this provider.
    ///
    /// `${NAME}_API_KEY` in the environment takes precedence, then the
    /// configured key, then the configured key environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        let env_name = format!("{}_API_KEY", self.name.to_uppercase().replace('-', "_"));
        if let Ok(key) = std::env::var(&env_name) {
            if !key.is_empty() {
                return Ok(key);
            }
        }

        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }

        if let Some(ref env) = self.api_key_env {
            if let Ok(key) = std::env::var(env) {
                if !key.is_empty() {
                    return Ok(key);
                }
            }
        }

        Err(ProxyError::credential(format!(
            "No API key for provider '{}'. Set {} (or configure api_key / api_key_env).",
            self.name, env_name
        )))
    }
}

pub struct ProviderEntry {
    pub descriptor: ProviderDescriptor,
    pub adapter: Arc<dyn Adapter>,
}

pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        if config.providers.is_empty() {
            return Err(ProxyError::config(
                "No providers configured. Add at least one [[providers]] entry.",
            ));
        }

        let entries = config
            .providers
            .iter()
            .map(build_entry)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }

    /// Select the provider whose configured prefix is the longest one that
    /// prefixes the requested model name.
    pub fn lookup(&self, model: &str) -> Option<&ProviderEntry> {
        let mut best: Option<(&ProviderEntry, usize)> = None;

        for entry in &self.entries {
            for prefix in &entry.descriptor.model_prefixes {
                if model.starts_with(prefix.as_str()) {
                    let len = prefix.len();
                    if best.map(|(_, best_len)| len > best_len).unwrap_or(true) {
                        best = Some((entry, len));
                    }
                }
            }
        }

        best.map(|(entry, _)| entry)
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }
}

fn build_entry(provider: &ProviderConfig) -> Result<ProviderEntry> {
    let preset = ProviderPreset::from_name(&provider.name);

    let kind = provider
        .kind
        .or_else(|| preset.map(|p| p.kind))
        .unwrap_or(ProviderKind::Openai);

    let api_base = provider
        .api_base
        .clone()
        .or_else(|| preset.map(|p| p.base_url.to_string()))
        .ok_or_else(|| {
            ProxyError::config(format!(
                "Provider '{}' is not a known preset and has no api_base configured",
                provider.name
            ))
        })?;

    let api_key_env = provider
        .api_key_env
        .clone()
        .or_else(|| preset.map(|p| p.default_api_key_env.to_string()));

    let adapter: Arc<dyn Adapter> = match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(&provider.name, &api_base)),
        ProviderKind::Openai => Arc::new(OpenAiAdapter::new(&provider.name, &api_base)),
        ProviderKind::Gemini => Arc::new(GeminiAdapter::new(&provider.name, &api_base)),
    };

    Ok(ProviderEntry {
        descriptor: ProviderDescriptor {
            name: provider.name.clone(),
            api_base,
            api_key: provider.api_key.clone(),
            api_key_env,
            model_prefixes: provider.model_prefixes.clone(),
            supports_streaming: provider.supports_streaming.unwrap_or(true),
        },
        adapter,
    })
}
