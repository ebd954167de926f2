//! Built-in provider presets for common LLM API providers.
//!
//! Each preset defines the base URL, wire format, and default environment
//! variable for the API key, so a config entry for a well-known provider
//! only needs a name and its model prefixes.

use crate::config::ProviderKind;

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub kind: ProviderKind,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "anthropic",
        base_url: "https://api.anthropic.com",
        kind: ProviderKind::Anthropic,
        default_api_key_env: "ANTHROPIC_API_KEY",
    },
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        kind: ProviderKind::Openai,
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        kind: ProviderKind::Openai,
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        kind: ProviderKind::Gemini,
        default_api_key_env: "GEMINI_API_KEY",
    },
    ProviderPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        kind: ProviderKind::Openai,
        default_api_key_env: "FIREWORKS_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        kind: ProviderKind::Openai,
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        kind: ProviderKind::Openai,
        default_api_key_env: "TOGETHER_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        kind: ProviderKind::Openai,
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        PRESETS.iter().find(|p| p.name == name.to_lowercase())
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("openai").is_some());
        assert!(ProviderPreset::from_name("gemini").is_some());
        assert!(ProviderPreset::from_name("OpenRouter").is_some()); // case-insensitive
        assert!(ProviderPreset::from_name("unknown_provider").is_none());
    }

    #[test]
    fn test_preset_kinds() {
        assert_eq!(
            ProviderPreset::from_name("anthropic").map(|p| p.kind),
            Some(ProviderKind::Anthropic)
        );
        assert_eq!(
            ProviderPreset::from_name("gemini").map(|p| p.kind),
            Some(ProviderKind::Gemini)
        );
        assert_eq!(
            ProviderPreset::from_name("openrouter").map(|p| p.kind),
            Some(ProviderKind::Openai)
        );
    }
}
