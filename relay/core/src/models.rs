//! Model Registry
//!
//! Maps a model name to the provider that serves it and the model's output
//! token ceiling. Built-in entries cover the hosted OpenAI and Anthropic
//! models; Ollama models are whatever the operator configures.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Output ceiling assumed for configured Ollama models
pub const DEFAULT_OLLAMA_MAX_TOKENS: u32 = 4096;

/// Which API serves a model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    /// OpenAI chat completions
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic messages
    Anthropic,
    /// Local Ollama server
    Ollama,
}

impl ChatProvider {
    /// Every provider, in default-selection order
    pub const ALL: [Self; 3] = [Self::OpenAi, Self::Anthropic, Self::Ollama];

    /// Stable lowercase key
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    /// Human-readable name
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Ollama => "Ollama",
        }
    }
}

impl fmt::Display for ChatProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// What the relay needs to know about one model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    /// Serving provider
    pub provider: ChatProvider,
    /// Largest accepted `max_tokens`, also the default
    pub max_output_tokens: u32,
}

impl ModelSpec {
    /// Create a model spec
    #[must_use]
    pub fn new(provider: ChatProvider, max_output_tokens: u32) -> Self {
        Self {
            provider,
            max_output_tokens,
        }
    }
}

const BUILTIN_MODELS: &[(&str, ChatProvider, u32)] = &[
    // OpenAI
    ("gpt-5", ChatProvider::OpenAi, 128_000),
    ("gpt-5-mini", ChatProvider::OpenAi, 128_000),
    ("gpt-5-nano", ChatProvider::OpenAi, 128_000),
    ("gpt-5-2025-08-07", ChatProvider::OpenAi, 128_000),
    ("gpt-5-mini-2025-08-07", ChatProvider::OpenAi, 128_000),
    ("gpt-5-nano-2025-08-07", ChatProvider::OpenAi, 128_000),
    ("gpt-5-chat-latest", ChatProvider::OpenAi, 16_384),
    ("gpt-4.1", ChatProvider::OpenAi, 32_768),
    ("gpt-4.1-mini", ChatProvider::OpenAi, 32_768),
    ("gpt-4.1-nano", ChatProvider::OpenAi, 32_768),
    ("o4-mini", ChatProvider::OpenAi, 100_000),
    ("o3", ChatProvider::OpenAi, 100_000),
    ("o3-mini", ChatProvider::OpenAi, 100_000),
    ("o1", ChatProvider::OpenAi, 100_000),
    ("o1-mini", ChatProvider::OpenAi, 65_536),
    ("gpt-4o", ChatProvider::OpenAi, 16_384),
    ("gpt-4o-mini", ChatProvider::OpenAi, 16_384),
    ("chatgpt-4o-latest", ChatProvider::OpenAi, 16_384),
    ("gpt-4-turbo", ChatProvider::OpenAi, 4_096),
    ("gpt-4", ChatProvider::OpenAi, 8_192),
    ("gpt-3.5-turbo", ChatProvider::OpenAi, 4_096),
    // Anthropic
    ("claude-opus-4-1-20250805", ChatProvider::Anthropic, 32_000),
    ("claude-opus-4-0", ChatProvider::Anthropic, 32_000),
    ("claude-opus-4-20250514", ChatProvider::Anthropic, 32_000),
    ("claude-sonnet-4-0", ChatProvider::Anthropic, 64_000),
    ("claude-sonnet-4-20250514", ChatProvider::Anthropic, 64_000),
    ("claude-3-7-sonnet-latest", ChatProvider::Anthropic, 64_000),
    ("claude-3-7-sonnet-20250219", ChatProvider::Anthropic, 64_000),
    ("claude-3-5-sonnet-latest", ChatProvider::Anthropic, 8_192),
    ("claude-3-5-sonnet-20241022", ChatProvider::Anthropic, 8_192),
    ("claude-3-5-sonnet-20240620", ChatProvider::Anthropic, 8_192),
    ("claude-3-5-haiku-latest", ChatProvider::Anthropic, 8_192),
    ("claude-3-5-haiku-20241022", ChatProvider::Anthropic, 8_192),
    ("claude-3-opus-latest", ChatProvider::Anthropic, 4_096),
    ("claude-3-opus-20240229", ChatProvider::Anthropic, 4_096),
    ("claude-3-haiku-20240307", ChatProvider::Anthropic, 4_096),
];

/// Model name to provider lookup
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelSpec>,
    fallbacks: BTreeMap<ChatProvider, String>,
    default_model: Option<String>,
}

impl ModelRegistry {
    /// A registry with no models
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The hosted OpenAI and Anthropic models
    ///
    /// Fallbacks are `gpt-5-nano` and `claude-3-5-haiku-latest`.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (name, provider, limit) in BUILTIN_MODELS {
            registry
                .models
                .insert((*name).to_string(), ModelSpec::new(*provider, *limit));
        }
        registry
            .fallbacks
            .insert(ChatProvider::OpenAi, "gpt-5-nano".to_string());
        registry
            .fallbacks
            .insert(ChatProvider::Anthropic, "claude-3-5-haiku-latest".to_string());
        registry
    }

    /// Add or replace a model
    ///
    /// The first model added for a provider without a fallback becomes its
    /// fallback.
    pub fn insert(&mut self, name: impl Into<String>, spec: ModelSpec) {
        let name = name.into();
        self.fallbacks
            .entry(spec.provider)
            .or_insert_with(|| name.clone());
        self.models.insert(name, spec);
    }

    /// Register locally served Ollama models
    #[must_use]
    pub fn with_ollama_models<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.insert(
                name,
                ModelSpec::new(ChatProvider::Ollama, DEFAULT_OLLAMA_MAX_TOKENS),
            );
        }
        self
    }

    /// Prefer `model` when a request names none
    #[must_use]
    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model.filter(|m| !m.is_empty());
        self
    }

    /// Look up a model
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    /// Whether the model is known
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// The provider serving a model
    #[must_use]
    pub fn provider_for(&self, name: &str) -> Option<ChatProvider> {
        self.get(name).map(|spec| spec.provider)
    }

    /// The model used for a provider when none is named
    #[must_use]
    pub fn fallback(&self, provider: ChatProvider) -> Option<&str> {
        self.fallbacks.get(&provider).map(String::as_str)
    }

    /// Pick a model for a request that named none
    ///
    /// The configured default wins when its provider is available; otherwise
    /// the fallback of the first available provider.
    #[must_use]
    pub fn default_model(&self, available: impl Fn(ChatProvider) -> bool) -> Option<String> {
        if let Some(model) = &self.default_model {
            if self.provider_for(model).is_some_and(&available) {
                return Some(model.clone());
            }
        }
        ChatProvider::ALL
            .into_iter()
            .filter(|p| available(*p))
            .find_map(|p| self.fallback(p).map(str::to_owned))
    }

    /// Sorted model names served by `provider`
    #[must_use]
    pub fn names_for(&self, provider: ChatProvider) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .models
            .iter()
            .filter(|(_, spec)| spec.provider == provider)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Number of known models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no models are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
