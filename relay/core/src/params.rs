//! Request Validation
//!
//! Channel IDs, model names and per-provider generation parameters arrive as
//! raw strings from the transport. Everything is checked here before a user
//! turn touches the broker.
//!
//! | Parameter    | OpenAI  | Anthropic | Ollama  | Default     |
//! |--------------|---------|-----------|---------|-------------|
//! | `temp`       | 0 - 2   | 0 - 1     | 0 - 2   | 1.0         |
//! | `top_p`      | 0 - 1   | 0 - 1     | 0 - 1   | unset       |
//! | `top_k`      | -       | 0 - 500   | 0 - 500 | unset       |
//! | `max_tokens` | 0 - lim | 0 - lim   | 0 - lim | model limit |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ChatProvider;

/// Longest accepted channel ID
pub const MAX_CHANNEL_ID_LEN: usize = 32;

/// Longest accepted model name
pub const MAX_MODEL_NAME_LEN: usize = 140;

const MAX_TOP_K: u32 = 500;

/// A rejected request field
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    /// Channel ID missing
    #[error("id cannot be blank")]
    EmptyChannelId,

    /// Channel ID over the length limit
    #[error("id must be <= {max} characters")]
    ChannelIdTooLong {
        /// The limit
        max: usize,
    },

    /// Channel ID contains something other than ASCII letters and digits
    #[error("id must be alphanumeric")]
    ChannelIdNotAlphanumeric,

    /// No model named and none could be defaulted
    #[error("model cannot be blank")]
    EmptyModel,

    /// Model name over the length limit
    #[error("model must be <= {max} characters")]
    ModelNameTooLong {
        /// The limit
        max: usize,
    },

    /// A float parameter did not parse
    #[error("{name} must be a number")]
    NotANumber {
        /// Parameter name
        name: &'static str,
    },

    /// An integer parameter did not parse
    #[error("{name} must be an integer")]
    NotAnInteger {
        /// Parameter name
        name: &'static str,
    },

    /// A parameter outside its range for the provider
    #[error("{name} out of range for {provider} ({range})")]
    OutOfRange {
        /// Parameter name
        name: &'static str,
        /// Provider whose range applies
        provider: ChatProvider,
        /// Accepted range, inclusive
        range: String,
    },

    /// A parameter the provider does not accept
    #[error("{name} is not supported by {provider}")]
    Unsupported {
        /// Parameter name
        name: &'static str,
        /// Provider rejecting it
        provider: ChatProvider,
    },
}

/// Check a channel ID: non-empty, short, ASCII alphanumeric
///
/// # Errors
///
/// Returns the first rule the ID breaks.
pub fn validate_channel_id(id: &str) -> Result<(), ParamError> {
    if id.is_empty() {
        return Err(ParamError::EmptyChannelId);
    }
    if id.len() > MAX_CHANNEL_ID_LEN {
        return Err(ParamError::ChannelIdTooLong {
            max: MAX_CHANNEL_ID_LEN,
        });
    }
    if !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ParamError::ChannelIdNotAlphanumeric);
    }
    Ok(())
}

/// Check a model name: non-empty and short
///
/// Whether the model exists is the registry's call.
///
/// # Errors
///
/// Returns the first rule the name breaks.
pub fn validate_model_name(name: &str) -> Result<(), ParamError> {
    if name.is_empty() {
        return Err(ParamError::EmptyModel);
    }
    if name.len() > MAX_MODEL_NAME_LEN {
        return Err(ParamError::ModelNameTooLong {
            max: MAX_MODEL_NAME_LEN,
        });
    }
    Ok(())
}

/// Unparsed generation parameters, as sent in the query string
///
/// Empty strings count as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RawParams {
    /// Sampling temperature
    #[serde(rename = "temp", default)]
    pub temperature: Option<String>,
    /// Nucleus sampling mass
    #[serde(default)]
    pub top_p: Option<String>,
    /// Top-k sampling cutoff
    #[serde(default)]
    pub top_k: Option<String>,
    /// Output token cap
    #[serde(default)]
    pub max_tokens: Option<String>,
}

/// Validated generation parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GenerationParams {
    /// Output token cap
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f64,
    /// Nucleus sampling mass, provider default when unset
    pub top_p: Option<f64>,
    /// Top-k cutoff, provider default when unset
    pub top_k: Option<u32>,
}

impl GenerationParams {
    /// Defaults for a model with output ceiling `limit`
    #[must_use]
    pub fn defaults(limit: u32) -> Self {
        Self {
            max_tokens: limit,
            temperature: 1.0,
            top_p: None,
            top_k: None,
        }
    }

    /// Parse and range-check `raw` for `provider`
    ///
    /// # Errors
    ///
    /// Returns the first field that fails to parse or falls outside the
    /// provider's range.
    pub fn parse(raw: &RawParams, provider: ChatProvider, limit: u32) -> Result<Self, ParamError> {
        let mut params = Self::defaults(limit);

        let max_temp = match provider {
            ChatProvider::Anthropic => 1.0,
            ChatProvider::OpenAi | ChatProvider::Ollama => 2.0,
        };
        if let Some(t) = parse_float(raw.temperature.as_deref(), "temp", provider, max_temp)? {
            params.temperature = t;
        }

        params.top_p = parse_float(raw.top_p.as_deref(), "top_p", provider, 1.0)?;

        if present(raw.top_k.as_deref()).is_some() && provider == ChatProvider::OpenAi {
            return Err(ParamError::Unsupported {
                name: "top_k",
                provider,
            });
        }
        params.top_k = parse_int(raw.top_k.as_deref(), "top_k", provider, MAX_TOP_K)?;

        if let Some(n) = parse_int(raw.max_tokens.as_deref(), "max_tokens", provider, limit)? {
            params.max_tokens = n;
        }

        Ok(params)
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_float(
    value: Option<&str>,
    name: &'static str,
    provider: ChatProvider,
    max: f64,
) -> Result<Option<f64>, ParamError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    let v: f64 = value.parse().map_err(|_| ParamError::NotANumber { name })?;
    if !(0.0..=max).contains(&v) {
        return Err(ParamError::OutOfRange {
            name,
            provider,
            range: format!("0.0-{max:.1}"),
        });
    }
    Ok(Some(v))
}

fn parse_int(
    value: Option<&str>,
    name: &'static str,
    provider: ChatProvider,
    max: u32,
) -> Result<Option<u32>, ParamError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    let v: i64 = value.parse().map_err(|_| ParamError::NotAnInteger { name })?;
    match u32::try_from(v) {
        Ok(v) if v <= max => Ok(Some(v)),
        _ => Err(ParamError::OutOfRange {
            name,
            provider,
            range: format!("0-{max}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(temp: Option<&str>, top_p: Option<&str>, top_k: Option<&str>, max: Option<&str>) -> RawParams {
        RawParams {
            temperature: temp.map(String::from),
            top_p: top_p.map(String::from),
            top_k: top_k.map(String::from),
            max_tokens: max.map(String::from),
        }
    }

    #[test]
    fn test_channel_id_rules() {
        assert_eq!(validate_channel_id("abc123"), Ok(()));
        assert_eq!(validate_channel_id(""), Err(ParamError::EmptyChannelId));
        assert_eq!(
            validate_channel_id(&"a".repeat(33)),
            Err(ParamError::ChannelIdTooLong { max: 32 })
        );
        assert_eq!(validate_channel_id(&"a".repeat(32)), Ok(()));
        assert_eq!(
            validate_channel_id("with space"),
            Err(ParamError::ChannelIdNotAlphanumeric)
        );
        assert_eq!(
            validate_channel_id("caf\u{e9}"),
            Err(ParamError::ChannelIdNotAlphanumeric)
        );
    }

    #[test]
    fn test_model_name_rules() {
        assert_eq!(validate_model_name("gpt-5-nano"), Ok(()));
        assert_eq!(validate_model_name(""), Err(ParamError::EmptyModel));
        assert_eq!(
            validate_model_name(&"m".repeat(141)),
            Err(ParamError::ModelNameTooLong { max: 140 })
        );
    }

    #[test]
    fn test_defaults() {
        let params = GenerationParams::parse(&RawParams::default(), ChatProvider::OpenAi, 4096).unwrap();
        assert_eq!(params, GenerationParams::defaults(4096));
        assert!((params.temperature - 1.0).abs() < f64::EPSILON);

        // Blank values are absent
        let params = GenerationParams::parse(&raw(Some(""), Some(" "), None, Some("")), ChatProvider::Anthropic, 100).unwrap();
        assert_eq!(params, GenerationParams::defaults(100));
    }

    #[test]
    fn test_temperature_range_depends_on_provider() {
        let hot = raw(Some("1.5"), None, None, None);
        let params = GenerationParams::parse(&hot, ChatProvider::OpenAi, 10).unwrap();
        assert!((params.temperature - 1.5).abs() < f64::EPSILON);
        assert!(GenerationParams::parse(&hot, ChatProvider::Ollama, 10).is_ok());

        let err = GenerationParams::parse(&hot, ChatProvider::Anthropic, 10).unwrap_err();
        assert!(matches!(err, ParamError::OutOfRange { name: "temp", .. }));
        assert_eq!(err.to_string(), "temp out of range for Anthropic (0.0-1.0)");

        let err = GenerationParams::parse(&raw(Some("2.1"), None, None, None), ChatProvider::OpenAi, 10).unwrap_err();
        assert_eq!(err.to_string(), "temp out of range for OpenAI (0.0-2.0)");

        assert_eq!(
            GenerationParams::parse(&raw(Some("warm"), None, None, None), ChatProvider::OpenAi, 10),
            Err(ParamError::NotANumber { name: "temp" })
        );
    }

    #[test]
    fn test_top_p_and_top_k() {
        let params = GenerationParams::parse(&raw(None, Some("0.9"), Some("40"), None), ChatProvider::Anthropic, 10).unwrap();
        assert_eq!(params.top_p, Some(0.9));
        assert_eq!(params.top_k, Some(40));

        assert!(matches!(
            GenerationParams::parse(&raw(None, Some("1.1"), None, None), ChatProvider::Anthropic, 10),
            Err(ParamError::OutOfRange { name: "top_p", .. })
        ));
        assert!(matches!(
            GenerationParams::parse(&raw(None, None, Some("501"), None), ChatProvider::Ollama, 10),
            Err(ParamError::OutOfRange { name: "top_k", .. })
        ));
        assert_eq!(
            GenerationParams::parse(&raw(None, None, Some("40"), None), ChatProvider::OpenAi, 10),
            Err(ParamError::Unsupported {
                name: "top_k",
                provider: ChatProvider::OpenAi
            })
        );
        assert_eq!(
            GenerationParams::parse(&raw(None, None, Some("4.5"), None), ChatProvider::Anthropic, 10),
            Err(ParamError::NotAnInteger { name: "top_k" })
        );
    }

    #[test]
    fn test_max_tokens_bounded_by_model_limit() {
        let params = GenerationParams::parse(&raw(None, None, None, Some("0")), ChatProvider::OpenAi, 512).unwrap();
        assert_eq!(params.max_tokens, 0);
        let params = GenerationParams::parse(&raw(None, None, None, Some("512")), ChatProvider::OpenAi, 512).unwrap();
        assert_eq!(params.max_tokens, 512);

        assert!(matches!(
            GenerationParams::parse(&raw(None, None, None, Some("513")), ChatProvider::OpenAi, 512),
            Err(ParamError::OutOfRange { name: "max_tokens", .. })
        ));
        assert!(matches!(
            GenerationParams::parse(&raw(None, None, None, Some("-1")), ChatProvider::OpenAi, 512),
            Err(ParamError::OutOfRange { name: "max_tokens", .. })
        ));
    }
}
