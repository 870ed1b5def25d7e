//! Channel Messages
//!
//! A [`Message`] is one unit of activity on a channel: a user's input, a batch
//! of assistant output, the empty end-of-stream terminator, or a long-poll
//! timeout sentinel. Messages are immutable once the broker has stamped them.
//!
//! # Wire Form
//!
//! Clients read a fixed JSON shape, tab-indented:
//!
//! ```text
//! {
//! 	"ID": "lobby",
//! 	"Body": "hello",
//! 	"Time": "2025-01-01T12:00:00.123456789Z",
//! 	"Role": 2
//! }
//! ```
//!
//! `ID` is omitted when empty, `LongPollTimeout` when false and `Role` when it
//! is [`MessageRole::System`] (discriminant zero).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who produced a message
///
/// Serialized as its numeric discriminant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageRole {
    /// Reserved; never published by the relay
    #[default]
    System = 0,
    /// Model output
    Assistant = 1,
    /// Human input
    User = 2,
}

impl MessageRole {
    /// Whether this is the reserved system role
    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

impl From<MessageRole> for u8 {
    fn from(role: MessageRole) -> Self {
        role as u8
    }
}

/// A role discriminant outside the known set
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown message role {0}")]
pub struct UnknownRole(pub u8);

impl TryFrom<u8> for MessageRole {
    type Error = UnknownRole;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::System),
            1 => Ok(Self::Assistant),
            2 => Ok(Self::User),
            other => Err(UnknownRole(other)),
        }
    }
}

/// One unit of channel activity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Channel the message belongs to (empty for timeout sentinels)
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    /// Text payload
    #[serde(rename = "Body", default)]
    pub body: String,
    /// Broker-assigned publish time; clients send it back as `after`
    #[serde(rename = "Time", with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    /// Set on the synthetic message a long-poll receives when it times out
    #[serde(rename = "LongPollTimeout", default, skip_serializing_if = "is_false")]
    pub long_poll_timeout: bool,
    /// Who produced the message
    #[serde(rename = "Role", default, skip_serializing_if = "MessageRole::is_system")]
    pub role: MessageRole,
}

impl Message {
    /// Create an unpublished message; the broker assigns the timestamp
    pub fn new(channel_id: impl Into<String>, body: impl Into<String>, role: MessageRole) -> Self {
        Self {
            channel_id: channel_id.into(),
            body: body.into(),
            timestamp: DateTime::<Utc>::default(),
            long_poll_timeout: false,
            role,
        }
    }

    /// A message typed by a user
    pub fn user(channel_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(channel_id, body, MessageRole::User)
    }

    /// A batch of assistant output
    pub fn assistant(channel_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(channel_id, body, MessageRole::Assistant)
    }

    /// The empty assistant message that marks the end of a generation
    pub fn end_of_stream(channel_id: impl Into<String>) -> Self {
        Self::new(channel_id, String::new(), MessageRole::Assistant)
    }

    /// The sentinel handed to a long-poll that expired without a message
    #[must_use]
    pub fn timeout_sentinel(at: DateTime<Utc>) -> Self {
        Self {
            channel_id: String::new(),
            body: String::new(),
            timestamp: at,
            long_poll_timeout: true,
            role: MessageRole::System,
        }
    }

    /// User or assistant content worth feeding back to a provider
    #[must_use]
    pub fn is_conversational(&self) -> bool {
        !self.long_poll_timeout
            && !self.body.is_empty()
            && matches!(self.role, MessageRole::User | MessageRole::Assistant)
    }

    /// Render the tab-indented wire form
    ///
    /// # Errors
    ///
    /// Returns the serializer's error; callers in the broker log it and fall
    /// back to an empty body.
    pub fn to_wire_json(&self) -> serde_json::Result<String> {
        let mut out = Vec::with_capacity(128);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        // serde_json only ever emits UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Join already-serialized messages into a JSON array
///
/// Produces `[\n<a>,\n<b>\n]\n`, the shape of the recent-history response.
pub fn json_array<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::from("[\n");
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push_str(",\n");
        }
        out.push_str(item);
    }
    out.push_str("\n]\n");
    out
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

/// RFC 3339 with offset and nanosecond precision
mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_role_discriminants() {
        assert_eq!(u8::from(MessageRole::System), 0);
        assert_eq!(u8::from(MessageRole::Assistant), 1);
        assert_eq!(u8::from(MessageRole::User), 2);
        assert_eq!(MessageRole::try_from(2), Ok(MessageRole::User));
        assert_eq!(MessageRole::try_from(7), Err(UnknownRole(7)));
    }

    #[test]
    fn test_wire_form_user_message() {
        let mut msg = Message::user("lobby", "hi");
        msg.timestamp = at_noon();

        let json = msg.to_wire_json().unwrap();
        assert_eq!(
            json,
            "{\n\t\"ID\": \"lobby\",\n\t\"Body\": \"hi\",\n\t\"Time\": \"2025-01-01T12:00:00Z\",\n\t\"Role\": 2\n}"
        );
    }

    #[test]
    fn test_wire_form_timeout_sentinel_omits_defaults() {
        let msg = Message::timeout_sentinel(at_noon());
        let value: serde_json::Value = serde_json::from_str(&msg.to_wire_json().unwrap()).unwrap();

        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("ID"));
        assert!(!obj.contains_key("Role"));
        assert_eq!(obj["LongPollTimeout"], serde_json::json!(true));
        assert_eq!(obj["Body"], serde_json::json!(""));
    }

    #[test]
    fn test_wire_form_keeps_nanoseconds() {
        let mut msg = Message::assistant("c1", "x");
        msg.timestamp = at_noon() + chrono::Duration::nanoseconds(123_456_789);

        let json = msg.to_wire_json().unwrap();
        assert!(json.contains("2025-01-01T12:00:00.123456789Z"));
    }

    #[test]
    fn test_wire_form_parses_back() {
        let mut msg = Message::assistant("c1", "partial output");
        msg.timestamp = at_noon();
        let parsed: Message = serde_json::from_str(&msg.to_wire_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_is_conversational() {
        assert!(Message::user("c", "hello").is_conversational());
        assert!(Message::assistant("c", "world").is_conversational());
        assert!(!Message::end_of_stream("c").is_conversational());
        assert!(!Message::timeout_sentinel(at_noon()).is_conversational());
        assert!(!Message::new("c", "rules", MessageRole::System).is_conversational());
    }

    #[test]
    fn test_json_array_shapes() {
        assert_eq!(json_array(Vec::<&str>::new()), "[\n\n]\n");
        assert_eq!(json_array(["{}"]), "[\n{}\n]\n");
        assert_eq!(json_array(["{\"a\":1}", "{\"b\":2}"]), "[\n{\"a\":1},\n{\"b\":2}\n]\n");
    }
}
