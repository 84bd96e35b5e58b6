//! Thin resource facades over [`RequestHandler`].
//!
//! Each method formats one REST call: path, query, body and audit reason. Local
//! preconditions (pagination limits, bulk-delete bounds, stale message ids) are checked
//! before anything is queued, so a rejected call never touches the network. Results come
//! back as `serde_json::Value`.

use crate::body::{FileAttachment, RequestBody};
use crate::config::{ConfigError, RestConfig};
use crate::error::ValidationError;
use crate::handler::RequestHandler;
use serde_json::{Map, Value};

pub mod channels;
pub mod guilds;
pub mod interactions;
pub mod users;
pub mod webhooks;

pub use channels::{Channels, GetMessagesOptions, MessageCursor};
pub use guilds::{AuditLogOptions, Guilds};
pub use interactions::Interactions;
pub use users::Users;
pub use webhooks::Webhooks;

/// Entry point for the resource facades.
#[derive(Debug, Clone)]
pub struct Api {
    handler: RequestHandler,
}

impl Api {
    pub fn new(handler: RequestHandler) -> Self {
        Self { handler }
    }

    /// Facades over a handler built with the production transport.
    pub fn from_config(config: RestConfig) -> Result<Self, ConfigError> {
        RequestHandler::new(config).map(Self::new)
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    pub fn channels(&self) -> Channels<'_> {
        Channels::new(&self.handler)
    }

    pub fn guilds(&self) -> Guilds<'_> {
        Guilds::new(&self.handler)
    }

    pub fn webhooks(&self) -> Webhooks<'_> {
        Webhooks::new(&self.handler)
    }

    pub fn interactions(&self) -> Interactions<'_> {
        Interactions::new(&self.handler)
    }

    pub fn users(&self) -> Users<'_> {
        Users::new(&self.handler)
    }
}

pub(crate) fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, min, max, value })
    }
}

/// Message content accepted by message-creating calls.
///
/// A bare string is shorthand for `{"content": ...}`; the structured form carries embeds,
/// files and any other message field.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Text(String),
    Structured {
        content: Option<String>,
        embeds: Vec<Value>,
        files: Vec<FileAttachment>,
        /// Remaining message fields (`tts`, `components`, `allowed_mentions`, ...).
        fields: Map<String, Value>,
    },
}

impl MessagePayload {
    pub fn structured() -> Self {
        MessagePayload::Structured {
            content: None,
            embeds: Vec::new(),
            files: Vec::new(),
            fields: Map::new(),
        }
    }

    pub fn content(self, text: impl Into<String>) -> Self {
        self.map(|content, _, _, _| *content = Some(text.into()))
    }

    pub fn embed(self, embed: Value) -> Self {
        self.map(|_, embeds, _, _| embeds.push(embed))
    }

    pub fn file(self, file: FileAttachment) -> Self {
        self.map(|_, _, files, _| files.push(file))
    }

    pub fn field(self, key: impl Into<String>, value: Value) -> Self {
        self.map(|_, _, _, fields| {
            fields.insert(key.into(), value);
        })
    }

    fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut Option<String>, &mut Vec<Value>, &mut Vec<FileAttachment>, &mut Map<String, Value>),
    {
        let (mut content, mut embeds, mut files, mut fields) = match self {
            MessagePayload::Text(text) => (Some(text), Vec::new(), Vec::new(), Map::new()),
            MessagePayload::Structured { content, embeds, files, fields } => (content, embeds, files, fields),
        };
        f(&mut content, &mut embeds, &mut files, &mut fields);
        MessagePayload::Structured { content, embeds, files, fields }
    }

    /// Split into the JSON fields and the files to upload.
    ///
    /// When files are present an `attachments` array describing them is added unless the
    /// caller supplied one.
    pub fn into_parts(self) -> (Map<String, Value>, Vec<FileAttachment>) {
        match self {
            MessagePayload::Text(text) => {
                let mut map = Map::new();
                map.insert("content".into(), Value::String(text));
                (map, Vec::new())
            }
            MessagePayload::Structured { content, embeds, files, fields } => {
                let mut map = Map::new();
                if let Some(content) = content {
                    map.insert("content".into(), Value::String(content));
                }
                if !embeds.is_empty() {
                    map.insert("embeds".into(), Value::Array(embeds));
                }
                map.extend(fields);
                if !files.is_empty() && !map.contains_key("attachments") {
                    let attachments = files
                        .iter()
                        .enumerate()
                        .map(|(id, file)| serde_json::json!({ "id": id, "filename": file.name }))
                        .collect();
                    map.insert("attachments".into(), Value::Array(attachments));
                }
                (map, files)
            }
        }
    }

    pub fn into_body(self) -> RequestBody {
        let (map, files) = self.into_parts();
        RequestBody::with_files(Some(Value::Object(map)), files)
    }
}

impl From<&str> for MessagePayload {
    fn from(text: &str) -> Self {
        MessagePayload::Text(text.to_owned())
    }
}

impl From<String> for MessagePayload {
    fn from(text: String) -> Self {
        MessagePayload::Text(text)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyKind;
    use serde_json::json;

    #[test]
    fn text_payload_is_content_only() {
        let body = MessagePayload::from("hello").into_body();
        assert_eq!(body, RequestBody::Json(json!({"content": "hello"})));
    }

    #[test]
    fn structured_payload_keeps_field_order_and_adds_attachments() {
        let payload = MessagePayload::from("see file")
            .embed(json!({"title": "t"}))
            .field("tts", json!(false))
            .file(FileAttachment::new("a.png", vec![1]));
        let (map, files) = payload.clone().into_parts();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["content", "embeds", "tts", "attachments"]);
        assert_eq!(map["attachments"], json!([{"id": 0, "filename": "a.png"}]));
        assert_eq!(files.len(), 1);
        assert_eq!(payload.into_body().kind(), BodyKind::Multipart);
    }

    #[test]
    fn explicit_attachments_are_not_replaced() {
        let (map, _) = MessagePayload::structured()
            .field("attachments", json!([{"id": 0, "description": "alt"}]))
            .file(FileAttachment::new("a.png", vec![1]))
            .into_parts();
        assert_eq!(map["attachments"], json!([{"id": 0, "description": "alt"}]));
    }

    #[test]
    fn range_check_reports_bounds() {
        assert!(check_range("limit", 50, 1, 100).is_ok());
        assert_eq!(
            check_range("limit", 0, 1, 100),
            Err(ValidationError::OutOfRange { field: "limit", min: 1, max: 100, value: 0 })
        );
    }
}
