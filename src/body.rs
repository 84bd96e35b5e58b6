//! Request body encoding.
//!
//! A body is either plain JSON or JSON metadata plus file attachments. The latter becomes a
//! `multipart/form-data` form: a `payload_json` part carrying the metadata, then one
//! `files[n]` part per attachment with its filename. JSON field order is preserved as
//! given (`serde_json` is built with `preserve_order`).

use crate::error::RequestError;
use serde::Serialize;
use serde_json::Value;

pub const PAYLOAD_JSON: &str = "payload_json";
pub const JSON_CONTENT_TYPE: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// A file to upload alongside a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub data: Vec<u8>,
    /// Explicit MIME type; guessed from the file extension when absent.
    pub content_type: Option<String>,
}

impl FileAttachment {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), data: data.into(), content_type: None }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn mime(&self) -> &str {
        if let Some(explicit) = &self.content_type {
            return explicit;
        }
        let extension = self.name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("png") => "image/png",
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            Some("json") => JSON_CONTENT_TYPE,
            Some("txt" | "log") => "text/plain",
            _ => OCTET_STREAM,
        }
    }
}

/// Which encoder a body goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Multipart,
}

/// A normalized request body as handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Multipart { payload: Option<Value>, files: Vec<FileAttachment> },
}

impl RequestBody {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RequestError> {
        serde_json::to_value(value).map(RequestBody::Json).map_err(RequestError::Encode)
    }

    /// JSON metadata plus files; collapses to plain JSON when there are no files.
    pub fn with_files(payload: Option<Value>, files: Vec<FileAttachment>) -> Self {
        match (payload, files.is_empty()) {
            (Some(payload), true) => RequestBody::Json(payload),
            (payload, _) => RequestBody::Multipart { payload, files },
        }
    }

    pub fn kind(&self) -> BodyKind {
        match self {
            RequestBody::Json(_) => BodyKind::Json,
            RequestBody::Multipart { .. } => BodyKind::Multipart,
        }
    }

    pub fn encode(&self) -> Result<EncodedBody, RequestError> {
        match self {
            RequestBody::Json(value) => {
                serde_json::to_vec(value).map(EncodedBody::Json).map_err(RequestError::Encode)
            }
            RequestBody::Multipart { payload, files } => {
                let mut parts = Vec::with_capacity(files.len() + 1);
                if let Some(payload) = payload {
                    parts.push(FormPart {
                        name: PAYLOAD_JSON.to_owned(),
                        file_name: None,
                        content_type: JSON_CONTENT_TYPE.to_owned(),
                        data: serde_json::to_vec(payload).map_err(RequestError::Encode)?,
                    });
                }
                parts.extend(files.iter().enumerate().map(|(index, file)| FormPart {
                    name: format!("files[{index}]"),
                    file_name: Some(file.name.clone()),
                    content_type: file.mime().to_owned(),
                    data: file.data.clone(),
                }));
                Ok(EncodedBody::Multipart(MultipartForm { parts }))
            }
        }
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

/// One part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Transport-independent multipart form, in part order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultipartForm {
    parts: Vec<FormPart>,
}

impl MultipartForm {
    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn part(&self, name: &str) -> Option<&FormPart> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Decoded `payload_json` part, if any.
    pub fn payload_json(&self) -> Option<Value> {
        self.part(PAYLOAD_JSON).and_then(|p| serde_json::from_slice(&p.data).ok())
    }

    pub fn file_parts(&self) -> impl Iterator<Item = &FormPart> {
        self.parts.iter().filter(|p| p.file_name.is_some())
    }

    pub fn into_reqwest(self) -> Result<reqwest::multipart::Form, RequestError> {
        let mut form = reqwest::multipart::Form::new();
        for part in self.parts {
            let mut body = reqwest::multipart::Part::bytes(part.data);
            if let Some(file_name) = part.file_name {
                body = body.file_name(file_name);
            }
            let body = body
                .mime_str(&part.content_type)
                .map_err(|_| RequestError::InvalidHeader { name: "content-type".into() })?;
            form = form.part(part.name, body);
        }
        Ok(form)
    }
}

/// Body bytes ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedBody {
    Json(Vec<u8>),
    Multipart(MultipartForm),
}

impl EncodedBody {
    pub fn kind(&self) -> BodyKind {
        match self {
            EncodedBody::Json(_) => BodyKind::Json,
            EncodedBody::Multipart(_) => BodyKind::Multipart,
        }
    }

    /// Decoded JSON body (or the `payload_json` part of a form), for inspection in tests
    /// and logs.
    pub fn json(&self) -> Option<Value> {
        match self {
            EncodedBody::Json(bytes) => serde_json::from_slice(bytes).ok(),
            EncodedBody::Multipart(form) => form.payload_json(),
        }
    }
}
