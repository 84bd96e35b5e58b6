use super::MessagePayload;
use crate::body::RequestBody;
use crate::error::RequestError;
use crate::handler::{ApiRequest, RequestHandler};
use serde_json::{Map, Value};

/// Interaction callbacks. These routes do not count against, or wait for, the global
/// request limit.
#[derive(Debug, Clone, Copy)]
pub struct Interactions<'a> {
    handler: &'a RequestHandler,
}

impl<'a> Interactions<'a> {
    pub fn new(handler: &'a RequestHandler) -> Self {
        Self { handler }
    }

    /// Respond to an interaction. `kind` is the callback type (4 = channel message,
    /// 5 = deferred, ...); `data` is the message for message-carrying kinds.
    pub async fn create_response(
        &self,
        interaction_id: u64,
        token: &str,
        kind: u8,
        data: Option<MessagePayload>,
    ) -> Result<Value, RequestError> {
        let mut body = Map::new();
        body.insert("type".into(), Value::from(kind));
        let files = match data {
            Some(data) => {
                let (fields, files) = data.into_parts();
                body.insert("data".into(), Value::Object(fields));
                files
            }
            None => Vec::new(),
        };
        let request = ApiRequest::post(format!("/interactions/{interaction_id}/{token}/callback"))
            .body(RequestBody::with_files(Some(Value::Object(body)), files));
        self.handler.request(request).await?.into_value()
    }
}
