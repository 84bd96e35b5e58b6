use super::MessagePayload;
use crate::error::RequestError;
use crate::handler::{ApiRequest, RequestHandler};
use serde_json::Value;

/// Webhook endpoints. Token-authenticated calls still share the handler's buckets; the
/// token itself never appears in a bucket key.
#[derive(Debug, Clone, Copy)]
pub struct Webhooks<'a> {
    handler: &'a RequestHandler,
}

impl<'a> Webhooks<'a> {
    pub fn new(handler: &'a RequestHandler) -> Self {
        Self { handler }
    }

    pub async fn get_webhook(&self, webhook_id: u64) -> Result<Value, RequestError> {
        self.handler.request(ApiRequest::get(format!("/webhooks/{webhook_id}"))).await?.into_value()
    }

    /// Post a message through a webhook. With `wait` the created message is returned,
    /// otherwise the server answers 204 and the result is `Value::Null`.
    pub async fn execute_webhook(
        &self,
        webhook_id: u64,
        token: &str,
        payload: impl Into<MessagePayload>,
        wait: bool,
    ) -> Result<Value, RequestError> {
        let request = ApiRequest::post(format!("/webhooks/{webhook_id}/{token}"))
            .query_opt("wait", wait.then_some(true))
            .body(payload.into().into_body());
        self.handler.request(request).await?.into_value()
    }
}
