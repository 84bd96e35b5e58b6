use crate::error::RequestError;
use crate::handler::{ApiRequest, RequestHandler};
use serde_json::{json, Value};

/// Current-user, DM and gateway endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Users<'a> {
    handler: &'a RequestHandler,
}

impl<'a> Users<'a> {
    pub fn new(handler: &'a RequestHandler) -> Self {
        Self { handler }
    }

    pub async fn get_current_user(&self) -> Result<Value, RequestError> {
        self.handler.request(ApiRequest::get("/users/@me")).await?.into_value()
    }

    pub async fn get_user(&self, user_id: u64) -> Result<Value, RequestError> {
        self.handler.request(ApiRequest::get(format!("/users/{user_id}"))).await?.into_value()
    }

    /// Open (or fetch) the DM channel with `recipient_id`.
    pub async fn create_dm(&self, recipient_id: u64) -> Result<Value, RequestError> {
        let request =
            ApiRequest::post("/users/@me/channels").json(&json!({ "recipient_id": recipient_id.to_string() }))?;
        self.handler.request(request).await?.into_value()
    }

    pub async fn get_gateway_bot(&self) -> Result<Value, RequestError> {
        self.handler.request(ApiRequest::get("/gateway/bot")).await?.into_value()
    }
}
