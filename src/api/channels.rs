use super::{check_range, MessagePayload};
use crate::error::{RequestError, ValidationError};
use crate::handler::{ApiRequest, RequestHandler};
use crate::snowflake;
use serde_json::{json, Value};

pub const BULK_DELETE_MIN: usize = 2;
pub const BULK_DELETE_MAX: usize = 100;

/// Pagination cursor for message history. Only one applies per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCursor {
    Around(u64),
    Before(u64),
    After(u64),
}

/// Query for [`Channels::get_messages`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetMessagesOptions {
    /// 1..=100; the server default (50) applies when unset.
    pub limit: Option<u32>,
    pub around: Option<u64>,
    pub before: Option<u64>,
    pub after: Option<u64>,
}

impl GetMessagesOptions {
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn around(mut self, id: u64) -> Self {
        self.around = Some(id);
        self
    }

    pub fn before(mut self, id: u64) -> Self {
        self.before = Some(id);
        self
    }

    pub fn after(mut self, id: u64) -> Self {
        self.after = Some(id);
        self
    }

    /// The cursor actually sent: `around`, then `before`, then `after`.
    pub fn cursor(&self) -> Option<MessageCursor> {
        self.around
            .map(MessageCursor::Around)
            .or(self.before.map(MessageCursor::Before))
            .or(self.after.map(MessageCursor::After))
    }
}

/// Channel and message endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Channels<'a> {
    handler: &'a RequestHandler,
}

impl<'a> Channels<'a> {
    pub fn new(handler: &'a RequestHandler) -> Self {
        Self { handler }
    }

    async fn call(&self, request: ApiRequest) -> Result<Value, RequestError> {
        self.handler.request(request).await?.into_value()
    }

    pub async fn get_channel(&self, channel_id: u64) -> Result<Value, RequestError> {
        self.call(ApiRequest::get(format!("/channels/{channel_id}"))).await
    }

    pub async fn edit_channel(
        &self,
        channel_id: u64,
        changes: &Value,
        reason: Option<&str>,
    ) -> Result<Value, RequestError> {
        let request = ApiRequest::patch(format!("/channels/{channel_id}")).json(changes)?.reason_opt(reason);
        self.call(request).await
    }

    pub async fn delete_channel(&self, channel_id: u64, reason: Option<&str>) -> Result<Value, RequestError> {
        self.call(ApiRequest::delete(format!("/channels/{channel_id}")).reason_opt(reason)).await
    }

    pub async fn get_messages(
        &self,
        channel_id: u64,
        options: GetMessagesOptions,
    ) -> Result<Value, RequestError> {
        if let Some(limit) = options.limit {
            check_range("limit", limit.into(), 1, 100)?;
        }
        let (key, id) = match options.cursor() {
            Some(MessageCursor::Around(id)) => (Some("around"), Some(id)),
            Some(MessageCursor::Before(id)) => (Some("before"), Some(id)),
            Some(MessageCursor::After(id)) => (Some("after"), Some(id)),
            None => (None, None),
        };
        let mut request =
            ApiRequest::get(format!("/channels/{channel_id}/messages")).query_opt("limit", options.limit);
        if let (Some(key), Some(id)) = (key, id) {
            request = request.query(key, id);
        }
        self.call(request).await
    }

    pub async fn get_message(&self, channel_id: u64, message_id: u64) -> Result<Value, RequestError> {
        self.call(ApiRequest::get(format!("/channels/{channel_id}/messages/{message_id}"))).await
    }

    pub async fn create_message(
        &self,
        channel_id: u64,
        payload: impl Into<MessagePayload>,
    ) -> Result<Value, RequestError> {
        let request =
            ApiRequest::post(format!("/channels/{channel_id}/messages")).body(payload.into().into_body());
        self.call(request).await
    }

    pub async fn edit_message(
        &self,
        channel_id: u64,
        message_id: u64,
        payload: impl Into<MessagePayload>,
    ) -> Result<Value, RequestError> {
        let request = ApiRequest::patch(format!("/channels/{channel_id}/messages/{message_id}"))
            .body(payload.into().into_body());
        self.call(request).await
    }

    pub async fn delete_message(
        &self,
        channel_id: u64,
        message_id: u64,
        reason: Option<&str>,
    ) -> Result<Value, RequestError> {
        let request =
            ApiRequest::delete(format!("/channels/{channel_id}/messages/{message_id}")).reason_opt(reason);
        self.call(request).await
    }

    /// Delete 2..=100 messages younger than two weeks in one call.
    pub async fn bulk_delete_messages(
        &self,
        channel_id: u64,
        message_ids: &[u64],
        reason: Option<&str>,
    ) -> Result<Value, RequestError> {
        validate_bulk_delete(message_ids, snowflake::unix_now_millis())?;
        let ids: Vec<String> = message_ids.iter().map(u64::to_string).collect();
        let request = ApiRequest::post(format!("/channels/{channel_id}/messages/bulk-delete"))
            .json(&json!({ "messages": ids }))?
            .reason_opt(reason);
        self.call(request).await
    }

    /// React as the current user. `emoji` is a unicode emoji or `name:id` for custom ones.
    pub async fn create_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> Result<Value, RequestError> {
        let emoji = urlencoding::encode(emoji);
        let path = format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me");
        self.call(ApiRequest::put(path)).await
    }

    pub async fn trigger_typing(&self, channel_id: u64) -> Result<Value, RequestError> {
        self.call(ApiRequest::post(format!("/channels/{channel_id}/typing"))).await
    }
}

pub(crate) fn validate_bulk_delete(message_ids: &[u64], now_unix_millis: u64) -> Result<(), ValidationError> {
    let count = message_ids.len();
    if !(BULK_DELETE_MIN..=BULK_DELETE_MAX).contains(&count) {
        return Err(ValidationError::BulkDeleteCount { count, min: BULK_DELETE_MIN, max: BULK_DELETE_MAX });
    }
    match message_ids.iter().find(|id| snowflake::is_older_than_bulk_window(**id, now_unix_millis)) {
        Some(id) => Err(ValidationError::StaleMessage { id: *id }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::api;
    use crate::transport::MockTransport;

    #[test]
    fn cursor_precedence_is_around_before_after() {
        let all = GetMessagesOptions::default().after(3).before(2).around(1);
        assert_eq!(all.cursor(), Some(MessageCursor::Around(1)));
        assert_eq!(GetMessagesOptions::default().after(3).before(2).cursor(), Some(MessageCursor::Before(2)));
        assert_eq!(GetMessagesOptions::default().after(3).cursor(), Some(MessageCursor::After(3)));
        assert_eq!(GetMessagesOptions::default().cursor(), None);
    }

    #[tokio::test]
    async fn get_messages_sends_one_cursor() {
        let mock = MockTransport::new();
        let api = api(&mock);

        api.channels()
            .get_messages(7, GetMessagesOptions::default().limit(10).before(2).after(3))
            .await
            .unwrap();

        let url = &mock.calls()[0].request.url;
        assert_eq!(url.path(), "/api/channels/7/messages");
        assert_eq!(url.query(), Some("limit=10&before=2"));
    }

    #[tokio::test]
    async fn get_messages_rejects_out_of_range_limit() {
        let mock = MockTransport::new();
        let api = api(&mock);

        for limit in [0, 101] {
            let err = api
                .channels()
                .get_messages(7, GetMessagesOptions::default().limit(limit))
                .await
                .unwrap_err();
            assert!(err.is_validation());
        }
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn bulk_delete_bounds_and_staleness() {
        let now = snowflake::EPOCH_MILLIS + 365 * 24 * 60 * 60 * 1_000;
        let fresh = snowflake::from_timestamp_millis(now - 1_000);
        let stale = snowflake::from_timestamp_millis(now - snowflake::BULK_DELETE_MAX_AGE_MILLIS - 60_000);

        assert_eq!(
            validate_bulk_delete(&[fresh], now),
            Err(ValidationError::BulkDeleteCount { count: 1, min: 2, max: 100 })
        );
        assert!(matches!(
            validate_bulk_delete(&vec![fresh; 101], now),
            Err(ValidationError::BulkDeleteCount { count: 101, .. })
        ));
        assert_eq!(validate_bulk_delete(&[fresh, stale], now), Err(ValidationError::StaleMessage { id: stale }));
        assert!(validate_bulk_delete(&[fresh, fresh + 1], now).is_ok());
    }

    #[tokio::test]
    async fn bulk_delete_posts_ids_as_strings() {
        let mock = MockTransport::new();
        let api = api(&mock);
        let now = snowflake::unix_now_millis();
        let ids = [snowflake::from_timestamp_millis(now - 5_000), snowflake::from_timestamp_millis(now - 1_000)];

        api.channels().bulk_delete_messages(9, &ids, Some("cleanup")).await.unwrap();

        let call = &mock.calls()[0];
        assert_eq!(call.path(), "/api/channels/9/messages/bulk-delete");
        assert_eq!(
            call.request.body.as_ref().unwrap().json(),
            Some(json!({"messages": [ids[0].to_string(), ids[1].to_string()]}))
        );
        assert_eq!(call.header("x-audit-log-reason"), Some("cleanup"));
    }

    #[tokio::test]
    async fn reaction_emoji_is_percent_encoded() {
        let mock = MockTransport::new();
        let api = api(&mock);

        api.channels().create_reaction(1, 2, "👍").await.unwrap();

        assert_eq!(mock.calls()[0].path(), "/api/channels/1/messages/2/reactions/%F0%9F%91%8D/@me");
    }
}
