use super::check_range;
use crate::error::RequestError;
use crate::handler::{ApiRequest, RequestHandler};
use serde_json::{json, Value};

/// Longest message purge a ban may request (7 days).
pub const MAX_BAN_PURGE_SECONDS: u32 = 604_800;

/// Filters for [`Guilds::get_audit_log`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditLogOptions {
    pub user_id: Option<u64>,
    pub action_type: Option<u32>,
    pub before: Option<u64>,
    pub after: Option<u64>,
    /// 1..=100.
    pub limit: Option<u32>,
}

/// Guild endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Guilds<'a> {
    handler: &'a RequestHandler,
}

impl<'a> Guilds<'a> {
    pub fn new(handler: &'a RequestHandler) -> Self {
        Self { handler }
    }

    async fn call(&self, request: ApiRequest) -> Result<Value, RequestError> {
        self.handler.request(request).await?.into_value()
    }

    pub async fn get_guild(&self, guild_id: u64, with_counts: bool) -> Result<Value, RequestError> {
        let request = ApiRequest::get(format!("/guilds/{guild_id}"))
            .query_opt("with_counts", with_counts.then_some(true));
        self.call(request).await
    }

    /// One page of members; `limit` is 1..=1000.
    pub async fn list_members(
        &self,
        guild_id: u64,
        limit: Option<u32>,
        after: Option<u64>,
    ) -> Result<Value, RequestError> {
        if let Some(limit) = limit {
            check_range("limit", limit.into(), 1, 1_000)?;
        }
        let request = ApiRequest::get(format!("/guilds/{guild_id}/members"))
            .query_opt("limit", limit)
            .query_opt("after", after);
        self.call(request).await
    }

    pub async fn get_audit_log(&self, guild_id: u64, options: AuditLogOptions) -> Result<Value, RequestError> {
        if let Some(limit) = options.limit {
            check_range("limit", limit.into(), 1, 100)?;
        }
        let request = ApiRequest::get(format!("/guilds/{guild_id}/audit-logs"))
            .query_opt("user_id", options.user_id)
            .query_opt("action_type", options.action_type)
            .query_opt("before", options.before)
            .query_opt("after", options.after)
            .query_opt("limit", options.limit);
        self.call(request).await
    }

    pub async fn create_role(
        &self,
        guild_id: u64,
        role: &Value,
        reason: Option<&str>,
    ) -> Result<Value, RequestError> {
        let request = ApiRequest::post(format!("/guilds/{guild_id}/roles")).json(role)?.reason_opt(reason);
        self.call(request).await
    }

    /// Ban a user, optionally purging up to seven days of their messages.
    pub async fn create_ban(
        &self,
        guild_id: u64,
        user_id: u64,
        delete_message_seconds: Option<u32>,
        reason: Option<&str>,
    ) -> Result<Value, RequestError> {
        if let Some(seconds) = delete_message_seconds {
            check_range("delete_message_seconds", seconds.into(), 0, MAX_BAN_PURGE_SECONDS.into())?;
        }
        let mut request = ApiRequest::put(format!("/guilds/{guild_id}/bans/{user_id}")).reason_opt(reason);
        if let Some(seconds) = delete_message_seconds {
            request = request.json(&json!({ "delete_message_seconds": seconds }))?;
        }
        self.call(request).await
    }

    pub async fn remove_ban(&self, guild_id: u64, user_id: u64, reason: Option<&str>) -> Result<Value, RequestError> {
        self.call(ApiRequest::delete(format!("/guilds/{guild_id}/bans/{user_id}")).reason_opt(reason)).await
    }
}
