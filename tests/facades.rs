mod common;

use bucketline::body::EncodedBody;
use bucketline::snowflake::{from_timestamp_millis, unix_now_millis};
use bucketline::{Api, ErrorCategory, FileAttachment, MessagePayload, MockTransport, TransportResponse, ValidationError};
use common::{handler, wire_path};
use http::{Method, StatusCode};
use serde_json::json;

const DAY_MILLIS: u64 = 24 * 60 * 60 * 1_000;

fn api(mock: &MockTransport) -> Api {
    Api::new(handler(mock))
}

#[tokio::test]
async fn bulk_delete_of_one_message_fails_locally() {
    let mock = MockTransport::new();
    let api = api(&mock);
    let fresh = from_timestamp_millis(unix_now_millis() - 1_000);

    let err = api.channels().bulk_delete_messages(1, &[fresh], None).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Validation);
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn bulk_delete_rejects_messages_past_two_weeks() {
    let mock = MockTransport::new();
    let api = api(&mock);
    let now = unix_now_millis();
    let fresh = from_timestamp_millis(now - DAY_MILLIS);
    let stale = from_timestamp_millis(now - 15 * DAY_MILLIS);

    let err = api.channels().bulk_delete_messages(1, &[fresh, stale], None).await.unwrap_err();
    assert!(matches!(
        err,
        bucketline::RequestError::Validation(ValidationError::StaleMessage { id }) if id == stale
    ));
    assert_eq!(mock.call_count(), 0);

    mock.push(TransportResponse::new(StatusCode::NO_CONTENT));
    let second = from_timestamp_millis(now - 2 * DAY_MILLIS);
    api.channels().bulk_delete_messages(1, &[fresh, second], Some("cleanup")).await.unwrap();
    let call = &mock.calls()[0];
    assert_eq!(call.path(), wire_path("/channels/1/messages/bulk-delete"));
    assert_eq!(
        call.request.body.as_ref().unwrap().json(),
        Some(json!({ "messages": [fresh.to_string(), second.to_string()] }))
    );
    assert_eq!(call.header("x-audit-log-reason"), Some("cleanup"));
}

#[tokio::test]
async fn message_with_file_goes_out_as_multipart() {
    let mock = MockTransport::new();
    mock.push(TransportResponse::json(&json!({ "id": "900" })));
    let api = api(&mock);

    let payload = MessagePayload::structured()
        .content("build log attached")
        .embed(json!({ "title": "CI" }))
        .file(FileAttachment::new("build.log", b"ok\n".to_vec()));
    let message = api.channels().create_message(42, payload).await.unwrap();
    assert_eq!(message["id"], "900");

    let call = &mock.calls()[0];
    let Some(EncodedBody::Multipart(form)) = &call.request.body else {
        panic!("expected multipart body, got {:?}", call.request.body);
    };
    assert_eq!(
        form.payload_json(),
        Some(json!({
            "content": "build log attached",
            "embeds": [{ "title": "CI" }],
            "attachments": [{ "id": 0, "filename": "build.log" }]
        }))
    );
    let files: Vec<_> = form.file_parts().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "files[0]");
    assert_eq!(files[0].file_name.as_deref(), Some("build.log"));
    assert_eq!(files[0].data, b"ok\n");
}

#[tokio::test]
async fn text_message_goes_out_as_json() {
    let mock = MockTransport::new();
    let api = api(&mock);

    api.channels().create_message(42, "hello").await.unwrap();

    let call = &mock.calls()[0];
    assert!(matches!(call.request.body, Some(EncodedBody::Json(_))));
    assert_eq!(call.request.body.as_ref().unwrap().json(), Some(json!({ "content": "hello" })));
    assert_eq!(call.header("content-type"), None, "transport sets content type");
}

#[tokio::test]
async fn audit_reason_is_sent_encoded() {
    let mock = MockTransport::new();
    let api = api(&mock);

    api.channels().delete_channel(3, Some("raid / spam")).await.unwrap();
    api.guilds().remove_ban(4, 5, None).await.unwrap();

    let calls = mock.calls();
    assert_eq!(calls[0].request.method, Method::DELETE);
    assert_eq!(calls[0].header("x-audit-log-reason"), Some("raid%20%2F%20spam"));
    assert_eq!(calls[1].header("x-audit-log-reason"), None);
}

#[tokio::test]
async fn validation_failures_never_reach_the_wire() {
    let mock = MockTransport::new();
    let api = api(&mock);

    let members = api.guilds().list_members(1, Some(0), None).await.unwrap_err();
    let ban = api.guilds().create_ban(1, 2, Some(7 * 24 * 60 * 60 + 1), None).await.unwrap_err();

    assert!(members.is_validation());
    assert!(ban.is_validation());
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn webhook_and_interaction_calls_use_token_paths() {
    let mock = MockTransport::new();
    mock.push(TransportResponse::new(StatusCode::NO_CONTENT));
    mock.push(TransportResponse::new(StatusCode::NO_CONTENT));
    let api = api(&mock);

    let hook = api.webhooks().execute_webhook(10, "hook-token", "deployed", false).await.unwrap();
    let callback = api.interactions().create_response(11, "interaction-token", 5, None).await.unwrap();

    assert!(hook.is_null());
    assert!(callback.is_null());
    let calls = mock.calls();
    assert_eq!(calls[0].path(), wire_path("/webhooks/10/hook-token"));
    assert_eq!(calls[1].path(), wire_path("/interactions/11/interaction-token/callback"));
    assert_eq!(calls[1].request.body.as_ref().unwrap().json(), Some(json!({ "type": 5 })));
}

#[tokio::test]
async fn users_facade_round_trip() {
    let mock = MockTransport::new();
    mock.push(TransportResponse::json(&json!({ "id": "1", "username": "bot" })));
    mock.push(TransportResponse::json(&json!({ "id": "77", "type": 1 })));
    let api = api(&mock);

    let me = api.users().get_current_user().await.unwrap();
    let dm = api.users().create_dm(55).await.unwrap();

    assert_eq!(me["username"], "bot");
    assert_eq!(dm["id"], "77");
    let calls = mock.calls();
    assert_eq!(calls[1].request.body.as_ref().unwrap().json(), Some(json!({ "recipient_id": "55" })));
}
