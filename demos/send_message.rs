//! Send a message through the dispatcher.
//!
//! With `BOT_TOKEN` and `CHANNEL_ID` set the message goes to the real API. Without them the
//! demo runs offline against a scripted transport that answers with a 1-message bucket,
//! so the second send visibly waits for the bucket to reset.

use bucketline::telemetry::LogSink;
use bucketline::{Api, MessagePayload, MockTransport, RequestHandler, RestConfig, TransportResponse};
use serde_json::json;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let live = std::env::var("BOT_TOKEN").ok().zip(std::env::var("CHANNEL_ID").ok());
    let (api, channel_id) = match live {
        Some((token, channel)) => {
            let handler = RequestHandler::builder(RestConfig::new(token)).sink(LogSink).build()?;
            (Api::new(handler), channel.parse::<u64>()?)
        }
        None => {
            println!("BOT_TOKEN / CHANNEL_ID not set; using a scripted transport\n");
            let mock = MockTransport::new();
            mock.respond_with(|_, index| {
                TransportResponse::json(&json!({ "id": index.to_string() }))
                    .with_rate_limit(1, 0, Duration::from_millis(750))
                    .into()
            });
            let handler = RequestHandler::builder(RestConfig::new("offline-token"))
                .transport(mock)
                .sink(LogSink)
                .build()?;
            (Api::new(handler), 81384788765712384)
        }
    };

    let start = Instant::now();
    let first = api.channels().create_message(channel_id, "hello from bucketline").await?;
    println!("sent message {} after {:?}", first["id"], start.elapsed());

    let payload = MessagePayload::structured()
        .content("second message, with an embed")
        .embed(json!({ "title": "bucketline", "description": "queued behind the first" }));
    let second = api.channels().create_message(channel_id, payload).await?;
    println!("sent message {} after {:?}", second["id"], start.elapsed());

    Ok(())
}
