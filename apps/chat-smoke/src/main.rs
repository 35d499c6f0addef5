mod config;
mod logging;

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chat_core::{
    ChatError, EventStreamError, HistoryQuery, MessageAction, RoomOptions, SendMessageParams,
    SendReactionParams, TypingOptions, next_event,
};
use chat_sdk::ChatClient;
use chat_transport::{
    ConnectionState, ErrorInfo, HttpMethod, HttpRequest, HttpResponse, InboundMessage,
    PresenceQuery, memory::MemoryRealtime,
};
use config::{ConfigError, SmokeConfig};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info};

const EVENT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum SmokeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("event stream for {0} closed")]
    Closed(&'static str),
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        error!(error = %err, "smoke run failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), SmokeError> {
    let config = SmokeConfig::from_env()?;
    info!(room = %config.room, client_id = %config.client_id, "starting smoke run");

    let realtime = MemoryRealtime::new(Some(&config.client_id));
    realtime.on_request(rest_handler(config.client_id.clone()));
    let client = ChatClient::new(realtime.clone())?;

    let transport = realtime.memory_connection();
    transport.set_state(ConnectionState::Connecting, None, None);
    transport.set_state(ConnectionState::Connected, None, None);

    let options = RoomOptions {
        typing: Some(TypingOptions {
            timeout: config.typing_timeout,
        }),
        ..RoomOptions::all_features()
    };
    let room = client.rooms().get(&config.room, options).await?;
    let mut statuses = room.on_status_change();
    let mut messages = room.messages().subscribe();
    let mut typing_events = room.typing()?.subscribe();
    let mut reactions = room.reactions()?.subscribe();

    room.attach().await?;
    info!(room = %room.name(), nonce = %room.nonce(), "room attached");

    let sent = room
        .messages()
        .send(SendMessageParams::text(config.message_text.clone()))
        .await?;
    // The in-memory REST handler does not fan out; deliver the realtime copy
    // the way the service would.
    realtime
        .memory_channel(&room.messages().channel_name())
        .deliver(InboundMessage {
            name: "chat.message".to_owned(),
            data: json!({ "text": sent.text }),
            client_id: Some(sent.client_id.clone()),
            serial: Some(sent.serial.clone()),
            action: Some(MessageAction::Create.as_wire().to_owned()),
            timestamp_ms: sent.created_at_ms,
            ..InboundMessage::default()
        });
    let received = wait("message", next_event(&mut messages)).await?;
    info!(serial = %received.message.serial, text = %received.message.text, "message received");

    let presence = room.presence()?;
    presence.enter(Some(json!({ "role": "smoke" }))).await?;
    let members = presence.get(PresenceQuery::default()).await?;
    info!(members = members.len(), "presence entered");

    let typing = room.typing()?;
    typing.keystroke().await?;
    let started = wait("typing", next_event(&mut typing_events)).await?;
    info!(typers = ?started.currently_typing, "typing started");
    typing.stop().await?;

    room.reactions()?
        .send(SendReactionParams {
            name: "like".to_owned(),
            ..SendReactionParams::default()
        })
        .await?;
    let reaction = wait("reaction", next_event(&mut reactions)).await?;
    info!(name = %reaction.name, is_self = reaction.is_self, "reaction received");

    let occupancy = room.occupancy()?.get().await?;
    info!(
        connections = occupancy.connections,
        presence_members = occupancy.presence_members,
        "occupancy"
    );

    let history = room.messages().get(HistoryQuery::default()).await?;
    info!(messages = history.len(), "history fetched");

    client.rooms().release(&config.room).await?;
    while let Ok(change) = statuses.try_recv() {
        debug!(
            from = change.previous.label(),
            to = change.current.label(),
            "room status transition"
        );
    }
    info!(
        connection = ?client.connection().status(),
        status = room.status().label(),
        "smoke run complete"
    );
    Ok(())
}

async fn wait<T>(
    what: &'static str,
    event: impl Future<Output = Result<T, EventStreamError>>,
) -> Result<T, SmokeError> {
    match timeout(EVENT_WAIT, event).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(EventStreamError::Closed)) => Err(SmokeError::Closed(what)),
        Err(_) => Err(SmokeError::Timeout(what)),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// Minimal stand-in for the chat REST endpoints.
fn rest_handler(
    client_id: String,
) -> impl Fn(&HttpRequest) -> Result<HttpResponse, ErrorInfo> + Send + Sync + 'static {
    let history: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    move |request: &HttpRequest| {
        let mut history = history.lock().unwrap_or_else(PoisonError::into_inner);
        match request.method {
            HttpMethod::Post if request.path.ends_with("/messages") => {
                let created_at = now_millis();
                let serial = format!("smoke@{created_at}-{}", history.len());
                let text = request
                    .body
                    .as_ref()
                    .and_then(|body| body.get("text"))
                    .cloned()
                    .unwrap_or(Value::Null);
                history.push(json!({
                    "serial": serial,
                    "clientId": client_id,
                    "text": text,
                    "createdAt": created_at,
                }));
                Ok(HttpResponse::ok(vec![
                    json!({ "serial": serial, "createdAt": created_at }),
                ]))
            }
            HttpMethod::Get if request.path.ends_with("/messages") => {
                Ok(HttpResponse::ok(history.clone()))
            }
            HttpMethod::Get if request.path.ends_with("/occupancy") => Ok(HttpResponse::ok(vec![
                json!({ "connections": 1, "presenceMembers": 1 }),
            ])),
            method => Err(ErrorInfo::new(
                40400,
                404,
                format!("no route for {method:?} {}", request.path),
            )),
        }
    }
}
