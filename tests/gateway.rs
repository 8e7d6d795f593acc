//! End-to-end tests over a real listener: WebSocket clients plus HTTP queries.

use std::net::SocketAddr;
use std::time::Duration;

use almahriah_chat::{api, ChatConfig, ChatState, ChatUser, SqliteStore};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> SocketAddr {
    let store = SqliteStore::open(None).unwrap();
    for (id, name, active) in [("7", "Salem", true), ("9", "Amal", true), ("5", "Former", false)] {
        store
            .upsert_user(ChatUser {
                id: id.to_string(),
                full_name: name.to_string(),
                role: "Employee".to_string(),
                department: None,
                profile_picture_url: None,
                is_active: active,
            })
            .await
            .unwrap();
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::app(ChatState::new(store, ChatConfig::default()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, user_id: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws?userId={}", addr, user_id))
        .await
        .unwrap();
    ws
}

async fn next_event(ws: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip events until one of `event_type` arrives.
async fn next_of_type(ws: &mut Client, event_type: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["type"] == event_type {
            return event;
        }
    }
}

async fn emit(ws: &mut Client, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_handshake_requires_known_active_identity() {
    let addr = start_server().await;

    assert!(connect_async(format!("ws://{}/ws", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/ws?userId=404", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/ws?userId=5", addr)).await.is_err());

    let body: Value = reqwest::get(format!("http://{}/stats", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["online_clients"], 0);
}

#[tokio::test]
async fn test_offline_message_then_read_receipt() {
    let addr = start_server().await;

    let mut salem = connect(addr, "7").await;
    let snapshot = next_of_type(&mut salem, "presenceSnapshot").await;
    assert_eq!(snapshot["userIds"], json!([]));

    emit(
        &mut salem,
        json!({
            "type": "sendMessage",
            "senderId": "7",
            "receiverId": "9",
            "content": "hi",
            "tempId": "t1"
        }),
    )
    .await;
    let echo = next_of_type(&mut salem, "receiveMessage").await;
    assert_eq!(echo["tempId"], "t1");
    assert_eq!(echo["status"], "sent");
    assert_eq!(echo["deliveredStatus"], false);
    let message_id = echo["id"].as_i64().unwrap();

    let mut amal = connect(addr, "9").await;
    let snapshot = next_of_type(&mut amal, "presenceSnapshot").await;
    assert_eq!(snapshot["userIds"], json!(["7"]));

    let online = next_of_type(&mut salem, "user-status-changed").await;
    assert_eq!(online["userId"], "9");
    assert_eq!(online["status"], "online");

    let history: Value = reqwest::Client::new()
        .get(format!("http://{}/api/chat/history/7", addr))
        .header("x-user-id", "9")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["ok"], true);
    assert_eq!(history["data"][0]["id"], message_id);
    assert_eq!(history["data"][0]["content"], "hi");

    emit(
        &mut amal,
        json!({ "type": "readMessage", "messageId": message_id, "receiverId": "9" }),
    )
    .await;
    let receipt = next_of_type(&mut salem, "messageStatusUpdate").await;
    assert_eq!(receipt["messageId"], message_id);
    assert_eq!(receipt["status"], "read");

    drop(amal);
    let offline = next_of_type(&mut salem, "user-status-changed").await;
    assert_eq!(offline["userId"], "9");
    assert_eq!(offline["status"], "offline");
}

#[tokio::test]
async fn test_live_delivery_and_edit() {
    let addr = start_server().await;
    let mut salem = connect(addr, "7").await;
    let mut amal = connect(addr, "9").await;
    next_of_type(&mut amal, "presenceSnapshot").await;

    emit(
        &mut salem,
        json!({
            "type": "sendMessage",
            "senderId": "7",
            "receiverId": "9",
            "content": "hello",
            "tempId": "t9"
        }),
    )
    .await;

    let echo = next_of_type(&mut salem, "receiveMessage").await;
    assert_eq!(echo["status"], "delivered");
    let pushed = next_of_type(&mut amal, "receiveMessage").await;
    assert_eq!(pushed["content"], "hello");
    assert!(pushed.get("tempId").is_none());

    emit(
        &mut salem,
        json!({
            "type": "editMessage",
            "messageId": echo["id"],
            "senderId": "7",
            "receiverId": "9",
            "newContent": "hello there"
        }),
    )
    .await;
    for ws in [&mut salem, &mut amal] {
        let edited = next_of_type(ws, "messageEdited").await;
        assert_eq!(edited["newContent"], "hello there");
    }
}

#[tokio::test]
async fn test_impersonation_gets_error_frame() {
    let addr = start_server().await;
    let mut salem = connect(addr, "7").await;

    emit(
        &mut salem,
        json!({
            "type": "sendMessage",
            "senderId": "9",
            "receiverId": "7",
            "content": "spoofed",
            "tempId": "t2"
        }),
    )
    .await;
    let error = next_of_type(&mut salem, "messageError").await;
    assert_eq!(error["code"], "unauthorized");
    assert_eq!(error["tempId"], "t2");

    emit(&mut salem, json!({ "type": "bogus" })).await;
    let error = next_of_type(&mut salem, "messageError").await;
    assert_eq!(error["code"], "validation");
}

#[tokio::test]
async fn test_second_connection_replaces_first() {
    let addr = start_server().await;
    let mut salem = connect(addr, "7").await;
    next_of_type(&mut salem, "presenceSnapshot").await;

    let mut first = connect(addr, "9").await;
    next_of_type(&mut first, "presenceSnapshot").await;
    next_of_type(&mut salem, "user-status-changed").await;

    let mut second = connect(addr, "9").await;
    next_of_type(&mut second, "presenceSnapshot").await;
    next_of_type(&mut first, "sessionReplaced").await;

    // No second online broadcast: the next thing Salem sees is the pong
    emit(&mut salem, json!({ "type": "ping" })).await;
    let next = next_event(&mut salem).await;
    assert_eq!(next["type"], "pong");

    // Messages now reach the newer connection
    emit(
        &mut salem,
        json!({ "type": "typing", "senderId": "7", "receiverId": "9", "isTyping": true }),
    )
    .await;
    let typing = next_of_type(&mut second, "typing").await;
    assert_eq!(typing["senderId"], "7");
    assert_eq!(typing["isTyping"], true);
}
