// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! End-to-end conversation flow over a live socket.
//!
//! Drives [`ConversationSync`] against a scripted in-process relay and
//! verifies the whole optimistic-send lifecycle:
//! - a sent message shows up Pending immediately, then is promoted in
//!   place by its server echo and advanced by the ack and read receipt
//! - peer messages are merged at their timestamp position
//! - frames arriving before hydration are buffered, then applied
//! - a failed hydration leaves the list retryable

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use chatat::chat::ConversationSync;
use chatat::chat::history::InMemoryHistory;
use chatat::chat::reconcile::DeliveryState;
use chatat::config::SyncConfig;
use chatat::connection::{ConnectionManager, ConnectionState, SendError};
use chatat::dispatch::Dispatcher;
use chatat_proto::content::HistoryMessage;
use chatat_proto::id::{MessageId, UserId};
use chatat_proto::message::ConversationKey;

const LOCAL: UserId = UserId::new(1);
const PEER: UserId = UserId::new(2);

// ---------------------------------------------------------------------------
// Scripted relay
// ---------------------------------------------------------------------------

struct ScriptedRelay {
    endpoint: String,
    push: mpsc::UnboundedSender<String>,
    seen: mpsc::UnboundedReceiver<Value>,
}

async fn start_scripted_relay() -> ScriptedRelay {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                pushed = push_rx.recv() => match pushed {
                    Some(text) => {
                        if sink.send(WsMessage::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
                msg = stream.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                            let _ = seen_tx.send(value);
                        }
                    }
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            }
        }
    });

    ScriptedRelay {
        endpoint,
        push: push_tx,
        seen: seen_rx,
    }
}

// ---------------------------------------------------------------------------
// Stack setup
// ---------------------------------------------------------------------------

struct Stack {
    config: SyncConfig,
    manager: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
}

/// Build the full stack against the relay and wait until connected.
async fn connect_stack(relay: &ScriptedRelay) -> Stack {
    let config = SyncConfig {
        endpoint: relay.endpoint.clone(),
        base_delay: Duration::from_millis(20),
        ..SyncConfig::default()
    };
    let (manager, inbound) = ConnectionManager::new(&config);
    let manager = Arc::new(manager);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&manager)));
    tokio::spawn(Arc::clone(&dispatcher).run(inbound));

    let mut status = manager.subscribe();
    manager.connect(LOCAL).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, status.recv()).await {
            Ok(Some(ConnectionState::Connected)) => break,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("status channel closed before Connected"),
            Err(_) => panic!("timeout waiting for Connected"),
        }
    }
    manager.unsubscribe(status.id());

    Stack {
        config,
        manager,
        dispatcher,
    }
}

fn direct() -> ConversationKey {
    ConversationKey::Direct { peer: PEER }
}

/// Poll until `cond` holds, panicking after 5 seconds.
async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timeout waiting for {what}");
}

async fn recv_wire(relay: &mut ScriptedRelay) -> Value {
    tokio::time::timeout(Duration::from_secs(5), relay.seen.recv())
        .await
        .expect("timeout waiting for wire record")
        .expect("relay task ended")
}

fn history_record(id: i64, sender: UserId, text: &str, at: chrono::DateTime<chrono::Utc>) -> HistoryMessage {
    HistoryMessage {
        message_id: MessageId::new(id),
        sender_id: sender,
        recipient_id: Some(if sender == LOCAL { PEER } else { LOCAL }),
        group_id: None,
        message: text.to_string(),
        timestamp: at,
        reply_to_id: None,
        read: false,
        content: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Optimistic send lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sent_message_is_promoted_by_echo_then_advanced_to_read() {
    let mut relay = start_scripted_relay().await;
    let stack = connect_stack(&relay).await;
    let sync = ConversationSync::open(
        Arc::clone(&stack.dispatcher),
        direct(),
        LOCAL,
        &stack.config,
    );
    sync.hydrate(Vec::new());

    let local_id = sync.send_message("hi", None).unwrap();

    // Visible immediately, before any relay traffic.
    let list = sync.messages();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].local_id, Some(local_id));
    assert_eq!(list[0].delivery, DeliveryState::Pending);

    // The relay stores the message and echoes it back with a server id,
    // reusing the client's own timestamp the way the backend does.
    let sent = recv_wire(&mut relay).await;
    assert_eq!(sent["type"], "message");
    relay
        .push
        .send(
            json!({
                "type": "new_message",
                "message_id": 42,
                "sender_id": LOCAL.get(),
                "recipient_id": PEER.get(),
                "message": "hi",
                "timestamp": sent["timestamp"],
            })
            .to_string(),
        )
        .unwrap();

    wait_until("echo promotion", || {
        sync.messages()
            .first()
            .is_some_and(|m| m.server_id == Some(MessageId::new(42)))
    })
    .await;
    let list = sync.messages();
    assert_eq!(list.len(), 1, "echo must dedup against the Pending entry");
    assert_eq!(list[0].local_id, None);
    assert_eq!(list[0].delivery, DeliveryState::Sent);

    relay
        .push
        .send(json!({"type": "message_sent", "message_id": 42}).to_string())
        .unwrap();
    wait_until("delivery ack", || {
        sync.messages()[0].delivery == DeliveryState::Delivered
    })
    .await;

    relay
        .push
        .send(json!({"type": "read_receipt", "message_id": 42, "sender_id": PEER.get()}).to_string())
        .unwrap();
    wait_until("read receipt", || {
        sync.messages()[0].delivery == DeliveryState::Read
    })
    .await;

    assert_eq!(sync.messages().len(), 1);
    assert_eq!(stack.manager.status(), ConnectionState::Connected);
}

#[tokio::test]
async fn peer_message_is_merged_at_its_timestamp_position() {
    let relay = start_scripted_relay().await;
    let stack = connect_stack(&relay).await;
    let sync = ConversationSync::open(
        Arc::clone(&stack.dispatcher),
        direct(),
        LOCAL,
        &stack.config,
    );

    let t = chrono::Utc::now() - chrono::Duration::minutes(10);
    sync.hydrate(vec![
        history_record(1, LOCAL, "first", t),
        history_record(2, PEER, "third", t + chrono::Duration::minutes(2)),
    ]);

    relay
        .push
        .send(
            json!({
                "type": "new_message",
                "message_id": 3,
                "sender_id": PEER.get(),
                "recipient_id": LOCAL.get(),
                "message": "second",
                "timestamp": t + chrono::Duration::minutes(1),
            })
            .to_string(),
        )
        .unwrap();

    wait_until("peer message merge", || sync.messages().len() == 3).await;
    let texts: Vec<String> = sync.messages().iter().map(|m| m.text.clone()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn frames_for_other_conversations_are_filtered_out() {
    let relay = start_scripted_relay().await;
    let stack = connect_stack(&relay).await;
    let sync = ConversationSync::open(
        Arc::clone(&stack.dispatcher),
        direct(),
        LOCAL,
        &stack.config,
    );
    sync.hydrate(Vec::new());

    // A group message and a direct exchange between two other users.
    relay
        .push
        .send(
            json!({
                "type": "new_message",
                "message_id": 10,
                "sender_id": PEER.get(),
                "group_id": 9,
                "message": "group chatter",
                "timestamp": chrono::Utc::now(),
            })
            .to_string(),
        )
        .unwrap();
    relay
        .push
        .send(
            json!({
                "type": "new_message",
                "message_id": 11,
                "sender_id": 3,
                "recipient_id": LOCAL.get(),
                "message": "from someone else",
                "timestamp": chrono::Utc::now(),
            })
            .to_string(),
        )
        .unwrap();
    relay
        .push
        .send(
            json!({
                "type": "new_message",
                "message_id": 12,
                "sender_id": PEER.get(),
                "recipient_id": LOCAL.get(),
                "message": "for this conversation",
                "timestamp": chrono::Utc::now(),
            })
            .to_string(),
        )
        .unwrap();

    // The relevant frame arrives; the irrelevant ones never show up.
    wait_until("relevant frame", || sync.messages().len() == 1).await;
    assert_eq!(sync.messages()[0].server_id, Some(MessageId::new(12)));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sync.messages().len(), 1);
}

// ---------------------------------------------------------------------------
// Hydration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_frames_before_hydration_are_buffered() {
    let relay = start_scripted_relay().await;
    let stack = connect_stack(&relay).await;
    let sync = ConversationSync::open(
        Arc::clone(&stack.dispatcher),
        direct(),
        LOCAL,
        &stack.config,
    );

    relay
        .push
        .send(
            json!({
                "type": "new_message",
                "message_id": 20,
                "sender_id": PEER.get(),
                "recipient_id": LOCAL.get(),
                "message": "early bird",
                "timestamp": chrono::Utc::now(),
            })
            .to_string(),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sync.messages().is_empty(), "nothing visible before hydrate");
    assert!(!sync.is_hydrated());

    sync.hydrate(Vec::new());
    wait_until("buffered frame applied", || sync.messages().len() == 1).await;
    assert_eq!(sync.messages()[0].text, "early bird");
}

#[tokio::test]
async fn failed_hydration_is_retryable() {
    let relay = start_scripted_relay().await;
    let stack = connect_stack(&relay).await;
    let sync = ConversationSync::open(
        Arc::clone(&stack.dispatcher),
        direct(),
        LOCAL,
        &stack.config,
    );

    let result = sync.hydrate_from(&InMemoryHistory::failing()).await;
    assert!(result.is_err());
    assert!(!sync.is_hydrated(), "failed fetch must not mark hydrated");

    let source = InMemoryHistory::new(vec![history_record(
        1,
        PEER,
        "hola",
        chrono::Utc::now(),
    )]);
    sync.hydrate_from(&source).await.unwrap();
    assert!(sync.is_hydrated());
    assert_eq!(sync.messages().len(), 1);
}

// ---------------------------------------------------------------------------
// Degraded sends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_while_disconnected_fails_fast_with_no_entry() {
    let config = SyncConfig::default();
    let (manager, inbound) = ConnectionManager::new(&config);
    let manager = Arc::new(manager);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&manager)));
    tokio::spawn(Arc::clone(&dispatcher).run(inbound));

    let sync = ConversationSync::open(dispatcher, direct(), LOCAL, &config);
    sync.hydrate(Vec::new());

    assert_eq!(sync.send_message("hi", None), Err(SendError::NotConnected));
    assert_eq!(sync.send_typing(true), Err(SendError::NotConnected));
    assert_eq!(
        sync.mark_read(MessageId::new(1), PEER),
        Err(SendError::NotConnected)
    );
    assert!(
        sync.messages().is_empty(),
        "a failed send must not leave a phantom entry"
    );
}
