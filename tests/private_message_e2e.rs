//! Full-stack private messaging flow against an in-process relay.
//!
//! Alice derives her identity from a mnemonic, gift-wraps a group message
//! for Bob and Carol, and publishes the wraps through the pool. Bob then
//! subscribes, receives the stored wraps, and unwraps the one addressed
//! to him. This exercises derivation, signing, NIP-44, gift wrap, the
//! frame codec, the connection, and the pool together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use petrel_core::nostr::giftwrap::{self, KIND_GIFT_WRAP, KIND_PRIVATE_MESSAGE};
use petrel_core::nostr::{derivation, Event, Filter, KeyPair};
use petrel_core::relay::{ClientMessage, PoolConfig, RelayPool, SubscriptionUpdate};

/// A relay that stores published events and replays them on REQ.
async fn run_store_relay(listener: TcpListener, store: Arc<Mutex<Vec<Event>>>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let store = store.clone();
        tokio::spawn(async move {
            let Ok(ws) = accept_async(stream).await else {
                return;
            };
            serve_client(ws, store).await;
        });
    }
}

async fn serve_client(mut ws: WebSocketStream<TcpStream>, store: Arc<Mutex<Vec<Event>>>) {
    while let Some(Ok(message)) = ws.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Ping(payload) => {
                if ws.send(Message::Pong(payload)).await.is_err() {
                    return;
                }
                continue;
            }
            Message::Close(_) => return,
            _ => continue,
        };

        match ClientMessage::from_json(&text) {
            Ok(ClientMessage::Event(event)) => {
                let id = event.id.clone();
                store.lock().unwrap().push(event);
                let ok = json!(["OK", id, true, ""]).to_string();
                if ws.send(Message::Text(ok)).await.is_err() {
                    return;
                }
            }
            Ok(ClientMessage::Req {
                subscription_id, ..
            }) => {
                let stored: Vec<Event> = store.lock().unwrap().clone();
                for event in stored {
                    let frame = format!(
                        r#"["EVENT","{subscription_id}",{}]"#,
                        event.to_json().unwrap()
                    );
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                let eose = json!(["EOSE", subscription_id]).to_string();
                if ws.send(Message::Text(eose)).await.is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn group_message_travels_from_alice_to_bob() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(run_store_relay(listener, store.clone()));

    // Alice's identity comes from her recovery phrase; Bob and Carol use
    // fresh keys
    let alice = derivation::derive_keypair(
        "leader monkey parrot ring guide accident before fence cannon height naive bean",
        "",
        0,
    )
    .unwrap();
    let bob = KeyPair::generate();
    let carol = KeyPair::generate();
    let recipients = vec![bob.pubkey_hex(), carol.pubkey_hex()];

    // Alice publishes one wrap per recipient plus her own copy
    let rumor = giftwrap::private_message_rumor(
        &alice,
        &recipients,
        "picnic at the lighthouse, saturday noon",
        Some("weekend plans"),
        None,
    );
    let wraps = giftwrap::wrap_for_group(rumor, &alice, &recipients).unwrap();
    assert_eq!(wraps.len(), 3);

    let alice_pool = RelayPool::new(PoolConfig::default());
    alice_pool.add(format!("ws://{addr}"), None).await;
    alice_pool.connect_all().await.unwrap();
    for (_, wrap) in &wraps {
        assert_eq!(alice_pool.publish(wrap).await.unwrap(), 1);
    }
    alice_pool.disconnect_all().await;
    assert_eq!(store.lock().unwrap().len(), 3);

    // Bob subscribes to gift wraps addressed to him
    let bob_pool = RelayPool::new(PoolConfig::default());
    bob_pool.add(format!("ws://{addr}"), None).await;
    bob_pool.connect_all().await.unwrap();

    let (wrap_tx, mut wrap_rx) = mpsc::channel::<Event>(8);
    let (eose_tx, mut eose_rx) = mpsc::channel::<()>(1);
    let handler: petrel_core::relay::SubscriptionHandler = Arc::new(move |update| match update {
        SubscriptionUpdate::Event { event, .. } => {
            let _ = wrap_tx.try_send(event);
        }
        SubscriptionUpdate::EndOfStoredEvents { .. } => {
            let _ = eose_tx.try_send(());
        }
    });

    let filter = Filter::new()
        .kinds(vec![KIND_GIFT_WRAP])
        .pubkey_refs(vec![bob.pubkey_hex()]);
    bob_pool
        .subscribe("bob-inbox", vec![filter], handler)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), eose_rx.recv())
        .await
        .expect("EOSE should arrive")
        .unwrap();

    // The test relay replays everything; Bob can only open his own wrap
    let mut received = Vec::new();
    while let Ok(event) = wrap_rx.try_recv() {
        received.push(event);
    }
    assert_eq!(received.len(), 3);

    let unwrapped: Vec<_> = received
        .iter()
        .filter_map(|wrap| giftwrap::unwrap(wrap, &bob).ok())
        .collect();
    assert_eq!(unwrapped.len(), 1);

    let message = &unwrapped[0];
    assert_eq!(message.sender_pubkey, alice.pubkey_hex());
    assert_eq!(message.rumor.kind, KIND_PRIVATE_MESSAGE);
    assert_eq!(
        message.rumor.content,
        "picnic at the lighthouse, saturday noon"
    );

    // The rumor carries the full recipient list and the subject
    let p_tags: Vec<&str> = message
        .rumor
        .tags
        .iter()
        .filter(|tag| tag.first().map(String::as_str) == Some("p"))
        .filter_map(|tag| tag.get(1).map(String::as_str))
        .collect();
    assert_eq!(p_tags, vec![bob.pubkey_hex(), carol.pubkey_hex()]);

    bob_pool.disconnect_all().await;
}
