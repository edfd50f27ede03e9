//! Harness shared by the integration suites: boots the real router on an
//! ephemeral port and speaks to it the way a production client would.
//!
//! Each suite uses a subset of the helpers.
#![allow(dead_code)]

use earshot_model::{
    event::{ClientEvent, ServerEvent},
    geometry::Vec3,
    join::{JoinRequest, JoinResponse},
};
use earshot_server::{router, App, Config, ShardConfig};
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, time::Duration};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type Channel = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something the cell said over the channel.
#[derive(Debug)]
pub enum Frame {
    Event(ServerEvent),
    Close(Option<u16>),
    End,
}

/// Serve the router over a fresh listener, returning its address.
pub async fn spawn_server(shard: ShardConfig) -> SocketAddr {
    let app = App::with_shard_config(Config::default(), shard);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("binding an ephemeral port");
    let address = listener.local_addr().expect("listener has an address");

    tokio::spawn(async move {
        axum::serve(listener, router(app))
            .await
            .expect("serving the router");
    });

    address
}

/// Admit a player over HTTP.
pub async fn join(address: SocketAddr, player_id: &str, position: Vec3) -> JoinResponse {
    let response = reqwest::Client::new()
        .post(format!("http://{address}/join"))
        .json(&JoinRequest::new(player_id, position))
        .send()
        .await
        .expect("join request");

    assert!(
        response.status().is_success(),
        "join failed: {}",
        response.status()
    );

    response.json().await.expect("join response body")
}

/// Open the channel named by an admission response.
pub async fn open_channel(join: &JoinResponse) -> Channel {
    let (channel, _) = tokio_tungstenite::connect_async(join.cell_web_socket_url.as_str())
        .await
        .expect("opening the cell channel");

    channel
}

/// Send a typed frame over the channel.
pub async fn send(channel: &mut Channel, event: &ClientEvent) {
    let json = serde_json::to_string(event).expect("serializing a client frame");

    channel
        .send(Message::Text(json))
        .await
        .expect("sending a client frame");
}

/// Receive the next meaningful frame, with a generous timeout.
pub async fn next_frame(channel: &mut Channel) -> Frame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), channel.next())
            .await
            .expect("timed out waiting for a frame");

        match message {
            Some(Ok(Message::Text(text))) => {
                let event = serde_json::from_str(&text).expect("decoding a server frame");

                return Frame::Event(event);
            }
            Some(Ok(Message::Close(frame))) => {
                return Frame::Close(frame.map(|frame| frame.code.into()));
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Frame::End,
        }
    }
}

/// Receive the next typed server event, panicking on close.
pub async fn next_event(channel: &mut Channel) -> ServerEvent {
    match next_frame(channel).await {
        Frame::Event(event) => event,
        other => panic!("expected a server event, got {other:?}"),
    }
}

/// Assert that nothing arrives on the channel for the given window.
pub async fn expect_silence(channel: &mut Channel, window: Duration) {
    let outcome = tokio::time::timeout(window, channel.next()).await;

    assert!(outcome.is_err(), "expected silence, got {outcome:?}");
}

/// Register over an open channel and expect acknowledgment.
pub async fn register(channel: &mut Channel, join: &JoinResponse, player_id: &str) {
    use earshot_model::event::Register;

    send(
        channel,
        &Register::new(player_id, join.session_token.clone()).into(),
    )
    .await;

    match next_event(channel).await {
        ServerEvent::Registered(registered) => assert_eq!(player_id, registered.player_id),
        other => panic!("expected registered, got {other:?}"),
    }
}
