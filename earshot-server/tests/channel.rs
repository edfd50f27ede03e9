//! Cell channel scenarios driven over real sockets.

mod common;

use common::{
    expect_silence, join, next_event, next_frame, open_channel, register, send, spawn_server,
    Frame,
};
use earshot_model::{
    event::{PositionUpdate, Register, ServerEvent, SignalRequest, CLOSE_GOING_AWAY, CLOSE_INVALID_SESSION},
    geometry::Vec3,
};
use earshot_server::ShardConfig;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn happy_path_join_and_relay() {
    let address = spawn_server(ShardConfig::default()).await;

    let join_a = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let join_b = join(address, "b", Vec3::new(5.0, 0.0, 0.0)).await;
    assert_eq!(join_a.cell_id, join_b.cell_id);

    let mut a = open_channel(&join_a).await;
    let mut b = open_channel(&join_b).await;
    register(&mut a, &join_a, "a").await;
    register(&mut b, &join_b, "b").await;

    send(&mut a, &PositionUpdate::new(Vec3::new(0.0, 0.0, 0.0)).into()).await;
    send(&mut b, &PositionUpdate::new(Vec3::new(5.0, 0.0, 0.0)).into()).await;

    // Both observers get the other, with the same distance.
    let peers_a = match next_event(&mut a).await {
        ServerEvent::Peers(diff) => diff,
        other => panic!("expected peers, got {other:?}"),
    };
    assert_eq!(vec!["b".to_owned()], peers_a.peers);
    assert_eq!(vec!["b".to_owned()], peers_a.added);
    assert_eq!(2, peers_a.total_players);
    assert!((peers_a.distances["b"] - 5.0).abs() < 1e-9);
    assert!(peers_a.positions.contains_key("b"));

    let peers_b = match next_event(&mut b).await {
        ServerEvent::Peers(diff) => diff,
        other => panic!("expected peers, got {other:?}"),
    };
    assert_eq!(vec!["a".to_owned()], peers_b.peers);
    assert!((peers_b.distances["a"] - peers_a.distances["b"]).abs() < 1e-9);

    // Relay an opaque payload; the bytes and the source survive intact.
    let payload = json!({"t": "offer", "sdp": "v=0"});
    send(&mut a, &SignalRequest::new("b", payload.clone()).into()).await;

    match next_event(&mut b).await {
        ServerEvent::Signal(signal) => {
            assert_eq!("a", signal.from);
            assert_eq!(payload, signal.payload);
        }
        other => panic!("expected a relayed signal, got {other:?}"),
    }
}

#[tokio::test]
async fn proximity_exit_lists_the_departure() {
    let address = spawn_server(ShardConfig::default()).await;

    let join_a = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let join_b = join(address, "b", Vec3::new(5.0, 0.0, 0.0)).await;

    let mut a = open_channel(&join_a).await;
    let mut b = open_channel(&join_b).await;
    register(&mut a, &join_a, "a").await;
    register(&mut b, &join_b, "b").await;

    send(&mut a, &PositionUpdate::new(Vec3::new(0.0, 0.0, 0.0)).into()).await;
    send(&mut b, &PositionUpdate::new(Vec3::new(5.0, 0.0, 0.0)).into()).await;

    assert!(matches!(next_event(&mut a).await, ServerEvent::Peers(_)));

    // Outside the rate-limit window, walk far out of audibility.
    tokio::time::sleep(Duration::from_millis(150)).await;
    send(&mut b, &PositionUpdate::new(Vec3::new(200.0, 0.0, 0.0)).into()).await;

    let exit = loop {
        match next_event(&mut a).await {
            ServerEvent::Peers(diff) if !diff.removed.is_empty() => break diff,
            ServerEvent::Peers(_) => continue,
            other => panic!("expected peers, got {other:?}"),
        }
    };
    assert!(exit.peers.is_empty());
    assert_eq!(vec!["b".to_owned()], exit.removed);
}

#[tokio::test]
async fn position_frames_are_rate_limited() {
    let address = spawn_server(ShardConfig::default()).await;

    let join_a = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let join_b = join(address, "b", Vec3::new(5.0, 0.0, 0.0)).await;

    let mut a = open_channel(&join_a).await;
    let mut b = open_channel(&join_b).await;
    register(&mut a, &join_a, "a").await;
    register(&mut b, &join_b, "b").await;

    send(&mut a, &PositionUpdate::new(Vec3::new(0.0, 0.0, 0.0)).into()).await;
    send(&mut b, &PositionUpdate::new(Vec3::new(5.0, 0.0, 0.0)).into()).await;
    assert!(matches!(next_event(&mut a).await, ServerEvent::Peers(_)));

    // A second position inside the 100 ms window is dropped: the observer
    // sees no distance change even though it exceeds the epsilon.
    send(&mut b, &PositionUpdate::new(Vec3::new(10.0, 0.0, 0.0)).into()).await;
    expect_silence(&mut a, Duration::from_millis(300)).await;

    // Past the window the next frame lands.
    send(&mut b, &PositionUpdate::new(Vec3::new(15.0, 0.0, 0.0)).into()).await;
    match next_event(&mut a).await {
        ServerEvent::Peers(diff) => assert!((diff.distances["b"] - 15.0).abs() < 1e-9),
        other => panic!("expected peers, got {other:?}"),
    }
}

#[tokio::test]
async fn signal_to_missing_target_fails_delivery() {
    let address = spawn_server(ShardConfig::default()).await;

    let join_a = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let join_b = join(address, "b", Vec3::new(5.0, 0.0, 0.0)).await;

    let mut a = open_channel(&join_a).await;
    let mut b = open_channel(&join_b).await;
    register(&mut a, &join_a, "a").await;
    register(&mut b, &join_b, "b").await;

    send(&mut a, &SignalRequest::new("zzz", json!({"t": "offer"})).into()).await;

    match next_event(&mut a).await {
        ServerEvent::SignalDeliveryFailed(failed) => assert_eq!("zzz", failed.target_id),
        other => panic!("expected delivery failure, got {other:?}"),
    }

    // An unrelated player's traffic is unaffected.
    send(&mut a, &SignalRequest::new("b", json!({"t": "offer"})).into()).await;
    assert!(matches!(next_event(&mut b).await, ServerEvent::Signal(_)));
}

#[tokio::test]
async fn duplicate_register_supersedes_the_first_socket() {
    let address = spawn_server(ShardConfig::default()).await;

    let first_join = join(address, "alice", Vec3::new(0.0, 0.0, 0.0)).await;
    let mut first = open_channel(&first_join).await;
    register(&mut first, &first_join, "alice").await;

    let second_join = join(address, "alice", Vec3::new(1.0, 0.0, 0.0)).await;
    assert_ne!(first_join.session_token, second_join.session_token);

    let mut second = open_channel(&second_join).await;
    send(
        &mut second,
        &Register::new("alice", second_join.session_token.clone()).into(),
    )
    .await;

    // The first socket is closed cleanly before the second is acknowledged.
    match next_frame(&mut first).await {
        Frame::Close(code) => assert_eq!(Some(CLOSE_GOING_AWAY), code),
        other => panic!("expected a close, got {other:?}"),
    }
    match next_event(&mut second).await {
        ServerEvent::Registered(registered) => assert_eq!("alice", registered.player_id),
        other => panic!("expected registered, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_token_is_fatal() {
    let address = spawn_server(ShardConfig::default()).await;

    // Spawn the cell by joining, then register with a token never issued.
    let join_a = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let mut channel = open_channel(&join_a).await;

    send(&mut channel, &Register::new("a", "never-issued").into()).await;

    match next_event(&mut channel).await {
        ServerEvent::Error(error) => assert!(error.message.contains("invalid session")),
        other => panic!("expected an error frame, got {other:?}"),
    }
    match next_frame(&mut channel).await {
        Frame::Close(code) => assert_eq!(Some(CLOSE_INVALID_SESSION), code),
        other => panic!("expected a close, got {other:?}"),
    }
}

#[tokio::test]
async fn session_tokens_are_one_shot() {
    let address = spawn_server(ShardConfig::default()).await;

    let admitted = join(address, "alice", Vec3::new(0.0, 0.0, 0.0)).await;

    let mut first = open_channel(&admitted).await;
    register(&mut first, &admitted, "alice").await;

    let mut second = open_channel(&admitted).await;
    send(
        &mut second,
        &Register::new("alice", admitted.session_token.clone()).into(),
    )
    .await;

    match next_event(&mut second).await {
        ServerEvent::Error(_) => {}
        other => panic!("expected an error frame, got {other:?}"),
    }
    match next_frame(&mut second).await {
        Frame::Close(code) => assert_eq!(Some(CLOSE_INVALID_SESSION), code),
        other => panic!("expected a close, got {other:?}"),
    }
}

#[tokio::test]
async fn session_tokens_expire() {
    let address = spawn_server(ShardConfig {
        pending_session_ttl: Duration::from_millis(200),
        ..ShardConfig::default()
    })
    .await;

    let admitted = join(address, "alice", Vec3::new(0.0, 0.0, 0.0)).await;

    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut channel = open_channel(&admitted).await;
    send(
        &mut channel,
        &Register::new("alice", admitted.session_token.clone()).into(),
    )
    .await;

    match next_event(&mut channel).await {
        ServerEvent::Error(_) => {}
        other => panic!("expected an error frame, got {other:?}"),
    }
    match next_frame(&mut channel).await {
        Frame::Close(code) => assert_eq!(Some(CLOSE_INVALID_SESSION), code),
        other => panic!("expected a close, got {other:?}"),
    }
}

#[tokio::test]
async fn silent_connections_time_out_and_leave_their_peers() {
    let address = spawn_server(ShardConfig {
        heartbeat_timeout: Duration::from_millis(500),
        ..ShardConfig::default()
    })
    .await;

    let join_a = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let join_b = join(address, "b", Vec3::new(5.0, 0.0, 0.0)).await;

    let mut a = open_channel(&join_a).await;
    let mut b = open_channel(&join_b).await;
    register(&mut a, &join_a, "a").await;
    register(&mut b, &join_b, "b").await;

    send(&mut a, &PositionUpdate::new(Vec3::new(0.0, 0.0, 0.0)).into()).await;
    send(&mut b, &PositionUpdate::new(Vec3::new(5.0, 0.0, 0.0)).into()).await;
    assert!(matches!(next_event(&mut a).await, ServerEvent::Peers(_)));
    assert!(matches!(next_event(&mut b).await, ServerEvent::Peers(_)));

    // B goes silent; A keeps heartbeating and eventually sees B removed.
    let exit = loop {
        tokio::time::sleep(Duration::from_millis(150)).await;
        send(&mut a, &earshot_model::event::ClientEvent::Heartbeat).await;

        match tokio::time::timeout(Duration::from_millis(200), next_event(&mut a)).await {
            Ok(ServerEvent::Peers(diff)) if !diff.removed.is_empty() => break diff,
            Ok(_) | Err(_) => continue,
        }
    };
    assert_eq!(vec!["b".to_owned()], exit.removed);
    assert!(exit.peers.is_empty());

    // The silent socket was closed by the cell.
    match next_frame(&mut b).await {
        Frame::Close(code) => assert_eq!(Some(CLOSE_GOING_AWAY), code),
        other => panic!("expected a close, got {other:?}"),
    }
}

#[tokio::test]
async fn binary_frames_get_an_error_reply() {
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    let address = spawn_server(ShardConfig::default()).await;

    let admitted = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let mut channel = open_channel(&admitted).await;

    channel
        .send(Message::Binary(vec![1, 2, 3]))
        .await
        .expect("sending a binary frame");

    match next_event(&mut channel).await {
        ServerEvent::Error(error) => assert!(error.message.contains("binary")),
        other => panic!("expected an error frame, got {other:?}"),
    }

    // The connection stays open: a valid register still works.
    register(&mut channel, &admitted, "a").await;
}

#[tokio::test]
async fn malformed_frames_keep_the_connection_open() {
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    let address = spawn_server(ShardConfig::default()).await;

    let admitted = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let mut channel = open_channel(&admitted).await;

    channel
        .send(Message::Text("not json".to_owned()))
        .await
        .expect("sending a malformed frame");

    match next_event(&mut channel).await {
        ServerEvent::Error(_) => {}
        other => panic!("expected an error frame, got {other:?}"),
    }

    register(&mut channel, &admitted, "a").await;
}
