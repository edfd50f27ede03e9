//! The full loop: admission, the native client, and peer selection driving
//! media decisions end to end.

mod common;

use common::{join, spawn_server};
use earshot_client::{CellClient, Config, Event, SelectorConfig};
use earshot_model::geometry::Vec3;
use earshot_server::ShardConfig;
use serde_json::json;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// Wait for a matching event, skipping unrelated ones.
async fn wait_for(
    events: &mut earshot_client::EventStream<Event>,
    mut predicate: impl FnMut(&Event) -> bool,
) -> Event {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.next())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream ended");

        if predicate(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn clients_attach_media_within_earshot_and_detach_on_exit() {
    let address = spawn_server(ShardConfig::default()).await;

    let join_a = join(address, "a", Vec3::new(0.0, 0.0, 0.0)).await;
    let join_b = join(address, "b", Vec3::new(5.0, 0.0, 0.0)).await;

    let position_b = Arc::new(Mutex::new(Vec3::new(5.0, 0.0, 0.0)));

    let client_a = CellClient::connect(
        Config::builder(&join_a.cell_web_socket_url, "a", join_a.session_token.clone())
            .position_source(|| Vec3::new(0.0, 0.0, 0.0))
            .selector(SelectorConfig::default())
            .build(),
    )
    .await
    .expect("connecting a");

    let source_b = Arc::clone(&position_b);
    let client_b = CellClient::connect(
        Config::builder(&join_b.cell_web_socket_url, "b", join_b.session_token.clone())
            .position_source(move || *source_b.lock().expect("position lock"))
            .selector(SelectorConfig::default())
            .build(),
    )
    .await
    .expect("connecting b");

    let mut events_a = client_a.events();
    let mut events_b = client_b.events();

    // Registration is acknowledged, peers are reported, and the selector
    // decides to attach.
    wait_for(&mut events_a, |event| matches!(event, Event::Registered(_))).await;
    wait_for(&mut events_b, |event| matches!(event, Event::Registered(_))).await;

    assert_eq!(
        Event::PeerConnect("b".to_owned()),
        wait_for(&mut events_a, |event| matches!(event, Event::PeerConnect(_))).await
    );
    assert_eq!(
        Event::PeerConnect("a".to_owned()),
        wait_for(&mut events_b, |event| matches!(event, Event::PeerConnect(_))).await
    );

    // Signaling payloads flow between the attached peers.
    client_a
        .send_signal("b", json!({"t": "offer"}))
        .expect("sending a signal");

    let signal = wait_for(&mut events_b, |event| matches!(event, Event::Signal(_))).await;
    let Event::Signal(signal) = signal else {
        unreachable!();
    };
    assert_eq!("a", signal.from);
    assert_eq!(json!({"t": "offer"}), signal.payload);

    // B walks out of audibility; the cell reports the departure and the
    // selector detaches.
    *position_b.lock().expect("position lock") = Vec3::new(200.0, 0.0, 0.0);

    assert_eq!(
        Event::PeerDisconnect("b".to_owned()),
        wait_for(&mut events_a, |event| matches!(event, Event::PeerDisconnect(_))).await
    );

    client_a.close();
    client_b.close();

    wait_for(&mut events_a, |event| matches!(event, Event::Closed(_))).await;
}
