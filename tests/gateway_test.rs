// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::path::PathBuf;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use rssi_ranging::config::Config;
use rssi_ranging::dataset_store::{DatasetStore, Sample};
use rssi_ranging::device_registry::DeviceState;
use rssi_ranging::gateway_engine::{serve, GatewayEngine};
use rssi_ranging::measurement_session::{
    MeasurementSession, RegistryView, SessionControl, SessionParams,
};
use rssi_ranging::protocol::{OutboundMessage, CONNECTION_ACK};

const REPORT_MINUS_60: &str = r#"{"id": "00beef", "list": [{"id": "000004", "rawRssi": -60}]}"#;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "rssi_ranging_it_{}_{}",
        std::process::id(),
        name
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

#[tokio::test]
async fn test_session_through_engine() {
    let config = Config::parse(r#"{"measurements": {"quantity": 3, "time_per_scan": 100}, "port": 9000}"#)
        .unwrap();
    let (mut engine, handle) = GatewayEngine::new();
    let engine_task = tokio::spawn(async move { engine.run().await });

    // Identity issuance leaves the registry untouched.
    let reply = handle.submit_frame(String::from("{}")).await.unwrap();
    assert!(matches!(reply, Some(OutboundMessage::IdentityAssigned { .. })));
    assert!(handle.snapshot().await.unwrap().is_empty());

    assert_eq!(handle.submit_frame(String::from(REPORT_MINUS_60)).await.unwrap(), None);
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id(), "00beef");

    let store = DatasetStore::new(scratch_dir("session"));
    let control = SessionControl::new();
    let report = MeasurementSession::new(&handle, &store, &control)
        .run(SessionParams::from_config(&config, 150.0))
        .await
        .unwrap();
    assert_eq!(report.samples, vec![vec![Sample::new(150.0, -60.0); 3]]);
    assert_eq!(
        fs::read_to_string(store.path_for(0)).unwrap(),
        "[[150,-60],[150,-60],[150,-60]]"
    );

    handle.stop().await.unwrap();
    engine_task.await.unwrap();
}

#[tokio::test]
async fn test_liveness_check_marks_silent_devices() {
    let (mut engine, handle) = GatewayEngine::new();
    let engine_task = tokio::spawn(async move { engine.run().await });

    handle.submit_frame(String::from(REPORT_MINUS_60)).await.unwrap();
    handle.check_liveness().await.unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot[0].is_stale());

    handle.submit_frame(String::from(REPORT_MINUS_60)).await.unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot[0].is_stale());

    handle.stop().await.unwrap();
    engine_task.await.unwrap();
}

#[tokio::test]
async fn test_push_connection_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (mut engine, handle) = GatewayEngine::new();
    tokio::spawn(async move { engine.run().await });
    tokio::spawn(serve(listener, handle.clone()));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}", address))
        .await
        .unwrap();
    let ack = socket.next().await.unwrap().unwrap();
    assert_eq!(ack, Message::Text(CONNECTION_ACK.to_string()));

    socket.send(Message::Text(String::from("{}"))).await.unwrap();
    let reply = socket.next().await.unwrap().unwrap().into_text().unwrap();
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let id = reply["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 6);
    assert!(u32::from_str_radix(&id, 16).unwrap() >= 4);

    socket.send(Message::Text(String::from("garbage"))).await.unwrap();
    let report = format!(
        r#"{{"id": "{}", "list": [{{"id": "000004", "rawRssi": -58}}]}}"#,
        id
    );
    socket.send(Message::Text(report)).await.unwrap();
    // Frames on one connection are handled in order; this reply means the
    // report above was applied.
    socket.send(Message::Text(String::from("{}"))).await.unwrap();
    socket.next().await.unwrap().unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id(), id);
    assert_eq!(snapshot[0].reference_rssi(), Some(-58));

    socket.close(None).await.unwrap();
    handle.stop().await.unwrap();
}

#[test]
fn test_registry_states_through_protocol() {
    use rssi_ranging::device_registry::DeviceRegistry;
    use rssi_ranging::protocol::ProtocolGateway;

    let mut gateway = ProtocolGateway::new();
    let Some(OutboundMessage::IdentityAssigned { id }) = gateway.on_text_frame("{}") else {
        panic!("expected an identity");
    };
    assert_eq!(gateway.registry().state_of(&id), DeviceState::Provisioned);
    let report = format!(r#"{{"id": "{}", "list": [{{"id": "000004", "rawRssi": -70}}]}}"#, id);
    gateway.on_text_frame(&report);
    assert_eq!(gateway.registry().state_of(&id), DeviceState::Registered);
    assert_eq!(DeviceRegistry::new().state_of(&id), DeviceState::Unknown);
}
