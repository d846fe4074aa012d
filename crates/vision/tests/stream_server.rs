use std::{io::Read, net::TcpListener, time::Duration};

use image::{Rgb, RgbImage};
use reqwest::blocking::Client;
use vision::{
    location::GeoPoint,
    publisher::FramePublisher,
    server::{HealthInfo, ServerState, spawn_stream_server},
    status::{StatusSnapshot, StatusStore},
};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port")
}

#[test]
fn serves_status_health_and_stream_until_stopped() {
    let port = free_port();
    let status = StatusStore::new();
    let frames = FramePublisher::new(85);
    let server = spawn_stream_server(
        ServerState {
            status: status.clone(),
            frames: frames.clone(),
            health: HealthInfo {
                model: "best".into(),
                port,
                video_source: serde_json::json!("clips"),
            },
        },
        port,
    )
    .expect("server starts");

    let client = Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("client");
    let base = format!("http://127.0.0.1:{port}");

    let health: serde_json::Value = client
        .get(format!("{base}/api/health"))
        .send()
        .and_then(|resp| resp.json())
        .expect("health");
    assert_eq!(health["status"], "running");
    assert_eq!(health["video_source"], "clips");
    assert_eq!(health["port"], port);

    status.write(StatusSnapshot::for_frame(
        true,
        GeoPoint {
            lat: 10.0,
            lon: 20.0,
        },
        0.66,
    ));
    let snapshot = client
        .get(format!("{base}/api/detection-status"))
        .send()
        .expect("status");
    assert_eq!(
        snapshot
            .headers()
            .get("access-control-allow-origin")
            .expect("cors"),
        "*"
    );
    let snapshot: serde_json::Value = snapshot.json().expect("json");
    assert_eq!(snapshot["fire_detected"], true);
    assert_eq!(snapshot["location"], serde_json::json!({"lat": 10.0, "lon": 20.0}));

    frames.publish(RgbImage::from_pixel(16, 12, Rgb([255, 90, 0])), 7);
    let mut stream = client.get(format!("{base}/video")).send().expect("video");
    assert!(
        stream
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/x-mixed-replace"))
    );
    let mut head = [0u8; 9];
    stream.read_exact(&mut head).expect("first part");
    assert_eq!(&head, b"--frame\r\n");
    drop(stream);

    server.stop();
    assert!(client.get(format!("{base}/api/health")).send().is_err());
}

#[test]
fn taken_port_is_an_initialisation_error() {
    let listener = TcpListener::bind("0.0.0.0:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let result = spawn_stream_server(
        ServerState {
            status: StatusStore::new(),
            frames: FramePublisher::new(85),
            health: HealthInfo {
                model: "best".into(),
                port,
                video_source: serde_json::json!(0),
            },
        },
        port,
    );
    assert!(result.is_err());
}
