//! OpenStack client against an in-process Keystone v3 + Cinder emulation

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use migration_scout::cloud::http::HttpConfig;
use migration_scout::cloud::openstack::{CatalogConfig, OpenStackApi, OpenStackClient, OpenStackConfig};
use migration_scout::{CloudCredential, CloudDriver, CloudType, Error, OpenStackDriver};

#[derive(Default)]
struct Keystone {
    addr: Option<SocketAddr>,
    /// Only this token is accepted by the volume service
    valid_token: String,
    issued: usize,
    volume_calls: usize,
}

type Shared = Arc<Mutex<Keystone>>;

async fn issue_token(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let password = &body["auth"]["identity"]["password"]["user"]["password"];
    if password != "secret" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": {"message": "bad creds"}}))).into_response();
    }

    let mut state = state.lock();
    state.issued += 1;
    state.valid_token = format!("token-{}", state.issued);
    let base = format!("http://{}", state.addr.map(|a| a.to_string()).unwrap_or_default());
    let catalog = json!({
        "token": {
            "project": {"id": "proj-1"},
            "catalog": [
                {"type": "compute", "endpoints": [
                    {"region": "RegionOne", "interface": "public", "url": format!("{}/compute/v2.1", base)},
                    {"region": "RegionOne", "interface": "internal", "url": "http://internal.invalid/compute"}
                ]},
                {"type": "volumev2", "endpoints": [
                    {"region": "RegionTwo", "interface": "public", "url": "http://other-region.invalid/volume"},
                    {"region": "RegionOne", "interface": "public", "url": format!("{}/volume/v2/proj-1", base)}
                ]}
            ]
        }
    });
    (
        StatusCode::CREATED,
        [("X-Subject-Token", state.valid_token.clone())],
        Json(catalog),
    )
        .into_response()
}

async fn get_volume(
    State(state): State<Shared>,
    Path((project, volume_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock();
    state.volume_calls += 1;
    let token = headers.get("X-Auth-Token").and_then(|v| v.to_str().ok()).unwrap_or("");
    if token != state.valid_token || project != "proj-1" {
        return (StatusCode::UNAUTHORIZED, "token expired").into_response();
    }
    if volume_id == "vol-busy" {
        return (StatusCode::SERVICE_UNAVAILABLE, "cinder overloaded").into_response();
    }
    if volume_id != "vol-1" {
        return (StatusCode::NOT_FOUND, Json(json!({"itemNotFound": {"code": 404}}))).into_response();
    }
    Json(json!({
        "volume": {
            "id": "vol-1",
            "name": "data",
            "status": "available",
            "size": 10,
            "volume_type": "ssd",
            "availability_zone": "nova",
            "bootable": "false"
        }
    }))
    .into_response()
}

async fn start() -> (Shared, SocketAddr) {
    let state: Shared = Arc::new(Mutex::new(Keystone::default()));
    let app = Router::new()
        .route("/v3/auth/tokens", post(issue_token))
        .route("/volume/v2/:project/volumes/:id", get(get_volume))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    state.lock().addr = Some(addr);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, addr)
}

fn credential(addr: SocketAddr, password: &str) -> CloudCredential {
    CloudCredential {
        cloud_type: CloudType::OpenStack,
        auth_url: format!("http://{}/v3", addr),
        username: "admin".into(),
        password: password.into(),
        project_name: "demo".into(),
        domain_name: "default".into(),
        region: "RegionOne".into(),
        node_id: None,
        volume_availability_zone: None,
    }
}

fn client(addr: SocketAddr, password: &str) -> OpenStackClient {
    OpenStackClient::new(credential(addr, password), CatalogConfig::default(), &HttpConfig::default()).unwrap()
}

#[tokio::test]
async fn test_v3_login_reads_public_endpoints_of_region() {
    let (_state, addr) = start().await;
    let client = client(addr, "secret");

    let session = client.authenticate().await.unwrap();

    assert_eq!(session.project_id, "proj-1");
    assert_eq!(session.endpoints["compute"], format!("http://{}/compute/v2.1", addr));
    assert_eq!(session.endpoints["volume"], format!("http://{}/volume/v2/proj-1", addr));
    assert!(!session.advanced_networking);
}

#[tokio::test]
async fn test_bad_password_is_authentication_error() {
    let (_state, addr) = start().await;
    let client = client(addr, "wrong");

    let result = client.authenticate().await;
    assert!(matches!(result, Err(Error::Authentication(_))), "got {:?}", result);
}

#[tokio::test]
async fn test_get_volume_decodes_envelope() {
    let (_state, addr) = start().await;
    let client = client(addr, "secret");

    let volume = client.get_volume("vol-1").await.unwrap();

    assert_eq!(volume.status, "available");
    assert_eq!(volume.size, 10);
    assert_eq!(volume.volume_type.as_deref(), Some("ssd"));
}

#[tokio::test]
async fn test_expired_token_triggers_one_reauth() {
    let (state, addr) = start().await;
    let client = client(addr, "secret");
    client.authenticate().await.unwrap();

    // Keystone revokes the token behind the client's back
    state.lock().valid_token = "rotated".into();

    let volume = client.get_volume("vol-1").await.unwrap();

    assert_eq!(volume.id, "vol-1");
    let state = state.lock();
    assert_eq!(state.issued, 2);
    assert_eq!(state.volume_calls, 2);
}

#[tokio::test]
async fn test_driver_maps_missing_volume_to_none() {
    let (state, addr) = start().await;
    let driver = OpenStackDriver::new(credential(addr, "secret"), OpenStackConfig::default()).unwrap();

    assert!(driver.get_volume("vol-404").await.unwrap().is_none());
    let volume = driver.get_volume("vol-1").await.unwrap().unwrap();
    assert_eq!(volume.name, "data");
    assert_eq!(volume.extra.get("availability_zone").map(String::as_str), Some("nova"));
    assert_eq!(state.lock().issued, 1);
}

#[tokio::test]
async fn test_server_error_keeps_response_body() {
    let (state, addr) = start().await;
    let client = client(addr, "secret");

    let result = client.get_volume("vol-busy").await;

    assert!(
        matches!(result, Err(Error::ServerError { code: 503, ref message }) if message == "cinder overloaded"),
        "got {:?}",
        result
    );
    assert_eq!(state.lock().volume_calls, 1);
}
