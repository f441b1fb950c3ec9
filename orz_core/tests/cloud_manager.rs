//! End to end: control plane and tunnel endpoint served by one in-process
//! axum app, real WebSocket transport in between.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration as ChronoDuration;
use orz_core::{CloudConfig, CloudError, CloudManager, Credential, TunnelPool};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

mod common;
use common::fake_connection::init_test_logging;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct Plane {
    base: String,
    upgrades: Arc<Mutex<Vec<(Option<String>, Option<String>)>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

async fn get_instance(State(plane): State<Plane>, Path(id): Path<String>) -> Response {
    if id == "no-url" {
        return Json(json!({"id": id, "status": "Pending", "attach_url": null})).into_response();
    }
    let ws_base = plane.base.replacen("http://", "ws://", 1);
    Json(json!({
        "id": id,
        "status": "Running",
        "tier": "small",
        "attach_url": format!("{ws_base}/v1/instances/{id}/attach?token=tk-{id}")
    }))
    .into_response()
}

async fn exchange(Json(body): Json<serde_json::Value>) -> Response {
    if body["github_token"] != "gho_good" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Invalid GitHub token"})))
            .into_response();
    }
    Json(json!({
        "token": "api-exchanged",
        "user": {"login": "octo", "email": "octo@example.com", "org_id": "org-42", "plan": "pro"}
    }))
    .into_response()
}

async fn delete_instance(State(plane): State<Plane>, Path(id): Path<String>) -> StatusCode {
    plane.deleted.lock().unwrap().push(id);
    StatusCode::NO_CONTENT
}

async fn attach(
    ws: WebSocketUpgrade,
    State(plane): State<Plane>,
    Path(id): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let authorized = query.as_deref() == Some(format!("token=tk-{id}").as_str());
    plane.upgrades.lock().unwrap().push((auth, query));
    // Like the control plane: only the upgrade query is checked.
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if id == "hangup" {
        return ws.on_upgrade(|mut socket: WebSocket| async move {
            let _ = socket.send(Message::Text("bye".into())).await;
            let _ = socket.send(Message::Close(None)).await;
        });
    }
    ws.on_upgrade(echo)
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let reply = match msg {
            Message::Binary(bytes) => Message::Binary(bytes),
            Message::Text(text) => Message::Text(text),
            Message::Close(_) => break,
            _ => continue,
        };
        if socket.send(reply).await.is_err() {
            break;
        }
    }
}

async fn spawn_plane() -> Plane {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let plane = Plane {
        base: format!("http://{}", listener.local_addr().unwrap()),
        upgrades: Arc::default(),
        deleted: Arc::default(),
    };
    let app = Router::new()
        .route(
            "/v1/instances/:id",
            get(get_instance).delete(delete_instance),
        )
        .route("/v1/instances/:id/attach", get(attach))
        .route("/v1/auth/exchange", post(exchange))
        .with_state(plane.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    plane
}

fn manager_for(plane: &Plane, dir: &tempfile::TempDir) -> CloudManager {
    init_test_logging();
    let config = CloudConfig::new(&plane.base)
        .unwrap()
        .with_token_path(dir.path().join("token.json"));
    let manager = CloudManager::new(config).unwrap();
    manager
        .login(&Credential::valid_for("api-token", ChronoDuration::days(90)))
        .unwrap();
    manager
}

#[tokio::test]
async fn attach_sends_token_on_the_upgrade_only_and_echoes() -> anyhow::Result<()> {
    let plane = spawn_plane().await;
    let dir = tempfile::tempdir()?;
    let manager = manager_for(&plane, &dir);
    let id = format!("i-{}", uuid::Uuid::new_v4());

    let session = manager.attach(&id).await?;
    assert_eq!(session.endpoint().scheme(), "ws");
    assert_eq!(session.endpoint().query(), None);

    let mut output = session.subscribe();
    session.write_bytes(b"echo hi\n").await?;
    let got = timeout(WAIT, output.recv()).await??;
    assert_eq!(got, b"echo hi\n");

    let upgrades = plane.upgrades.lock().unwrap().clone();
    assert_eq!(
        upgrades,
        [(Some(format!("Bearer tk-{id}")), Some(format!("token=tk-{id}")))]
    );

    assert!(manager.get_session(&id).await.unwrap().same_session(&session));
    manager.close_all().await;
    assert!(session.is_closed());
    Ok(())
}

#[tokio::test]
async fn delete_closes_the_tunnel_before_the_rest_call() -> anyhow::Result<()> {
    let plane = spawn_plane().await;
    let dir = tempfile::tempdir()?;
    let manager = manager_for(&plane, &dir);

    let session = manager.attach("i-del").await?;
    manager.delete_instance("i-del").await?;

    assert!(session.is_closed());
    assert!(manager.get_session("i-del").await.is_none());
    assert_eq!(*plane.deleted.lock().unwrap(), ["i-del"]);
    Ok(())
}

#[tokio::test]
async fn server_hangup_is_seen_by_the_session() -> anyhow::Result<()> {
    let plane = spawn_plane().await;
    let dir = tempfile::tempdir()?;
    let manager = manager_for(&plane, &dir);

    let session = manager.attach("hangup").await?;
    let mut output = session.subscribe();
    let got = timeout(WAIT, output.recv()).await??;
    assert_eq!(got, b"bye");

    timeout(WAIT, session.closed()).await?;
    manager.close("hangup").await;
    Ok(())
}

#[tokio::test]
async fn rejected_upgrade_registers_nothing() -> anyhow::Result<()> {
    let plane = spawn_plane().await;
    let dir = tempfile::tempdir()?;
    let manager = manager_for(&plane, &dir);

    let url = format!(
        "{}/v1/instances/i-1/attach?token=wrong",
        plane.base.replacen("http://", "ws://", 1)
    );
    let err = manager.attach_url("i-1", &url).await.unwrap_err();
    assert!(matches!(err, CloudError::Connect(_)), "{err}");
    assert!(manager.get_session("i-1").await.is_none());
    Ok(())
}

#[tokio::test]
async fn instance_without_attach_url_is_a_protocol_error() -> anyhow::Result<()> {
    let plane = spawn_plane().await;
    let dir = tempfile::tempdir()?;
    let manager = manager_for(&plane, &dir);

    let err = manager.attach("no-url").await.unwrap_err();
    assert!(matches!(err, CloudError::Protocol(_)), "{err}");
    assert!(manager.get_session("no-url").await.is_none());
    assert!(plane.upgrades.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn exchanged_token_is_stored_with_account_details() -> anyhow::Result<()> {
    let plane = spawn_plane().await;
    let dir = tempfile::tempdir()?;
    let manager = manager_for(&plane, &dir);
    manager.logout()?;

    let err = manager.exchange_token("gho_bad").await.unwrap_err();
    assert!(matches!(err, CloudError::Api { .. }), "{err}");
    assert!(!manager.is_authenticated());

    manager.exchange_token("gho_good").await?;
    let stored = manager.whoami()?;
    assert_eq!(stored.token, "api-exchanged");
    let user = stored.user.expect("account details");
    assert_eq!(user.org_id, "org-42");
    assert_eq!(user.plan, "pro");
    Ok(())
}

#[tokio::test]
async fn logged_out_manager_refuses_to_attach() -> anyhow::Result<()> {
    let plane = spawn_plane().await;
    let dir = tempfile::tempdir()?;
    let manager = manager_for(&plane, &dir);
    assert!(manager.is_authenticated());

    assert!(manager.logout()?);
    assert!(!manager.is_authenticated());
    assert!(!manager.logout()?);

    let err = manager.attach("i-1").await.unwrap_err();
    assert!(err.is_auth());
    assert!(plane.upgrades.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn default_pool_speaks_websocket() -> anyhow::Result<()> {
    let plane = spawn_plane().await;
    init_test_logging();
    let pool = TunnelPool::default();

    let url = format!("{}/v1/instances/raw/attach?token=tk-raw", plane.base);
    let session = pool.connect("raw", &url).await?;
    let mut output = session.subscribe();
    session.write_bytes(&[0, 159, 146, 150]).await?;
    assert_eq!(timeout(WAIT, output.recv()).await??, vec![0, 159, 146, 150]);

    pool.close("raw").await;
    Ok(())
}
