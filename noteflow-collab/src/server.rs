use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use noteflow_types::UserIdentity;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    auth::{AuthState, MaybeIdentity},
    config::CollabConfig,
    store::{
        DocRef, DocumentFields, DocumentStore, DocumentSubscription, MemoryDocumentStore,
        StoreError,
    },
};

/// Writer id used for anonymous calls when auth is configured but optional.
pub const ANONYMOUS: &str = "anonymous";

#[derive(Clone)]
pub struct AppState {
    pub store: MemoryDocumentStore,
    /// Without keys every caller is trusted.
    pub auth_enabled: bool,
}

impl AppState {
    /// Store handle that reads and writes on behalf of the caller.
    fn store_for(&self, identity: Option<&UserIdentity>) -> MemoryDocumentStore {
        match identity {
            Some(user) => self.store.as_user(user.id.clone()),
            None if self.auth_enabled => self.store.as_user(ANONYMOUS),
            None => self.store.clone(),
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::PermissionDenied { .. } | StoreError::ReadDenied { .. } => {
                StatusCode::FORBIDDEN
            }
            StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::Codec(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

pub fn router(store: MemoryDocumentStore, auth_state: AuthState) -> Router {
    let state = AppState {
        store,
        auth_enabled: auth_state.keystore.has_keys(),
    };

    Router::new()
        // Public endpoints (no auth required)
        .route("/healthz", get(healthz))
        .route("/api/doc/{*path}", get(get_doc).put(put_doc))
        .route("/ws/doc/{*path}", get(ws_doc))
        .layer(Extension(auth_state))
        .with_state(state)
}

pub async fn serve(config: CollabConfig) -> Result<()> {
    let auth_state = AuthState {
        keystore: Arc::new(config.auth.build_keystore()),
        require_auth: config.auth.require_auth,
    };
    if !auth_state.keystore.has_keys() {
        warn!("no user secret configured, all writes are trusted");
    }

    let app = router(MemoryDocumentStore::new(), auth_state);

    info!(addr = %config.listen_addr, "noteflow-collab listening");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn get_doc(
    Path(path): Path<String>,
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
) -> Result<Response, StoreError> {
    let doc = DocRef::new(path);
    match state.store_for(identity.as_ref()).get_document(&doc).await? {
        Some(fields) => Ok(Json(Value::Object(fields)).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("document not found: {doc}")})),
        )
            .into_response()),
    }
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    /// Replace the document instead of merging into it.
    #[serde(default)]
    replace: bool,
}

async fn put_doc(
    Path(path): Path<String>,
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Query(params): Query<WriteParams>,
    Json(fields): Json<DocumentFields>,
) -> Result<Response, StoreError> {
    let doc = DocRef::new(path);
    state
        .store_for(identity.as_ref())
        .set_document(&doc, fields, !params.replace)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn ws_doc(
    Path(path): Path<String>,
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    ws: WebSocketUpgrade,
) -> Result<Response, StoreError> {
    let doc = DocRef::new(path);
    let store = state.store_for(identity.as_ref());
    // Checked before the upgrade so a denied read is a plain 403.
    let subscription = store.subscribe(&doc).await?;
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(err) = handle_ws(socket, doc, store, subscription).await {
            warn!(?err, "websocket session ended with error");
        }
    }))
}

fn snapshot_message(fields: Option<DocumentFields>) -> Result<WsMessage> {
    let body = json!({"kind": "snapshot", "fields": fields.map(Value::Object)});
    Ok(WsMessage::Text(serde_json::to_string(&body)?.into()))
}

async fn handle_ws(
    mut socket: WebSocket,
    doc: DocRef,
    store: MemoryDocumentStore,
    mut subscription: DocumentSubscription,
) -> Result<()> {
    loop {
        tokio::select! {
            // Current state first, then every accepted write
            snapshot = subscription.next() => {
                let Some(snapshot) = snapshot else { break };
                if socket.send(snapshot_message(snapshot.fields)?).await.is_err() {
                    break;
                }
            }
            // Writes from this client
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(WsMessage::Text(txt))) => {
                        match serde_json::from_str::<DocumentFields>(&txt) {
                            Ok(fields) => {
                                if let Err(err) = store.set_document(&doc, fields, true).await {
                                    warn!(doc = %doc, %err, "rejected websocket write");
                                    let body = json!({"kind": "error", "error": err.to_string()});
                                    let text = serde_json::to_string(&body)?;
                                    if socket.send(WsMessage::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(_) => warn!(doc = %doc, "ignoring non-object WS payload"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
