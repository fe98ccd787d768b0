//! REST backend: note CRUD, sharing, study tools and media uploads.

use async_trait::async_trait;
use noteflow_core::{Config, Note, NoteEvent, SerializedNote};
use noteflow_types::{FlashCard, NoteId, NoteSummary, PermissionLevel};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("note {0} not found")]
    NotFound(NoteId),

    #[error("note has not been saved yet")]
    Unsaved,
}

#[async_trait]
pub trait NoteApi: Send + Sync {
    async fn list_notes(&self) -> Result<Vec<NoteSummary>, ApiError>;

    async fn get_note(&self, id: &NoteId) -> Result<Option<SerializedNote>, ApiError>;

    /// Create a note and return the id the backend assigned.
    async fn create_note(&self, note: &SerializedNote) -> Result<NoteId, ApiError>;

    async fn update_note(&self, note: &SerializedNote) -> Result<(), ApiError>;

    async fn delete_note(&self, id: &NoteId) -> Result<(), ApiError>;

    async fn share_note(
        &self,
        id: &NoteId,
        email: &str,
        level: PermissionLevel,
    ) -> Result<(), ApiError>;

    async fn summarize(&self, id: &NoteId) -> Result<String, ApiError>;

    async fn flashcards(&self, id: &NoteId) -> Result<Vec<FlashCard>, ApiError>;

    /// Free-text question answered against the note's content.
    async fn search(&self, id: &NoteId, query: &str) -> Result<String, ApiError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `path` and return a URL that serves them.
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, ApiError>;
}

/// Persist `note`: create it on first save, update it afterwards.
pub async fn save_note(note: &mut Note, api: &dyn NoteApi) -> Result<(), ApiError> {
    let serialized = note.serialize();
    if note.is_saved() {
        api.update_note(&serialized).await?;
        note.emit(NoteEvent::Saved);
    } else {
        let id = api.create_note(&serialized).await?;
        info!(note = %id, "note created");
        note.mark_saved(id);
    }
    Ok(())
}

#[derive(Serialize)]
struct ShareRequest<'a> {
    email: &'a str,
    permission: PermissionLevel,
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: NoteId,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Deserialize)]
struct FlashcardsResponse {
    flashcards: Vec<FlashCard>,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`NoteApi`] and [`BlobStore`] over HTTP with bearer auth.
#[derive(Clone)]
pub struct HttpNoteApi {
    client: Client,
    endpoint: String,
    token: String,
}

impl HttpNoteApi {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint, token)
    }

    /// Client for the backend named in the `api` section of noteflow.yml.
    pub fn from_config(config: &Config, token: impl Into<String>) -> Self {
        Self::new(config.api_endpoint(), token)
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn note_url(&self, id: &NoteId, suffix: &str) -> String {
        if suffix.is_empty() {
            self.url(&format!("notes/{id}"))
        } else {
            self.url(&format!("notes/{id}/{suffix}"))
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&raw)
            .map(|body| body.error)
            .unwrap_or(raw);
        debug!(status = status.as_u16(), %message, "backend error");
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

fn require_id(note: &SerializedNote) -> Result<&NoteId, ApiError> {
    if note.id.is_assigned() {
        Ok(&note.id)
    } else {
        Err(ApiError::Unsaved)
    }
}

#[async_trait]
impl NoteApi for HttpNoteApi {
    async fn list_notes(&self) -> Result<Vec<NoteSummary>, ApiError> {
        let response = self.send(self.client.get(self.url("notes"))).await?;
        Ok(response.json().await?)
    }

    async fn get_note(&self, id: &NoteId) -> Result<Option<SerializedNote>, ApiError> {
        match self.send(self.client.get(self.note_url(id, ""))).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(ApiError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn create_note(&self, note: &SerializedNote) -> Result<NoteId, ApiError> {
        let response = self
            .send(self.client.post(self.url("notes")).json(note))
            .await?;
        let created: CreatedResponse = response.json().await?;
        Ok(created.id)
    }

    async fn update_note(&self, note: &SerializedNote) -> Result<(), ApiError> {
        let id = require_id(note)?;
        self.send(self.client.put(self.note_url(id, "")).json(note))
            .await?;
        Ok(())
    }

    async fn delete_note(&self, id: &NoteId) -> Result<(), ApiError> {
        match self.send(self.client.delete(self.note_url(id, ""))).await {
            Ok(_) => Ok(()),
            Err(ApiError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(ApiError::NotFound(id.clone()))
            }
            Err(err) => Err(err),
        }
    }

    async fn share_note(
        &self,
        id: &NoteId,
        email: &str,
        level: PermissionLevel,
    ) -> Result<(), ApiError> {
        let body = ShareRequest {
            email,
            permission: level,
        };
        self.send(self.client.post(self.note_url(id, "share")).json(&body))
            .await?;
        info!(note = %id, %email, ?level, "note shared");
        Ok(())
    }

    async fn summarize(&self, id: &NoteId) -> Result<String, ApiError> {
        let response = self
            .send(self.client.post(self.note_url(id, "summary")))
            .await?;
        let body: TextResponse = response.json().await?;
        Ok(body.text)
    }

    async fn flashcards(&self, id: &NoteId) -> Result<Vec<FlashCard>, ApiError> {
        let response = self
            .send(self.client.post(self.note_url(id, "flashcards")))
            .await?;
        let body: FlashcardsResponse = response.json().await?;
        Ok(body.flashcards)
    }

    async fn search(&self, id: &NoteId, query: &str) -> Result<String, ApiError> {
        let request = self
            .client
            .get(self.note_url(id, "search"))
            .query(&[("q", query)]);
        let body: TextResponse = self.send(request).await?.json().await?;
        Ok(body.text)
    }
}

#[async_trait]
impl BlobStore for HttpNoteApi {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, ApiError> {
        let size = bytes.len();
        let request = self
            .client
            .post(self.url("media"))
            .query(&[("path", path)])
            .body(bytes);
        let body: UploadResponse = self.send(request).await?.json().await?;
        debug!(%path, size, url = %body.url, "media uploaded");
        Ok(body.url)
    }
}
