//! HTTP client for the document/comment REST API.
//!
//! Plain request/response CRUD, JSON in both directions:
//!
//! ```text
//! POST   /docs                        -> Document
//! GET    /docs/{id}                   -> Document
//! PATCH  /docs/{id}                   -> Document
//! DELETE /docs/{id}                   -> { status }
//! GET    /docs/{id}/comments          -> { comments: [Comment] }
//! POST   /docs/{id}/comments          -> { comment: Comment }
//! PATCH  /docs/{id}/comments/{cid}    -> { comment: Comment }
//! ```
//!
//! Failures come back as `{ error: { code, message } }` with a non-2xx status.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::comments::{Comment, CommentApi, CommentPatch, NewComment};
use crate::error::ApiError;

/// Document metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Document CRUD.
pub trait DocumentApi: Send + Sync {
    fn create_document(&self, title: Option<String>) -> BoxFuture<'_, Result<Document, ApiError>>;

    fn get_document(&self, id: Uuid) -> BoxFuture<'_, Result<Document, ApiError>>;

    fn rename_document(&self, id: Uuid, title: String) -> BoxFuture<'_, Result<Document, ApiError>>;

    fn delete_document(&self, id: Uuid) -> BoxFuture<'_, Result<(), ApiError>>;
}

#[derive(Serialize)]
struct TitleBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

#[derive(Deserialize)]
struct CommentsBody {
    comments: Vec<Comment>,
}

#[derive(Deserialize)]
struct CommentBody {
    comment: Comment,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

/// reqwest-backed implementation of [`DocumentApi`] and [`CommentApi`].
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
}

impl HttpApi {
    pub fn new(base: Url) -> Self {
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `base` with `segments` appended as path components.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn doc_url(&self, id: Uuid, rest: &[&str]) -> Result<Url, ApiError> {
        let id = id.to_string();
        let mut segments = vec!["docs", id.as_str()];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }
}

/// Body on success, `ApiError::Status` otherwise.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { error }) => (error.code, error.message),
        Err(_) => (
            "http_error".to_string(),
            status.canonical_reason().unwrap_or("Request failed").to_string(),
        ),
    };
    log::debug!("API error {status}: {code}");
    Err(ApiError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}

impl DocumentApi for HttpApi {
    fn create_document(&self, title: Option<String>) -> BoxFuture<'_, Result<Document, ApiError>> {
        async move {
            let url = self.endpoint(&["docs"])?;
            let response = self.client.post(url).json(&TitleBody { title }).send().await?;
            read_json(response).await
        }
        .boxed()
    }

    fn get_document(&self, id: Uuid) -> BoxFuture<'_, Result<Document, ApiError>> {
        async move {
            let url = self.doc_url(id, &[])?;
            let response = self.client.get(url).send().await?;
            read_json(response).await
        }
        .boxed()
    }

    fn rename_document(
        &self,
        id: Uuid,
        title: String,
    ) -> BoxFuture<'_, Result<Document, ApiError>> {
        async move {
            let url = self.doc_url(id, &[])?;
            let body = TitleBody { title: Some(title) };
            let response = self.client.patch(url).json(&body).send().await?;
            read_json(response).await
        }
        .boxed()
    }

    fn delete_document(&self, id: Uuid) -> BoxFuture<'_, Result<(), ApiError>> {
        async move {
            let url = self.doc_url(id, &[])?;
            let response = self.client.delete(url).send().await?;
            read_json::<serde_json::Value>(response).await.map(|_| ())
        }
        .boxed()
    }
}

impl CommentApi for HttpApi {
    fn list_comments(&self, doc_id: Uuid) -> BoxFuture<'_, Result<Vec<Comment>, ApiError>> {
        async move {
            let url = self.doc_url(doc_id, &["comments"])?;
            let response = self.client.get(url).send().await?;
            Ok(read_json::<CommentsBody>(response).await?.comments)
        }
        .boxed()
    }

    fn add_comment(
        &self,
        doc_id: Uuid,
        comment: NewComment,
    ) -> BoxFuture<'_, Result<Comment, ApiError>> {
        async move {
            let url = self.doc_url(doc_id, &["comments"])?;
            let response = self.client.post(url).json(&comment).send().await?;
            Ok(read_json::<CommentBody>(response).await?.comment)
        }
        .boxed()
    }

    fn update_comment(
        &self,
        doc_id: Uuid,
        comment_id: String,
        patch: CommentPatch,
    ) -> BoxFuture<'_, Result<Comment, ApiError>> {
        async move {
            let url = self.doc_url(doc_id, &["comments", comment_id.as_str()])?;
            let response = self.client.patch(url).json(&patch).send().await?;
            Ok(read_json::<CommentBody>(response).await?.comment)
        }
        .boxed()
    }
}
