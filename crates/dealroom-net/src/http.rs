//! reqwest-backed [`Transport`].
//!
//! Every request carries the current bearer token. A 401 triggers one
//! session refresh and exactly one retry; concurrent refreshes coalesce
//! behind an async mutex so a burst of expired requests costs a single
//! `POST /api/auth/refresh`.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use dealroom_shared::{
    ApiEnvelope, ContractDocument, CreateSaleRequest, CreateThreadRequest, DocumentId, LocalFile,
    MessageRecord, SaleRequest, SendMessageRequest, SignatureSubmission, SlotKind, ThreadDetail,
    ThreadId, TransportError, UploadedFile,
};

use crate::ports::{Transport, TransportResult};
use crate::storage::HttpObjectStore;

#[derive(Debug, Deserialize)]
struct RefreshedSession {
    #[serde(default)]
    access_token: Option<String>,
}

pub struct HttpTransport {
    http: Client,
    base_url: String,
    token: RwLock<Option<String>>,
    refresh_lock: Mutex<()>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(access_token),
            refresh_lock: Mutex::new(()),
        })
    }

    /// An object store sharing this transport's connection pool.
    pub fn object_store(&self, expires_in_secs: u64) -> HttpObjectStore {
        HttpObjectStore::new(self.http.clone(), self.base_url.clone(), expires_in_secs)
    }

    pub fn access_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_access_token(&self, token: String) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request built by `build`, refreshing the session and retrying
    /// once on 401. `build` is called again for the retry since multipart
    /// bodies cannot be cloned.
    async fn execute<T, F>(&self, build: F) -> TransportResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> TransportResult<RequestBuilder> + Send + Sync,
    {
        let token = self.access_token();
        let response = self.dispatch(&build, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return decode(response).await;
        }

        debug!("Request unauthorized, refreshing session");
        self.refresh(token.as_deref()).await?;

        let token = self.access_token();
        let response = self.dispatch(&build, token.as_deref()).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Request still unauthorized after session refresh");
            return Err(TransportError::Unauthorized);
        }
        decode(response).await
    }

    async fn dispatch<F>(&self, build: &F, token: Option<&str>) -> TransportResult<Response>
    where
        F: Fn(&Client) -> TransportResult<RequestBuilder> + Send + Sync,
    {
        let mut request = build(&self.http)?;
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(map_reqwest_error)
    }

    /// Refresh the session unless another task already did so while we
    /// waited for the lock.
    async fn refresh(&self, stale_token: Option<&str>) -> TransportResult<()> {
        let _guard = self.refresh_lock.lock().await;

        if self.access_token().as_deref() != stale_token {
            debug!("Session already refreshed by a concurrent request");
            return Ok(());
        }

        let mut request = self.http.post(self.url("/api/auth/refresh"));
        if let Some(token) = stale_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Session refresh rejected");
            return Err(TransportError::Unauthorized);
        }

        let envelope: ApiEnvelope<RefreshedSession> = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        if let Some(token) = envelope.data.and_then(|s| s.access_token) {
            self.set_access_token(token);
        }

        info!("Session refreshed");
        Ok(())
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Map a non-success response to a [`TransportError`], pulling the
/// backend's error text out of the envelope when there is one.
pub(crate) async fn error_from_response(response: Response) -> TransportError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
        .ok()
        .and_then(|env| env.error.or(env.message))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    match status {
        StatusCode::NOT_FOUND => TransportError::NotFound(message),
        StatusCode::UNAUTHORIZED => TransportError::Unauthorized,
        _ => TransportError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> TransportResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_from_response(response).await);
    }

    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    let envelope: ApiEnvelope<T> =
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?;

    if !envelope.success {
        return Err(TransportError::Status {
            status: status.as_u16(),
            message: envelope
                .error
                .or(envelope.message)
                .unwrap_or_else(|| "request failed".into()),
        });
    }

    envelope
        .data
        .ok_or_else(|| TransportError::Decode("response envelope carried no data".into()))
}

fn file_part(file: &LocalFile) -> TransportResult<Part> {
    Part::bytes(file.bytes.to_vec())
        .file_name(file.file_name.clone())
        .mime_str(&file.content_type)
        .map_err(|e| TransportError::Network(format!("invalid content type: {e}")))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_thread(&self, thread_id: &ThreadId) -> TransportResult<ThreadDetail> {
        let url = self.url(&format!("/api/threads/{thread_id}"));
        self.execute(|http| Ok(http.get(&url))).await
    }

    async fn create_thread(&self, request: &CreateThreadRequest) -> TransportResult<ThreadDetail> {
        let url = self.url("/api/threads");
        self.execute(|http| Ok(http.post(&url).json(request))).await
    }

    async fn list_messages(&self, thread_id: &ThreadId) -> TransportResult<Vec<MessageRecord>> {
        let url = self.url("/api/messages");
        self.execute(|http| Ok(http.get(&url).query(&[("thread_id", thread_id.as_str())])))
            .await
    }

    async fn send_message(&self, request: &SendMessageRequest) -> TransportResult<MessageRecord> {
        let url = self.url("/api/messages");
        self.execute(|http| Ok(http.post(&url).json(request))).await
    }

    async fn upload_message_image(&self, file: &LocalFile) -> TransportResult<UploadedFile> {
        let url = self.url("/api/messages/upload-image");
        info!(file = %file.file_name, size = file.size(), "Uploading message attachment");
        self.execute(|http| {
            let form = Form::new().part("image", file_part(file)?);
            Ok(http.post(&url).multipart(form))
        })
        .await
    }

    async fn list_contract_documents(
        &self,
        thread_id: &ThreadId,
    ) -> TransportResult<Vec<ContractDocument>> {
        let url = self.url("/api/contracts");
        self.execute(|http| Ok(http.get(&url).query(&[("thread_id", thread_id.as_str())])))
            .await
    }

    async fn upload_contract_document(
        &self,
        thread_id: &ThreadId,
        kind: SlotKind,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument> {
        let url = self.url("/api/contracts");
        info!(
            thread = %thread_id,
            slot = %kind,
            digest = %file.digest(),
            "Uploading contract document"
        );
        self.execute(|http| {
            let form = Form::new()
                .text("thread_id", thread_id.to_string())
                .text("contract_type", kind.as_str())
                .part("file", file_part(file)?);
            Ok(http.post(&url).multipart(form))
        })
        .await
    }

    async fn replace_contract_document(
        &self,
        document_id: &DocumentId,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument> {
        let url = self.url(&format!("/api/contracts/{document_id}"));
        info!(document = %document_id, digest = %file.digest(), "Replacing contract document");
        self.execute(|http| {
            let form = Form::new().part("file", file_part(file)?);
            Ok(http.put(&url).multipart(form))
        })
        .await
    }

    async fn save_signed_contract(
        &self,
        document_id: &DocumentId,
        file: &LocalFile,
    ) -> TransportResult<ContractDocument> {
        let url = self.url(&format!("/api/contracts/{document_id}/signed"));
        info!(document = %document_id, digest = %file.digest(), "Saving signed contract");
        self.execute(|http| {
            let form = Form::new().part("file", file_part(file)?);
            Ok(http.post(&url).multipart(form))
        })
        .await
    }

    async fn add_contract_signature(
        &self,
        document_id: &DocumentId,
        submission: &SignatureSubmission,
    ) -> TransportResult<ContractDocument> {
        let url = self.url(&format!("/api/contracts/{document_id}/signatures"));
        self.execute(|http| Ok(http.post(&url).json(submission))).await
    }

    async fn list_sale_requests(&self, thread_id: &ThreadId) -> TransportResult<Vec<SaleRequest>> {
        let url = self.url("/api/sale-requests");
        self.execute(|http| Ok(http.get(&url).query(&[("thread_id", thread_id.as_str())])))
            .await
    }

    async fn create_sale_request(&self, request: &CreateSaleRequest) -> TransportResult<SaleRequest> {
        let url = self.url("/api/sale-requests");
        self.execute(|http| Ok(http.post(&url).json(request))).await
    }
}
