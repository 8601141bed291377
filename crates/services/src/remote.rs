//! HTTP client for the remote user store.
//!
//! The remote speaks a small JSON REST dialect: `GET /users` lists records,
//! `POST /users` creates one and assigns its id, `PATCH /users/:id` applies
//! a partial update and echoes the server's view of the stored fields.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use progress_core::model::{UserId, UserRecord};
use progress_core::patch::UserPatch;

use crate::error::RemoteError;

/// Abstraction over the remote user store.
///
/// The sync coordinator only ever talks to this trait; tests substitute a
/// scripted implementation.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Lists all remote records.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` when the remote is unreachable or refuses the
    /// request.
    async fn list(&self) -> Result<Vec<UserRecord>, RemoteError>;

    /// Creates a record remotely and returns the stored copy, id assigned.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` when the remote is unreachable or refuses the
    /// request.
    async fn create(&self, record: &UserRecord) -> Result<UserRecord, RemoteError>;

    /// Applies a partial update and returns the server's view of the stored
    /// fields, which wins over local state on any field it carries.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` when the remote is unreachable or refuses the
    /// request.
    async fn update(&self, id: &UserId, patch: &UserPatch) -> Result<UserPatch, RemoteError>;
}

/// Remote endpoint configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
}

impl RemoteConfig {
    pub const BASE_URL_ENV: &'static str = "PROGRESS_REMOTE_URL";

    /// Reads the endpoint from `PROGRESS_REMOTE_URL`; `None` when unset, in
    /// which case the application runs local-only.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var(Self::BASE_URL_ENV).ok()?;
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return None;
        }
        Some(Self { base_url })
    }
}

/// [`RemoteStore`] backed by a reqwest client.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteStore {
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url,
        }
    }

    fn users_url(&self) -> String {
        format!("{}/users", self.base_url)
    }

    fn user_url(&self, id: &UserId) -> String {
        format!("{}/users/{id}", self.base_url)
    }
}

/// Maps a transport failure to the transient class.
fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Transient(err.to_string())
}

/// Splits a non-success status into transient (server-side or throttling)
/// versus rejection (the request itself is bad).
fn status_error(status: StatusCode) -> RemoteError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::Transient(format!("remote returned status {status}"))
    } else {
        RemoteError::Rejected {
            status: status.as_u16(),
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status));
    }
    response.json::<T>().await.map_err(transport_error)
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list(&self) -> Result<Vec<UserRecord>, RemoteError> {
        debug!(url = %self.users_url(), "listing remote records");
        let response = self
            .client
            .get(self.users_url())
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn create(&self, record: &UserRecord) -> Result<UserRecord, RemoteError> {
        debug!(url = %self.users_url(), "creating remote record");
        let response = self
            .client
            .post(self.users_url())
            .json(record)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn update(&self, id: &UserId, patch: &UserPatch) -> Result<UserPatch, RemoteError> {
        debug!(url = %self.user_url(id), "patching remote record");
        let response = self
            .client
            .patch(self.user_url(id))
            .json(patch)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}
