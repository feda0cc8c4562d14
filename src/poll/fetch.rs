use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::state::Cursor;
use crate::api::{ApiClient, ApiError, OutputLine};

/// One response from a tail endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPage<E> {
    pub entries: Vec<E>,
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
}

impl<E> PollPage<E> {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn new(entries: Vec<E>, next_cursor: Option<Cursor>) -> Self {
        Self {
            entries,
            next_cursor,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("fetch failed: {0}")]
    Other(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(error) => error.is_retryable(),
            Self::Other(_) => true,
        }
    }
}

/// Fetches entries strictly after a cursor.
#[async_trait]
pub trait TailFetcher: Send + Sync {
    type Entry: Send + 'static;

    async fn fetch(&self, cursor: Option<Cursor>) -> Result<PollPage<Self::Entry>, FetchError>;
}

/// Adapts an async closure into a [`TailFetcher`].
pub struct FnFetcher<E, F> {
    f: F,
    _entry: PhantomData<fn() -> E>,
}

impl<E, F, Fut> FnFetcher<E, F>
where
    F: Fn(Option<Cursor>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PollPage<E>, FetchError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _entry: PhantomData,
        }
    }
}

#[async_trait]
impl<E, F, Fut> TailFetcher for FnFetcher<E, F>
where
    E: Send + 'static,
    F: Fn(Option<Cursor>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PollPage<E>, FetchError>> + Send,
{
    type Entry = E;

    async fn fetch(&self, cursor: Option<Cursor>) -> Result<PollPage<E>, FetchError> {
        (self.f)(cursor).await
    }
}

/// Tails the output of one command over the REST API.
pub struct CommandOutputFetcher {
    api: ApiClient,
    command_id: String,
}

impl CommandOutputFetcher {
    pub fn new(api: ApiClient, command_id: impl Into<String>) -> Self {
        Self {
            api,
            command_id: command_id.into(),
        }
    }

    pub fn command_id(&self) -> &str {
        &self.command_id
    }
}

#[async_trait]
impl TailFetcher for CommandOutputFetcher {
    type Entry = OutputLine;

    async fn fetch(&self, cursor: Option<Cursor>) -> Result<PollPage<OutputLine>, FetchError> {
        Ok(self.api.fetch_command_output(&self.command_id, cursor).await?)
    }
}
