//! Contract of the external pipeline-execution API.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified cause of an API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    NotFound,
    Unauthorized,
    Transport,
    Rejected,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiErrorKind::NotFound => "resource not found",
            ApiErrorKind::Unauthorized => "authorization failure",
            ApiErrorKind::Transport => "transport error",
            ApiErrorKind::Rejected => "request rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unauthorized, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transport, message)
    }
}

/// Bearer token for one project, plus the client identity the service expects
/// alongside it. The token is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    api_key: Option<String>,
    org_id: Option<String>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_key: None,
            org_id: None,
        }
    }

    pub fn with_identity(mut self, api_key: impl Into<String>, org_id: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self.org_id = Some(org_id.into());
        self
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn org_id(&self) -> Option<&str> {
        self.org_id.as_deref()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// The execution an advance/cancel call applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTarget {
    pub program_id: String,
    pub pipeline_id: String,
    pub execution_id: String,
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "program {} pipeline {} execution {}",
            self.program_id, self.pipeline_id, self.execution_id
        )
    }
}

/// Resolves a project-scoped credential into a bearer token.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn authenticate(&self, project: &str) -> Result<AccessToken, ApiError>;
}

/// Advance/cancel calls against the external pipeline service.
///
/// Implementations own any retry policy; callers treat every error as final.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    async fn advance_execution(
        &self,
        token: &AccessToken,
        target: &ExecutionTarget,
    ) -> Result<(), ApiError>;

    async fn cancel_execution(
        &self,
        token: &AccessToken,
        target: &ExecutionTarget,
    ) -> Result<(), ApiError>;
}
