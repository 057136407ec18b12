//! reqwest-backed pipeline-execution API and name lookups.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use pipeline_gate_core::{
    AccessToken, ApiError, ApiErrorKind, CredentialResolver, ExecutionTarget, PipelineApi,
    PipelineLookup,
};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::GateConfig;

#[derive(Debug, Clone)]
pub struct HttpPipelineApi {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpPipelineApi {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid api base url {base_url:?}"))?;
        if base_url.cannot_be_a_base() {
            bail!("api base url {base_url} cannot carry a path");
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// Base url extended by `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::transport(format!("base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn execution_url(&self, target: &ExecutionTarget, verb: &str) -> Result<Url, ApiError> {
        self.endpoint(&[
            "api",
            "program",
            &target.program_id,
            "pipeline",
            &target.pipeline_id,
            "execution",
            &target.execution_id,
            verb,
        ])
    }

    fn authorize(req: RequestBuilder, token: &AccessToken) -> RequestBuilder {
        let mut req = req.bearer_auth(token.secret());
        if let Some(key) = token.api_key() {
            req = req.header("x-api-key", key);
        }
        if let Some(org) = token.org_id() {
            req = req.header("x-gw-ims-org-id", org);
        }
        req
    }

    async fn send(&self, req: RequestBuilder, token: &AccessToken, what: &str) -> Result<String, ApiError> {
        let resp = Self::authorize(req, token)
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("{what}: {e}")))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        classify(status, what, &body)?;
        Ok(body)
    }

    async fn put(&self, token: &AccessToken, target: &ExecutionTarget, verb: &str) -> Result<(), ApiError> {
        let url = self.execution_url(target, verb)?;
        debug!(%url, "pipeline api call");
        let what = format!("{verb} {target}");
        self.send(self.http.put(url).json(&serde_json::json!({})), token, &what)
            .await
            .map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &AccessToken, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let body = self.send(self.http.get(url), token, &path).await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::new(ApiErrorKind::Rejected, format!("{path}: invalid response: {e}")))
    }
}

/// Maps a response status to the error taxonomy.
pub fn classify(status: StatusCode, what: &str, body: &str) -> Result<(), ApiError> {
    if status.is_success() {
        return Ok(());
    }
    let detail = if body.trim().is_empty() {
        format!("{what}: HTTP {status}")
    } else {
        format!("{what}: HTTP {status}: {}", body.trim())
    };
    let kind = match status {
        StatusCode::NOT_FOUND => ApiErrorKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiErrorKind::Unauthorized,
        _ => ApiErrorKind::Rejected,
    };
    Err(ApiError::new(kind, detail))
}

#[async_trait]
impl PipelineApi for HttpPipelineApi {
    async fn advance_execution(&self, token: &AccessToken, target: &ExecutionTarget) -> Result<(), ApiError> {
        self.put(token, target, "advance").await
    }

    async fn cancel_execution(&self, token: &AccessToken, target: &ExecutionTarget) -> Result<(), ApiError> {
        self.put(token, target, "cancel").await
    }
}

#[derive(Debug, Deserialize)]
struct Embedded<T> {
    #[serde(rename = "_embedded")]
    embedded: T,
}

#[derive(Debug, Deserialize)]
struct Programs {
    #[serde(default)]
    programs: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct Pipelines {
    #[serde(default)]
    pipelines: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    id: String,
    name: String,
}

fn find_id(items: Vec<Named>, name: &str) -> Option<String> {
    items.into_iter().find(|n| n.name == name).map(|n| n.id)
}

/// Name lookups for start triggers, authenticated per project.
#[derive(Clone)]
pub struct HttpPipelineLookup {
    api: HttpPipelineApi,
    config: GateConfig,
    credentials: Arc<dyn CredentialResolver>,
}

impl HttpPipelineLookup {
    pub fn new(api: HttpPipelineApi, config: GateConfig, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            api,
            config,
            credentials,
        }
    }
}

#[async_trait]
impl PipelineLookup for HttpPipelineLookup {
    async fn project_exists(&self, project: &str) -> Result<bool, ApiError> {
        Ok(self.config.project(project).is_some())
    }

    async fn program_id(&self, project: &str, name: &str) -> Result<Option<String>, ApiError> {
        let token = self.credentials.authenticate(project).await?;
        let listing: Embedded<Programs> = self.api.get_json(&token, &["api", "programs"]).await?;
        Ok(find_id(listing.embedded.programs, name))
    }

    async fn pipeline_id(&self, project: &str, program_id: &str, name: &str) -> Result<Option<String>, ApiError> {
        let token = self.credentials.authenticate(project).await?;
        let listing: Embedded<Pipelines> = self
            .api
            .get_json(&token, &["api", "program", program_id, "pipelines"])
            .await?;
        Ok(find_id(listing.embedded.pipelines, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(classify(StatusCode::ACCEPTED, "advance", "").is_ok());
        let cases = [
            (StatusCode::NOT_FOUND, ApiErrorKind::NotFound),
            (StatusCode::UNAUTHORIZED, ApiErrorKind::Unauthorized),
            (StatusCode::FORBIDDEN, ApiErrorKind::Unauthorized),
            (StatusCode::BAD_REQUEST, ApiErrorKind::Rejected),
            (StatusCode::INTERNAL_SERVER_ERROR, ApiErrorKind::Rejected),
        ];
        for (status, kind) in cases {
            assert_eq!(classify(status, "advance", "").unwrap_err().kind, kind, "{status}");
        }
    }

    #[test]
    fn error_detail_keeps_response_body() {
        let err = classify(StatusCode::NOT_FOUND, "advance", " no such execution\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "resource not found: advance: HTTP 404 Not Found: no such execution"
        );
    }

    #[test]
    fn execution_url_layout() {
        let api = HttpPipelineApi::new("https://pipelines.example.com/", Duration::from_secs(1)).unwrap();
        let target = ExecutionTarget {
            program_id: "1".into(),
            pipeline_id: "2".into(),
            execution_id: "3".into(),
        };
        assert_eq!(
            api.execution_url(&target, "cancel").unwrap().as_str(),
            "https://pipelines.example.com/api/program/1/pipeline/2/execution/3/cancel"
        );
    }

    #[test]
    fn execution_ids_stay_inside_their_segment() {
        let api = HttpPipelineApi::new("https://pipelines.example.com/gw", Duration::from_secs(1)).unwrap();
        let target = ExecutionTarget {
            program_id: "1".into(),
            pipeline_id: "2/pipeline/9".into(),
            execution_id: "3/cancel?force=1".into(),
        };
        assert_eq!(
            api.execution_url(&target, "advance").unwrap().as_str(),
            "https://pipelines.example.com/gw/api/program/1/pipeline/2%2Fpipeline%2F9/execution/3%2Fcancel%3Fforce=1/advance"
        );
    }

    #[test]
    fn base_url_must_be_hierarchical() {
        assert!(HttpPipelineApi::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
        assert!(HttpPipelineApi::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn listings_resolve_names() {
        let listing: Embedded<Programs> = serde_json::from_str(
            r#"{"_embedded":{"programs":[{"id":"7","name":"Acme"},{"id":"8","name":"Other"}]}}"#,
        )
        .unwrap();
        assert_eq!(find_id(listing.embedded.programs, "Acme"), Some("7".into()));
    }
}
