use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pipeline_gate_core::{AccessToken, ApiError, CredentialResolver};
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://cloudmanager.adobe.io";

/// Daemon configuration file (`--config`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default, rename = "project")]
    pub projects: Vec<ProjectConfig>,
    /// Host jobs that start triggers may schedule.
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// One credential scope on the external pipeline service.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub org_id: String,
    pub api_key: String,
    /// Environment variable holding the bearer token; read on every call.
    pub token_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,
}

impl GateConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: GateConfig = toml::from_str(raw)?;
        Ok(config)
    }

    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.jobs.iter().any(|j| j.name == name)
    }
}

/// Resolves project credentials from the config file and the environment.
#[derive(Debug, Clone)]
pub struct ConfigCredentials {
    config: GateConfig,
}

impl ConfigCredentials {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    fn token_for(&self, project: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<AccessToken, ApiError> {
        let scope = self
            .config
            .project(project)
            .ok_or_else(|| ApiError::unauthorized(format!("no credentials configured for project {project}")))?;
        let token = lookup(&scope.token_env)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                ApiError::unauthorized(format!(
                    "access token variable {} is not set for project {project}",
                    scope.token_env
                ))
            })?;
        Ok(AccessToken::new(token).with_identity(&scope.api_key, &scope.org_id))
    }
}

#[async_trait]
impl CredentialResolver for ConfigCredentials {
    async fn authenticate(&self, project: &str) -> Result<AccessToken, ApiError> {
        self.token_for(project, |var| std::env::var(var).ok())
    }
}
