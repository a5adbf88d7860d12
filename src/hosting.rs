//! The slice of the GitHub REST API the autosaver needs.

use std::fmt;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

const USER_AGENT: &str = concat!("github-autosave/", env!("CARGO_PKG_VERSION"));
const NAME_TAKEN_MARKER: &str = "name already exists";

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostedRepo {
    pub name: String,
    pub clone_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(HostedRepo),
    NameTaken,
}

pub trait HostingService {
    /// `GET /repos/{owner}/{repo}`: false on 404.
    fn repo_exists(&self, slug: &RepoSlug) -> Result<bool>;

    /// `GET /user/repos`
    fn list_repos(&self) -> Result<Vec<HostedRepo>>;

    /// `POST /user/repos`. A 422 "name already exists" is reported as
    /// [`CreateOutcome::NameTaken`], any other failure as an error.
    fn create_repo(&self, name: &str, private: bool) -> Result<CreateOutcome>;

    /// The slug behind a remote URL, or `None` if the URL is not on this service.
    fn parse_remote_url(&self, url: &str) -> Option<RepoSlug>;
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    private: bool,
}

/// GitHub's validation failure body, e.g.
/// `{"message": "Repository creation failed.", "errors": [{"message": "name already exists on this account"}]}`
#[derive(Debug, Deserialize)]
struct ValidationFailure {
    #[serde(default)]
    errors: Vec<ValidationError>,
}

#[derive(Debug, Deserialize)]
struct ValidationError {
    message: Option<String>,
}

fn is_name_taken(body: &str) -> bool {
    match serde_json::from_str::<ValidationFailure>(body) {
        Ok(failure) => failure
            .errors
            .iter()
            .filter_map(|e| e.message.as_deref())
            .any(|m| m.contains(NAME_TAKEN_MARKER)),
        Err(_) => body.contains(NAME_TAKEN_MARKER),
    }
}

#[derive(Debug)]
pub struct GitHubClient {
    client: Client,
    api_url: String,
    web_host: String,
    username: String,
    token: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            web_host: "github.com".to_string(),
            username: config.hosting_username.clone(),
            token: config.hosting_token.clone(),
            retry: config.retry_policy(),
        })
    }

    fn get(&self, path: &str) -> Result<Response> {
        let url = format!("{}{}", self.api_url, path);
        self.retry.run("github get", || {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github+json")
                .send()?;
            if response.status().is_server_error() {
                return Err(api_error(response));
            }
            Ok(response)
        })
    }
}

fn api_error(response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    Error::RemoteApi { status, body }
}

impl HostingService for GitHubClient {
    fn repo_exists(&self, slug: &RepoSlug) -> Result<bool> {
        let response = self.get(&format!("/repos/{}/{}", slug.owner, slug.name))?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(api_error(response)),
        }
    }

    fn list_repos(&self) -> Result<Vec<HostedRepo>> {
        let mut repos = Vec::new();
        for page in 1.. {
            let response = self.get(&format!("/user/repos?per_page=100&page={page}"))?;
            if !response.status().is_success() {
                return Err(api_error(response));
            }
            let batch: Vec<HostedRepo> = response.json()?;
            let last = batch.len() < 100;
            repos.extend(batch);
            if last {
                break;
            }
        }
        debug!(user = %self.username, count = repos.len(), "listed hosted repositories");
        Ok(repos)
    }

    fn create_repo(&self, name: &str, private: bool) -> Result<CreateOutcome> {
        let url = format!("{}/user/repos", self.api_url);
        let response = self.retry.run("github create", || {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github+json")
                .json(&CreateRepoRequest { name, private })
                .send()?;
            if response.status().is_server_error() {
                return Err(api_error(response));
            }
            Ok(response)
        })?;

        match response.status() {
            StatusCode::CREATED => Ok(CreateOutcome::Created(response.json()?)),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().unwrap_or_default();
                if is_name_taken(&body) {
                    Ok(CreateOutcome::NameTaken)
                } else {
                    Err(Error::RemoteApi { status: 422, body })
                }
            }
            _ => Err(api_error(response)),
        }
    }

    fn parse_remote_url(&self, url: &str) -> Option<RepoSlug> {
        parse_github_url(&self.web_host, url)
    }
}

/// Accepts `https://host/owner/name(.git)`, `ssh://git@host/owner/name(.git)`
/// and `git@host:owner/name(.git)`.
fn parse_github_url(host: &str, url: &str) -> Option<RepoSlug> {
    let url = url.trim();
    let path = if let Some(rest) = url.strip_prefix(&format!("git@{host}:")) {
        rest
    } else {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .or_else(|| url.strip_prefix("ssh://"))?;
        // optional credentials in front of the host
        let rest = rest.rsplit_once('@').map(|(_, r)| r).unwrap_or(rest);
        rest.strip_prefix(host)?.strip_prefix('/')?
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, name) = path.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(RepoSlug::new(owner, name))
}
