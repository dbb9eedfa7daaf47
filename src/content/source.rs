use crate::error::{AutomationError, AutomationResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = "platform-automation";

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRevision {
    pub commit: String,
    pub committed_at: Option<DateTime<Utc>>,
}

/// A file under the content root. `path` is relative to that root.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub path: String,
    pub sha: String,
    pub size: u64,
}

/// Source-controlled content the mirror follows.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn latest_revision(&self) -> AutomationResult<RemoteRevision>;

    async fn list_files(&self) -> AutomationResult<Vec<RemoteFile>>;

    async fn fetch_file(&self, path: &str) -> AutomationResult<Vec<u8>>;
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    committer: Option<CommitSignature>,
}

#[derive(Deserialize)]
struct CommitSignature {
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct ContentResponse {
    content: Option<String>,
    encoding: Option<String>,
}

/// GitHub REST API backed content source.
pub struct GithubContentSource {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    branch: String,
    root: String,
    token: Option<String>,
}

impl GithubContentSource {
    /// `repo` is `owner/name`; `root` is the directory inside the repo to mirror.
    pub fn new(repo: &str, branch: &str, root: &str, token: Option<String>) -> Self {
        Self::with_api_base(GITHUB_API, repo, branch, root, token)
    }

    pub fn with_api_base(
        api_base: &str,
        repo: &str,
        branch: &str,
        root: &str,
        token: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            root: root.trim_matches('/').to_string(),
            token,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> AutomationResult<T> {
        debug!("GET {}", url);
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = request
            .send()
            .await
            .map_err(|e| AutomationError::external("GitHub request", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AutomationError::ExternalIo(format!(
                "GitHub returned {} for {}: {}",
                status, url, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AutomationError::external("GitHub response", e))
    }

    fn relative_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.root.is_empty() {
            return Some(path);
        }
        path.strip_prefix(self.root.as_str())?.strip_prefix('/')
    }
}

#[async_trait]
impl ContentSource for GithubContentSource {
    async fn latest_revision(&self) -> AutomationResult<RemoteRevision> {
        let url = format!(
            "{}/repos/{}/commits/{}",
            self.api_base,
            self.repo,
            urlencoding::encode(&self.branch)
        );
        let commit: CommitResponse = self.get_json(&url).await?;
        Ok(RemoteRevision {
            commit: commit.sha,
            committed_at: commit.commit.committer.and_then(|c| c.date),
        })
    }

    async fn list_files(&self) -> AutomationResult<Vec<RemoteFile>> {
        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.api_base,
            self.repo,
            urlencoding::encode(&self.branch)
        );
        let tree: TreeResponse = self.get_json(&url).await?;
        if tree.truncated {
            return Err(AutomationError::ExternalIo(
                "GitHub tree listing was truncated".to_string(),
            ));
        }
        Ok(tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob")
            .filter_map(|e| {
                let path = self.relative_path(&e.path)?.to_string();
                Some(RemoteFile {
                    path,
                    sha: e.sha,
                    size: e.size,
                })
            })
            .collect())
    }

    async fn fetch_file(&self, path: &str) -> AutomationResult<Vec<u8>> {
        let full_path = if self.root.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.root, path)
        };
        let encoded: Vec<String> = full_path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.api_base,
            self.repo,
            encoded.join("/"),
            urlencoding::encode(&self.branch)
        );
        let content: ContentResponse = self.get_json(&url).await?;
        decode_content(content.content.as_deref(), content.encoding.as_deref())
    }
}

/// Decode a contents API payload (base64 with embedded newlines).
fn decode_content(content: Option<&str>, encoding: Option<&str>) -> AutomationResult<Vec<u8>> {
    let content = content.unwrap_or_default();
    match encoding.unwrap_or("base64") {
        "base64" => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| AutomationError::external("invalid base64 content", e))
        }
        "utf-8" | "" => Ok(content.as_bytes().to_vec()),
        other => Err(AutomationError::ExternalIo(format!(
            "unsupported content encoding '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_content() {
        let decoded = decode_content(Some("aGVs\nbG8=\n"), Some("base64")).unwrap();
        assert_eq!(decoded, b"hello");
        assert_eq!(decode_content(Some("plain"), Some("utf-8")).unwrap(), b"plain");
        assert!(decode_content(Some("x"), Some("rot13")).is_err());
    }

    #[test]
    fn test_relative_path() {
        let source = GithubContentSource::new("acme/lessons", "main", "/content/", None);
        assert_eq!(source.relative_path("content/rust/intro.md"), Some("rust/intro.md"));
        assert_eq!(source.relative_path("README.md"), None);
        assert_eq!(source.relative_path("contentious.md"), None);

        let whole = GithubContentSource::new("acme/lessons", "main", "", None);
        assert_eq!(whole.relative_path("README.md"), Some("README.md"));
    }
}
