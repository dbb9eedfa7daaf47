use crate::error::{AutomationError, AutomationResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::io::ReaderStream;

const UPLOAD_CHUNK_SIZE: usize = 4096 * 16;

/// A remote (or mirrored) destination for backup archives.
#[async_trait]
pub trait CloudUploader: Send + Sync {
    fn name(&self) -> &str;

    /// Upload `archive` as `object_name`, returning where it ended up.
    async fn upload(&self, archive: &Path, object_name: &str) -> AutomationResult<String>;
}

/// PUTs the archive to `<base_url>/<folder>/<object_name>` with a bearer token.
pub struct HttpPutUploader {
    client: reqwest::Client,
    base_url: String,
    folder: Option<String>,
    token: String,
}

impl HttpPutUploader {
    pub fn new(base_url: &str, token: &str, folder: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            folder: folder.map(|f| f.trim_matches('/').to_string()),
            token: token.to_string(),
        }
    }

    fn object_url(&self, object_name: &str) -> String {
        match &self.folder {
            Some(folder) if !folder.is_empty() => format!(
                "{}/{}/{}",
                self.base_url,
                urlencoding::encode(folder),
                urlencoding::encode(object_name)
            ),
            _ => format!("{}/{}", self.base_url, urlencoding::encode(object_name)),
        }
    }
}

#[async_trait]
impl CloudUploader for HttpPutUploader {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(&self, archive: &Path, object_name: &str) -> AutomationResult<String> {
        let file = tokio::fs::File::open(archive).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE));
        let url = self.object_url(object_name);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| AutomationError::external("backup upload", e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AutomationError::ExternalIo(format!(
                "backup upload to {} returned {}: {}",
                url, status, text
            )));
        }
        Ok(url)
    }
}

/// Copies the archive into a mounted or synced folder.
pub struct DirectoryMirrorUploader {
    dir: PathBuf,
}

impl DirectoryMirrorUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CloudUploader for DirectoryMirrorUploader {
    fn name(&self) -> &str {
        "mirror"
    }

    async fn upload(&self, archive: &Path, object_name: &str) -> AutomationResult<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(object_name);
        tokio::fs::copy(archive, &target).await?;
        Ok(target.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one request and returns its head and body.
    async fn accept_one_put(listener: TcpListener) -> (String, Vec<u8>) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 8192];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            received.extend_from_slice(&chunk[..n]);
            if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&received[..head_end]).to_lowercase();
        let length: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap();
        let mut body = received[head_end..].to_vec();
        while body.len() < length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body");
            body.extend_from_slice(&chunk[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        (head, body)
    }

    #[test]
    fn test_object_url() {
        let uploader = HttpPutUploader::new("https://store.example.com/", "t", Some("/nightly/".into()));
        assert_eq!(
            uploader.object_url("backup 1.zip"),
            "https://store.example.com/nightly/backup%201.zip"
        );
        let flat = HttpPutUploader::new("https://store.example.com", "t", None);
        assert_eq!(flat.object_url("b.zip"), "https://store.example.com/b.zip");
    }

    #[tokio::test]
    async fn test_http_put_streams_whole_archive() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("backup-1.zip");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&archive, &payload).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_one_put(listener));

        let mut uploader =
            HttpPutUploader::new(&format!("http://{}", addr), "secret", Some("nightly".into()));
        uploader.client = reqwest::Client::builder().no_proxy().build().unwrap();
        let location = uploader.upload(&archive, "backup-1.zip").await.unwrap();
        assert_eq!(location, format!("http://{}/nightly/backup-1.zip", addr));

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("put /nightly/backup-1.zip"));
        assert!(head.contains("authorization: bearer secret"));
        assert!(head.contains(&format!("content-length: {}", payload.len())));
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn test_directory_mirror_copies_archive() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        std::fs::write(&archive, b"zipdata").unwrap();
        let mirror = DirectoryMirrorUploader::new(temp_dir.path().join("mirror"));

        let location = mirror.upload(&archive, "a.zip").await.unwrap();
        assert!(location.ends_with("a.zip"));
        assert_eq!(
            std::fs::read(temp_dir.path().join("mirror").join("a.zip")).unwrap(),
            b"zipdata"
        );
    }
}
