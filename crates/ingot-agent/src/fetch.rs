use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use sha1::Digest;
use tokio::io::AsyncWriteExt;

use crate::error::{PluginError, PluginResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub bytes: u64,
    pub sha1: String,
}

/// Downloads one artifact to a local path.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> PluginResult<Downloaded>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> PluginResult<Downloaded> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PluginError::SourceUnavailable(format!("download {url}: {e}")))?;
        if let Some(err) =
            crate::source::status_error(resp.status(), resp.headers(), "download", url)
        {
            return Err(err);
        }
        if let Some(len) = resp.content_length()
            && len > self.max_bytes
        {
            return Err(PluginError::InvalidArchive(format!(
                "{url} is {len} bytes, above the {} byte limit",
                self.max_bytes
            )));
        }

        let mut f = tokio::fs::File::create(dest).await?;
        let mut hasher = sha1::Sha1::new();
        let mut total: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    drop(f);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(PluginError::SourceUnavailable(format!(
                        "download {url} interrupted: {e}"
                    )));
                }
            };
            total = total.saturating_add(chunk.len() as u64);
            if total > self.max_bytes {
                drop(f);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(PluginError::InvalidArchive(format!(
                    "{url} exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
            hasher.update(&chunk);
            f.write_all(&chunk).await?;
        }
        f.flush().await?;
        f.sync_all().await?;

        Ok(Downloaded {
            bytes: total,
            sha1: hex::encode(hasher.finalize()),
        })
    }
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(sha1::Sha1::digest(bytes))
}


#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// Answers a single HTTP request with a canned response.
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let _ = sock.write_all(&response).await;
            let _ = sock.shutdown().await;
        });
        format!("http://{addr}/plugin.jar")
    }

    fn http_fetcher(max_bytes: u64) -> HttpFetcher {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpFetcher::new(client, max_bytes)
    }

    fn chunked(chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n".to_vec();
        for chunk in chunks {
            out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
        out
    }

    #[tokio::test]
    async fn http_download_streams_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_once(chunked(&[b"ab".as_slice(), b"c".as_slice()])).await;
        let dest = dir.path().join("staging").join("plugin.jar.part");

        let got = http_fetcher(1024).fetch(&url, &dest).await.unwrap();
        assert_eq!(got.bytes, 3);
        assert_eq!(got.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn oversized_stream_is_cut_off_and_partial_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_once(chunked(&[[7u8; 64].as_slice(), [7u8; 64].as_slice()])).await;
        let dest = dir.path().join("plugin.jar.part");

        let err = http_fetcher(100).fetch(&url, &dest).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidArchive(_)), "{err:?}");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn declared_length_over_limit_is_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut response =
            b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\nConnection: close\r\n\r\n".to_vec();
        response.extend_from_slice(&[1u8; 500]);
        let url = serve_once(response).await;
        let dest = dir.path().join("plugin.jar.part");

        let err = http_fetcher(100).fetch(&url, &dest).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidArchive(_)), "{err:?}");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn http_error_status_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;
        let dest = dir.path().join("plugin.jar.part");

        let err = http_fetcher(100).fetch(&url, &dest).await.unwrap_err();
        assert!(matches!(err, PluginError::NoCompatibleArtifact(_)), "{err:?}");
        assert!(!dest.exists());
    }

    #[test]
    fn sha1_matches_known_digest() {
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[tokio::test]
    async fn static_fetcher_writes_body() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = testing::StaticFetcher::default();
        fetcher.serve("https://example.com/a.jar", b"abc".to_vec());
        let dest = dir.path().join("staging").join("a.jar");
        let got = fetcher.fetch("https://example.com/a.jar", &dest).await.unwrap();
        assert_eq!(got.bytes, 3);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
        assert!(fetcher.fetch("https://example.com/missing.jar", &dest).await.is_err());
    }
}
