use crate::error::{ErrorKind, Result};
use crate::tool::ToolDistribution;
use async_trait::async_trait;
use exn::ResultExt;
use sha2::{Digest as _, Sha256};
use std::io::Read;

/// Fetches the bytes behind a URL.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Downloads `http(s)://` URLs with a blocking client on the blocking pool,
/// and reads `file://` URLs from disk.
#[derive(Clone, Debug, Default)]
pub struct UrlDownloader;

#[async_trait]
impl Downloader for UrlDownloader {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read(path).await.or_raise(|| ErrorKind::Download(url.to_string()));
        }
        let owned = url.to_string();
        let bytes = tokio::task::spawn_blocking(move || -> std::result::Result<Vec<u8>, std::io::Error> {
            let response = ureq::get(&owned).call().map_err(std::io::Error::other)?;
            let mut buf = Vec::new();
            response.into_body().into_reader().read_to_end(&mut buf)?;
            Ok(buf)
        })
        .await
        .or_raise(|| ErrorKind::Download(url.to_string()))?
        .or_raise(|| ErrorKind::Download(url.to_string()))?;
        tracing::debug!(url, bytes = bytes.len(), "Downloaded");
        Ok(bytes)
    }
}

/// Checks downloaded bytes against the pinned size, then the SHA-256.
pub fn verify(dist: &ToolDistribution, bytes: &[u8]) -> Result<()> {
    if bytes.len() as u64 != dist.size {
        exn::bail!(ErrorKind::ChecksumMismatch {
            url: dist.url.clone(),
            expected: format!("{} bytes", dist.size),
            actual: format!("{} bytes", bytes.len()),
        });
    }
    let actual = hex::encode(Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(dist.sha256.trim()) {
        exn::bail!(ErrorKind::ChecksumMismatch { url: dist.url.clone(), expected: dist.sha256.clone(), actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist_for(bytes: &[u8]) -> ToolDistribution {
        ToolDistribution {
            url: "file:///tool.run".to_string(),
            sha256: hex::encode(Sha256::digest(bytes)),
            size: bytes.len() as u64,
            file_name: "tool.run".to_string(),
        }
    }

    #[test]
    fn verify_accepts_matching_bytes() {
        let dist = dist_for(b"#!/bin/sh\n");
        assert!(verify(&dist, b"#!/bin/sh\n").is_ok());
        let upper = ToolDistribution { sha256: dist.sha256.to_uppercase(), ..dist };
        assert!(verify(&upper, b"#!/bin/sh\n").is_ok());
    }

    #[test]
    fn verify_rejects_wrong_size_first() {
        let err = verify(&dist_for(b"12345"), b"1234").unwrap_err();
        assert!(matches!(&*err, ErrorKind::ChecksumMismatch { expected, .. } if expected == "5 bytes"));
    }

    #[test]
    fn verify_rejects_same_size_different_content() {
        let dist = dist_for(b"good");
        let err = verify(&dist, b"evil").unwrap_err();
        match &*err {
            ErrorKind::ChecksumMismatch { expected, actual, .. } => {
                assert_eq!(expected, &dist.sha256);
                assert_eq!(actual, &hex::encode(Sha256::digest(b"evil")));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fetches_file_urls() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tool.run");
        std::fs::write(&path, b"payload").unwrap();
        let bytes = UrlDownloader.fetch(&format!("file://{}", path.display())).await.unwrap();
        assert_eq!(bytes, b"payload");
        let err = UrlDownloader.fetch("file:///definitely/not/here.run").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Download(_)));
    }
}
