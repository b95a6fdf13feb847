use crate::download::Downloader;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory downloader, for other crates' tests.
///
/// Serves a fixed set of URLs and counts every fetch, so tests can assert
/// whether a download happened at all.
pub struct MockDownloader {
    responses: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
}
impl MockDownloader {
    pub fn with_urls(urls: impl IntoIterator<Item = (impl Into<String>, Vec<u8>)>) -> Self {
        let responses = urls.into_iter().map(|(url, bytes)| (url.into(), bytes)).collect();
        Self { responses, fetches: AtomicUsize::new(0) }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.responses.get(url) {
            Some(bytes) => Ok(bytes.clone()),
            None => exn::bail!(ErrorKind::Download(url.to_string())),
        }
    }
}
