use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::sink::{
    parse_blob_key, truncate_body, Delivery, ReadingSink, SinkError, LATEST_KEY,
};

/// Key/value blob storage. Writes overwrite any existing blob under the key.
pub trait ObjectStore: Send + Sync {
    fn put<'a>(&'a self, key: &'a str, payload: &'a [u8]) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Read a blob, `None` when the key does not exist.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, SinkError>>;

    /// Stored readings, newest first, latest alias on top. Unrelated names are
    /// skipped.
    fn list(&self) -> BoxFuture<'_, Result<Vec<BlobMetadata>, SinkError>>;

    /// Human-readable location used in logs.
    fn describe(&self) -> String;

    /// The newest reading: the latest alias when present, otherwise the
    /// timestamped blob with the highest upload time.
    fn latest(&self) -> BoxFuture<'_, Result<Option<(String, Vec<u8>)>, SinkError>> {
        Box::pin(async move {
            if let Some(data) = self.get(LATEST_KEY).await? {
                return Ok(Some((LATEST_KEY.to_string(), data)));
            }

            debug!(store = %self.describe(), "Latest alias missing, scanning blobs");
            for blob in self.list().await? {
                if blob.uploaded_at.is_none() {
                    continue;
                }
                let found = self.get(&blob.key).await;
                match found {
                    Ok(Some(data)) => return Ok(Some((blob.key, data))),
                    Ok(None) => {
                        warn!(key = %blob.key, "Blob vanished after listing, trying next");
                    }
                    Err(e) => {
                        warn!(key = %blob.key, error = %e, "Unreadable blob, trying next");
                    }
                }
            }
            Ok(None)
        })
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn put<'a>(&'a self, key: &'a str, payload: &'a [u8]) -> BoxFuture<'a, Result<(), SinkError>> {
        (**self).put(key, payload)
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, SinkError>> {
        (**self).get(key)
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<BlobMetadata>, SinkError>> {
        (**self).list()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn latest(&self) -> BoxFuture<'_, Result<Option<(String, Vec<u8>)>, SinkError>> {
        (**self).latest()
    }
}

fn validate_key(key: &str) -> Result<(), SinkError> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains('/')
        || key.contains('\\')
        || key.contains("..")
    {
        return Err(SinkError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Metadata about a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub key: String,
    /// Upload time parsed from the key, `None` for the latest alias.
    pub uploaded_at: Option<u64>,
    pub size: u64,
}

impl BlobMetadata {
    /// Metadata for a reading blob, `None` for names that are neither a
    /// timestamped reading nor the latest alias.
    fn for_reading(key: String, size: u64) -> Option<Self> {
        let uploaded_at = parse_blob_key(&key);
        if uploaded_at.is_none() && key != LATEST_KEY {
            return None;
        }
        Some(BlobMetadata {
            key,
            uploaded_at,
            size,
        })
    }
}

fn sort_newest_first(blobs: &mut [BlobMetadata]) {
    blobs.sort_by(|a, b| match (a.uploaded_at, b.uploaded_at) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.key.cmp(&a.key)),
    });
}

/// Run filesystem work off the async worker threads.
async fn blocking<T, F>(work: F) -> Result<T, SinkError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SinkError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SinkError::Io(io::Error::other(e)))?
}

/// Object store backed by a directory: blobs live at `{root}/{container}/{key}`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    container_dir: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: &Path, container: &str) -> Self {
        LocalObjectStore {
            container_dir: root.join(container),
        }
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    /// Write a blob atomically.
    ///
    /// Writes to a temporary file first, then renames to the final path, so a
    /// reader never sees a partially written reading.
    pub fn put_blob(&self, key: &str, payload: &[u8]) -> Result<PathBuf, SinkError> {
        validate_key(key)?;
        fs::create_dir_all(&self.container_dir)?;

        let target = self.container_dir.join(key);
        let tmp = self.container_dir.join(format!(".{}.tmp", key));

        if let Err(e) = fs::write(&tmp, payload) {
            let _ = fs::remove_file(&tmp);
            return Err(SinkError::Io(e));
        }
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(SinkError::Io(e));
        }

        Ok(target)
    }

    /// Read a blob, `None` when the key does not exist.
    pub fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, SinkError> {
        validate_key(key)?;
        match fs::read(self.container_dir.join(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SinkError::Io(e)),
        }
    }

    /// List stored readings, newest first. The latest alias sorts before all
    /// timestamped blobs; temp files and unrelated names are skipped.
    pub fn list_blobs(&self) -> Result<Vec<BlobMetadata>, SinkError> {
        if !self.container_dir.exists() {
            return Ok(Vec::new());
        }

        let mut blobs = Vec::new();
        for entry in fs::read_dir(&self.container_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let key = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            if key.starts_with('.') {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            blobs.extend(BlobMetadata::for_reading(key, size));
        }

        sort_newest_first(&mut blobs);
        Ok(blobs)
    }
}

impl ObjectStore for LocalObjectStore {
    fn put<'a>(&'a self, key: &'a str, payload: &'a [u8]) -> BoxFuture<'a, Result<(), SinkError>> {
        let store = self.clone();
        let key = key.to_string();
        let payload = payload.to_vec();
        Box::pin(blocking(move || store.put_blob(&key, &payload).map(|_| ())))
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, SinkError>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(blocking(move || store.get_blob(&key)))
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<BlobMetadata>, SinkError>> {
        let store = self.clone();
        Box::pin(blocking(move || store.list_blobs()))
    }

    fn describe(&self) -> String {
        self.container_dir.display().to_string()
    }
}

/// Object store reached over HTTP with block-blob semantics:
/// `PUT`/`GET {account_url}/{container}/{key}[?{sas_token}]`, listing through
/// `GET {account_url}/{container}?restype=container&comp=list`.
pub struct HttpObjectStore {
    client: Client,
    account_url: String,
    container: String,
    sas_token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(
        account_url: &str,
        container: &str,
        sas_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpObjectStore {
            client,
            account_url: account_url.trim_end_matches('/').to_string(),
            container: container.to_string(),
            sas_token: sas_token
                .map(|t| t.trim_start_matches('?').to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    pub fn blob_url(&self, key: &str) -> String {
        let base = format!("{}/{}/{}", self.account_url, self.container, key);
        match &self.sas_token {
            Some(sas) => format!("{}?{}", base, sas),
            None => base,
        }
    }

    pub fn list_url(&self) -> String {
        let base = format!(
            "{}/{}?restype=container&comp=list",
            self.account_url, self.container
        );
        match &self.sas_token {
            Some(sas) => format!("{}&{}", base, sas),
            None => base,
        }
    }

    async fn put_blob(&self, key: &str, payload: &[u8]) -> Result<(), SinkError> {
        validate_key(key)?;
        let response = self
            .client
            .put(self.blob_url(key))
            .header("x-ms-blob-type", "BlockBlob")
            .header("content-type", "application/json")
            .body(payload.to_vec())
            .send()
            .await?;

        check_status(response).await?;
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, SinkError> {
        validate_key(key)?;
        let response = self.client.get(self.blob_url(key)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn list_blobs(&self) -> Result<Vec<BlobMetadata>, SinkError> {
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut request = self.client.get(self.list_url());
            if let Some(m) = &marker {
                request = request.query(&[("marker", m.as_str())]);
            }
            let response = check_status(request.send().await?).await?;
            let page = parse_listing(&response.text().await?);

            for (key, size) in page.blobs {
                blobs.extend(BlobMetadata::for_reading(key, size));
            }
            match page.next_marker {
                Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
                _ => break,
            }
        }

        sort_newest_first(&mut blobs);
        Ok(blobs)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SinkError::Status {
            status: status.as_u16(),
            body: truncate_body(response.text().await.unwrap_or_default()),
        });
    }
    Ok(response)
}

/// One page of a container listing.
#[derive(Debug, Default, PartialEq)]
struct ListingPage {
    blobs: Vec<(String, u64)>,
    next_marker: Option<String>,
}

/// Text between `<tag>` and `</tag>`, first occurrence only.
fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(&xml[start..end])
}

/// Pull blob names and sizes out of an `EnumerationResults` document.
/// Only the elements this store reads are looked at.
fn parse_listing(xml: &str) -> ListingPage {
    let mut page = ListingPage::default();
    let mut rest = xml;

    while let Some(start) = rest.find("<Blob>") {
        let entry = &rest[start + "<Blob>".len()..];
        let end = entry.find("</Blob>").unwrap_or(entry.len());
        if let Some(name) = element_text(&entry[..end], "Name") {
            let size = element_text(&entry[..end], "Content-Length")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);
            page.blobs.push((name.trim().to_string(), size));
        }
        rest = &entry[end..];
    }

    page.next_marker = element_text(xml, "NextMarker")
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    page
}

impl ObjectStore for HttpObjectStore {
    fn put<'a>(&'a self, key: &'a str, payload: &'a [u8]) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(self.put_blob(key, payload))
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, SinkError>> {
        Box::pin(self.get_blob(key))
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<BlobMetadata>, SinkError>> {
        Box::pin(self.list_blobs())
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.account_url, self.container)
    }
}

/// Uploads each reading under its timestamped key and, optionally, refreshes
/// the latest alias.
pub struct ObjectStoreSink<S: ObjectStore> {
    store: S,
    write_latest: bool,
}

impl<S: ObjectStore> ObjectStoreSink<S> {
    pub fn new(store: S, write_latest: bool) -> Self {
        ObjectStoreSink {
            store,
            write_latest,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ObjectStore> ReadingSink for ObjectStoreSink<S> {
    fn name(&self) -> &str {
        "object-store"
    }

    fn deliver<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            self.store.put(&delivery.key, &delivery.payload).await?;
            if self.write_latest {
                self.store.put(LATEST_KEY, &delivery.payload).await?;
            }
            debug!(
                store = %self.store.describe(),
                key = %delivery.key,
                status = %delivery.reading.status,
                bytes = delivery.payload.len(),
                "Reading stored"
            );
            Ok(())
        })
    }
}
