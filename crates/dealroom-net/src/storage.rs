//! Signed-URL issuance and object download.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, warn};

use dealroom_shared::constants::{
    BUCKET_AVATARS, BUCKET_CONTRACT_DOCUMENTS, BUCKET_MESSAGE_IMAGES, BUCKET_POST_IMAGES,
    BUCKET_PROFILE_ICONS, SIGNED_URL_BATCH_SIZE,
};
use dealroom_shared::{ApiEnvelope, SignedUrls, SignedUrlsRequest, TransportError};

use crate::http::{error_from_response, map_reqwest_error};
use crate::ports::{ObjectStore, TransportResult};

const PREFIXED_BUCKETS: [&str; 5] = [
    BUCKET_MESSAGE_IMAGES,
    BUCKET_CONTRACT_DOCUMENTS,
    BUCKET_PROFILE_ICONS,
    BUCKET_AVATARS,
    BUCKET_POST_IMAGES,
];

/// Split a storage path into `(bucket, key)`. Paths without a known bucket
/// prefix live in the post-images bucket as-is.
pub fn locate_object(path: &str) -> (&'static str, &str) {
    for bucket in PREFIXED_BUCKETS {
        if let Some(key) = path
            .strip_prefix(bucket)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            return (bucket, key);
        }
    }
    (BUCKET_POST_IMAGES, path)
}

fn is_absolute_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

pub struct HttpObjectStore {
    http: Client,
    base_url: String,
    expires_in: u64,
}

impl HttpObjectStore {
    pub fn new(http: Client, base_url: impl Into<String>, expires_in: u64) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            expires_in,
        }
    }

    /// Sign one batch. `keys` pairs each bucket key with the path the
    /// caller asked for. Any failure yields an empty map.
    async fn sign_batch(&self, bucket: &str, keys: Vec<(String, String)>) -> HashMap<String, String> {
        let request = SignedUrlsRequest {
            bucket: bucket.to_string(),
            paths: keys.iter().map(|(key, _)| key.clone()).collect(),
            expires_in: self.expires_in,
        };

        let response = match self
            .http
            .post(format!("{}/api/storage/signed-urls", self.base_url))
            .json(&request)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(bucket, status = %response.status(), "Signed URL batch rejected");
                return HashMap::new();
            }
            Err(e) => {
                warn!(bucket, error = %e, "Signed URL batch failed");
                return HashMap::new();
            }
        };

        let signed = match response.json::<ApiEnvelope<SignedUrls>>().await {
            Ok(envelope) => envelope.data.unwrap_or_default(),
            Err(e) => {
                warn!(bucket, error = %e, "Signed URL batch undecodable");
                return HashMap::new();
            }
        };

        keys.into_iter()
            .filter_map(|(key, original)| signed.urls.get(&key).map(|url| (original, url.clone())))
            .collect()
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn signed_urls(&self, paths: &[String]) -> HashMap<String, String> {
        let mut urls = HashMap::new();
        let mut groups: BTreeMap<&'static str, Vec<(String, String)>> = BTreeMap::new();

        for path in paths {
            if is_absolute_url(path) {
                urls.insert(path.clone(), path.clone());
                continue;
            }
            let (bucket, key) = locate_object(path);
            let group = groups.entry(bucket).or_default();
            if !group.iter().any(|(_, original)| original == path) {
                group.push((key.to_string(), path.clone()));
            }
        }

        let batches: Vec<(&'static str, Vec<(String, String)>)> = groups
            .into_iter()
            .flat_map(|(bucket, keys)| {
                keys.chunks(SIGNED_URL_BATCH_SIZE)
                    .map(|chunk| (bucket, chunk.to_vec()))
                    .collect::<Vec<_>>()
            })
            .collect();

        debug!(paths = paths.len(), batches = batches.len(), "Requesting signed URLs");

        let results = join_all(
            batches
                .into_iter()
                .map(|(bucket, keys)| self.sign_batch(bucket, keys)),
        )
        .await;

        for batch in results {
            urls.extend(batch);
        }
        urls
    }

    async fn fetch(&self, url: &str) -> TransportResult<Bytes> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let busted = format!(
            "{url}{separator}t={}",
            chrono::Utc::now().timestamp_millis()
        );

        let response = self
            .http
            .get(&busted)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if bytes.is_empty() {
            return Err(TransportError::Decode(format!("empty object at {url}")));
        }
        Ok(bytes)
    }
}
