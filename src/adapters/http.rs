//! HTTP content fetcher.
//!
//! Endpoints are URL templates: `{id}` is replaced with the document or
//! resource id and `{type}` with the resource type.
//!
//! Document endpoint body:
//! ```json
//! { "id": 1, "name": "Al-Fatihah", "translated_name": "The Opener",
//!   "unit_count": 7, "classification": "meccan",
//!   "units": [{ "number": 1, "text": "...", "translation": "..." }] }
//! ```
//! The list endpoint returns an array of the same objects without `units`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ContentFetcher, ProgressFn};
use crate::domain::{
    Classification, Document, DocumentId, DocumentMeta, Provenance, ResourceDescriptor, Unit,
};
use crate::error::{Error, Result};

/// Endpoint templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFetcherConfig {
    pub document_url: String,
    pub document_list_url: String,
    pub resource_url: String,
}

#[derive(Debug, Deserialize)]
struct WireMeta {
    id: DocumentId,
    name: String,
    #[serde(default)]
    translated_name: String,
    unit_count: u16,
    #[serde(default)]
    classification: Classification,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    #[serde(flatten)]
    meta: WireMeta,
    units: Vec<WireUnit>,
}

#[derive(Debug, Deserialize)]
struct WireUnit {
    number: u16,
    text: String,
    #[serde(default)]
    translation: Option<String>,
    #[serde(default)]
    transliteration: Option<String>,
    #[serde(default)]
    audio_ref: Option<String>,
}

impl From<WireMeta> for DocumentMeta {
    fn from(wire: WireMeta) -> Self {
        DocumentMeta {
            id: wire.id,
            name: wire.name,
            translated_name: wire.translated_name,
            unit_count: wire.unit_count,
            classification: wire.classification,
            provenance: Provenance::Network,
        }
    }
}

/// Parse a document endpoint body
pub fn parse_document(id: DocumentId, body: &[u8]) -> Result<Document> {
    let wire: WireDocument = serde_json::from_slice(body)
        .map_err(|e| Error::Parse(format!("document {}: {}", id, e)))?;

    if wire.meta.id != id {
        return Err(Error::Parse(format!(
            "requested document {} but received {}",
            id, wire.meta.id
        )));
    }

    let units = wire
        .units
        .into_iter()
        .map(|u| Unit {
            number: u.number,
            text: u.text,
            translation: u.translation,
            transliteration: u.transliteration,
            audio_ref: u.audio_ref,
            provenance: Provenance::Network,
        })
        .collect();

    let document = Document::from_meta(wire.meta.into(), units);
    document.validate()?;
    Ok(document)
}

/// Parse a list endpoint body
pub fn parse_document_list(body: &[u8]) -> Result<Vec<DocumentMeta>> {
    let wire: Vec<WireMeta> = serde_json::from_slice(body)
        .map_err(|e| Error::Parse(format!("document list: {}", e)))?;
    Ok(wire.into_iter().map(DocumentMeta::from).collect())
}

/// Fetcher backed by plain HTTP GET requests
pub struct HttpFetcher {
    config: HttpFetcherConfig,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn document_url(&self, id: DocumentId) -> String {
        self.config.document_url.replace("{id}", &id.to_string())
    }

    fn resource_url(&self, descriptor: &ResourceDescriptor) -> String {
        self.config
            .resource_url
            .replace("{type}", &descriptor.resource_type.to_string())
            .replace("{id}", descriptor.id.as_str())
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        debug!(%url, "GET");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(Error::Connectivity(format!("{}: HTTP {}", url, status)));
        }

        Ok(response)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Connectivity(format!("{}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_document(&self, id: DocumentId) -> Result<Document> {
        let body = self.get_bytes(&self.document_url(id)).await?;
        parse_document(id, &body)
    }

    async fn fetch_document_list(&self) -> Result<Vec<DocumentMeta>> {
        let body = self.get_bytes(&self.config.document_list_url).await?;
        parse_document_list(&body)
    }

    async fn fetch_resource(
        &self,
        descriptor: &ResourceDescriptor,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<u8>> {
        let url = self.resource_url(descriptor);
        let mut response = self.get(&url).await?;

        let total = response.content_length().or(descriptor.size_bytes);
        let mut bytes = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        progress(0, total);

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Connectivity(format!("{}: {}", url, e)))?
        {
            bytes.extend_from_slice(&chunk);
            progress(bytes.len() as u64, total);
        }

        Ok(bytes)
    }
}
