//! Remote repositories over plain HTTP.
//!
//! Every repository file maps to a URL under the base: `GET` reads it (404
//! means absent), `PUT` writes it and `DELETE` removes it. Write-once change
//! records are sent with `If-None-Match: *`; a 412 reply means another writer
//! stored that index first.

use super::{
    validate_artifact_path, ChangeRecord, PathFilter, RepositoryPublisher, TransmitRecord,
    CHANGES_DIR, CURSOR_INDEX, FIRST_INDEX, TRANSMIT_FILE,
};
use crate::error::{Error, Result};
use crate::version::VERSION;
use reqwest::blocking::Client;
use reqwest::header::IF_NONE_MATCH;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A repository served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    base: Url,
    client: Client,
}

impl HttpPublisher {
    /// Connect to the repository at `location` with a default client.
    pub fn new(location: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("kpm/{VERSION}"))
            .build()
            .map_err(|e| Error::RemoteUnreachable {
                url: location.to_string(),
                source: e,
            })?;
        Self::with_client(location, client)
    }

    /// Connect using a caller-configured client.
    pub fn with_client(location: &str, client: Client) -> Result<Self> {
        let invalid = |message: &str| Error::RemoteUrlInvalid {
            url: location.to_string(),
            message: message.to_string(),
        };

        let mut base = Url::parse(location.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("expected an http or https URL"));
        }
        if base.cannot_be_a_base() {
            return Err(invalid("URL cannot hold paths"));
        }
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base, client })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL of a `/`-separated path under the base.
    fn url_for(&self, path: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::RemoteUrlInvalid {
                url: self.base.to_string(),
                message: "URL cannot hold paths".to_string(),
            })?
            .pop_if_empty()
            .extend(path.split('/'));
        Ok(url)
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let url = self.url_for(path)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| transport_error(&url, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().map_err(|e| transport_error(&url, e))?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(Error::RemoteStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// `PUT` a file. With `create_only`, returns false if it already existed.
    fn put(&self, path: &str, bytes: &[u8], create_only: bool) -> Result<bool> {
        let url = self.url_for(path)?;
        let mut request = self.client.put(url.clone()).body(bytes.to_vec());
        if create_only {
            request = request.header(IF_NONE_MATCH, "*");
        }
        let response = request.send().map_err(|e| transport_error(&url, e))?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED if create_only => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Error::RemoteStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    fn delete(&self, path: &str) -> Result<()> {
        let url = self.url_for(path)?;
        let response = self
            .client
            .delete(url.clone())
            .send()
            .map_err(|e| transport_error(&url, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(Error::RemoteStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(bytes) = self.get(path)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::RecordInvalid {
                location: self
                    .url_for(path)
                    .map_or_else(|_| path.to_string(), String::from),
                source: e,
            })
    }
}

fn transport_error(url: &Url, source: reqwest::Error) -> Error {
    Error::RemoteUnreachable {
        url: url.to_string(),
        source,
    }
}

fn change_record_path(index: u32) -> String {
    format!("{CHANGES_DIR}/{index}.json")
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| Error::other(format!("serialize: {e}")))
}

impl RepositoryPublisher for HttpPublisher {
    fn id(&self) -> String {
        self.base.as_str().trim_end_matches('/').to_string()
    }

    /// Remote stores cannot be listed; the artifact set is whatever the
    /// change log says is present.
    fn enumerate_artifacts(
        &self,
        folder_filter: PathFilter<'_>,
        file_filter: PathFilter<'_>,
    ) -> Result<Vec<String>> {
        let Some(merged) = self.merge_change_records_from(FIRST_INDEX)? else {
            return Ok(Vec::new());
        };

        Ok(merged
            .add
            .into_iter()
            .filter(|path| !path.split('/').any(|s| s.starts_with('$')))
            .filter(|path| {
                let segments: Vec<&str> = path.split('/').collect();
                (1..segments.len()).all(|n| folder_filter(&segments[..n].join("/")))
            })
            .filter(|path| file_filter(path))
            .collect())
    }

    fn get_change_record(&self, index: u32) -> Result<Option<ChangeRecord>> {
        self.get_json(&change_record_path(index))
    }

    fn store_change_record(&self, index: u32, record: &ChangeRecord) -> Result<()> {
        let path = change_record_path(index);
        let bytes = to_json(record)?;

        if index == CURSOR_INDEX {
            self.put(&path, &bytes, false)?;
            return Ok(());
        }

        if self.put(&path, &bytes, true)? {
            debug!(repository = %self.id(), index, "Stored change record");
            Ok(())
        } else {
            Err(Error::RecordExists {
                location: self.id(),
                index,
            })
        }
    }

    fn get_transmit_record(&self) -> Result<Option<TransmitRecord>> {
        self.get_json(TRANSMIT_FILE)
    }

    fn store_transmit_record(&self, record: &TransmitRecord) -> Result<()> {
        self.put(TRANSMIT_FILE, &to_json(record)?, false)?;
        Ok(())
    }

    fn read_artifact(&self, path: &str) -> Result<Vec<u8>> {
        validate_artifact_path(path)?;
        self.get(path)?.ok_or_else(|| Error::ArtifactMissing {
            location: self.id(),
            artifact: path.to_string(),
        })
    }

    fn write_artifact(&self, path: &str, bytes: &[u8]) -> Result<()> {
        validate_artifact_path(path)?;
        self.put(path, bytes, false)?;
        Ok(())
    }

    fn remove_artifact(&self, path: &str) -> Result<()> {
        validate_artifact_path(path)?;
        self.delete(path)
    }
}
