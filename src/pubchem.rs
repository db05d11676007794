use std::io::{ErrorKind, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tracing::debug;

use crate::domain::{Cid, RecordFormat};
use crate::error::HarvestError;
use crate::transport::{HttpTransport, RetryingTransport};

const CHUNK_SIZE: usize = 8 * 1024;

/// Resolver and Fetcher stages of the pipeline.
pub trait CompoundClient: Send + Sync {
    /// Maps a compound name to the first CID PubChem lists for it.
    fn resolve(&self, name: &str) -> Result<Cid, HarvestError>;

    /// Downloads the record for `cid` into `destination/{cid}.{format}` and
    /// returns the number of bytes written.
    fn fetch_record(
        &self,
        cid: &Cid,
        format: RecordFormat,
        destination: &Utf8Path,
    ) -> Result<u64, HarvestError>;
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(rename = "IdentifierList")]
    identifier_list: Option<IdentifierList>,
}

#[derive(Debug, Deserialize)]
struct IdentifierList {
    #[serde(rename = "CID", default)]
    cids: Vec<u64>,
}

pub struct PubChemClient<T> {
    transport: RetryingTransport<T>,
    base_url: String,
}

impl<T: HttpTransport> PubChemClient<T> {
    pub fn new(transport: RetryingTransport<T>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            transport,
            base_url,
        }
    }

    pub fn transport(&self) -> &RetryingTransport<T> {
        &self.transport
    }

    pub fn lookup_url(&self, name: &str) -> String {
        format!(
            "{}/compound/name/{}/cids/JSON?name_type=word",
            self.base_url,
            urlencoding::encode(name)
        )
    }

    pub fn record_url(&self, cid: &Cid, format: RecordFormat) -> String {
        format!(
            "{}/compound/CID/{}/record/{}/?record_type=3d",
            self.base_url,
            cid.as_str(),
            format.extension()
        )
    }
}

impl<T: HttpTransport> CompoundClient for PubChemClient<T> {
    fn resolve(&self, name: &str) -> Result<Cid, HarvestError> {
        let url = self.lookup_url(name);
        let response = match self.transport.execute(&url) {
            Ok(response) => response,
            // PUG REST answers unknown names with 404 PUGREST.NotFound.
            Err(HarvestError::Transport {
                status: Some(404), ..
            }) => {
                return Err(HarvestError::NotFound {
                    name: name.to_string(),
                    status: Some(404),
                });
            }
            Err(err) => return Err(err),
        };
        let status = response.status;
        let lookup: LookupResponse =
            serde_json::from_reader(response.body).map_err(|err| HarvestError::Transport {
                status: Some(status),
                reason: format!("malformed lookup response: {err}"),
            })?;

        let cid = lookup
            .identifier_list
            .and_then(|list| list.cids.first().copied())
            .filter(|cid| *cid != 0)
            .ok_or_else(|| HarvestError::NotFound {
                name: name.to_string(),
                status: Some(status),
            })?;
        debug!(name, cid, "resolved compound name");
        Ok(Cid::from(cid))
    }

    fn fetch_record(
        &self,
        cid: &Cid,
        format: RecordFormat,
        destination: &Utf8Path,
    ) -> Result<u64, HarvestError> {
        let url = self.record_url(cid, format);
        let mut response = self.transport.execute(&url)?;
        let status = response.status;

        let mut temp = tempfile::Builder::new()
            .prefix(".pug-harvest")
            .suffix(".part")
            .tempfile_in(destination.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let read = match response.body.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(HarvestError::Transport {
                        status: Some(status),
                        reason: format!("body read failed: {err}"),
                    });
                }
            };
            temp.write_all(&buffer[..read])
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            written += read as u64;
        }

        if written == 0 {
            return Err(HarvestError::EmptyRecord(cid.to_string()));
        }
        temp.flush()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let target: Utf8PathBuf = destination.join(cid.file_name(format));
        temp.persist(target.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        debug!(cid = %cid, bytes = written, path = %target, "record written");
        Ok(written)
    }
}
