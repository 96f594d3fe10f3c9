use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ureq::Agent;

use super::{CatalogError, CatalogHit, DownloadLink, RemoteCatalog};

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<CatalogHit>,
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct DownloadResponse {
    file_url: Option<String>,
    error: Option<String>,
}

/// JSON-over-HTTP catalog client.
///
/// Endpoints, relative to the base url:
/// - `GET /search?q=` -> `{"hits": [...]}`
/// - `PUT` / `DELETE /favorites/{id}`
/// - `POST /download {"url"}` -> `{"file_url"}` or `{"error": "no_credits"}`
pub struct HttpCatalog {
    agent: Agent,
    base_url: String,
    token: Option<String>,
}

impl HttpCatalog {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }
}

fn classify(error: ureq::Error) -> CatalogError {
    match error {
        ureq::Error::StatusCode(401 | 403) => CatalogError::AuthExpired,
        ureq::Error::StatusCode(402) => CatalogError::NoCredits,
        ureq::Error::StatusCode(code) => CatalogError::Http(code),
        ureq::Error::Timeout(_) => CatalogError::Timeout,
        ureq::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => CatalogError::Timeout,
        ureq::Error::Json(e) => CatalogError::Malformed(e.to_string()),
        other => CatalogError::Network(other.to_string()),
    }
}

/// Stream `body` into `part`, fsync, then rename onto `dest`.
fn write_body(body: &mut impl io::Read, part: &Path, dest: &Path) -> Result<u64, CatalogError> {
    let io_err = |source: io::Error| {
        if source.kind() == io::ErrorKind::TimedOut {
            CatalogError::Timeout
        } else {
            CatalogError::Io {
                path: part.to_path_buf(),
                source,
            }
        }
    };
    let mut file = File::create(part).map_err(io_err)?;
    let bytes = io::copy(body, &mut file).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    fs::rename(part, dest).map_err(|source| CatalogError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(bytes)
}

fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!(".{name}.part"))
}

impl RemoteCatalog for HttpCatalog {
    fn search(&self, query: &str) -> Result<Vec<CatalogHit>, CatalogError> {
        let response: SearchResponse = self
            .authorized(self.agent.get(&self.url("/search")).query("q", query))
            .call()
            .map_err(classify)?
            .body_mut()
            .read_json()
            .map_err(classify)?;
        log::debug!("Search {:?}: {} hits", query, response.hits.len());
        Ok(response.hits)
    }

    fn set_favorite(&self, id: &str, favorite: bool) -> Result<(), CatalogError> {
        let url = self.url(&format!("/favorites/{id}"));
        if favorite {
            self.authorized(self.agent.put(&url)).send_empty().map_err(classify)?;
        } else {
            self.authorized(self.agent.delete(&url)).call().map_err(classify)?;
        }
        Ok(())
    }

    fn fetch_download_url(&self, track_url: &str) -> Result<DownloadLink, CatalogError> {
        let result = self
            .authorized(self.agent.post(&self.url("/download")))
            .send_json(DownloadRequest { url: track_url });
        let mut response = match result {
            Ok(r) => r,
            Err(e) => {
                return match classify(e) {
                    CatalogError::NoCredits => Ok(DownloadLink::NoCredits),
                    other => Err(other),
                };
            }
        };
        let body: DownloadResponse = response.body_mut().read_json().map_err(classify)?;

        match (body.file_url, body.error.as_deref()) {
            (_, Some("no_credits")) => Ok(DownloadLink::NoCredits),
            (Some(url), None) if !url.is_empty() => Ok(DownloadLink::File(url)),
            (_, Some(err)) => Err(CatalogError::Malformed(format!("download refused: {err}"))),
            _ => Err(CatalogError::Malformed("download response without file_url".into())),
        }
    }

    fn download_file(&self, file_url: &str, dest: &Path) -> Result<u64, CatalogError> {
        // Only send credentials back to the catalog itself
        let request = self.agent.get(file_url);
        let request = if file_url.starts_with(&self.base_url) {
            self.authorized(request)
        } else {
            request
        };
        let mut response = request.call().map_err(classify)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| CatalogError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let part = part_path(dest);
        let result = write_body(&mut response.body_mut().as_reader(), &part, dest);
        if result.is_err() {
            let _ = fs::remove_file(&part);
        }
        result
    }
}
