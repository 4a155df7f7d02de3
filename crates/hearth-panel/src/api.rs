use async_trait::async_trait;
use hearth_core::{OperationKind, ServerId, ServerStatus};
use serde::de::DeserializeOwned;

use crate::config::PanelConfig;
use crate::error::PanelError;
use crate::metrics::PerfSample;
use crate::progress::RawProgress;

/// Authoritative record returned by `GET /servers/{id}`. The backend
/// sends more fields than the tracking core needs; unknown ones are
/// ignored.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServerSummary {
    pub status: ServerStatus,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct FilesCheck {
    #[serde(rename = "hasFiles", alias = "has_files")]
    has_files: bool,
}

#[derive(Debug, Default, serde::Deserialize)]
struct OutputPayload {
    #[serde(default)]
    output: OutputField,
}

/// `output` arrives as an array of lines, a single newline-separated
/// blob, or not at all, depending on the server implementation behind
/// the backend. Entries are kept as JSON values so non-string garbage
/// reaches the classifier instead of failing the whole fetch.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(untagged)]
enum OutputField {
    Many(Vec<serde_json::Value>),
    One(String),
    #[default]
    Missing,
}

impl OutputField {
    fn into_values(self) -> Vec<serde_json::Value> {
        match self {
            Self::Many(values) => values,
            Self::One(blob) => blob
                .lines()
                .map(|l| serde_json::Value::String(l.to_string()))
                .collect(),
            Self::Missing => Vec::new(),
        }
    }
}

/// The REST operations the tracking core consumes. Trackers and
/// monitors are written against this seam so tests can script probe
/// sequences without a live backend.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn server_summary(&self, id: &ServerId) -> Result<ServerSummary, PanelError>;
    async fn trigger(&self, id: &ServerId, kind: OperationKind) -> Result<(), PanelError>;
    async fn files_present(&self, id: &ServerId) -> Result<bool, PanelError>;
    /// Standalone download progress, for consumers rendering that view
    /// directly. The installation monitor reconciles through
    /// [`Backend::installation_progress`] and the file probe instead.
    async fn download_progress(&self, id: &ServerId) -> Result<RawProgress, PanelError>;
    async fn installation_progress(&self, id: &ServerId) -> Result<RawProgress, PanelError>;
    async fn realtime_output(&self, id: &ServerId) -> Result<Vec<serde_json::Value>, PanelError>;
    async fn send_console(
        &self,
        id: &ServerId,
        command: &str,
    ) -> Result<Vec<serde_json::Value>, PanelError>;
    async fn performance(&self, id: &ServerId) -> Result<PerfSample, PanelError>;
}

/// reqwest-backed implementation of [`Backend`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

fn server_url(base: &str, id: &ServerId, tail: &str) -> String {
    let base = base.trim_end_matches('/');
    if tail.is_empty() {
        format!("{base}/servers/{id}")
    } else {
        format!("{base}/servers/{id}/{tail}")
    }
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, cfg: &PanelConfig) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self {
            http,
            base: base_url.into(),
        })
    }

    fn url(&self, id: &ServerId, tail: &str) -> String {
        server_url(&self.base, id, tail)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, PanelError> {
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn server_summary(&self, id: &ServerId) -> Result<ServerSummary, PanelError> {
        self.get_json(self.url(id, "")).await
    }

    async fn trigger(&self, id: &ServerId, kind: OperationKind) -> Result<(), PanelError> {
        let url = self.url(id, kind.action_path());
        let resp = self.http.post(&url).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        // The body is the backend's rejection reason; best effort only.
        let message = resp.text().await.unwrap_or_default();
        Err(PanelError::RequestRejected {
            action: kind.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn files_present(&self, id: &ServerId) -> Result<bool, PanelError> {
        let check: FilesCheck = self.get_json(self.url(id, "files/check")).await?;
        Ok(check.has_files)
    }

    async fn download_progress(&self, id: &ServerId) -> Result<RawProgress, PanelError> {
        self.get_json(self.url(id, "download-progress")).await
    }

    async fn installation_progress(&self, id: &ServerId) -> Result<RawProgress, PanelError> {
        self.get_json(self.url(id, "installation-progress")).await
    }

    async fn realtime_output(&self, id: &ServerId) -> Result<Vec<serde_json::Value>, PanelError> {
        let payload: OutputPayload = self.get_json(self.url(id, "realtime-output")).await?;
        Ok(payload.output.into_values())
    }

    async fn send_console(
        &self,
        id: &ServerId,
        command: &str,
    ) -> Result<Vec<serde_json::Value>, PanelError> {
        let url = self.url(id, "console");
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "command": command }))
            .send()
            .await?
            .error_for_status()?;
        let payload: OutputPayload = resp.json().await?;
        Ok(payload.output.into_values())
    }

    async fn performance(&self, id: &ServerId) -> Result<PerfSample, PanelError> {
        self.get_json(self.url(id, "performance")).await
    }
}
