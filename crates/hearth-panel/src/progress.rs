use std::time::Duration;

/// Stage reported by a download/installation progress endpoint.
/// `Complete` and `Error` are terminal: polling must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Preparing,
    FetchingManifest,
    Downloading,
    Extracting,
    Starting,
    Complete,
    Error,
    Idle,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "preparing" => Self::Preparing,
            "fetching_manifest" => Self::FetchingManifest,
            "downloading" => Self::Downloading,
            "extracting" => Self::Extracting,
            "starting" => Self::Starting,
            "complete" | "completed" | "done" => Self::Complete,
            "error" | "failed" => Self::Error,
            // Unknown stages render as "no active operation" rather than
            // leaking backend-specific strings into the UI.
            _ => Self::Idle,
        }
    }
}

/// Display-ready progress state, normalized at the boundary from the
/// several near-identical payload shapes the backend endpoints return.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProgressSnapshot {
    pub status: ProgressStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub message: String,
    pub total_size: Option<u64>,
    pub downloaded_size: Option<u64>,
    /// Present only while actively downloading with usable byte counters.
    pub eta_seconds: Option<u64>,
}

impl ProgressSnapshot {
    pub fn idle() -> Self {
        Self {
            status: ProgressStatus::Idle,
            progress: 0.0,
            message: String::new(),
            total_size: None,
            downloaded_size: None,
            eta_seconds: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Wire shape shared by the download-progress, installation-progress and
/// modpack-install endpoints. Field names drifted across them; aliases
/// absorb the drift so only one decode path exists.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawProgress {
    pub status: Option<String>,
    #[serde(alias = "percent", alias = "percentage")]
    pub progress: Option<f64>,
    pub message: Option<String>,
    #[serde(alias = "totalSize", alias = "total_bytes")]
    pub total_size: Option<u64>,
    #[serde(alias = "downloadedSize", alias = "downloaded_bytes")]
    pub downloaded_size: Option<u64>,
    #[serde(alias = "speedBytesPerSec", alias = "speed_bytes_per_sec")]
    pub speed: Option<u64>,
}

/// Normalizes a raw payload into one snapshot.
///
/// The ETA is computed only when the operation is actively downloading,
/// progress is strictly between 0 and 100, and both byte counters are
/// present and positive; otherwise it is withheld. The divisor is the
/// reported transfer speed when the backend provides one, else the
/// average speed over `elapsed`.
pub fn normalize(raw: &RawProgress, elapsed: Option<Duration>) -> ProgressSnapshot {
    let status = raw
        .status
        .as_deref()
        .map(ProgressStatus::parse)
        .unwrap_or(ProgressStatus::Idle);

    let progress = raw
        .progress
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 100.0))
        .unwrap_or(0.0);

    let eta_seconds = estimate_eta(status, progress, raw, elapsed);

    ProgressSnapshot {
        status,
        progress,
        message: raw.message.clone().unwrap_or_default(),
        total_size: raw.total_size,
        downloaded_size: raw.downloaded_size,
        eta_seconds,
    }
}

fn estimate_eta(
    status: ProgressStatus,
    progress: f64,
    raw: &RawProgress,
    elapsed: Option<Duration>,
) -> Option<u64> {
    if status != ProgressStatus::Downloading || progress <= 0.0 || progress >= 100.0 {
        return None;
    }
    let total = raw.total_size.filter(|&t| t > 0)?;
    let downloaded = raw.downloaded_size.filter(|&d| d > 0)?;
    if downloaded >= total {
        return None;
    }
    let remaining = total - downloaded;

    let speed = match raw.speed.filter(|&s| s > 0) {
        Some(s) => s as f64,
        None => {
            let secs = elapsed?.as_secs_f64();
            if secs <= 0.0 {
                return None;
            }
            downloaded as f64 / secs
        }
    };
    if speed <= 0.0 {
        return None;
    }

    Some((remaining as f64 / speed).ceil() as u64)
}
