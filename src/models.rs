use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Audio,
    Image,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Image => "image",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "video" => Some(MediaType::Video),
            "audio" => Some(MediaType::Audio),
            "image" => Some(MediaType::Image),
            _ => None,
        }
    }
}

/// Result of probing a source. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub id: String,
    pub title: String,
    pub duration_seconds: u64,
    pub uploader: String,
    pub thumbnail_url: String,
    /// Distinct heights present in the source, restricted to the canonical
    /// ladder and kept in ladder (descending) order.
    pub available_qualities: Vec<String>,
    /// Distinct rounded audio bitrates, descending.
    pub available_audio_bitrates: Vec<u32>,
}

/// User intent for one download. Validated before a job is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub media_type: MediaType,
    pub format: String,
    pub quality: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    Probing,
    Downloading,
    DownloadingVideo,
    DownloadingAudio,
    Transcoding,
    Merging,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Probing => "probing",
            JobStatus::Downloading => "downloading",
            JobStatus::DownloadingVideo => "downloading-video",
            JobStatus::DownloadingAudio => "downloading-audio",
            JobStatus::Transcoding => "transcoding",
            JobStatus::Merging => "merging",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "probing" => Some(JobStatus::Probing),
            "downloading" => Some(JobStatus::Downloading),
            "downloading-video" => Some(JobStatus::DownloadingVideo),
            "downloading-audio" => Some(JobStatus::DownloadingAudio),
            "transcoding" => Some(JobStatus::Transcoding),
            "merging" => Some(JobStatus::Merging),
            "complete" => Some(JobStatus::Complete),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

/// One orchestrated download. Mutated only by the job manager driving its
/// pipeline; readers get clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub video_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub format: String,
    pub quality: String,
    pub status: JobStatus,
    /// 0..=100, never regresses within a job.
    pub progress: f32,
    /// Set only when the resolved quality differs from the request.
    pub actual_quality: Option<String>,
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Transient per-stage message delivered to a job's subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: JobStatus,
    pub progress: f32,
    pub message: Option<String>,
    pub actual_quality: Option<String>,
}
