use crate::ffmpeg;
use crate::models::{DownloadRequest, Job, JobStatus, MediaDescriptor, MediaType, ProgressEvent};
use crate::paths::EnginePaths;
use crate::quality;
use crate::video_url;
use crate::ytdlp;
use crate::{EngineError, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 128;

// Fixed stage weight bands, reflecting where the time actually goes.
// A stage's internal 0..=100 progress is rescaled linearly into its band.
const VIDEO_FETCH_END: f32 = 85.0;
const VIDEO_AUDIO_FETCH_END: f32 = 95.0;
const AUDIO_FETCH_END: f32 = 50.0;
const IMAGE_FETCH_END: f32 = 50.0;

struct JobEntry {
    job: Job,
    cancel: Arc<AtomicBool>,
    events: Option<mpsc::Receiver<ProgressEvent>>,
}

/// Orchestrates download jobs: owns the in-memory job registry, spawns one
/// worker thread per job, and fans progress out to per-job event channels.
/// There is no persistence; jobs live for the lifetime of this value.
pub struct JobManager {
    paths: EnginePaths,
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl JobManager {
    pub fn new(paths: EnginePaths) -> Result<Arc<Self>> {
        paths.ensure_dirs()?;
        Ok(Arc::new(Self {
            paths,
            jobs: Mutex::new(HashMap::new()),
        }))
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    /// Probes a source without creating a job. The URL gate runs first, so
    /// nothing unvalidated ever reaches a tool argument vector.
    pub fn probe(&self, url: &str) -> Result<MediaDescriptor> {
        video_url::extract_video_id(url)
            .ok_or_else(|| EngineError::InvalidUrl(url.to_string()))?;
        ytdlp::probe(&self.paths, url)
    }

    /// Validates the request synchronously, registers a job, and starts its
    /// pipeline on a dedicated worker thread. The worker's failure is always
    /// captured and turned into the job's single terminal error event.
    pub fn start_download(
        self: &Arc<Self>,
        request: DownloadRequest,
        output_path: PathBuf,
    ) -> Result<String> {
        let video_id = video_url::extract_video_id(&request.url)
            .ok_or_else(|| EngineError::InvalidUrl(request.url.clone()))?;
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let job_id = Uuid::new_v4().to_string();
        let now = now_ms();
        let job = Job {
            id: job_id.clone(),
            video_id: video_id.clone(),
            title: String::new(),
            media_type: request.media_type,
            format: request.format.clone(),
            quality: request.quality.clone(),
            status: JobStatus::Pending,
            progress: 0.0,
            actual_quality: None,
            output_path: None,
            error: None,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<ProgressEvent>();
        {
            let mut jobs = self.lock_jobs();
            jobs.insert(
                job_id.clone(),
                JobEntry {
                    job,
                    cancel: cancel.clone(),
                    events: Some(rx),
                },
            );
        }
        let _ = self.log_line(
            &job_id,
            "info",
            "job_created",
            serde_json::json!({
                "video_id": video_id,
                "media_type": request.media_type.as_str(),
                "format": request.format,
                "quality": request.quality,
                "output_path": output_path.to_string_lossy(),
            }),
        );

        let manager = Arc::clone(self);
        let worker_job_id = job_id.clone();
        thread::spawn(move || {
            let result = manager.run_pipeline(
                &worker_job_id,
                &request,
                &video_id,
                &output_path,
                &cancel,
                &tx,
            );
            match result {
                Ok(()) => manager.set_complete(&worker_job_id, &tx, &output_path),
                Err(err) => manager.set_failed(&worker_job_id, &tx, &err),
            }
        });

        Ok(job_id)
    }

    /// Takes the job's event stream. FIFO, single consumer; ends with the
    /// terminal event. `None` if the job is unknown or already subscribed.
    pub fn subscribe(&self, job_id: &str) -> Option<mpsc::Receiver<ProgressEvent>> {
        self.lock_jobs().get_mut(job_id).and_then(|e| e.events.take())
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.lock_jobs().get(job_id).map(|e| e.job.clone())
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock_jobs().values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.created_at_ms);
        jobs
    }

    /// Removes a job from the registry. Idempotent. An in-flight pipeline is
    /// canceled: the worker sees the flag at the next runner poll or stage
    /// boundary and its child process tree is killed.
    pub fn delete_job(&self, job_id: &str) -> bool {
        match self.lock_jobs().remove(job_id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn run_pipeline(
        &self,
        job_id: &str,
        request: &DownloadRequest,
        video_id: &str,
        output_path: &Path,
        cancel: &Arc<AtomicBool>,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<()> {
        check_cancel(cancel)?;
        self.emit(job_id, tx, JobStatus::Probing, 0.0, None);
        self.log_line(job_id, "info", "probe_begin", serde_json::json!({}))?;
        let info = ytdlp::probe(&self.paths, &request.url)?;
        self.set_title(job_id, &info.title);
        self.log_line(
            job_id,
            "info",
            "probe_done",
            serde_json::json!({
                "title": info.title,
                "duration_seconds": info.duration_seconds,
                "available_qualities": info.available_qualities,
            }),
        )?;

        check_cancel(cancel)?;
        match request.media_type {
            MediaType::Image => {
                self.run_image_pipeline(job_id, &info, video_id, output_path, tx)
            }
            MediaType::Audio => {
                self.run_audio_pipeline(job_id, request, video_id, output_path, cancel, tx)
            }
            MediaType::Video => {
                self.run_video_pipeline(job_id, request, &info, video_id, output_path, cancel, tx)
            }
        }
    }

    fn run_image_pipeline(
        &self,
        job_id: &str,
        info: &MediaDescriptor,
        video_id: &str,
        output_path: &Path,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<()> {
        let tmp = self.temp_file(video_id, "th", "jpg");
        self.emit(job_id, tx, JobStatus::Downloading, 0.0, None);
        download_thumbnail(&info.thumbnail_url, &tmp)?;

        self.emit(job_id, tx, JobStatus::Transcoding, IMAGE_FETCH_END, None);
        ffmpeg::convert_to_webp(&self.paths, &tmp, output_path)?;

        self.cleanup_temp_files(job_id, &[tmp]);
        Ok(())
    }

    fn run_audio_pipeline(
        &self,
        job_id: &str,
        request: &DownloadRequest,
        video_id: &str,
        output_path: &Path,
        cancel: &Arc<AtomicBool>,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<()> {
        let tmp = self.temp_file(video_id, "a", "webm");
        self.emit(job_id, tx, JobStatus::Downloading, 0.0, None);
        ytdlp::download(
            &self.paths,
            &request.url,
            ytdlp::AUDIO_SELECTOR,
            &tmp,
            Some(cancel.clone()),
            &mut |p| {
                self.emit(
                    job_id,
                    tx,
                    JobStatus::Downloading,
                    p * AUDIO_FETCH_END / 100.0,
                    None,
                )
            },
        )?;

        check_cancel(cancel)?;
        self.emit(job_id, tx, JobStatus::Transcoding, AUDIO_FETCH_END, None);
        ffmpeg::transcode_audio(
            &self.paths,
            &tmp,
            output_path,
            &request.format,
            parse_bitrate_kbps(&request.quality),
            Some(cancel.clone()),
            &mut |p| {
                self.emit(
                    job_id,
                    tx,
                    JobStatus::Transcoding,
                    AUDIO_FETCH_END + p * (100.0 - AUDIO_FETCH_END) / 100.0,
                    None,
                )
            },
        )?;

        self.cleanup_temp_files(job_id, &[tmp]);
        Ok(())
    }

    fn run_video_pipeline(
        &self,
        job_id: &str,
        request: &DownloadRequest,
        info: &MediaDescriptor,
        video_id: &str,
        output_path: &Path,
        cancel: &Arc<AtomicBool>,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<()> {
        let selected = quality::resolve_quality(&info.available_qualities, &request.quality)
            .ok_or_else(|| EngineError::Probe("source has no video streams".to_string()))?;
        if selected != quality::normalize_quality(&request.quality) {
            self.set_actual_quality(job_id, &selected);
            self.log_line(
                job_id,
                "info",
                "quality_fallback",
                serde_json::json!({ "requested": request.quality, "selected": selected }),
            )?;
        }
        let height = quality::ladder_height(&selected)
            .ok_or_else(|| EngineError::Probe(format!("unrecognized quality: {selected}")))?;

        let tmp_video = self.temp_file(video_id, "v", "mp4");
        let tmp_audio = self.temp_file(video_id, "a", "webm");

        self.emit(job_id, tx, JobStatus::DownloadingVideo, 0.0, None);
        ytdlp::download(
            &self.paths,
            &request.url,
            &ytdlp::video_selector(height),
            &tmp_video,
            Some(cancel.clone()),
            &mut |p| {
                self.emit(
                    job_id,
                    tx,
                    JobStatus::DownloadingVideo,
                    p * VIDEO_FETCH_END / 100.0,
                    None,
                )
            },
        )?;

        check_cancel(cancel)?;
        self.emit(job_id, tx, JobStatus::DownloadingAudio, VIDEO_FETCH_END, None);
        ytdlp::download(
            &self.paths,
            &request.url,
            ytdlp::AUDIO_SELECTOR,
            &tmp_audio,
            Some(cancel.clone()),
            &mut |p| {
                self.emit(
                    job_id,
                    tx,
                    JobStatus::DownloadingAudio,
                    VIDEO_FETCH_END + p * (VIDEO_AUDIO_FETCH_END - VIDEO_FETCH_END) / 100.0,
                    None,
                )
            },
        )?;

        check_cancel(cancel)?;
        self.emit(job_id, tx, JobStatus::Merging, VIDEO_AUDIO_FETCH_END, None);
        ffmpeg::mux_video_audio(
            &self.paths,
            &tmp_video,
            &tmp_audio,
            output_path,
            Some(cancel.clone()),
            &mut |p| {
                self.emit(
                    job_id,
                    tx,
                    JobStatus::Merging,
                    VIDEO_AUDIO_FETCH_END + p * (100.0 - VIDEO_AUDIO_FETCH_END) / 100.0,
                    None,
                )
            },
        )?;

        self.cleanup_temp_files(job_id, &[tmp_video, tmp_audio]);
        Ok(())
    }

    /// Applies one status/progress update to the registry and forwards it to
    /// the job's event channel. Progress never moves backwards, and nothing
    /// is emitted once the job is terminal or deleted.
    fn emit(
        &self,
        job_id: &str,
        tx: &mpsc::Sender<ProgressEvent>,
        status: JobStatus,
        progress: f32,
        message: Option<String>,
    ) {
        let mut jobs = self.lock_jobs();
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        if entry.job.status.is_terminal() {
            return;
        }
        let progress = progress.clamp(0.0, 100.0).max(entry.job.progress);
        entry.job.status = status;
        entry.job.progress = progress;
        entry.job.updated_at_ms = now_ms();
        if status == JobStatus::Error {
            entry.job.error = message.clone();
        }
        let event = ProgressEvent {
            status,
            progress,
            message,
            actual_quality: entry.job.actual_quality.clone(),
        };
        let _ = tx.send(event);
    }

    fn set_complete(&self, job_id: &str, tx: &mpsc::Sender<ProgressEvent>, output_path: &Path) {
        {
            let mut jobs = self.lock_jobs();
            let Some(entry) = jobs.get_mut(job_id) else {
                return;
            };
            if entry.job.status.is_terminal() {
                return;
            }
            entry.job.output_path = Some(output_path.to_string_lossy().to_string());
        }
        self.emit(job_id, tx, JobStatus::Complete, 100.0, None);
        let _ = self.log_line(
            job_id,
            "info",
            "job_complete",
            serde_json::json!({ "output_path": output_path.to_string_lossy() }),
        );
    }

    fn set_failed(&self, job_id: &str, tx: &mpsc::Sender<ProgressEvent>, err: &EngineError) {
        let message = err.user_message();
        self.emit(
            job_id,
            tx,
            JobStatus::Error,
            0.0,
            Some(message.clone()),
        );
        let _ = self.log_line(
            job_id,
            "error",
            "job_failed",
            serde_json::json!({ "message": message }),
        );
    }

    fn set_title(&self, job_id: &str, title: &str) {
        let mut jobs = self.lock_jobs();
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.job.title = title.to_string();
            entry.job.updated_at_ms = now_ms();
        }
    }

    fn set_actual_quality(&self, job_id: &str, selected: &str) {
        let mut jobs = self.lock_jobs();
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.job.actual_quality = Some(selected.to_string());
            entry.job.updated_at_ms = now_ms();
        }
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Temp names embed the source id, a stage tag and a timestamp so that
    /// concurrent jobs for the same source never collide.
    fn temp_file(&self, video_id: &str, tag: &str, ext: &str) -> PathBuf {
        self.paths
            .temp_dir()
            .join(format!("{video_id}_{tag}_{}.{ext}", now_ms()))
    }

    /// Best-effort: removal problems go to the job log and are swallowed.
    /// Cleanup is advisory, not part of the success contract.
    fn cleanup_temp_files(&self, job_id: &str, files: &[PathBuf]) {
        for file in files {
            if !file.exists() {
                continue;
            }
            if let Err(err) = std::fs::remove_file(file) {
                let _ = self.log_line(
                    job_id,
                    "warn",
                    "temp_cleanup_failed",
                    serde_json::json!({
                        "path": file.to_string_lossy(),
                        "error": err.to_string(),
                    }),
                );
            }
        }
    }

    fn log_line(
        &self,
        job_id: &str,
        level: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "job_id": job_id,
            "level": level,
            "event": event,
            "data": data,
        })
        .to_string();

        let path = self.paths.job_logs_dir().join(format!("{job_id}.jsonl"));
        std::fs::create_dir_all(self.paths.job_logs_dir())?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

fn check_cancel(cancel: &Arc<AtomicBool>) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        Err(EngineError::Canceled)
    } else {
        Ok(())
    }
}

fn download_thumbnail(url: &str, dest: &Path) -> Result<()> {
    if url.is_empty() {
        return Err(EngineError::Probe("source has no thumbnail".to_string()));
    }
    let resp = ureq::get(url)
        .call()
        .map_err(|e| EngineError::Http(e.to_string()))?;
    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(EngineError::Http(format!("status={status} for {url}")));
    }
    let mut reader = resp.into_body().into_reader();
    let mut file = std::fs::File::create(dest)?;
    std::io::copy(&mut reader, &mut file)?;
    Ok(())
}

fn parse_bitrate_kbps(quality: &str) -> u32 {
    let digits: String = quality
        .trim()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS)
}

/// Deterministic, filesystem-safe output name for a finished download.
pub fn output_file_name(video_id: &str, format: &str, quality: &str) -> String {
    let safe_id: String = video_id
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .collect();
    let safe_format: String = format
        .to_ascii_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect();
    let safe_quality: String = quality
        .to_ascii_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect();
    format!("youtube_{safe_id}_{safe_format}_{safe_quality}.{safe_format}")
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
