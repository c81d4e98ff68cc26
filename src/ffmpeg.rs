use crate::paths::EnginePaths;
use crate::runner::{background_command, run_tool, RunOptions};
use crate::Result;
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const TOOL: &str = "ffmpeg";

/// Re-encodes an input to a standalone audio file. `format` picks the codec
/// (`mp3` -> libmp3lame, `opus` -> libopus, anything else -> aac); output is
/// forced to stereo at the given bitrate.
pub fn transcode_audio(
    paths: &EnginePaths,
    input: &Path,
    output: &Path,
    format: &str,
    bitrate_kbps: u32,
    cancel: Option<Arc<AtomicBool>>,
    on_progress: &mut dyn FnMut(f32),
) -> Result<()> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
    args.extend(["-vn".into(), "-acodec".into(), audio_codec(format).into()]);
    args.extend(["-b:a".into(), format!("{bitrate_kbps}k").into()]);
    args.extend(["-ac".into(), "2".into()]);
    args.push(output.into());
    run_ffmpeg(paths, &args, cancel, Some(on_progress))
}

/// Muxes a video-only and an audio-only stream into one container. The video
/// stream is copied untouched; audio is re-encoded to AAC at a fixed bitrate
/// and the container gets a fast-start layout.
pub fn mux_video_audio(
    paths: &EnginePaths,
    video_input: &Path,
    audio_input: &Path,
    output: &Path,
    cancel: Option<Arc<AtomicBool>>,
    on_progress: &mut dyn FnMut(f32),
) -> Result<()> {
    let mut args: Vec<OsString> = vec!["-i".into(), video_input.into()];
    args.extend(["-i".into(), audio_input.into()]);
    args.extend(["-c:v".into(), "copy".into()]);
    args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), "192k".into()]);
    args.extend(["-movflags".into(), "+faststart".into()]);
    args.push(output.into());
    run_ffmpeg(paths, &args, cancel, Some(on_progress))
}

/// Single-shot image re-encode. No progress stream expected.
pub fn convert_to_webp(paths: &EnginePaths, input: &Path, output: &Path) -> Result<()> {
    let args: Vec<OsString> = vec![
        "-i".into(),
        input.into(),
        "-quality".into(),
        "90".into(),
        output.into(),
    ];
    run_ffmpeg(paths, &args, None, None)
}

fn audio_codec(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "mp3" => "libmp3lame",
        "opus" => "libopus",
        _ => "aac",
    }
}

/// Runs ffmpeg with `-nostdin -y` prepended, deriving fractional progress
/// from its stderr text: one `Duration: HH:MM:SS` marker gives the total,
/// repeated `time=HH:MM:SS` markers give the position. If no duration marker
/// ever shows up the stage stays indeterminate and nothing is emitted.
fn run_ffmpeg(
    paths: &EnginePaths,
    args: &[OsString],
    cancel: Option<Arc<AtomicBool>>,
    on_progress: Option<&mut dyn FnMut(f32)>,
) -> Result<()> {
    let mut cmd = background_command(paths.ffmpeg_cmd());
    cmd.args(["-nostdin", "-y"]);
    cmd.args(args);

    let options = RunOptions {
        timeout_secs: 0,
        cancel,
    };

    match on_progress {
        Some(on_progress) => {
            let mut parser = ProgressParser::new();
            let mut forward = |line: &str| {
                if let Some(percent) = parser.observe(line) {
                    on_progress(percent);
                }
            };
            run_tool(TOOL, &mut cmd, &options, None, Some(&mut forward))?;
        }
        None => {
            run_tool(TOOL, &mut cmd, &options, None, None)?;
        }
    }
    Ok(())
}

struct ProgressParser {
    duration_re: Regex,
    time_re: Regex,
    total_seconds: u64,
}

impl ProgressParser {
    fn new() -> Self {
        Self {
            duration_re: Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})")
                .expect("duration regex"),
            time_re: Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})").expect("time regex"),
            total_seconds: 0,
        }
    }

    fn observe(&mut self, line: &str) -> Option<f32> {
        if let Some(total) = capture_seconds(&self.duration_re, line) {
            self.total_seconds = total;
            return None;
        }
        if self.total_seconds == 0 {
            return None;
        }
        let current = capture_seconds(&self.time_re, line)?;
        let percent = (current as f32 / self.total_seconds as f32) * 100.0;
        Some(percent.clamp(0.0, 100.0))
    }
}

fn capture_seconds(re: &Regex, line: &str) -> Option<u64> {
    let captures = re.captures(line)?;
    let hours: u64 = captures.get(1)?.as_str().parse().ok()?;
    let minutes: u64 = captures.get(2)?.as_str().parse().ok()?;
    let seconds: u64 = captures.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_map_covers_known_formats() {
        assert_eq!(audio_codec("mp3"), "libmp3lame");
        assert_eq!(audio_codec("MP3"), "libmp3lame");
        assert_eq!(audio_codec("opus"), "libopus");
        assert_eq!(audio_codec("aac"), "aac");
        assert_eq!(audio_codec("anything"), "aac");
    }

    #[test]
    fn progress_needs_a_duration_marker_first() {
        let mut parser = ProgressParser::new();
        assert_eq!(parser.observe("time=00:00:05.00 bitrate=  12kbits/s"), None);
        assert_eq!(
            parser.observe("  Duration: 00:00:20.04, start: 0.0, bitrate: 128 kb/s"),
            None
        );
        assert_eq!(
            parser.observe("frame=1 time=00:00:05.00 speed=1x"),
            Some(25.0)
        );
        assert_eq!(
            parser.observe("frame=2 time=00:00:20.00 speed=1x"),
            Some(100.0)
        );
    }

    #[test]
    fn progress_is_clamped_past_the_end() {
        let mut parser = ProgressParser::new();
        parser.observe("Duration: 00:00:10");
        assert_eq!(parser.observe("time=00:00:59"), Some(100.0));
    }

    #[test]
    fn hms_parsing_handles_hours() {
        let re = Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})").expect("regex");
        assert_eq!(capture_seconds(&re, "time=01:02:03.55"), Some(3723));
        assert_eq!(capture_seconds(&re, "no timestamp"), None);
    }
}
