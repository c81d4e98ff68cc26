use crate::models::MediaDescriptor;
use crate::paths::EnginePaths;
use crate::quality::QUALITY_LADDER;
use crate::runner::{background_command, run_tool, RunOptions};
use crate::{EngineError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub const PROBE_TIMEOUT_SECS: u64 = 30;

const TOOL: &str = "yt-dlp";

#[derive(Debug, Clone, Deserialize)]
struct ProbePayload {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    formats: Option<Vec<ProbeFormat>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProbeFormat {
    height: Option<u32>,
    abr: Option<f64>,
}

/// Dumps a single item's metadata and normalizes it into a
/// [`MediaDescriptor`]. Fixed 30-second budget; a slow probe fails with a
/// timeout classification rather than a generic error.
pub fn probe(paths: &EnginePaths, url: &str) -> Result<MediaDescriptor> {
    let mut cmd = background_command(paths.yt_dlp_cmd());
    cmd.args([
        "--dump-single-json",
        "--no-playlist",
        "--flat-playlist",
        "--no-check-certificates",
        "--no-warnings",
        "--no-call-home",
        "--no-cache-dir",
        "--skip-download",
        url,
    ]);

    let options = RunOptions {
        timeout_secs: PROBE_TIMEOUT_SECS,
        cancel: None,
    };
    let output = run_tool(TOOL, &mut cmd, &options, None, None)?;

    let payload: ProbePayload = serde_json::from_str(&output.stdout)
        .map_err(|e| EngineError::Probe(format!("malformed metadata json: {e}")))?;
    Ok(descriptor_from_payload(payload))
}

fn descriptor_from_payload(payload: ProbePayload) -> MediaDescriptor {
    let formats = payload.formats.unwrap_or_default();

    let heights: BTreeSet<u32> = formats.iter().filter_map(|f| f.height).collect();
    let available_qualities: Vec<String> = QUALITY_LADDER
        .iter()
        .filter(|rung| {
            crate::quality::ladder_height(rung)
                .map(|h| heights.contains(&h))
                .unwrap_or(false)
        })
        .map(|rung| (*rung).to_string())
        .collect();

    let mut bitrates: Vec<u32> = formats
        .iter()
        .filter_map(|f| f.abr)
        .map(|abr| abr.round() as u32)
        .filter(|abr| *abr > 0)
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .collect();
    bitrates.sort_unstable_by(|a, b| b.cmp(a));

    let duration = payload.duration.unwrap_or(0.0);
    MediaDescriptor {
        id: payload.id.unwrap_or_default(),
        title: payload.title.unwrap_or_default(),
        duration_seconds: if duration.is_finite() && duration > 0.0 {
            duration.round() as u64
        } else {
            0
        },
        uploader: payload.uploader.unwrap_or_default(),
        thumbnail_url: payload.thumbnail.unwrap_or_default(),
        available_qualities,
        available_audio_bitrates: bitrates,
    }
}

/// Stream selector for a target height, with fallbacks for sources that only
/// expose combined streams and for vertical media (Shorts) where the target
/// resolution shows up as the width.
pub fn video_selector(height: u32) -> String {
    format!(
        "bestvideo[height<={height}]/bestvideo[width<={height}]/best[height<={height}]/best[width<={height}]/best"
    )
}

pub const AUDIO_SELECTOR: &str = "bestaudio";

/// Downloads one stream to `dest`, forwarding `[download] NN.N%` progress.
/// Values are clamped to 0..=100 and never move backwards.
pub fn download(
    paths: &EnginePaths,
    url: &str,
    selector: &str,
    dest: &Path,
    cancel: Option<Arc<AtomicBool>>,
    on_progress: &mut dyn FnMut(f32),
) -> Result<()> {
    let mut cmd = background_command(paths.yt_dlp_cmd());
    cmd.args(["--no-playlist", "--newline", "-f", selector, "-o"]);
    cmd.arg(dest);
    cmd.arg(url);

    let percent_re = download_percent_regex();
    let mut last = 0.0_f32;
    let mut forward = |line: &str| {
        if let Some(percent) = parse_download_percent(&percent_re, line) {
            if percent >= last {
                last = percent;
                on_progress(percent);
            }
        }
    };

    let options = RunOptions {
        timeout_secs: 0,
        cancel,
    };
    run_tool(TOOL, &mut cmd, &options, Some(&mut forward), None)?;
    Ok(())
}

fn download_percent_regex() -> Regex {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("download percent regex")
}

fn parse_download_percent(re: &Regex, line: &str) -> Option<f32> {
    let captures = re.captures(line)?;
    let percent: f32 = captures.get(1)?.as_str().parse().ok()?;
    Some(percent.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_chains_height_width_and_combined_fallbacks() {
        assert_eq!(
            video_selector(720),
            "bestvideo[height<=720]/bestvideo[width<=720]/best[height<=720]/best[width<=720]/best"
        );
    }

    #[test]
    fn percent_lines_parse_and_clamp() {
        let re = download_percent_regex();
        assert_eq!(
            parse_download_percent(&re, "[download]  42.3% of 10.0MiB at 1.2MiB/s"),
            Some(42.3)
        );
        assert_eq!(
            parse_download_percent(&re, "[download] 100% of 10.0MiB"),
            Some(100.0)
        );
        assert_eq!(parse_download_percent(&re, "[download] Destination: x"), None);
        assert_eq!(parse_download_percent(&re, "[youtube] extracting"), None);
    }

    #[test]
    fn descriptor_restricts_heights_to_the_ladder() {
        let payload = ProbePayload {
            id: Some("abc123def45".to_string()),
            title: Some("clip".to_string()),
            duration: Some(93.4),
            uploader: Some("someone".to_string()),
            thumbnail: Some("https://i.ytimg.com/t.jpg".to_string()),
            formats: Some(vec![
                ProbeFormat {
                    height: Some(480),
                    abr: None,
                },
                ProbeFormat {
                    height: Some(1080),
                    abr: None,
                },
                // Off-ladder height is dropped.
                ProbeFormat {
                    height: Some(666),
                    abr: None,
                },
                ProbeFormat {
                    height: None,
                    abr: Some(128.4),
                },
                ProbeFormat {
                    height: None,
                    abr: Some(48.9),
                },
                ProbeFormat {
                    height: None,
                    abr: Some(128.0),
                },
            ]),
        };
        let descriptor = descriptor_from_payload(payload);
        assert_eq!(descriptor.available_qualities, vec!["1080p", "480p"]);
        assert_eq!(descriptor.available_audio_bitrates, vec![128, 49]);
        assert_eq!(descriptor.duration_seconds, 93);
    }

    #[test]
    fn descriptor_ladder_order_ignores_input_order() {
        let payload = ProbePayload {
            id: None,
            title: None,
            duration: None,
            uploader: None,
            thumbnail: None,
            formats: Some(vec![
                ProbeFormat {
                    height: Some(144),
                    abr: None,
                },
                ProbeFormat {
                    height: Some(2160),
                    abr: None,
                },
                ProbeFormat {
                    height: Some(720),
                    abr: None,
                },
            ]),
        };
        let descriptor = descriptor_from_payload(payload);
        assert_eq!(descriptor.available_qualities, vec!["2160p", "720p", "144p"]);
    }
}
