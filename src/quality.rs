/// Canonical quality ladder, best first. Probe results and quality
/// resolution both stick to this order regardless of input order.
pub const QUALITY_LADDER: [&str; 8] = [
    "2160p", "1440p", "1080p", "720p", "480p", "360p", "240p", "144p",
];

/// Normalizes a requested quality string to the canonical `<number>p` form
/// (`"1080"`, `"1080P"` and `"1080p"` all become `"1080p"`).
pub fn normalize_quality(requested: &str) -> String {
    let mut normalized = requested.trim().to_ascii_lowercase();
    if normalized.ends_with('p') {
        normalized.pop();
    }
    normalized.push('p');
    normalized
}

pub fn ladder_height(quality: &str) -> Option<u32> {
    quality.trim().trim_end_matches(['p', 'P']).parse().ok()
}

/// Picks the closest available quality at or below the request.
///
/// If the request is available verbatim it wins. Otherwise the ladder is
/// walked downward from the requested rung and the first available rung is
/// returned. Only when nothing at or below the request exists does the best
/// available quality win. `None` means `available` was empty.
pub fn resolve_quality(available: &[String], requested: &str) -> Option<String> {
    let normalized = normalize_quality(requested);
    if available.iter().any(|q| *q == normalized) {
        return Some(normalized);
    }

    if let Some(start) = QUALITY_LADDER.iter().position(|q| *q == normalized) {
        for rung in &QUALITY_LADDER[start..] {
            if available.iter().any(|q| q == rung) {
                return Some((*rung).to_string());
            }
        }
    }

    available.first().cloned()
}
