use url::Url;

const ID_LEN: usize = 11;

/// Extracts the 11-character video id from the URL shapes we accept, or from
/// a bare id. Pure structural matching; anything else is rejected. This runs
/// before any external process is spawned, so it is the gate that keeps
/// arbitrary strings out of tool argument vectors.
///
/// Accepted shapes: `youtube.com/watch?v=<id>`, `youtu.be/<id>`,
/// `youtube.com/embed/<id>`, `youtube.com/v/<id>`, `youtube.com/shorts/<id>`.
pub fn extract_video_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if is_video_id(trimmed) {
        return Some(trimmed.to_string());
    }

    let parsed = Url::parse(trimmed).ok()?;
    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let candidate = match host {
        "youtu.be" => parsed.path_segments()?.next().map(str::to_string),
        "youtube.com" | "m.youtube.com" => {
            let mut segments = parsed.path_segments()?;
            match segments.next()? {
                "watch" => parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                "embed" | "v" | "shorts" => segments.next().map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    }?;

    if is_video_id(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

pub fn is_supported_url(input: &str) -> bool {
    extract_video_id(input).is_some()
}

fn is_video_id(value: &str) -> bool {
    value.len() == ID_LEN
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "dQw4w9WgXcQ";

    #[test]
    fn all_supported_shapes_resolve_to_the_same_id() {
        let inputs = [
            format!("https://www.youtube.com/watch?v={ID}"),
            format!("https://youtube.com/watch?v={ID}"),
            format!("https://youtu.be/{ID}"),
            format!("https://www.youtube.com/embed/{ID}"),
            format!("https://www.youtube.com/v/{ID}"),
            format!("https://www.youtube.com/shorts/{ID}"),
            format!("http://m.youtube.com/watch?v={ID}"),
            ID.to_string(),
        ];
        for input in inputs {
            assert_eq!(extract_video_id(&input).as_deref(), Some(ID), "{input}");
        }
    }

    #[test]
    fn watch_url_with_extra_params_still_resolves() {
        let input = format!("https://www.youtube.com/watch?v={ID}&t=42s&list=PL123");
        assert_eq!(extract_video_id(&input).as_deref(), Some(ID));
    }

    #[test]
    fn rejects_other_hosts_and_shapes() {
        let inputs = [
            "https://vimeo.com/12345",
            "https://www.youtube.com/@somechannel/videos",
            "https://www.youtube.com/playlist?list=PL123",
            "https://www.youtube.com/watch",
            "ftp://youtube.com/watch?v=dQw4w9WgXcQ",
            "not a url at all",
            "",
        ];
        for input in inputs {
            assert_eq!(extract_video_id(input), None, "{input}");
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(extract_video_id("tooshort"), None);
        assert_eq!(extract_video_id("waytoolongtobeanid"), None);
        assert_eq!(extract_video_id("https://youtu.be/bad*chars!!"), None);
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=shortid"),
            None
        );
    }

    #[test]
    fn is_supported_url_matches_resolver() {
        assert!(is_supported_url(&format!("https://youtu.be/{ID}")));
        assert!(!is_supported_url("https://example.com/"));
    }
}
