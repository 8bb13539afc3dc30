//! Checks applied to query parameters before any process starts or any socket opens.

use url::Url;

use crate::error::ApiError;

const MAX_FORMAT_SELECTOR_LEN: usize = 200;
const INSTAGRAM_CONTENT_KINDS: [&str; 4] = ["p", "reel", "reels", "tv"];
const INSTAGRAM_RESERVED_PATHS: [&str; 8] = [
    "p", "reel", "reels", "tv", "explore", "accounts", "direct", "stories",
];

pub fn non_empty(value: Option<&str>) -> Option<&str> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Parses an absolute `http`/`https` URL with a host.
pub fn parse_http_url(input: &str) -> Option<Url> {
    let parsed = Url::parse(input.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str()?;
    Some(parsed)
}

/// Required `url` query parameter that must be an absolute http(s) URL.
pub fn required_http_url(value: Option<&str>, missing_message: &str) -> Result<Url, ApiError> {
    let raw = non_empty(value).ok_or_else(|| ApiError::invalid_request(missing_message))?;
    parse_http_url(raw).ok_or_else(|| ApiError::invalid_request("Invalid URL"))
}

/// Format selectors end up in argv; reject anything that could read as an option or that
/// carries whitespace.
pub fn is_valid_format_selector(selector: &str) -> bool {
    !selector.is_empty()
        && selector.len() <= MAX_FORMAT_SELECTOR_LEN
        && !selector.starts_with('-')
        && !selector
            .chars()
            .any(|character| character.is_whitespace() || character.is_control())
}

fn is_instagram_host(url: &Url) -> bool {
    url.host_str()
        .map(|host| {
            let host = host.to_ascii_lowercase();
            host == "instagram.com" || host.ends_with(".instagram.com")
        })
        .unwrap_or(false)
}

fn path_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
        .unwrap_or_default()
}

fn is_shortcode(value: &str) -> bool {
    (5..=64).contains(&value.len())
        && value
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_'))
}

fn is_username(value: &str) -> bool {
    (1..=30).contains(&value.len())
        && value
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '.' | '_'))
}

/// Shortcode of an Instagram post, reel or IGTV URL, with or without a username prefix.
pub fn instagram_shortcode(url: &Url) -> Option<String> {
    if !is_instagram_host(url) {
        return None;
    }

    let segments = path_segments(url);
    let candidate = match segments.as_slice() {
        [kind, code, ..] if INSTAGRAM_CONTENT_KINDS.contains(kind) => *code,
        [_, kind, code, ..] if INSTAGRAM_CONTENT_KINDS.contains(kind) => *code,
        _ => return None,
    };

    is_shortcode(candidate).then(|| candidate.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryTarget {
    pub username: String,
    pub story_id: Option<String>,
}

/// Accepts `/stories/<username>[/<id>]` or a bare profile URL `/<username>`.
pub fn instagram_story_target(url: &Url) -> Option<StoryTarget> {
    if !is_instagram_host(url) {
        return None;
    }

    let segments = path_segments(url);
    let (username, story_id) = match segments.as_slice() {
        ["stories", username] => (*username, None),
        ["stories", username, id, ..] => (*username, Some(*id)),
        [username] if !INSTAGRAM_RESERVED_PATHS.contains(username) => (*username, None),
        _ => return None,
    };

    if !is_username(username) {
        return None;
    }
    if let Some(id) = story_id
        && !id.chars().all(|character| character.is_ascii_digit())
    {
        return None;
    }

    Some(StoryTarget {
        username: username.to_string(),
        story_id: story_id.map(ToString::to_string),
    })
}
