//! Projections of `yt-dlp -J` output into the shapes the web client consumes.

use serde::{Deserialize, Serialize};
use serde_json::Number;

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "webm", "mov", "m4v", "mkv"];

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    duration: Option<Number>,
    url: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    height: Option<u32>,
    abr: Option<Number>,
    filesize: Option<Number>,
    url: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<Number>,
    pub video_formats: Vec<VideoFormat>,
    pub audio_formats: Vec<AudioFormat>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct VideoFormat {
    pub id: Option<String>,
    pub ext: Option<String>,
    pub resolution: String,
    pub filesize: Option<Number>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AudioFormat {
    pub id: Option<String>,
    pub ext: Option<String>,
    pub abr: Option<Number>,
    pub filesize: Option<Number>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct InstagramPost {
    pub id: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub count: usize,
    pub medias: Vec<MediaItem>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MediaItem {
    pub id: String,
    pub url: String,
    pub thumbnail: Option<String>,
    #[serde(rename = "type")]
    pub kind: MediaKind,
}

fn has_video_codec(vcodec: Option<&str>) -> bool {
    matches!(vcodec, Some(value) if !value.is_empty() && value != "none")
}

/// Zero counts as unknown, the extractor uses it for "not reported".
fn known(value: Option<Number>) -> Option<Number> {
    value.filter(|number| number.as_f64().is_some_and(|value| value != 0.0))
}

/// Parses extractor stdout for a single video and partitions its formats by video codec.
pub fn video_info(stdout: &[u8]) -> Result<VideoInfo, serde_json::Error> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)?;

    let (video, audio): (Vec<_>, Vec<_>) = info
        .formats
        .into_iter()
        .partition(|format| has_video_codec(format.vcodec.as_deref()));

    Ok(VideoInfo {
        title: info.title,
        thumbnail: info.thumbnail,
        channel: info.channel.or(info.uploader),
        duration: info.duration,
        video_formats: video
            .into_iter()
            .map(|format| VideoFormat {
                id: format.format_id,
                ext: format.ext,
                resolution: format
                    .height
                    .map(|height| format!("{height}p"))
                    .unwrap_or_else(|| "unknown".to_string()),
                filesize: known(format.filesize),
            })
            .collect(),
        audio_formats: audio
            .into_iter()
            .map(|format| AudioFormat {
                id: format.format_id,
                ext: format.ext,
                abr: known(format.abr),
                filesize: known(format.filesize),
            })
            .collect(),
    })
}

fn media_item(node: &YtDlpInfo, fallback_id: String) -> Option<MediaItem> {
    let best_format_url = node
        .formats
        .iter()
        .rev()
        .find_map(|format| format.url.clone());
    let url = node.url.clone().or(best_format_url)?;

    let is_video = has_video_codec(node.vcodec.as_deref())
        || node
            .formats
            .iter()
            .any(|format| has_video_codec(format.vcodec.as_deref()))
        || node
            .ext
            .as_deref()
            .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext));

    Some(MediaItem {
        id: node.id.clone().unwrap_or(fallback_id),
        url,
        thumbnail: node.thumbnail.clone(),
        kind: if is_video {
            MediaKind::Video
        } else {
            MediaKind::Image
        },
    })
}

/// Parses extractor stdout for an Instagram post. Carousels arrive as a playlist whose entries
/// become the media list; a single post yields one item.
pub fn instagram_post(stdout: &[u8], shortcode: &str) -> Result<InstagramPost, serde_json::Error> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)?;
    let post_id = info.id.clone().unwrap_or_else(|| shortcode.to_string());

    let medias: Vec<MediaItem> = if info.entries.is_empty() {
        media_item(&info, post_id.clone()).into_iter().collect()
    } else {
        info.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| media_item(entry, format!("{post_id}_{}", index + 1)))
            .collect()
    };

    let thumbnail = info
        .thumbnail
        .clone()
        .or_else(|| medias.iter().find_map(|item| item.thumbnail.clone()));

    Ok(InstagramPost {
        id: post_id,
        title: info.title,
        thumbnail,
        count: medias.len(),
        medias,
    })
}
