//! Attachment descriptors and filename inference.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Name used when neither the URL nor the MIME type yields anything usable.
pub const PLACEHOLDER_FILENAME: &str = "file";

/// MIME type -> file extension. Lookup is exact on the lowercased essence
/// (parameters such as `; codecs=opus` are ignored).
const EXTENSIONS: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.ms-excel", "xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("application/zip", "zip"),
    ("application/json", "json"),
    ("text/plain", "txt"),
    ("text/csv", "csv"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/webm", "webm"),
    ("video/3gpp", "3gp"),
    ("audio/mpeg", "mp3"),
    ("audio/ogg", "ogg"),
    ("audio/mp4", "m4a"),
    ("audio/aac", "aac"),
    ("audio/wav", "wav"),
    ("audio/webm", "weba"),
];

/// Type of media content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// Classify by MIME type family; anything that is not image, video or
    /// audio is sent as a document.
    pub fn from_mimetype(mimetype: &str) -> Self {
        let essence = mime_essence(mimetype);
        if essence.starts_with("image/") {
            MediaKind::Image
        } else if essence.starts_with("video/") {
            MediaKind::Video
        } else if essence.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }

    /// Get a display label for chat list preview
    pub fn display_label(&self) -> &'static str {
        match self {
            MediaKind::Image => "📷 Photo",
            MediaKind::Video => "🎥 Video",
            MediaKind::Audio => "🎤 Audio",
            MediaKind::Document => "📄 Document",
        }
    }
}

/// Attachment carried by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl Media {
    pub fn new(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            filename: None,
            mimetype: None,
            caption: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Fill in a filename when missing or blank.
    pub fn normalized(mut self) -> Self {
        let missing = self
            .filename
            .as_deref()
            .map(|name| name.trim().is_empty())
            .unwrap_or(true);
        if missing {
            self.filename = Some(infer_filename(&self.url, self.mimetype.as_deref()));
        }
        self
    }
}

fn mime_essence(mimetype: &str) -> String {
    mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn extension_for_mimetype(mimetype: &str) -> Option<&'static str> {
    let essence = mime_essence(mimetype);
    EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
}

/// Last non-empty segment of the URL path, percent-decoded. The host is
/// never returned as a segment.
pub fn last_path_segment(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    let after_scheme = match without_query.find("://") {
        Some(idx) => &without_query[idx + 3..],
        None => without_query,
    };
    let path = &after_scheme[after_scheme.find('/')?..];

    let segment = path.rsplit('/').next().filter(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment));
    let decoded = decoded.trim();
    (!decoded.is_empty()).then(|| decoded.to_string())
}

fn has_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Derive a download name for an attachment that arrived without one.
///
/// A URL segment that already carries an extension wins. Otherwise the
/// extension comes from the MIME table, appended to the segment or to
/// [`PLACEHOLDER_FILENAME`].
pub fn infer_filename(url: &str, mimetype: Option<&str>) -> String {
    let segment = last_path_segment(url);
    let extension = mimetype.and_then(extension_for_mimetype);

    match (segment, extension) {
        (Some(segment), _) if has_extension(&segment) => segment,
        (Some(segment), Some(ext)) => format!("{segment}.{ext}"),
        (Some(segment), None) => segment,
        (None, Some(ext)) => format!("{PLACEHOLDER_FILENAME}.{ext}"),
        (None, None) => PLACEHOLDER_FILENAME.to_string(),
    }
}
