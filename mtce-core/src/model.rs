//! Wire/data-model types shared across the engine (spec §3).

use serde::{Deserialize, Serialize};

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "heic", "heif", "avif",
];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm", "mkv", "avi"];

pub fn is_image_extension(extension: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&extension)
}

pub fn is_video_extension(extension: &str) -> bool {
    VIDEO_EXTENSIONS.contains(&extension)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    File,
}

impl FileKind {
    /// The Backend's own label if it's one of `image`/`video`, else
    /// inferred from the (already-lowercased, dot-stripped) extension.
    pub fn classify(backend_label: Option<&str>, extension: &str) -> FileKind {
        match backend_label {
            Some("image") => return FileKind::Image,
            Some("video") => return FileKind::Video,
            _ => {}
        }
        if IMAGE_EXTENSIONS.contains(&extension) {
            FileKind::Image
        } else if VIDEO_EXTENSIONS.contains(&extension) {
            FileKind::Video
        } else {
            FileKind::File
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedFile {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub extension: String,
    pub size: u64,
    pub inline_url: String,
    pub download_url: String,
}

pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GalleryView,
    FileDownload,
    ZipDownload,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::GalleryView => "gallery_view",
            EventType::FileDownload => "file_download",
            EventType::ZipDownload => "zip_download",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "gallery_view" => Ok(EventType::GalleryView),
            "file_download" => Ok(EventType::FileDownload),
            "zip_download" => Ok(EventType::ZipDownload),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadEvent {
    pub id: i64,
    pub share_hash: String,
    pub event_type: EventType,
    pub file_path: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_backend_label_first() {
        assert_eq!(FileKind::classify(Some("image"), "mp4"), FileKind::Image);
        assert_eq!(FileKind::classify(Some("video"), "jpg"), FileKind::Video);
    }

    #[test]
    fn falls_back_to_extension() {
        assert_eq!(FileKind::classify(None, "png"), FileKind::Image);
        assert_eq!(FileKind::classify(None, "mkv"), FileKind::Video);
        assert_eq!(FileKind::classify(None, "txt"), FileKind::File);
    }

    #[test]
    fn extension_is_lowercased_without_dot() {
        assert_eq!(extension_of("Photo.JPG"), "jpg");
        assert_eq!(extension_of("noext"), "");
        assert_eq!(extension_of("a.b.c"), "c");
    }
}
