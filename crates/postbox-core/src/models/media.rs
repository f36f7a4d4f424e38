use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Generic,
    Voice,
    InstantVideo,
    Video,
    Sticker,
}

/// Original kind of media replaced by a tombstone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiredContentKind {
    Image,
    VideoMessage,
    VoiceMessage,
    File,
}

/// Message or story media. Payload bytes live in the media box and are
/// referenced through `resource_ids`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Media {
    Image {
        id: i64,
        #[serde(default)]
        resource_ids: Vec<String>,
    },
    File {
        id: i64,
        kind: FileKind,
        mime_type: String,
        #[serde(default)]
        size: Option<i64>,
        #[serde(default)]
        resource_ids: Vec<String>,
    },
    ExpiredContent {
        kind: ExpiredContentKind,
    },
}

impl Media {
    pub fn resource_ids(&self) -> &[String] {
        match self {
            Media::Image { resource_ids, .. } | Media::File { resource_ids, .. } => resource_ids,
            Media::ExpiredContent { .. } => &[],
        }
    }

    /// Tombstone standing in for this media after an auto-clear, or `None`
    /// when the media is already a tombstone.
    pub fn expired_placeholder(&self) -> Option<Media> {
        let kind = match self {
            Media::Image { .. } => ExpiredContentKind::Image,
            Media::File { kind, .. } => match kind {
                FileKind::InstantVideo => ExpiredContentKind::VideoMessage,
                FileKind::Voice => ExpiredContentKind::VoiceMessage,
                _ => ExpiredContentKind::File,
            },
            Media::ExpiredContent { .. } => return None,
        };
        Some(Media::ExpiredContent { kind })
    }
}
