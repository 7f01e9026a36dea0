use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One catalog entry. Only `id` matters to the conversation core; the rest is
/// carried through for the render layer and for context prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub thumbnail: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Source of the video whitelist.
pub trait VideoCatalog: Send + Sync {
    fn all_videos(&self) -> Vec<VideoItem>;

    fn find(&self, id: &str) -> Option<VideoItem> {
        self.all_videos().into_iter().find(|video| video.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    videos: Vec<VideoItem>,
}

impl StaticCatalog {
    pub fn new(videos: Vec<VideoItem>) -> Self {
        Self { videos }
    }

    /// Reads a JSON array of [`VideoItem`]s.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read video catalog {:?}", path))?;
        let videos: Vec<VideoItem> = serde_json::from_str(&contents).context(format!(
            "Failed to parse video catalog. Payload preview: {}",
            contents.chars().take(300).collect::<String>()
        ))?;
        tracing::info!("Loaded {} videos from {:?}", videos.len(), path);
        Ok(Self::new(videos))
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}

impl VideoCatalog for StaticCatalog {
    fn all_videos(&self) -> Vec<VideoItem> {
        self.videos.clone()
    }

    fn find(&self, id: &str) -> Option<VideoItem> {
        self.videos.iter().find(|video| video.id == id).cloned()
    }
}
