//! Episode entity, artifact paths, and field patches.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{slugify, FailureKind, Stage};

/// The five artifacts a pipeline stage can produce for an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Audio,
    DownsampledAudio,
    RawTranscript,
    CleanTranscript,
    Summary,
}

impl ArtifactKind {
    /// Artifacts in pipeline order.
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Audio,
        ArtifactKind::DownsampledAudio,
        ArtifactKind::RawTranscript,
        ArtifactKind::CleanTranscript,
        ArtifactKind::Summary,
    ];

    /// Stage reached once this artifact exists.
    pub fn stage(&self) -> Stage {
        match self {
            ArtifactKind::Audio => Stage::Downloaded,
            ArtifactKind::DownsampledAudio => Stage::Downsampled,
            ArtifactKind::RawTranscript => Stage::Transcribed,
            ArtifactKind::CleanTranscript => Stage::Cleaned,
            ArtifactKind::Summary => Stage::Summarized,
        }
    }

    /// Column / field name used by every backend.
    pub fn field_name(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio_path",
            ArtifactKind::DownsampledAudio => "downsampled_audio_path",
            ArtifactKind::RawTranscript => "raw_transcript_path",
            ArtifactKind::CleanTranscript => "clean_transcript_path",
            ArtifactKind::Summary => "summary_path",
        }
    }
}

/// Why an episode stopped progressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Name of the processing step that gave up (e.g. "download").
    pub stage: String,
    pub reason: String,
    pub kind: FailureKind,
    pub failed_at: DateTime<Utc>,
}

/// A transcript advertised by the source feed, possibly not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<i64>,
    pub url: String,
    pub mime_type: String,
    #[serde(default)]
    pub language: Option<String>,
    /// `None` until the transcript has been downloaded.
    #[serde(default)]
    pub downloaded_path: Option<String>,
}

impl TranscriptLink {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            id: None,
            episode_id: None,
            url: url.into(),
            mime_type: mime_type.into(),
            language: None,
            downloaded_path: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn is_downloaded(&self) -> bool {
        self.downloaded_path.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// A single episode of a podcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub podcast_id: Option<i64>,
    /// Identifier supplied by the source feed; unique within a podcast.
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_html: Option<String>,
    #[serde(default)]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub downsampled_audio_path: Option<String>,
    #[serde(default)]
    pub raw_transcript_path: Option<String>,
    #[serde(default)]
    pub clean_transcript_path: Option<String>,
    #[serde(default)]
    pub summary_path: Option<String>,

    #[serde(default)]
    pub failure: Option<Failure>,
    #[serde(default)]
    pub transcript_links: Vec<TranscriptLink>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Episode {
    /// Create a freshly discovered episode with a slug derived from the title.
    pub fn new(external_id: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: None,
            podcast_id: None,
            external_id: external_id.into(),
            slug: slugify(&title),
            title,
            description: None,
            description_html: None,
            pub_date: None,
            audio_url: None,
            duration_seconds: None,
            image_url: None,
            audio_path: None,
            downsampled_audio_path: None,
            raw_transcript_path: None,
            clean_transcript_path: None,
            summary_path: None,
            failure: None,
            transcript_links: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Current pipeline stage, derived from which artifact paths are set.
    ///
    /// Scans from the last artifact backwards and returns the first one that
    /// exists. Earlier artifacts are not checked, so a gap (e.g. a clean
    /// transcript without downsampled audio) resolves to the furthest stage.
    pub fn state(&self) -> Stage {
        ArtifactKind::ALL
            .iter()
            .rev()
            .find(|kind| self.has_artifact(**kind))
            .map(|kind| kind.stage())
            .unwrap_or(Stage::Discovered)
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Audio => self.audio_path.as_deref(),
            ArtifactKind::DownsampledAudio => self.downsampled_audio_path.as_deref(),
            ArtifactKind::RawTranscript => self.raw_transcript_path.as_deref(),
            ArtifactKind::CleanTranscript => self.clean_transcript_path.as_deref(),
            ArtifactKind::Summary => self.summary_path.as_deref(),
        }
    }

    /// Empty strings count as absent.
    pub fn has_artifact(&self, kind: ArtifactKind) -> bool {
        self.artifact(kind).is_some_and(|path| !path.is_empty())
    }

    fn artifact_mut(&mut self, kind: ArtifactKind) -> &mut Option<String> {
        match kind {
            ArtifactKind::Audio => &mut self.audio_path,
            ArtifactKind::DownsampledAudio => &mut self.downsampled_audio_path,
            ArtifactKind::RawTranscript => &mut self.raw_transcript_path,
            ArtifactKind::CleanTranscript => &mut self.clean_transcript_path,
            ArtifactKind::Summary => &mut self.summary_path,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Compare the stored content of two episodes, ignoring store-managed
    /// bookkeeping (ids, timestamps) and transcript links, which live in
    /// their own table.
    pub fn same_content(&self, other: &Episode) -> bool {
        self.external_id == other.external_id
            && self.title == other.title
            && self.slug == other.slug
            && self.description == other.description
            && self.description_html == other.description_html
            && self.pub_date == other.pub_date
            && self.audio_url == other.audio_url
            && self.duration_seconds == other.duration_seconds
            && self.image_url == other.image_url
            && self.audio_path == other.audio_path
            && self.downsampled_audio_path == other.downsampled_audio_path
            && self.raw_transcript_path == other.raw_transcript_path
            && self.clean_transcript_path == other.clean_transcript_path
            && self.summary_path == other.summary_path
            && self.failure == other.failure
    }
}

/// Order used for a podcast's episode list: newest publish date first,
/// undated episodes last, ties broken by newest id.
pub fn episode_order(a: &Episode, b: &Episode) -> Ordering {
    match (a.pub_date, b.pub_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.id.cmp(&a.id))
}

/// Targeted patch of episode fields.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeUpdate {
    pub title: Option<String>,
    pub slug: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub description_html: Option<Option<String>>,
    pub pub_date: Option<Option<DateTime<Utc>>>,
    pub audio_url: Option<Option<String>>,
    pub duration_seconds: Option<Option<i64>>,
    pub image_url: Option<Option<String>>,
    pub audio_path: Option<Option<String>>,
    pub downsampled_audio_path: Option<Option<String>>,
    pub raw_transcript_path: Option<Option<String>>,
    pub clean_transcript_path: Option<Option<String>>,
    pub summary_path: Option<Option<String>>,
}

impl EpisodeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that records a single artifact, the usual call from a pipeline stage.
    pub fn artifact(kind: ArtifactKind, path: impl Into<String>) -> Self {
        Self::new().with_artifact(kind, Some(path.into()))
    }

    pub fn with_artifact(mut self, kind: ArtifactKind, path: Option<String>) -> Self {
        let slot = match kind {
            ArtifactKind::Audio => &mut self.audio_path,
            ArtifactKind::DownsampledAudio => &mut self.downsampled_audio_path,
            ArtifactKind::RawTranscript => &mut self.raw_transcript_path,
            ArtifactKind::CleanTranscript => &mut self.clean_transcript_path,
            ArtifactKind::Summary => &mut self.summary_path,
        };
        *slot = Some(path);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_slug(mut self, slug: Option<String>) -> Self {
        self.slug = Some(slug);
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_pub_date(mut self, pub_date: Option<DateTime<Utc>>) -> Self {
        self.pub_date = Some(pub_date);
        self
    }

    pub fn with_audio_url(mut self, audio_url: Option<String>) -> Self {
        self.audio_url = Some(audio_url);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch in place. Returns whether any field actually changed.
    pub fn apply(&self, episode: &mut Episode) -> bool {
        let mut changed = false;
        changed |= patch(&mut episode.title, &self.title);
        changed |= patch(&mut episode.slug, &self.slug);
        changed |= patch(&mut episode.description, &self.description);
        changed |= patch(&mut episode.description_html, &self.description_html);
        changed |= patch(&mut episode.pub_date, &self.pub_date);
        changed |= patch(&mut episode.audio_url, &self.audio_url);
        changed |= patch(&mut episode.duration_seconds, &self.duration_seconds);
        changed |= patch(&mut episode.image_url, &self.image_url);
        for kind in ArtifactKind::ALL {
            let value = match kind {
                ArtifactKind::Audio => &self.audio_path,
                ArtifactKind::DownsampledAudio => &self.downsampled_audio_path,
                ArtifactKind::RawTranscript => &self.raw_transcript_path,
                ArtifactKind::CleanTranscript => &self.clean_transcript_path,
                ArtifactKind::Summary => &self.summary_path,
            };
            changed |= patch(episode.artifact_mut(kind), value);
        }
        changed
    }
}

fn patch<T: PartialEq + Clone>(slot: &mut T, value: &Option<T>) -> bool {
    match value {
        Some(v) if slot != v => {
            *slot = v.clone();
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn with_paths(mask: u8) -> Episode {
        let mut episode = Episode::new("ext", "Title");
        for (bit, kind) in ArtifactKind::ALL.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                *episode.artifact_mut(*kind) = Some(format!("/data/{}", kind.field_name()));
            }
        }
        episode
    }

    #[test]
    fn test_state_is_total_and_furthest() {
        for mask in 0u8..32 {
            let episode = with_paths(mask);
            let expected = ArtifactKind::ALL
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, kind)| kind.stage())
                .max()
                .unwrap_or(Stage::Discovered);
            assert_eq!(episode.state(), expected, "mask {:05b}", mask);
        }
    }

    #[test]
    fn test_state_progression() {
        let mut episode = Episode::new("ext-1", "Test");
        episode.audio_url = Some("https://ex.com/a.mp3".to_string());
        assert_eq!(episode.state(), Stage::Discovered);

        episode.audio_path = Some("/audio/a.mp3".to_string());
        assert_eq!(episode.state(), Stage::Downloaded);

        // Gap: no downsampled audio or raw transcript.
        episode.clean_transcript_path = Some("/clean/a.txt".to_string());
        assert_eq!(episode.state(), Stage::Cleaned);
    }

    #[test]
    fn test_empty_path_counts_as_absent() {
        let mut episode = Episode::new("ext", "Title");
        episode.audio_path = Some("/audio/a.mp3".to_string());
        episode.summary_path = Some(String::new());
        assert_eq!(episode.state(), Stage::Downloaded);
    }

    #[test]
    fn test_failure_does_not_change_state() {
        let mut episode = with_paths(0b00011);
        let before = episode.state();
        episode.failure = Some(Failure {
            stage: "transcribe".to_string(),
            reason: "model crashed".to_string(),
            kind: FailureKind::Transient,
            failed_at: Utc::now(),
        });
        assert_eq!(episode.state(), before);
        assert!(episode.is_failed());
    }

    #[test]
    fn test_update_apply_reports_changes() {
        let mut episode = Episode::new("ext", "Title");
        let update = EpisodeUpdate::artifact(ArtifactKind::Audio, "/audio/x.mp3");
        assert!(update.apply(&mut episode));
        assert_eq!(episode.audio_path.as_deref(), Some("/audio/x.mp3"));

        // Same value again is a no-op.
        assert!(!update.apply(&mut episode));

        let clear = EpisodeUpdate::new().with_artifact(ArtifactKind::Audio, None);
        assert!(clear.apply(&mut episode));
        assert_eq!(episode.audio_path, None);
        assert!(EpisodeUpdate::new().is_empty());
    }

    #[test]
    fn test_same_content_ignores_bookkeeping() {
        let mut a = Episode::new("ext", "Title");
        let mut b = a.clone();
        b.id = Some(9);
        b.podcast_id = Some(2);
        b.updated_at = Some(Utc::now());
        assert!(a.same_content(&b));
        a.raw_transcript_path = Some("/raw.txt".to_string());
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_episode_order() {
        let mut older = Episode::new("a", "A");
        older.pub_date = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut newer = Episode::new("b", "B");
        newer.pub_date = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let undated = Episode::new("c", "C");

        let mut list = vec![undated, older, newer];
        list.sort_by(episode_order);
        let ids: Vec<_> = list.iter().map(|e| e.external_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
