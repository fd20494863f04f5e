//! Typed rows for raw SQL results, mapped by column name.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Nullable, Text, Timestamptz};

use crate::model::{Episode, Failure, FailureKind, Podcast, TranscriptLink, User};
use crate::repository::StateCounts;

#[derive(Debug, QueryableByName)]
pub(crate) struct PodcastRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    url: String,
    #[diesel(sql_type = Nullable<Text>)]
    slug: Option<String>,
    #[diesel(sql_type = Text)]
    title: String,
    #[diesel(sql_type = Nullable<Text>)]
    description: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    image_url: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    language: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    category: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    subcategory: Option<String>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    last_processed: Option<DateTime<Utc>>,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

impl From<PodcastRow> for Podcast {
    fn from(row: PodcastRow) -> Self {
        Podcast {
            id: Some(row.id),
            url: row.url,
            slug: row.slug,
            title: row.title,
            description: row.description,
            image_url: row.image_url,
            language: row.language,
            category: row.category,
            subcategory: row.subcategory,
            last_processed: row.last_processed,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
            episodes: Vec::new(),
        }
    }
}

#[derive(Debug, QueryableByName)]
pub(crate) struct EpisodeRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    podcast_id: i64,
    #[diesel(sql_type = Text)]
    external_id: String,
    #[diesel(sql_type = Text)]
    title: String,
    #[diesel(sql_type = Nullable<Text>)]
    slug: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    description: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    description_html: Option<String>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    pub_date: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<Text>)]
    audio_url: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    duration_seconds: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    image_url: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    audio_path: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    downsampled_audio_path: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    raw_transcript_path: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    clean_transcript_path: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    summary_path: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    failed_at_stage: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    failure_reason: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    failure_type: Option<String>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    failed_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

impl From<EpisodeRow> for Episode {
    fn from(row: EpisodeRow) -> Self {
        let failure = row.failed_at.map(|failed_at| Failure {
            stage: row.failed_at_stage.unwrap_or_default(),
            reason: row.failure_reason.unwrap_or_default(),
            kind: row
                .failure_type
                .and_then(|kind| kind.parse().ok())
                .unwrap_or(FailureKind::Transient),
            failed_at,
        });
        Episode {
            id: Some(row.id),
            podcast_id: Some(row.podcast_id),
            external_id: row.external_id,
            title: row.title,
            slug: row.slug,
            description: row.description,
            description_html: row.description_html,
            pub_date: row.pub_date,
            audio_url: row.audio_url,
            duration_seconds: row.duration_seconds,
            image_url: row.image_url,
            audio_path: row.audio_path,
            downsampled_audio_path: row.downsampled_audio_path,
            raw_transcript_path: row.raw_transcript_path,
            clean_transcript_path: row.clean_transcript_path,
            summary_path: row.summary_path,
            failure,
            transcript_links: Vec::new(),
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        }
    }
}

#[derive(Debug, QueryableByName)]
pub(crate) struct LinkRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    episode_id: i64,
    #[diesel(sql_type = Text)]
    url: String,
    #[diesel(sql_type = Text)]
    mime_type: String,
    #[diesel(sql_type = Nullable<Text>)]
    language: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    downloaded_path: Option<String>,
}

impl From<LinkRow> for TranscriptLink {
    fn from(row: LinkRow) -> Self {
        TranscriptLink {
            id: Some(row.id),
            episode_id: Some(row.episode_id),
            url: row.url,
            mime_type: row.mime_type,
            language: row.language,
            downloaded_path: row.downloaded_path,
        }
    }
}

#[derive(Debug, QueryableByName)]
pub(crate) struct UserRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    email: String,
    #[diesel(sql_type = Nullable<Text>)]
    display_name: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: Some(row.id),
            email: row.email,
            display_name: row.display_name,
            created_at: Some(row.created_at),
        }
    }
}

#[derive(Debug, QueryableByName)]
pub(crate) struct IdRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct FoundRow {
    #[diesel(sql_type = Bool)]
    pub found: bool,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct StateCountsRow {
    #[diesel(sql_type = BigInt)]
    discovered: i64,
    #[diesel(sql_type = BigInt)]
    downloaded: i64,
    #[diesel(sql_type = BigInt)]
    downsampled: i64,
    #[diesel(sql_type = BigInt)]
    transcribed: i64,
    #[diesel(sql_type = BigInt)]
    cleaned: i64,
    #[diesel(sql_type = BigInt)]
    summarized: i64,
    #[diesel(sql_type = BigInt)]
    failed: i64,
}

impl From<StateCountsRow> for StateCounts {
    fn from(row: StateCountsRow) -> Self {
        StateCounts {
            discovered: row.discovered,
            downloaded: row.downloaded,
            downsampled: row.downsampled,
            transcribed: row.transcribed,
            cleaned: row.cleaned,
            summarized: row.summarized,
            failed: row.failed,
        }
    }
}
