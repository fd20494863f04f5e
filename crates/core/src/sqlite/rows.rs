//! Row-to-struct mappers. Column order follows the constants in
//! `repository::sql`; `offset` is the index of the first mapped column so
//! joined rows can be split between podcast and episode.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;

use crate::model::{Episode, Failure, FailureKind, Podcast, TranscriptLink};

fn timestamp_at(row: &Row, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(raw) = row.get::<_, Option<String>>(index)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

pub(crate) fn podcast_from_row(row: &Row, offset: usize) -> rusqlite::Result<Podcast> {
    Ok(Podcast {
        id: row.get(offset)?,
        url: row.get(offset + 1)?,
        slug: row.get(offset + 2)?,
        title: row.get(offset + 3)?,
        description: row.get(offset + 4)?,
        image_url: row.get(offset + 5)?,
        language: row.get(offset + 6)?,
        category: row.get(offset + 7)?,
        subcategory: row.get(offset + 8)?,
        last_processed: timestamp_at(row, offset + 9)?,
        created_at: timestamp_at(row, offset + 10)?,
        updated_at: timestamp_at(row, offset + 11)?,
        episodes: Vec::new(),
    })
}

pub(crate) fn episode_from_row(row: &Row, offset: usize) -> rusqlite::Result<Episode> {
    let failure_type: Option<String> = row.get(offset + 18)?;
    let failure = match timestamp_at(row, offset + 19)? {
        Some(failed_at) => Some(Failure {
            stage: row.get::<_, Option<String>>(offset + 16)?.unwrap_or_default(),
            reason: row.get::<_, Option<String>>(offset + 17)?.unwrap_or_default(),
            kind: failure_type
                .and_then(|kind| kind.parse().ok())
                .unwrap_or(FailureKind::Transient),
            failed_at,
        }),
        None => None,
    };

    Ok(Episode {
        id: row.get(offset)?,
        podcast_id: row.get(offset + 1)?,
        external_id: row.get(offset + 2)?,
        title: row.get(offset + 3)?,
        slug: row.get(offset + 4)?,
        description: row.get(offset + 5)?,
        description_html: row.get(offset + 6)?,
        pub_date: timestamp_at(row, offset + 7)?,
        audio_url: row.get(offset + 8)?,
        duration_seconds: row.get(offset + 9)?,
        image_url: row.get(offset + 10)?,
        audio_path: row.get(offset + 11)?,
        downsampled_audio_path: row.get(offset + 12)?,
        raw_transcript_path: row.get(offset + 13)?,
        clean_transcript_path: row.get(offset + 14)?,
        summary_path: row.get(offset + 15)?,
        failure,
        transcript_links: Vec::new(),
        created_at: timestamp_at(row, offset + 20)?,
        updated_at: timestamp_at(row, offset + 21)?,
    })
}

pub(crate) fn link_from_row(row: &Row) -> rusqlite::Result<TranscriptLink> {
    Ok(TranscriptLink {
        id: row.get(0)?,
        episode_id: row.get(1)?,
        url: row.get(2)?,
        mime_type: row.get(3)?,
        language: row.get(4)?,
        downloaded_path: row.get(5)?,
    })
}
