//! SQL fragments shared by the SQLite and PostgreSQL backends.
//!
//! Both engines accept the same predicate shapes; only case folding and
//! upsert change detection are spelled differently. Case folding is ASCII
//! only on both, as in the file backend, so every backend sorts and matches
//! text the same way.

use crate::model::{ArtifactKind, Stage};

use super::{EpisodeQuery, EpisodeSort, SortOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Sqlite,
    Postgres,
}

/// Podcast columns in the order the row mappers expect.
pub(crate) const PODCAST_COLUMNS: [&str; 12] = [
    "id",
    "url",
    "slug",
    "title",
    "description",
    "image_url",
    "language",
    "category",
    "subcategory",
    "last_processed",
    "created_at",
    "updated_at",
];

/// Podcast columns compared on upsert.
pub(crate) const PODCAST_CONTENT_COLUMNS: [&str; 8] = [
    "slug",
    "title",
    "description",
    "image_url",
    "language",
    "category",
    "subcategory",
    "last_processed",
];

/// Episode columns in the order the row mappers expect.
pub(crate) const EPISODE_COLUMNS: [&str; 22] = [
    "id",
    "podcast_id",
    "external_id",
    "title",
    "slug",
    "description",
    "description_html",
    "pub_date",
    "audio_url",
    "duration_seconds",
    "image_url",
    "audio_path",
    "downsampled_audio_path",
    "raw_transcript_path",
    "clean_transcript_path",
    "summary_path",
    "failed_at_stage",
    "failure_reason",
    "failure_type",
    "failed_at",
    "created_at",
    "updated_at",
];

/// Episode columns compared on upsert.
pub(crate) const EPISODE_CONTENT_COLUMNS: [&str; 17] = [
    "title",
    "slug",
    "description",
    "description_html",
    "pub_date",
    "audio_url",
    "duration_seconds",
    "image_url",
    "audio_path",
    "downsampled_audio_path",
    "raw_transcript_path",
    "clean_transcript_path",
    "summary_path",
    "failed_at_stage",
    "failure_reason",
    "failure_type",
    "failed_at",
];

pub(crate) const TRANSCRIPT_LINK_COLUMNS: [&str; 6] = [
    "id",
    "episode_id",
    "url",
    "mime_type",
    "language",
    "downloaded_path",
];

/// `alias.col, alias.col, ...`
pub(crate) fn qualified(alias: &str, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SET col = excluded.col, ...` body for an upsert.
pub(crate) fn excluded_assignments(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Null-safe "some column differs" condition for `ON CONFLICT ... WHERE`.
pub(crate) fn content_differs(dialect: Dialect, table: &str, columns: &[&str]) -> String {
    let op = match dialect {
        Dialect::Sqlite => "IS NOT",
        Dialect::Postgres => "IS DISTINCT FROM",
    };
    columns
        .iter()
        .map(|c| format!("{table}.{c} {op} excluded.{c}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// WHERE predicate selecting exactly the episodes whose derived stage is `stage`.
///
/// NULL and `''` both count as absent, matching [`Episode::state`]. Writes
/// store NULL, but rows from older databases may still hold empty strings.
///
/// An empty `alias` yields unqualified columns, as index definitions need.
///
/// [`Episode::state`]: crate::model::Episode::state
pub(crate) fn stage_predicate(stage: Stage, alias: &str) -> String {
    let column = |kind: &ArtifactKind| {
        if alias.is_empty() {
            kind.field_name().to_string()
        } else {
            format!("{}.{}", alias, kind.field_name())
        }
    };
    let mut parts: Vec<String> = Vec::new();
    if let Some(own) = ArtifactKind::ALL.iter().find(|kind| kind.stage() == stage) {
        parts.push(format!("{} <> ''", column(own)));
    }
    for kind in ArtifactKind::ALL.iter().filter(|kind| kind.stage() > stage) {
        parts.push(format!("COALESCE({}, '') = ''", column(kind)));
    }
    parts.join(" AND ")
}

/// Seven aggregate columns: one count per stage in pipeline order, then
/// failed, each aliased to the matching [`StateCounts`](super::StateCounts) field.
pub(crate) fn state_count_columns(alias: &str) -> String {
    let mut columns: Vec<String> = Stage::ALL
        .iter()
        .map(|stage| {
            format!(
                "COALESCE(SUM(CASE WHEN {} THEN 1 ELSE 0 END), 0) AS {}",
                stage_predicate(*stage, alias),
                stage.as_str()
            )
        })
        .collect();
    columns.push(format!(
        "COALESCE(SUM(CASE WHEN {}.failed_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS failed",
        alias
    ));
    columns.join(", ")
}

/// `ORDER BY` body matching [`EpisodeQuery::compare`].
pub(crate) fn order_by(dialect: Dialect, query: &EpisodeQuery, alias: &str) -> String {
    let dir = match query.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    match query.sort {
        EpisodeSort::PubDate => format!(
            "({a}.pub_date IS NULL) ASC, {a}.pub_date {dir}, {a}.id DESC",
            a = alias
        ),
        EpisodeSort::UpdatedAt => format!(
            "({a}.updated_at IS NULL) ASC, {a}.updated_at {dir}, {a}.id DESC",
            a = alias
        ),
        EpisodeSort::Title => format!(
            "{} {dir}, {a}.id DESC",
            ascii_lower(dialect, &format!("{}.title", alias)),
            a = alias
        ),
    }
}

/// `expr` with A-Z lowered and every other character left alone, compared
/// bytewise. SQLite's `LOWER` already folds ASCII only; PostgreSQL's would
/// follow the database locale.
pub(crate) fn ascii_lower(dialect: Dialect, expr: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("LOWER({})", expr),
        Dialect::Postgres => format!(
            "translate({}, 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz') COLLATE \"C\"",
            expr
        ),
    }
}

/// `column LIKE pattern`, ASCII case-insensitive. `pattern` must come from
/// [`like_pattern`].
pub(crate) fn like_match(dialect: Dialect, column: &str, pattern: &str) -> String {
    format!(
        "{} LIKE {} ESCAPE '\\'",
        ascii_lower(dialect, column),
        pattern
    )
}

/// `%text%`, ASCII-lowercased, with LIKE wildcards escaped using `\`.
pub(crate) fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for ch in search.to_ascii_lowercase().chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_predicates() {
        assert_eq!(
            stage_predicate(Stage::Discovered, "e"),
            "COALESCE(e.audio_path, '') = '' AND COALESCE(e.downsampled_audio_path, '') = '' AND \
             COALESCE(e.raw_transcript_path, '') = '' AND COALESCE(e.clean_transcript_path, '') = '' AND \
             COALESCE(e.summary_path, '') = ''"
        );
        assert_eq!(
            stage_predicate(Stage::Cleaned, "episodes"),
            "episodes.clean_transcript_path <> '' AND COALESCE(episodes.summary_path, '') = ''"
        );
        assert_eq!(stage_predicate(Stage::Summarized, "e"), "e.summary_path <> ''");
        assert_eq!(
            stage_predicate(Stage::Cleaned, ""),
            "clean_transcript_path <> '' AND COALESCE(summary_path, '') = ''"
        );
    }

    #[test]
    fn test_content_differs() {
        assert_eq!(
            content_differs(Dialect::Sqlite, "podcasts", &["title", "slug"]),
            "podcasts.title IS NOT excluded.title OR podcasts.slug IS NOT excluded.slug"
        );
        assert!(content_differs(Dialect::Postgres, "podcasts", &["title"])
            .contains("IS DISTINCT FROM"));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("Rust"), "%rust%");
        assert_eq!(like_pattern("ÉCLAIR"), "%Éclair%");
    }

    #[test]
    fn test_like_match() {
        assert_eq!(
            like_match(Dialect::Sqlite, "e.title", "?"),
            "LOWER(e.title) LIKE ? ESCAPE '\\'"
        );
        let postgres = like_match(Dialect::Postgres, "p.title", "$2");
        assert!(postgres.starts_with("translate(p.title, 'ABCDEFGHIJKLMNOPQRSTUVWXYZ'"));
        assert!(postgres.ends_with("COLLATE \"C\" LIKE $2 ESCAPE '\\'"));
    }

    #[test]
    fn test_order_by_title_folds_ascii_only() {
        let query = EpisodeQuery::new().with_sort(EpisodeSort::Title, SortOrder::Asc);
        assert_eq!(order_by(Dialect::Sqlite, &query, "e"), "LOWER(e.title) ASC, e.id DESC");
        let postgres = order_by(Dialect::Postgres, &query, "e");
        assert!(postgres.starts_with("translate(e.title, "));
        assert!(postgres.ends_with("COLLATE \"C\" ASC, e.id DESC"));
        assert!(!postgres.contains("LOWER("));
    }

    #[test]
    fn test_state_count_columns_has_seven_aggregates() {
        assert_eq!(state_count_columns("e").matches("SUM(").count(), 7);
    }
}
