//! Listing filters, sort keys, and aggregate result types.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Episode, ParseNameError, Podcast, Stage};

/// Default page size for [`EpisodeQuery`].
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Field used to order a cross-podcast episode listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeSort {
    #[default]
    PubDate,
    Title,
    UpdatedAt,
}

impl FromStr for EpisodeSort {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pub_date" | "published" | "date" => Ok(EpisodeSort::PubDate),
            "title" => Ok(EpisodeSort::Title),
            "updated_at" | "updated" => Ok(EpisodeSort::UpdatedAt),
            _ => Err(ParseNameError::new("sort field", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter, sort, and pagination for [`EpisodeRepository::list_episodes`].
///
/// Sorting puts episodes with no value for the sort key last in either
/// direction and breaks ties by episode id, newest first.
///
/// [`EpisodeRepository::list_episodes`]: super::EpisodeRepository::list_episodes
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeQuery {
    /// Case-insensitive substring match on episode title, episode
    /// description, or podcast title.
    pub search: Option<String>,
    pub podcast_id: Option<i64>,
    pub state: Option<Stage>,
    /// Inclusive lower bound on the publish date.
    pub published_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the publish date.
    pub published_before: Option<DateTime<Utc>>,
    pub sort: EpisodeSort,
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

/// Largest page a single `list_episodes` call returns.
pub const MAX_PAGE_SIZE: i64 = 1000;

impl Default for EpisodeQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl EpisodeQuery {
    pub fn new() -> Self {
        Self {
            search: None,
            podcast_id: None,
            state: None,
            published_after: None,
            published_before: None,
            sort: EpisodeSort::default(),
            order: SortOrder::default(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = if search.trim().is_empty() {
            None
        } else {
            Some(search)
        };
        self
    }

    pub fn with_podcast_id(mut self, podcast_id: i64) -> Self {
        self.podcast_id = Some(podcast_id);
        self
    }

    pub fn with_state(mut self, state: Stage) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_published_range(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.published_after = after;
        self.published_before = before;
        self
    }

    pub fn with_sort(mut self, sort: EpisodeSort, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_limit(&self) -> i64 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }

    /// In-memory evaluation of the filter, used by the file backend.
    /// SQL backends express the same predicates in their WHERE clauses.
    pub fn matches(&self, podcast: &Podcast, episode: &Episode) -> bool {
        if let Some(podcast_id) = self.podcast_id {
            if podcast.id != Some(podcast_id) {
                return false;
            }
        }
        if let Some(state) = self.state {
            if episode.state() != state {
                return false;
            }
        }
        if let Some(after) = self.published_after {
            match episode.pub_date {
                Some(date) if date >= after => {}
                _ => return false,
            }
        }
        if let Some(before) = self.published_before {
            match episode.pub_date {
                Some(date) if date < before => {}
                _ => return false,
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_ascii_lowercase();
            let hit = |text: Option<&str>| {
                text.is_some_and(|t| t.to_ascii_lowercase().contains(&needle))
            };
            if !(hit(Some(&episode.title))
                || hit(episode.description.as_deref())
                || hit(Some(&podcast.title)))
            {
                return false;
            }
        }
        true
    }

    /// In-memory ordering matching the SQL `ORDER BY` of the SQL backends.
    pub fn compare(&self, a: &Episode, b: &Episode) -> Ordering {
        let primary = match self.sort {
            EpisodeSort::PubDate => nulls_last(a.pub_date, b.pub_date, self.order),
            EpisodeSort::UpdatedAt => nulls_last(a.updated_at, b.updated_at, self.order),
            EpisodeSort::Title => directed(
                a.title.to_ascii_lowercase().cmp(&b.title.to_ascii_lowercase()),
                self.order,
            ),
        };
        primary.then_with(|| b.id.cmp(&a.id))
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => directed(x.cmp(&y), order),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// An episode together with the metadata of the podcast it belongs to.
/// The podcast's `episodes` list is left empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeWithPodcast {
    pub podcast: Podcast,
    pub episode: Episode,
}

/// One page of a cross-podcast listing plus the unpaginated total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodePage {
    pub items: Vec<EpisodeWithPodcast>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Number of episodes at each derived stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateCounts {
    pub discovered: i64,
    pub downloaded: i64,
    pub downsampled: i64,
    pub transcribed: i64,
    pub cleaned: i64,
    pub summarized: i64,
    /// Episodes carrying failure fields, regardless of stage.
    pub failed: i64,
}

impl StateCounts {
    pub fn get(&self, stage: Stage) -> i64 {
        match stage {
            Stage::Discovered => self.discovered,
            Stage::Downloaded => self.downloaded,
            Stage::Downsampled => self.downsampled,
            Stage::Transcribed => self.transcribed,
            Stage::Cleaned => self.cleaned,
            Stage::Summarized => self.summarized,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut i64 {
        match stage {
            Stage::Discovered => &mut self.discovered,
            Stage::Downloaded => &mut self.downloaded,
            Stage::Downsampled => &mut self.downsampled,
            Stage::Transcribed => &mut self.transcribed,
            Stage::Cleaned => &mut self.cleaned,
            Stage::Summarized => &mut self.summarized,
        }
    }

    pub fn total(&self) -> i64 {
        Stage::ALL.iter().map(|stage| self.get(*stage)).sum()
    }

    /// Tally a sequence of episodes.
    pub fn tally<'a>(episodes: impl IntoIterator<Item = &'a Episode>) -> Self {
        let mut counts = StateCounts::default();
        for episode in episodes {
            *counts.get_mut(episode.state()) += 1;
            if episode.is_failed() {
                counts.failed += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dated(id: i64, title: &str, month: Option<u32>) -> Episode {
        let mut episode = Episode::new(format!("ext-{}", id), title);
        episode.id = Some(id);
        episode.pub_date = month.map(|m| Utc.with_ymd_and_hms(2024, m, 1, 0, 0, 0).unwrap());
        episode
    }

    #[test]
    fn test_default_query() {
        let query = EpisodeQuery::new();
        assert_eq!(query.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(query.sort, EpisodeSort::PubDate);
        assert_eq!(query.order, SortOrder::Desc);
        assert_eq!(EpisodeQuery::new().with_limit(0).effective_limit(), 1);
        assert_eq!(EpisodeQuery::new().with_offset(-4).effective_offset(), 0);
    }

    #[test]
    fn test_blank_search_is_ignored() {
        assert_eq!(EpisodeQuery::new().with_search("   ").search, None);
    }

    #[test]
    fn test_matches_search_and_range() {
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Rust Radio");
        podcast.id = Some(1);
        let episode = dated(1, "Ownership Deep Dive", Some(3));

        assert!(EpisodeQuery::new().with_search("OWNERSHIP").matches(&podcast, &episode));
        assert!(EpisodeQuery::new().with_search("radio").matches(&podcast, &episode));
        assert!(!EpisodeQuery::new().with_search("python").matches(&podcast, &episode));
        assert!(!EpisodeQuery::new().with_podcast_id(2).matches(&podcast, &episode));

        let march = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        assert!(EpisodeQuery::new()
            .with_published_range(Some(march), Some(april))
            .matches(&podcast, &episode));
        assert!(!EpisodeQuery::new()
            .with_published_range(None, Some(march))
            .matches(&podcast, &episode));
        assert!(!EpisodeQuery::new()
            .with_published_range(Some(march), None)
            .matches(&podcast, &dated(2, "Undated", None)));
    }

    #[test]
    fn test_compare_puts_nulls_last_both_ways() {
        let mut episodes = vec![dated(1, "b", Some(1)), dated(2, "a", None), dated(3, "c", Some(5))];

        let desc = EpisodeQuery::new();
        episodes.sort_by(|a, b| desc.compare(a, b));
        let ids: Vec<_> = episodes.iter().map(|e| e.id.unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        let asc = EpisodeQuery::new().with_sort(EpisodeSort::PubDate, SortOrder::Asc);
        episodes.sort_by(|a, b| asc.compare(a, b));
        let ids: Vec<_> = episodes.iter().map(|e| e.id.unwrap()).collect();
        assert_eq!(ids, vec![1, 3, 2]);

        let by_title = EpisodeQuery::new().with_sort(EpisodeSort::Title, SortOrder::Asc);
        episodes.sort_by(|a, b| by_title.compare(a, b));
        let ids: Vec<_> = episodes.iter().map(|e| e.id.unwrap()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_state_counts_tally() {
        let mut downloaded = Episode::new("a", "A");
        downloaded.audio_path = Some("/a.mp3".to_string());
        let discovered = Episode::new("b", "B");
        let counts = StateCounts::tally([&downloaded, &discovered]);
        assert_eq!(counts.downloaded, 1);
        assert_eq!(counts.discovered, 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.failed, 0);
    }

    #[test]
    fn test_sort_parse() {
        assert_eq!("title".parse::<EpisodeSort>().unwrap(), EpisodeSort::Title);
        assert_eq!("updated".parse::<EpisodeSort>().unwrap(), EpisodeSort::UpdatedAt);
        assert!("length".parse::<EpisodeSort>().is_err());
    }
}
