//! Testing utilities shared by the backend test suites.
//!
//! [`contract`] holds backend-agnostic checks: each one takes a fresh, empty
//! repository and panics if the backend breaks the repository contract.
//! [`fixtures`] builds the podcasts and episodes those checks use.
//!
//! # Example
//!
//! ```rust,ignore
//! use podstore_core::sqlite::SqliteRepository;
//! use podstore_core::testing::contract;
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let repo = SqliteRepository::new(dir.path().join("test.db")).unwrap();
//! contract::failure_lifecycle(&repo);
//! ```

pub mod contract;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::model::{Episode, Podcast, TranscriptLink};

    /// Midnight UTC on the given day of January 2024.
    pub fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, n, 0, 0, 0).unwrap()
    }

    /// A podcast with a slug derived from its title and no episodes.
    pub fn podcast(url: &str, title: &str) -> Podcast {
        Podcast::new(url, title)
    }

    /// A discovered episode published on `day(pub_day)`.
    pub fn dated_episode(external_id: &str, title: &str, pub_day: u32) -> Episode {
        let mut episode = Episode::new(external_id, title);
        episode.pub_date = Some(day(pub_day));
        episode.audio_url = Some(format!("https://cdn.ex.com/{}.mp3", external_id));
        episode
    }

    /// Podcast with every metadata field set.
    pub fn full_podcast(url: &str, title: &str) -> Podcast {
        let mut podcast = Podcast::new(url, title);
        podcast.description = Some(format!("All about {}", title.to_lowercase()));
        podcast.image_url = Some("https://ex.com/cover.png".to_string());
        podcast.language = Some("en".to_string());
        podcast.category = Some("Technology".to_string());
        podcast.subcategory = Some("Software".to_string());
        podcast.last_processed = Some(day(20));
        podcast
    }

    /// Episode with every descriptive field and artifact path set.
    pub fn full_episode(external_id: &str, title: &str) -> Episode {
        let mut episode = dated_episode(external_id, title, 10);
        episode.description = Some("Plain text notes".to_string());
        episode.description_html = Some("<p>Plain text notes</p>".to_string());
        episode.duration_seconds = Some(3725);
        episode.image_url = Some("https://ex.com/episode.png".to_string());
        episode.audio_path = Some(format!("/data/audio/{}.mp3", external_id));
        episode.downsampled_audio_path = Some(format!("/data/audio/{}.16k.wav", external_id));
        episode.raw_transcript_path = Some(format!("/data/transcripts/{}.raw.json", external_id));
        episode.clean_transcript_path = Some(format!("/data/transcripts/{}.md", external_id));
        episode.summary_path = Some(format!("/data/summaries/{}.md", external_id));
        episode
    }

    pub fn transcript_link(url: &str) -> TranscriptLink {
        TranscriptLink::new(url, "text/vtt").with_language("en")
    }

    /// Two podcasts and five episodes spread across stages and dates.
    ///
    /// | podcast      | episode | title             | published | stage      |
    /// |--------------|---------|-------------------|-----------|------------|
    /// | Tech Talk    | a1      | Rust ownership    | Jan 1     | Downloaded |
    /// | Tech Talk    | a2      | Async in practice | Jan 3     | Summarized |
    /// | Tech Talk    | a3      | Bonus             | -         | Discovered |
    /// | Cooking Hour | b1      | Pasta night       | Jan 2     | Discovered |
    /// | Cooking Hour | b2      | Soup basics       | Jan 4     | Discovered |
    ///
    /// `b1` mentions "rust" in its description.
    pub fn catalog() -> Vec<Podcast> {
        let mut tech = podcast("https://tech.ex.com/feed.xml", "Tech Talk");
        let mut a1 = dated_episode("a1", "Rust ownership", 1);
        a1.audio_path = Some("/data/audio/a1.mp3".to_string());
        let mut a2 = dated_episode("a2", "Async in practice", 3);
        a2.summary_path = Some("/data/summaries/a2.md".to_string());
        let a3 = Episode::new("a3", "Bonus");
        tech.episodes = vec![a1, a2, a3];

        let mut cooking = podcast("https://cooking.ex.com/rss", "Cooking Hour");
        let mut b1 = dated_episode("b1", "Pasta night", 2);
        b1.description = Some("A rust-coloured sauce".to_string());
        let b2 = dated_episode("b2", "Soup basics", 4);
        cooking.episodes = vec![b1, b2];

        vec![tech, cooking]
    }

    /// One podcast whose episode titles exercise case folding, non-ASCII
    /// ordering and LIKE wildcards. `t<n>` is published on `day(n)`.
    ///
    /// | episode | title      |
    /// |---------|------------|
    /// | t1      | apple      |
    /// | t2      | Banana     |
    /// | t3      | Émile      |
    /// | t4      | éclair     |
    /// | t5      | zebra      |
    /// | t6      | 100% pure  |
    /// | t7      | 100 pure   |
    /// | t8      | snake_case |
    /// | t9      | make cake  |
    pub fn text_cases() -> Podcast {
        let mut show = podcast("https://text.ex.com/feed.xml", "Text Cases");
        let titles = [
            "apple",
            "Banana",
            "Émile",
            "éclair",
            "zebra",
            "100% pure",
            "100 pure",
            "snake_case",
            "make cake",
        ];
        show.episodes = titles
            .iter()
            .zip(1u32..)
            .map(|(title, n)| dated_episode(&format!("t{}", n), title, n))
            .collect();
        show
    }
}
