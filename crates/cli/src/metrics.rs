//! Prometheus registry for the CLI.
//!
//! Registers the storage metrics of `podstore-core` plus gauges filled from
//! the store right before encoding.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{self, Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use podstore_core::{EpisodeRepository, Repository, Stage};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Episodes per derived stage, plus `failed`.
pub static EPISODES: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("podstore_episodes", "Episodes currently at each stage"),
        &["stage"], // the six pipeline stages, plus "failed"
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    for metric in podstore_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
    registry.register(Box::new(EPISODES.clone())).unwrap();
}

/// Refresh the store-derived gauges.
pub fn collect_store_metrics(repo: &dyn Repository) -> Result<()> {
    let counts = repo
        .count_by_state(None)
        .context("Failed to count episodes by stage")?;
    for stage in Stage::ALL {
        EPISODES
            .with_label_values(&[stage.as_str()])
            .set(counts.get(stage));
    }
    EPISODES.with_label_values(&["failed"]).set(counts.failed);
    Ok(())
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use podstore_core::{Episode, JsonFileRepository, Podcast, PodcastRepository};
    use tempfile::TempDir;

    #[test]
    fn test_encode_includes_stage_gauges() {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path().join("podcasts.json"));
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        podcast.episodes.push(Episode::new("ext-1", "One"));
        repo.save(&podcast).unwrap();

        collect_store_metrics(&repo).unwrap();
        let output = encode_metrics().unwrap();
        assert!(output.contains("podstore_episodes{stage=\"discovered\"} 1"));
        assert!(output.contains("podstore_writes_total"));
    }
}
