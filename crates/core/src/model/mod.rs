//! Entity model: podcasts, episodes, the derived pipeline stage, and the
//! users who follow podcasts.

mod episode;
mod podcast;
mod slug;
mod stage;
mod user;

pub use episode::{episode_order, ArtifactKind, Episode, EpisodeUpdate, Failure, TranscriptLink};
pub use podcast::Podcast;
pub use slug::{slugify, MAX_SLUG_LEN};
pub use stage::{FailureKind, ParseNameError, Stage};
pub use user::User;
