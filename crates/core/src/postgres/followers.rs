//! Users and the podcasts they follow.

use diesel::prelude::*;
use tracing::debug;

use super::rows::{IdRow, PodcastRow, UserRow};
use super::statement::{statement, Bind};
use super::PostgresRepository;
use crate::model::{Podcast, User};
use crate::repository::sql::{qualified, PODCAST_COLUMNS};
use crate::repository::{now, RepositoryError, Result};

const USER_COLUMNS: [&str; 4] = ["id", "email", "display_name", "created_at"];

impl PostgresRepository {
    /// Insert a user keyed by email, or update its display name.
    /// Returns the user id.
    pub fn create_user(&self, user: &User) -> Result<i64> {
        let email = user.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(RepositoryError::Constraint(
                "user email must not be empty".to_string(),
            ));
        }
        self.in_transaction(|conn| {
            statement(
                "INSERT INTO users (email, display_name, created_at) VALUES ({}, {}, {}) \
                 ON CONFLICT (email) DO UPDATE SET display_name = excluded.display_name \
                 WHERE users.display_name IS DISTINCT FROM excluded.display_name",
                [
                    Bind::from(email.as_str()),
                    Bind::from(user.display_name.clone()),
                    Bind::from(now()),
                ],
            )
            .into_query()
            .execute(conn)?;
            let id = statement("SELECT id FROM users WHERE email = {}", [email.as_str()])
                .into_query()
                .get_result::<IdRow>(conn)?
                .id;
            Ok(id)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim().to_lowercase();
        self.with_conn(|conn| {
            let row = statement(
                &format!(
                    "SELECT {} FROM users WHERE email = {{}}",
                    USER_COLUMNS.join(", ")
                ),
                [email.as_str()],
            )
            .into_query()
            .get_result::<UserRow>(conn)
            .optional()?;
            Ok(row.map(User::from))
        })
    }

    /// Returns `false` if the user already followed the podcast.
    pub fn follow_podcast(&self, user_id: i64, podcast_id: i64) -> Result<bool> {
        let inserted = self.with_conn(|conn| {
            Ok(statement(
                "INSERT INTO podcast_followers (user_id, podcast_id, followed_at) \
                 VALUES ({}, {}, {}) ON CONFLICT (user_id, podcast_id) DO NOTHING",
                [Bind::from(user_id), Bind::from(podcast_id), Bind::from(now())],
            )
            .into_query()
            .execute(conn)?)
        })?;
        if inserted > 0 {
            debug!(user_id, podcast_id, "Podcast followed");
        }
        Ok(inserted > 0)
    }

    /// Returns `false` if the user did not follow the podcast.
    pub fn unfollow_podcast(&self, user_id: i64, podcast_id: i64) -> Result<bool> {
        let deleted = self.with_conn(|conn| {
            Ok(statement(
                "DELETE FROM podcast_followers WHERE user_id = {} AND podcast_id = {}",
                [user_id, podcast_id],
            )
            .into_query()
            .execute(conn)?)
        })?;
        Ok(deleted > 0)
    }

    /// Podcasts a user follows, most recently followed first. Metadata only.
    pub fn get_followed_podcasts(&self, user_id: i64) -> Result<Vec<Podcast>> {
        self.with_conn(|conn| {
            let rows = statement(
                &format!(
                    "SELECT {} FROM podcasts p JOIN podcast_followers f ON f.podcast_id = p.id \
                     WHERE f.user_id = {{}} ORDER BY f.followed_at DESC, p.id DESC",
                    qualified("p", &PODCAST_COLUMNS)
                ),
                [user_id],
            )
            .into_query()
            .load::<PodcastRow>(conn)?;
            Ok(rows.into_iter().map(Podcast::from).collect())
        })
    }

    /// Users following a podcast, earliest follower first.
    pub fn get_podcast_followers(&self, podcast_id: i64) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let rows = statement(
                &format!(
                    "SELECT {} FROM users u JOIN podcast_followers f ON f.user_id = u.id \
                     WHERE f.podcast_id = {{}} ORDER BY f.followed_at ASC, u.id ASC",
                    qualified("u", &USER_COLUMNS)
                ),
                [podcast_id],
            )
            .into_query()
            .load::<UserRow>(conn)?;
            Ok(rows.into_iter().map(User::from).collect())
        })
    }
}
