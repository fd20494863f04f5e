//! Raw SQL with `$n` placeholders and the values bound to them.

use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Array, BigInt, Nullable, Text, Timestamptz};
use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};

pub(crate) type BoxedQuery = BoxedSqlQuery<'static, Pg, SqlQuery>;

/// A value bound to one placeholder. Scalars are always bound as nullable
/// so `None` and `Some` share one code path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bind {
    Int(Option<i64>),
    Text(Option<String>),
    Time(Option<DateTime<Utc>>),
    Ints(Vec<i64>),
    TextArray(Vec<String>),
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d+)").unwrap());

impl From<i64> for Bind {
    fn from(v: i64) -> Self {
        Bind::Int(Some(v))
    }
}

impl From<Option<i64>> for Bind {
    fn from(v: Option<i64>) -> Self {
        Bind::Int(v)
    }
}

impl From<&str> for Bind {
    fn from(v: &str) -> Self {
        Bind::Text(Some(v.to_string()))
    }
}

impl From<String> for Bind {
    fn from(v: String) -> Self {
        Bind::Text(Some(v))
    }
}

impl From<Option<&str>> for Bind {
    fn from(v: Option<&str>) -> Self {
        Bind::Text(v.map(str::to_string))
    }
}

impl From<Option<String>> for Bind {
    fn from(v: Option<String>) -> Self {
        Bind::Text(v)
    }
}

impl From<DateTime<Utc>> for Bind {
    fn from(v: DateTime<Utc>) -> Self {
        Bind::Time(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for Bind {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        Bind::Time(v)
    }
}

impl From<Vec<i64>> for Bind {
    fn from(v: Vec<i64>) -> Self {
        Bind::Ints(v)
    }
}

impl From<Vec<String>> for Bind {
    fn from(v: Vec<String>) -> Self {
        Bind::TextArray(v)
    }
}

/// SQL text built incrementally, numbering placeholders as values are added.
#[derive(Debug, Default)]
pub(crate) struct Statement {
    text: String,
    binds: Vec<Bind>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            binds: Vec::new(),
        }
    }

    /// Statement whose text already holds `$1..$n` for `binds`.
    pub fn with_binds(text: impl Into<String>, binds: Vec<Bind>) -> Self {
        Self {
            text: text.into(),
            binds,
        }
    }

    /// Append another statement, renumbering its placeholders to follow ours.
    pub fn append(&mut self, other: Statement) -> &mut Self {
        let shift = self.binds.len();
        let text = PLACEHOLDER.replace_all(&other.text, |caps: &Captures| {
            let n: usize = caps[1].parse().unwrap_or(0);
            format!("${}", n + shift)
        });
        self.push(&text);
        self.binds.extend(other.binds);
        self
    }

    /// Register a value and return its placeholder (`$1`, `$2`, ...).
    pub fn param(&mut self, value: impl Into<Bind>) -> String {
        self.binds.push(value.into());
        format!("${}", self.binds.len())
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        if !self.text.is_empty() && !sql.starts_with(' ') {
            self.text.push(' ');
        }
        self.text.push_str(sql);
        self
    }

    /// Append `sql`, replacing each `{}` with a placeholder for the next value.
    pub fn push_with<I, B>(&mut self, sql: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bind>,
    {
        let mut values = values.into_iter();
        let mut rendered = String::with_capacity(sql.len());
        let mut pieces = sql.split("{}").peekable();
        while let Some(piece) = pieces.next() {
            rendered.push_str(piece);
            if pieces.peek().is_some() {
                if let Some(value) = values.next() {
                    let placeholder = self.param(value);
                    rendered.push_str(&placeholder);
                }
            }
        }
        self.push(&rendered)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_query(self) -> BoxedQuery {
        let mut query = diesel::sql_query(self.text).into_boxed::<Pg>();
        for bind in self.binds {
            query = match bind {
                Bind::Int(v) => query.bind::<Nullable<BigInt>, _>(v),
                Bind::Text(v) => query.bind::<Nullable<Text>, _>(v),
                Bind::Time(v) => query.bind::<Nullable<Timestamptz>, _>(v),
                Bind::Ints(v) => query.bind::<Array<BigInt>, _>(v),
                Bind::TextArray(v) => query.bind::<Array<Text>, _>(v),
            };
        }
        query
    }
}

/// Build a statement from a template with `{}` placeholders.
pub(crate) fn statement<I, B>(sql: &str, values: I) -> Statement
where
    I: IntoIterator<Item = B>,
    B: Into<Bind>,
{
    let mut stmt = Statement::default();
    stmt.push_with(sql, values);
    stmt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_numbered_in_order() {
        let mut stmt = Statement::new("SELECT id FROM episodes WHERE");
        let first = stmt.param(4i64);
        let second = stmt.param("ext-1");
        stmt.push(&format!("podcast_id = {} AND external_id = {}", first, second));
        assert_eq!(
            stmt.text(),
            "SELECT id FROM episodes WHERE podcast_id = $1 AND external_id = $2"
        );
    }

    #[test]
    fn test_push_with_fills_templates() {
        let mut stmt = statement("SELECT id FROM podcasts WHERE url = {}", ["https://ex.com"]);
        stmt.push_with("LIMIT {} OFFSET {}", [10i64, 20i64]);
        assert_eq!(
            stmt.text(),
            "SELECT id FROM podcasts WHERE url = $1 LIMIT $2 OFFSET $3"
        );
        assert_eq!(stmt.binds[1], Bind::Int(Some(10)));
    }

    #[test]
    fn test_append_renumbers_placeholders() {
        let mut stmt = statement("SELECT id FROM episodes WHERE podcast_id = {}", [7i64]);
        stmt.append(statement("AND slug = {} LIMIT {}", [
            Bind::from("intro"),
            Bind::from(1i64),
        ]));
        assert_eq!(
            stmt.text(),
            "SELECT id FROM episodes WHERE podcast_id = $1 AND slug = $2 LIMIT $3"
        );
        assert_eq!(stmt.binds.len(), 3);
    }
}
