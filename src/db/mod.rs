use crate::errors::{AppError, AppResult};
use crate::models::{
    DesiredLink, LinkRecord, LinkStatsBucket, ProfileEvent, ProfileFields, ProfileRecord, ProfileSource,
    StatsBucket, Testimonial,
};
use crate::store::ProfileStore;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const PROFILE_COLUMNS: &str = "id, username, name, bio, tags_json, source, created_at, updated_at";
const LINK_COLUMNS: &str =
    "id, username, url, link_group, name, icon, is_enabled, is_pinned, position, clicks, profile_id, created_at, updated_at";

/// Handle on the SQLite file. Cheap to share; every unit of work opens its
/// own [`StoreSession`].
#[derive(Debug)]
pub struct Database {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    pub fn new(path: &Path, busy_timeout: Duration) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.busy_timeout(busy_timeout)?;
        let _journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            db_path: path.to_path_buf(),
            busy_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Opens a connection scoped to one unit of work. It is closed when the
    /// session is dropped.
    pub fn session(&self) -> AppResult<StoreSession> {
        let conn = Connection::open(&self.db_path)
            .map_err(|error| AppError::Internal(format!("failed to open store: {}", error)))?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(StoreSession { conn })
    }
}

pub struct StoreSession {
    conn: Connection,
}

impl StoreSession {
    pub fn set_profile_source(&self, username: &str, source: ProfileSource) -> AppResult<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE profiles SET source = ?1, updated_at = ?2 WHERE username = ?3",
                params![source.as_str(), Utc::now(), username],
            )
            .map_err(write_failed(format!("set source for {}", username)))?;
        Ok(changed > 0)
    }

    pub fn count_links(&self) -> AppResult<u64> {
        count_rows(&self.conn, "links")
    }

    pub fn count_stats_rows(&self) -> AppResult<(u64, u64)> {
        Ok((count_rows(&self.conn, "stats")?, count_rows(&self.conn, "link_stats")?))
    }

    pub fn get_daily_stats(&self, day: NaiveDate) -> AppResult<Option<StatsBucket>> {
        self.conn
            .query_row(
                "SELECT date, clicks FROM stats WHERE date = ?1",
                [day],
                |row| {
                    Ok(StatsBucket {
                        date: row.get(0)?,
                        clicks: to_counter(row.get(1)?),
                    })
                },
            )
            .optional()
            .map_err(AppError::from)
    }

    pub fn get_link_daily_stats(&self, username: &str, url: &str, day: NaiveDate) -> AppResult<Option<LinkStatsBucket>> {
        self.conn
            .query_row(
                "SELECT username, url, date, clicks FROM link_stats WHERE username = ?1 AND url = ?2 AND date = ?3",
                params![username, url, day],
                |row| {
                    Ok(LinkStatsBucket {
                        username: row.get(0)?,
                        url: row.get(1)?,
                        date: row.get(2)?,
                        clicks: to_counter(row.get(3)?),
                    })
                },
            )
            .optional()
            .map_err(AppError::from)
    }

    pub fn list_testimonials(&self, profile_id: &str) -> AppResult<Vec<Testimonial>> {
        let mut statement = self.conn.prepare(
            "SELECT author, title, description, date, is_pinned FROM testimonials
             WHERE profile_id = ?1 ORDER BY author ASC",
        )?;
        let testimonials = statement
            .query_map([profile_id], |row| {
                Ok(Testimonial {
                    author: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    date: row.get(3)?,
                    is_pinned: row.get::<_, i32>(4)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(testimonials)
    }

    pub fn list_events(&self, profile_id: &str) -> AppResult<Vec<ProfileEvent>> {
        let mut statement = self.conn.prepare(
            "SELECT name, description, url, date_start, date_end, is_virtual, is_in_person, price_json
             FROM events WHERE profile_id = ?1 ORDER BY date_start ASC, name ASC",
        )?;
        let events = statement
            .query_map([profile_id], |row| {
                Ok(ProfileEvent {
                    name: row.get(0)?,
                    description: row.get(1)?,
                    url: row.get(2)?,
                    date_start: row.get(3)?,
                    date_end: row.get(4)?,
                    is_virtual: row.get::<_, i32>(5)? != 0,
                    is_in_person: row.get::<_, i32>(6)? != 0,
                    price: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub fn list_profile_link_ids(&self, profile_id: &str) -> AppResult<Vec<String>> {
        let mut statement = self
            .conn
            .prepare("SELECT link_id FROM profile_links WHERE profile_id = ?1 ORDER BY seq ASC")?;
        let ids = statement
            .query_map([profile_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

impl ProfileStore for StoreSession {
    fn begin_unit(&self) -> AppResult<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(write_failed("begin unit".to_string()))
    }

    fn commit_unit(&self) -> AppResult<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(write_failed("commit unit".to_string()))
    }

    fn rollback_unit(&self) {
        if let Err(error) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %error, "rollback failed");
        }
    }

    fn find_profile(&self, username: &str) -> AppResult<Option<ProfileRecord>> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT {} FROM profiles WHERE username = ?1", PROFILE_COLUMNS),
                [username],
                parse_profile_row,
            )
            .optional()?;

        match found {
            Some(mut profile) => {
                profile.links = self.list_profile_link_ids(&profile.id)?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    fn upsert_profile(&self, username: &str, fields: &ProfileFields) -> AppResult<ProfileRecord> {
        let now = Utc::now();
        let tags_json = serde_json::to_value(&fields.tags)?;

        self.conn
            .execute(
                "INSERT INTO profiles (id, username, name, bio, tags_json, source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'file', ?6, ?6)
                 ON CONFLICT(username) DO UPDATE SET
                   name = excluded.name,
                   bio = excluded.bio,
                   tags_json = excluded.tags_json,
                   source = 'file',
                   updated_at = excluded.updated_at
                 WHERE profiles.source <> 'database'",
                params![
                    Uuid::new_v4().to_string(),
                    username,
                    fields.name,
                    fields.bio,
                    tags_json,
                    now,
                ],
            )
            .map_err(write_failed(format!("upsert profile {}", username)))?;

        self.find_profile(username)?
            .ok_or_else(|| AppError::StoreWrite(format!("profile {} missing after upsert", username)))
    }

    fn replace_testimonials(&self, profile_id: &str, testimonials: &[Testimonial]) -> AppResult<()> {
        with_savepoint(&self.conn, "replace_testimonials", |conn| {
            conn.execute("DELETE FROM testimonials WHERE profile_id = ?1", [profile_id])?;
            for testimonial in testimonials {
                conn.execute(
                    "INSERT OR REPLACE INTO testimonials (profile_id, author, title, description, date, is_pinned)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        profile_id,
                        testimonial.author,
                        testimonial.title,
                        testimonial.description,
                        testimonial.date,
                        testimonial.is_pinned,
                    ],
                )?;
            }
            Ok(())
        })
        .map_err(write_failed(format!("replace testimonials of {}", profile_id)))
    }

    fn replace_events(&self, profile_id: &str, events: &[ProfileEvent]) -> AppResult<()> {
        with_savepoint(&self.conn, "replace_events", |conn| {
            conn.execute("DELETE FROM events WHERE profile_id = ?1", [profile_id])?;
            for event in events {
                conn.execute(
                    "INSERT OR REPLACE INTO events (
                       profile_id, name, description, url, date_start, date_end, is_virtual, is_in_person, price_json
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        profile_id,
                        event.name,
                        event.description,
                        event.url,
                        event.date_start,
                        event.date_end,
                        event.is_virtual,
                        event.is_in_person,
                        event.price,
                    ],
                )?;
            }
            Ok(())
        })
        .map_err(write_failed(format!("replace events of {}", profile_id)))
    }

    fn list_links(&self, username: &str) -> AppResult<Vec<LinkRecord>> {
        let mut statement = self.conn.prepare(&format!(
            "SELECT {} FROM links WHERE username = ?1 ORDER BY position ASC, created_at ASC",
            LINK_COLUMNS
        ))?;
        let links = statement
            .query_map([username], parse_link_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn find_link(&self, username: &str, url: &str) -> AppResult<Option<LinkRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM links WHERE username = ?1 AND url = ?2", LINK_COLUMNS),
                params![username, url],
                parse_link_row,
            )
            .optional()
            .map_err(AppError::from)
    }

    fn upsert_link(
        &self,
        username: &str,
        profile_id: &str,
        link: &DesiredLink,
        order: u32,
    ) -> AppResult<LinkRecord> {
        let now = Utc::now();
        self.conn
            .query_row(
                &format!(
                    "INSERT INTO links (
                       id, username, url, link_group, name, icon, is_enabled, is_pinned, position, clicks,
                       profile_id, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, 0, ?9, ?10, ?10)
                     ON CONFLICT(username, url) DO UPDATE SET
                       link_group = excluded.link_group,
                       name = excluded.name,
                       icon = excluded.icon,
                       is_enabled = 1,
                       is_pinned = excluded.is_pinned,
                       position = excluded.position,
                       profile_id = excluded.profile_id,
                       updated_at = excluded.updated_at
                     RETURNING {}",
                    LINK_COLUMNS
                ),
                params![
                    Uuid::new_v4().to_string(),
                    username,
                    link.url,
                    link.group,
                    link.name,
                    link.icon,
                    link.is_pinned,
                    order,
                    profile_id,
                    now,
                ],
                parse_link_row,
            )
            .map_err(write_failed(format!("upsert link {} for {}", link.url, username)))
    }

    fn set_profile_links(&self, profile_id: &str, link_ids: &[String]) -> AppResult<()> {
        with_savepoint(&self.conn, "set_profile_links", |conn| {
            conn.execute("DELETE FROM profile_links WHERE profile_id = ?1", [profile_id])?;
            for (seq, link_id) in link_ids.iter().enumerate() {
                conn.execute(
                    "INSERT INTO profile_links (profile_id, link_id, seq) VALUES (?1, ?2, ?3)",
                    params![profile_id, link_id, seq as i64],
                )?;
            }
            Ok(())
        })
        .map_err(write_failed(format!("set links of {}", profile_id)))
    }

    fn disable_link(&self, username: &str, url: &str) -> AppResult<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE links SET is_enabled = 0, updated_at = ?1 WHERE username = ?2 AND url = ?3",
                params![Utc::now(), username, url],
            )
            .map_err(write_failed(format!("disable link {} for {}", url, username)))?;
        Ok(changed > 0)
    }

    fn increment_link_clicks(&self, username: &str, url: &str) -> AppResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE links SET clicks = clicks + 1 WHERE username = ?1 AND url = ?2",
                params![username, url],
            )
            .map_err(write_failed(format!("increment link {} for {}", url, username)))?;
        if changed == 0 {
            return Err(AppError::StoreWrite(format!(
                "link {} for {} vanished before increment",
                url, username
            )));
        }
        Ok(())
    }

    fn increment_daily_stats(&self, day: NaiveDate) -> AppResult<()> {
        self.conn
            .execute(
                "INSERT INTO stats (date, clicks) VALUES (?1, 1)
                 ON CONFLICT(date) DO UPDATE SET clicks = clicks + 1",
                [day],
            )
            .map_err(write_failed(format!("increment platform stats for {}", day)))?;
        Ok(())
    }

    fn increment_link_daily_stats(&self, username: &str, url: &str, day: NaiveDate) -> AppResult<()> {
        self.conn
            .execute(
                "INSERT INTO link_stats (username, url, date, clicks) VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(username, url, date) DO UPDATE SET clicks = clicks + 1",
                params![username, url, day],
            )
            .map_err(write_failed(format!("increment link stats {} for {} on {}", url, username, day)))?;
        Ok(())
    }

    fn count_profiles(&self) -> AppResult<u64> {
        count_rows(&self.conn, "profiles")
    }
}

fn write_failed(context: String) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |error| AppError::StoreWrite(format!("{}: {}", context, error))
}

/// Runs `body` inside a savepoint so a multi-statement write lands whole or
/// not at all, without touching the surrounding unit of work.
fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    body: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
    match body(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))?;
            Ok(value)
        }
        Err(error) => {
            let _ = conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"));
            Err(error)
        }
    }
}

fn count_rows(conn: &Connection, table: &str) -> AppResult<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(1) FROM {}", table), [], |row| row.get(0))?;
    Ok(to_counter(count))
}

fn parse_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRecord> {
    let tags_raw: serde_json::Value = row.get(4)?;
    Ok(ProfileRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        name: row.get(2)?,
        bio: row.get(3)?,
        tags: serde_json::from_value::<BTreeSet<String>>(tags_raw)
            .map_err(|error| conversion_failure(format!("Invalid tags_json: {}", error)))?,
        source: parse_source(&row.get::<_, String>(5)?)?,
        links: Vec::new(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn parse_link_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkRecord> {
    Ok(LinkRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        url: row.get(2)?,
        group: row.get(3)?,
        name: row.get(4)?,
        icon: row.get(5)?,
        is_enabled: row.get::<_, i32>(6)? != 0,
        is_pinned: row.get::<_, i32>(7)? != 0,
        order: u32::try_from(row.get::<_, i64>(8)?).unwrap_or(0),
        clicks: to_counter(row.get(9)?),
        profile_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn parse_source(raw: &str) -> rusqlite::Result<ProfileSource> {
    match raw {
        "file" => Ok(ProfileSource::File),
        "database" => Ok(ProfileSource::Database),
        other => Err(conversion_failure(format!("Unknown profile source '{}'", other))),
    }
}

fn to_counter(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

fn conversion_failure(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}
