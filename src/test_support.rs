use crate::db::{Database, StoreSession};
use crate::errors::{AppError, AppResult};
use crate::models::{DesiredLink, LinkRecord, ProfileEvent, ProfileFields, ProfileRecord, Testimonial};
use crate::store::ProfileStore;
use chrono::NaiveDate;
use std::sync::Mutex;
use std::time::Duration;

/// Env vars are process-wide; tests touching them hold this lock.
pub(crate) static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub(crate) fn open_store() -> (tempfile::TempDir, Database, StoreSession) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::new(&dir.path().join("test.db"), Duration::from_secs(5)).expect("db");
    let session = db.session().expect("session");
    (dir, db, session)
}

/// Wraps a real session and fails selected writes.
pub(crate) struct FlakyStore<'a> {
    inner: &'a StoreSession,
    profile_upserts: Vec<String>,
    link_upserts: Vec<String>,
    commits: bool,
    link_increments: bool,
    daily_increments: bool,
    link_daily_increments: bool,
}

impl<'a> FlakyStore<'a> {
    pub(crate) fn new(inner: &'a StoreSession) -> Self {
        Self {
            inner,
            profile_upserts: Vec::new(),
            link_upserts: Vec::new(),
            commits: false,
            link_increments: false,
            daily_increments: false,
            link_daily_increments: false,
        }
    }

    pub(crate) fn fail_profile_upsert(mut self, username: &str) -> Self {
        self.profile_upserts.push(username.to_string());
        self
    }

    pub(crate) fn fail_link_upsert(mut self, url: &str) -> Self {
        self.link_upserts.push(url.to_string());
        self
    }

    pub(crate) fn fail_commit(mut self) -> Self {
        self.commits = true;
        self
    }

    pub(crate) fn fail_link_increment(mut self) -> Self {
        self.link_increments = true;
        self
    }

    pub(crate) fn fail_daily_increment(mut self) -> Self {
        self.daily_increments = true;
        self
    }

    pub(crate) fn fail_link_daily_increment(mut self) -> Self {
        self.link_daily_increments = true;
        self
    }
}

fn injected(what: &str) -> AppError {
    AppError::StoreWrite(format!("injected failure: {}", what))
}

impl ProfileStore for FlakyStore<'_> {
    fn begin_unit(&self) -> AppResult<()> {
        self.inner.begin_unit()
    }

    fn commit_unit(&self) -> AppResult<()> {
        if self.commits {
            return Err(injected("commit"));
        }
        self.inner.commit_unit()
    }

    fn rollback_unit(&self) {
        self.inner.rollback_unit()
    }

    fn find_profile(&self, username: &str) -> AppResult<Option<ProfileRecord>> {
        self.inner.find_profile(username)
    }

    fn upsert_profile(&self, username: &str, fields: &ProfileFields) -> AppResult<ProfileRecord> {
        if self.profile_upserts.iter().any(|name| name == username) {
            return Err(injected(username));
        }
        self.inner.upsert_profile(username, fields)
    }

    fn replace_testimonials(&self, profile_id: &str, testimonials: &[Testimonial]) -> AppResult<()> {
        self.inner.replace_testimonials(profile_id, testimonials)
    }

    fn replace_events(&self, profile_id: &str, events: &[ProfileEvent]) -> AppResult<()> {
        self.inner.replace_events(profile_id, events)
    }

    fn list_links(&self, username: &str) -> AppResult<Vec<LinkRecord>> {
        self.inner.list_links(username)
    }

    fn find_link(&self, username: &str, url: &str) -> AppResult<Option<LinkRecord>> {
        self.inner.find_link(username, url)
    }

    fn upsert_link(
        &self,
        username: &str,
        profile_id: &str,
        link: &DesiredLink,
        order: u32,
    ) -> AppResult<LinkRecord> {
        if self.link_upserts.iter().any(|url| url == &link.url) {
            return Err(injected(&link.url));
        }
        self.inner.upsert_link(username, profile_id, link, order)
    }

    fn set_profile_links(&self, profile_id: &str, link_ids: &[String]) -> AppResult<()> {
        self.inner.set_profile_links(profile_id, link_ids)
    }

    fn disable_link(&self, username: &str, url: &str) -> AppResult<bool> {
        self.inner.disable_link(username, url)
    }

    fn increment_link_clicks(&self, username: &str, url: &str) -> AppResult<()> {
        if self.link_increments {
            return Err(injected("link clicks"));
        }
        self.inner.increment_link_clicks(username, url)
    }

    fn increment_daily_stats(&self, day: NaiveDate) -> AppResult<()> {
        if self.daily_increments {
            return Err(injected("daily stats"));
        }
        self.inner.increment_daily_stats(day)
    }

    fn increment_link_daily_stats(&self, username: &str, url: &str, day: NaiveDate) -> AppResult<()> {
        if self.link_daily_increments {
            return Err(injected("link daily stats"));
        }
        self.inner.increment_link_daily_stats(username, url, day)
    }

    fn count_profiles(&self) -> AppResult<u64> {
        self.inner.count_profiles()
    }
}
