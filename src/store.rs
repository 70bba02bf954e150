//! Store primitives the reconciler and click recorder rely on.
//!
//! Implementations must make `upsert_*` and `increment_*` indivisible: the
//! core never takes its own locks around them.

use crate::errors::AppResult;
use crate::models::{
    DesiredLink, LinkRecord, ProfileEvent, ProfileFields, ProfileRecord, Testimonial,
};
use chrono::NaiveDate;

pub trait ProfileStore {
    /// Opens the per-username unit of work. Writes issued until
    /// `commit_unit` are invisible to concurrent units.
    fn begin_unit(&self) -> AppResult<()>;
    fn commit_unit(&self) -> AppResult<()>;
    fn rollback_unit(&self);

    fn find_profile(&self, username: &str) -> AppResult<Option<ProfileRecord>>;

    /// Creates or updates the profile with `source = file`. A row already
    /// flagged `database` is left as is and returned unchanged.
    fn upsert_profile(&self, username: &str, fields: &ProfileFields) -> AppResult<ProfileRecord>;

    fn replace_testimonials(&self, profile_id: &str, testimonials: &[Testimonial]) -> AppResult<()>;
    fn replace_events(&self, profile_id: &str, events: &[ProfileEvent]) -> AppResult<()>;

    /// Every link of the username, enabled or not, in link order.
    fn list_links(&self, username: &str) -> AppResult<Vec<LinkRecord>>;
    fn find_link(&self, username: &str, url: &str) -> AppResult<Option<LinkRecord>>;

    /// Creates or updates the link and marks it enabled at `order`.
    fn upsert_link(
        &self,
        username: &str,
        profile_id: &str,
        link: &DesiredLink,
        order: u32,
    ) -> AppResult<LinkRecord>;

    fn set_profile_links(&self, profile_id: &str, link_ids: &[String]) -> AppResult<()>;

    /// Returns false when no such link exists.
    fn disable_link(&self, username: &str, url: &str) -> AppResult<bool>;

    fn increment_link_clicks(&self, username: &str, url: &str) -> AppResult<()>;
    fn increment_daily_stats(&self, day: NaiveDate) -> AppResult<()>;
    fn increment_link_daily_stats(&self, username: &str, url: &str, day: NaiveDate) -> AppResult<()>;

    fn count_profiles(&self) -> AppResult<u64>;
}
