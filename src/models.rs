use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileSource {
    File,
    Database,
}

impl ProfileSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Database => "database",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub id: String,
    pub username: String,
    pub name: String,
    pub bio: String,
    pub tags: BTreeSet<String>,
    pub source: ProfileSource,
    /// Ids of every link owned by this username, in link order.
    pub links: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub id: String,
    pub username: String,
    pub url: String,
    pub group: Option<String>,
    pub name: String,
    pub icon: Option<String>,
    pub is_enabled: bool,
    pub is_pinned: bool,
    pub order: u32,
    pub clicks: u64,
    pub profile_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatsBucket {
    pub date: NaiveDate,
    pub clicks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatsBucket {
    pub username: String,
    pub url: String,
    pub date: NaiveDate,
    pub clicks: u64,
}

/// Profile columns a file-sourced record is allowed to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFields {
    pub name: String,
    pub bio: String,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DesiredLink {
    pub url: String,
    pub name: String,
    pub icon: Option<String>,
    pub group: Option<String>,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Testimonial {
    /// Username of the person who wrote the testimonial.
    pub author: String,
    pub title: Option<String>,
    pub description: String,
    pub date: Option<String>,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEvent {
    pub name: String,
    pub description: String,
    pub url: Option<String>,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub is_virtual: bool,
    pub is_in_person: bool,
    pub price: Option<serde_json::Value>,
}

/// A validated profile as described by the declarative source.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredProfile {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub tags: BTreeSet<String>,
    /// `None` when the record has no `links` key at all.
    pub links: Option<Vec<DesiredLink>>,
    pub testimonials: Vec<Testimonial>,
    pub events: Vec<ProfileEvent>,
}

impl DesiredProfile {
    pub fn fields(&self) -> ProfileFields {
        ProfileFields {
            name: self.name.clone(),
            bio: self.bio.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbCounts {
    pub before: u64,
    pub after: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileCounts {
    pub basic: usize,
    pub full: usize,
    pub db: DbCounts,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileTally {
    pub upserted: usize,
    pub skipped_database: usize,
    pub failed: usize,
    pub links_enabled: usize,
    pub links_disabled: usize,
    pub write_errors: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReloadReport {
    pub profiles: ProfileCounts,
    pub details: ReconcileTally,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CounterOutcome {
    pub link: bool,
    pub daily: bool,
    pub link_daily: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClickOutcome {
    pub redirect_to: String,
    pub counters: CounterOutcome,
}
