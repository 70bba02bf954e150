//! Declarative profile source.
//!
//! Profiles live in `<data>/<username>.json`; testimonials and events for a
//! user live in `<data>/<username>/testimonials/*.json` and
//! `<data>/<username>/events/*.json`.

use crate::errors::{AppError, AppResult};
use crate::models::{DesiredLink, DesiredProfile, ProfileEvent, Testimonial};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,38}$").expect("valid regex"));

pub trait SourceLoader: Send + Sync {
    fn load(&self) -> SourceLoad;
}

#[derive(Debug, Default)]
pub struct SourceLoad {
    /// Records that parsed at all.
    pub basic: usize,
    /// Records that also validated and were enriched.
    pub profiles: Vec<DesiredProfile>,
    pub errors: Vec<AppError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    name: Option<String>,
    #[serde(default)]
    bio: String,
    #[serde(default)]
    tags: Vec<String>,
    links: Option<Vec<RawLink>>,
    #[serde(default)]
    socials: Vec<RawSocial>,
    /// Usernames whose testimonials are pinned.
    #[serde(default)]
    testimonials: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLink {
    #[serde(default)]
    url: String,
    name: Option<String>,
    icon: Option<String>,
    group: Option<String>,
    is_pinned: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawSocial {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawTestimonial {
    title: Option<String>,
    description: String,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    name: String,
    #[serde(default)]
    description: String,
    url: Option<String>,
    date: Option<RawEventDate>,
    #[serde(default)]
    is_virtual: bool,
    #[serde(default)]
    is_in_person: bool,
    price: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawEventDate {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileProfileSource {
    data_dir: PathBuf,
}

impl FileProfileSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn profile_files(&self) -> AppResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.data_dir).map_err(|error| AppError::Io(error.to_string()))? {
            let entry = entry.map_err(|error| AppError::Io(error.to_string()))?;
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|value| value.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn testimonials(&self, username: &str, pinned: &HashSet<&str>) -> Vec<Testimonial> {
        let dir = self.data_dir.join(username).join("testimonials");
        read_dir_records::<RawTestimonial>(&dir)
            .into_iter()
            .map(|(author, raw)| Testimonial {
                is_pinned: pinned.contains(author.as_str()),
                author,
                title: raw.title,
                description: raw.description,
                date: raw.date,
            })
            .collect()
    }

    fn events(&self, username: &str) -> Vec<ProfileEvent> {
        let dir = self.data_dir.join(username).join("events");
        read_dir_records::<RawEvent>(&dir)
            .into_iter()
            .map(|(_, raw)| {
                let (date_start, date_end) = raw
                    .date
                    .map(|date| (date.start, date.end))
                    .unwrap_or((None, None));
                ProfileEvent {
                    name: raw.name,
                    description: raw.description,
                    url: raw.url,
                    date_start,
                    date_end,
                    is_virtual: raw.is_virtual,
                    is_in_person: raw.is_in_person,
                    price: raw.price,
                }
            })
            .collect()
    }
}

impl SourceLoader for FileProfileSource {
    fn load(&self) -> SourceLoad {
        let mut load = SourceLoad::default();

        let files = match self.profile_files() {
            Ok(files) => files,
            Err(error) => {
                tracing::error!(path = %self.data_dir.to_string_lossy(), error = %error, "failed to list profiles");
                load.errors.push(AppError::Load(format!(
                    "failed to list profiles in {}: {}",
                    self.data_dir.display(),
                    error
                )));
                return load;
            }
        };

        for path in files {
            let raw = match read_json_file::<RawProfile>(&path) {
                Ok(raw) => raw,
                Err(error) => {
                    tracing::warn!(path = %path.to_string_lossy(), error = %error, "skipping malformed profile file");
                    load.errors.push(error);
                    continue;
                }
            };
            load.basic += 1;

            let username = file_stem(&path);
            match validate_profile(&username, raw) {
                Ok((mut profile, pinned)) => {
                    let pinned: HashSet<&str> = pinned.iter().map(String::as_str).collect();
                    profile.testimonials = self.testimonials(&username, &pinned);
                    profile.events = self.events(&username);
                    load.profiles.push(profile);
                }
                Err(error) => {
                    tracing::warn!(path = %path.to_string_lossy(), error = %error, "skipping invalid profile");
                    load.errors.push(error);
                }
            }
        }

        load
    }
}

/// Turns a raw record into a typed profile plus its pinned testimonial
/// authors. Testimonials and events are attached by the caller.
fn validate_profile(username: &str, raw: RawProfile) -> AppResult<(DesiredProfile, Vec<String>)> {
    if !USERNAME_PATTERN.is_match(username) {
        return Err(AppError::Load(format!("invalid username '{}'", username)));
    }

    let name = raw.name.map(|name| name.trim().to_string()).unwrap_or_default();
    if name.is_empty() {
        return Err(AppError::Load(format!("profile {} has no name", username)));
    }

    let tags: BTreeSet<String> = raw
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect();

    let social_urls: HashSet<&str> = raw.socials.iter().map(|social| social.url.as_str()).collect();

    let links = match raw.links {
        Some(raw_links) => {
            let mut seen = HashSet::new();
            let mut links = Vec::with_capacity(raw_links.len());
            for raw_link in raw_links {
                let url = raw_link.url.trim().to_string();
                if url.is_empty() {
                    return Err(AppError::Load(format!("profile {} has a link without url", username)));
                }
                if !seen.insert(url.clone()) {
                    return Err(AppError::Load(format!(
                        "profile {} lists link {} more than once",
                        username, url
                    )));
                }
                let is_pinned = raw_link
                    .is_pinned
                    .unwrap_or_else(|| social_urls.contains(url.as_str()));
                links.push(DesiredLink {
                    name: raw_link
                        .name
                        .filter(|name| !name.trim().is_empty())
                        .unwrap_or_else(|| url.clone()),
                    url,
                    icon: raw_link.icon,
                    group: raw_link.group,
                    is_pinned,
                });
            }
            Some(links)
        }
        None => None,
    };

    Ok((
        DesiredProfile {
            username: username.to_string(),
            name,
            bio: raw.bio,
            tags,
            links,
            testimonials: Vec::new(),
            events: Vec::new(),
        },
        raw.testimonials,
    ))
}

/// Reads every `*.json` in `dir` keyed by file stem. A missing directory is
/// an empty set; malformed files are skipped.
fn read_dir_records<T: DeserializeOwned>(dir: &Path) -> Vec<(String, T)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().and_then(|value| value.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        match read_json_file::<T>(&path) {
            Ok(value) => records.push((file_stem(&path), value)),
            Err(error) => {
                tracing::warn!(path = %path.to_string_lossy(), error = %error, "skipping malformed record");
            }
        }
    }
    records
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
    let raw = fs::read_to_string(path)
        .map_err(|error| AppError::Load(format!("failed loading {}: {}", path.display(), error)))?;
    serde_json::from_str(&raw).map_err(|error| AppError::Load(format!("failed parsing {}: {}", path.display(), error)))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .to_string()
}
