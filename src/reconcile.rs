//! Reconciles the declarative profile source into the store.
//!
//! Each desired profile is turned into a [`ProfilePlan`] against the
//! persisted sub-state of its username, and the plan is applied inside one
//! store unit of work. Every write inside the plan is individually fallible:
//! a failure is logged and counted, and the rest of the plan still runs.

use crate::db::Database;
use crate::models::{
    DbCounts, DesiredLink, DesiredProfile, LinkRecord, ProfileCounts, ProfileEvent, ProfileFields, ProfileRecord,
    ProfileSource, ReconcileTally, ReloadReport, Testimonial,
};
use crate::source::{SourceLoad, SourceLoader};
use crate::store::ProfileStore;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum ProfileAction {
    /// Persisted row is hand-edited; its fields stay as they are.
    Skip,
    Upsert(ProfileFields),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePlan<'a> {
    pub username: &'a str,
    pub action: ProfileAction,
    /// `(order, link)` for every desired link, or `None` when the record has
    /// no link list and links are left alone.
    pub links: Option<Vec<(u32, &'a DesiredLink)>>,
    /// Currently enabled urls missing from the desired link list.
    pub disable: Vec<String>,
    pub testimonials: &'a [Testimonial],
    pub events: &'a [ProfileEvent],
}

pub fn plan_profile<'a>(
    desired: &'a DesiredProfile,
    current: Option<&ProfileRecord>,
    current_links: &[LinkRecord],
) -> ProfilePlan<'a> {
    let action = match current {
        Some(profile) if profile.source == ProfileSource::Database => ProfileAction::Skip,
        _ => ProfileAction::Upsert(desired.fields()),
    };

    let (links, disable) = match &desired.links {
        Some(desired_links) => {
            let wanted: BTreeSet<&str> = desired_links.iter().map(|link| link.url.as_str()).collect();
            let disable = current_links
                .iter()
                .filter(|link| link.is_enabled && !wanted.contains(link.url.as_str()))
                .map(|link| link.url.clone())
                .collect();
            let ordered = desired_links
                .iter()
                .enumerate()
                .map(|(position, link)| (position as u32, link))
                .collect();
            (Some(ordered), disable)
        }
        None => (None, Vec::new()),
    };

    ProfilePlan {
        username: &desired.username,
        action,
        links,
        disable,
        testimonials: &desired.testimonials,
        events: &desired.events,
    }
}

/// Loads the source and reconciles it through a fresh store session.
pub fn run_reload(db: &Database, source: &dyn SourceLoader) -> ReloadReport {
    let load = source.load();
    match db.session() {
        Ok(session) => reconcile(&session, &load),
        Err(error) => {
            tracing::error!(error = %error, "store unavailable, nothing reconciled");
            ReloadReport {
                profiles: ProfileCounts {
                    basic: load.basic,
                    full: load.profiles.len(),
                    db: DbCounts::default(),
                },
                details: ReconcileTally {
                    failed: load.profiles.len(),
                    ..ReconcileTally::default()
                },
            }
        }
    }
}

pub fn reconcile(store: &dyn ProfileStore, load: &SourceLoad) -> ReloadReport {
    let before = count_profiles(store);
    let mut tally = ReconcileTally::default();

    for desired in &load.profiles {
        reconcile_profile(store, desired, &mut tally);
    }

    let after = count_profiles(store);
    tracing::info!(
        basic = load.basic,
        full = load.profiles.len(),
        load_errors = load.errors.len(),
        before,
        after,
        upserted = tally.upserted,
        skipped_database = tally.skipped_database,
        failed = tally.failed,
        links_enabled = tally.links_enabled,
        links_disabled = tally.links_disabled,
        write_errors = tally.write_errors,
        "reconcile run finished"
    );

    ReloadReport {
        profiles: ProfileCounts {
            basic: load.basic,
            full: load.profiles.len(),
            db: DbCounts { before, after },
        },
        details: tally,
    }
}

fn count_profiles(store: &dyn ProfileStore) -> u64 {
    store.count_profiles().unwrap_or_else(|error| {
        tracing::warn!(error = %error, "failed to count profiles");
        0
    })
}

fn reconcile_profile(store: &dyn ProfileStore, desired: &DesiredProfile, tally: &mut ReconcileTally) {
    let username = desired.username.as_str();

    if let Err(error) = store.begin_unit() {
        tracing::error!(username = %username, error = %error, "failed to open unit of work");
        tally.failed += 1;
        return;
    }

    let current = match store.find_profile(username) {
        Ok(current) => current,
        Err(error) => {
            tracing::error!(username = %username, error = %error, "failed loading profile");
            store.rollback_unit();
            tally.failed += 1;
            return;
        }
    };

    let current_links = if desired.links.is_some() {
        match store.list_links(username) {
            Ok(links) => links,
            Err(error) => {
                tracing::error!(username = %username, error = %error, "failed loading links");
                store.rollback_unit();
                tally.failed += 1;
                return;
            }
        }
    } else {
        Vec::new()
    };

    let plan = plan_profile(desired, current.as_ref(), &current_links);
    let mut unit = ReconcileTally::default();
    let applied = apply_plan(store, &plan, current, &mut unit);

    if let Err(error) = store.commit_unit() {
        tracing::error!(username = %username, error = %error, "failed to commit profile");
        store.rollback_unit();
        tally.failed += 1;
        return;
    }

    merge_tally(tally, &unit);
    if !applied {
        tally.failed += 1;
    }
}

/// Adds the counts of one committed unit of work to the run totals.
fn merge_tally(total: &mut ReconcileTally, unit: &ReconcileTally) {
    total.upserted += unit.upserted;
    total.skipped_database += unit.skipped_database;
    total.failed += unit.failed;
    total.links_enabled += unit.links_enabled;
    total.links_disabled += unit.links_disabled;
    total.write_errors += unit.write_errors;
}

/// Returns false when nothing could be attached to a persisted profile.
fn apply_plan(
    store: &dyn ProfileStore,
    plan: &ProfilePlan<'_>,
    current: Option<ProfileRecord>,
    tally: &mut ReconcileTally,
) -> bool {
    let username = plan.username;

    let owner = match &plan.action {
        ProfileAction::Skip => {
            tracing::info!(username = %username, "database-sourced profile, skipping field update");
            tally.skipped_database += 1;
            current
        }
        ProfileAction::Upsert(fields) => match store.upsert_profile(username, fields) {
            Ok(profile) if profile.source == ProfileSource::Database => {
                tracing::info!(username = %username, "profile became database-sourced, fields kept");
                tally.skipped_database += 1;
                Some(profile)
            }
            Ok(profile) => {
                tally.upserted += 1;
                replace_owned_sets(store, plan, &profile, tally);
                Some(profile)
            }
            Err(error) => {
                tracing::error!(username = %username, error = %error, "failed to upsert profile");
                tally.write_errors += 1;
                current
            }
        },
    };

    let Some(owner) = owner else {
        tracing::warn!(username = %username, "no persisted profile to own links, skipping");
        return false;
    };

    let Some(links) = &plan.links else {
        return true;
    };

    for (order, link) in links {
        match store.upsert_link(username, &owner.id, link, *order) {
            Ok(_) => tally.links_enabled += 1,
            Err(error) => {
                tracing::error!(username = %username, url = %link.url, error = %error, "failed to upsert link");
                tally.write_errors += 1;
            }
        }
    }

    match store.list_links(username) {
        Ok(all_links) => {
            let link_ids: Vec<String> = all_links.into_iter().map(|link| link.id).collect();
            if let Err(error) = store.set_profile_links(&owner.id, &link_ids) {
                tracing::error!(username = %username, error = %error, "failed to update profile links");
                tally.write_errors += 1;
            }
        }
        Err(error) => {
            tracing::error!(username = %username, error = %error, "failed to list links");
            tally.write_errors += 1;
        }
    }

    for url in &plan.disable {
        match store.disable_link(username, url) {
            Ok(true) => tally.links_disabled += 1,
            Ok(false) => {}
            Err(error) => {
                tracing::error!(username = %username, url = %url, error = %error, "failed to disable link");
                tally.write_errors += 1;
            }
        }
    }

    true
}

fn replace_owned_sets(
    store: &dyn ProfileStore,
    plan: &ProfilePlan<'_>,
    profile: &ProfileRecord,
    tally: &mut ReconcileTally,
) {
    if let Err(error) = store.replace_testimonials(&profile.id, plan.testimonials) {
        tracing::error!(username = %plan.username, error = %error, "failed to replace testimonials");
        tally.write_errors += 1;
    }
    if let Err(error) = store.replace_events(&profile.id, plan.events) {
        tracing::error!(username = %plan.username, error = %error, "failed to replace events");
        tally.write_errors += 1;
    }
}
