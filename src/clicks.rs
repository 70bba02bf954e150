//! Records a visit to a profile link.
//!
//! Resolving the link is the only step that can fail the request. The three
//! counters after it are best-effort and never block the redirect.

use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ClickOutcome, CounterOutcome};
use crate::store::ProfileStore;
use chrono::{Local, NaiveDate};

/// Opens a session for this click and records it against today's buckets.
pub fn handle_click(db: &Database, username: &str, url: &str) -> AppResult<ClickOutcome> {
    let session = db.session().map_err(|error| {
        tracing::error!(username = %username, url = %url, error = %error, "store unavailable for click");
        not_found(username, url)
    })?;
    record_click(&session, username, url)
}

pub fn record_click(store: &dyn ProfileStore, username: &str, url: &str) -> AppResult<ClickOutcome> {
    record_click_on(store, username, url, Local::now().date_naive())
}

pub fn record_click_on(
    store: &dyn ProfileStore,
    username: &str,
    url: &str,
    day: NaiveDate,
) -> AppResult<ClickOutcome> {
    match store.find_link(username, url) {
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::warn!(username = %username, url = %url, "click on unknown link");
            return Err(not_found(username, url));
        }
        Err(error) => {
            tracing::error!(username = %username, url = %url, error = %error, "failed loading link");
            return Err(not_found(username, url));
        }
    }

    let counters = CounterOutcome {
        link: settle(store.increment_link_clicks(username, url), username, url, "link clicks"),
        daily: settle(store.increment_daily_stats(day), username, url, "platform stats"),
        link_daily: settle(
            store.increment_link_daily_stats(username, url, day),
            username,
            url,
            "link stats",
        ),
    };

    Ok(ClickOutcome {
        redirect_to: url.to_string(),
        counters,
    })
}

fn settle(result: AppResult<()>, username: &str, url: &str, counter: &'static str) -> bool {
    match result {
        Ok(()) => true,
        Err(error) => {
            tracing::error!(username = %username, url = %url, counter, error = %error, "failed incrementing counter");
            false
        }
    }
}

fn not_found(username: &str, url: &str) -> AppError {
    AppError::NotFound(format!("failed loading link {} for username: {}", url, username))
}

#[cfg(test)]
mod tests {
    use super::{handle_click, record_click_on};
    use crate::errors::AppError;
    use crate::models::{CounterOutcome, DesiredLink, ProfileFields};
    use crate::store::ProfileStore;
    use crate::test_support::{open_store, FlakyStore};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).expect("date")
    }

    fn seed_link(store: &dyn ProfileStore, username: &str, url: &str) {
        let profile = store
            .upsert_profile(
                username,
                &ProfileFields {
                    name: username.to_string(),
                    bio: String::new(),
                    tags: BTreeSet::new(),
                },
            )
            .expect("profile");
        store
            .upsert_link(
                username,
                &profile.id,
                &DesiredLink {
                    url: url.to_string(),
                    name: "X".to_string(),
                    icon: None,
                    group: None,
                    is_pinned: false,
                },
                0,
            )
            .expect("link");
    }

    #[test]
    fn click_redirects_and_bumps_all_three_counters() {
        let (_dir, _db, session) = open_store();
        seed_link(&session, "alice", "https://x");

        let outcome = record_click_on(&session, "alice", "https://x", day()).expect("click");

        assert_eq!(outcome.redirect_to, "https://x");
        assert_eq!(
            outcome.counters,
            CounterOutcome {
                link: true,
                daily: true,
                link_daily: true
            }
        );
        assert_eq!(session.find_link("alice", "https://x").expect("lookup").expect("link").clicks, 1);
        assert_eq!(session.get_daily_stats(day()).expect("read").expect("bucket").clicks, 1);
        assert_eq!(
            session
                .get_link_daily_stats("alice", "https://x", day())
                .expect("read")
                .expect("bucket")
                .clicks,
            1
        );
    }

    #[test]
    fn replayed_click_counts_again() {
        let (_dir, _db, session) = open_store();
        seed_link(&session, "alice", "https://x");

        record_click_on(&session, "alice", "https://x", day()).expect("first");
        record_click_on(&session, "alice", "https://x", day()).expect("second");

        assert_eq!(session.find_link("alice", "https://x").expect("lookup").expect("link").clicks, 2);
        assert_eq!(session.get_daily_stats(day()).expect("read").expect("bucket").clicks, 2);
    }

    #[test]
    fn unknown_link_is_not_found_and_touches_nothing() {
        let (_dir, _db, session) = open_store();

        let error = record_click_on(&session, "ghost", "https://nowhere", day()).expect_err("missing link");

        assert!(matches!(error, AppError::NotFound(_)));
        assert_eq!(
            error.message(),
            "failed loading link https://nowhere for username: ghost"
        );
        assert_eq!(session.count_stats_rows().expect("count"), (0, 0));
        assert_eq!(session.count_links().expect("count"), 0);
    }

    #[test]
    fn counter_failures_do_not_block_each_other_or_the_redirect() {
        let (_dir, _db, session) = open_store();
        seed_link(&session, "alice", "https://x");

        let store = FlakyStore::new(&session).fail_link_increment();
        let outcome = record_click_on(&store, "alice", "https://x", day()).expect("click");
        assert_eq!(outcome.redirect_to, "https://x");
        assert!(!outcome.counters.link);
        assert!(outcome.counters.daily && outcome.counters.link_daily);
        assert_eq!(session.find_link("alice", "https://x").expect("lookup").expect("link").clicks, 0);
        assert_eq!(session.get_daily_stats(day()).expect("read").expect("bucket").clicks, 1);

        let broken = FlakyStore::new(&session)
            .fail_link_increment()
            .fail_daily_increment()
            .fail_link_daily_increment();
        let outcome = record_click_on(&broken, "alice", "https://x", day()).expect("click");
        assert_eq!(outcome.redirect_to, "https://x");
        assert_eq!(outcome.counters, CounterOutcome::default());
    }

    #[test]
    fn concurrent_clicks_are_all_counted() {
        const CLICKS: u64 = 16;
        let (_dir, db, session) = open_store();
        seed_link(&session, "alice", "https://x");
        let today = chrono::Local::now().date_naive();

        std::thread::scope(|scope| {
            for _ in 0..CLICKS {
                scope.spawn(|| {
                    handle_click(&db, "alice", "https://x").expect("click");
                });
            }
        });

        assert_eq!(
            session.find_link("alice", "https://x").expect("lookup").expect("link").clicks,
            CLICKS
        );
        let daily = session.get_daily_stats(today).expect("read").expect("bucket");
        let per_link = session
            .get_link_daily_stats("alice", "https://x", today)
            .expect("read")
            .expect("bucket");
        assert_eq!(daily.clicks, CLICKS);
        assert_eq!(per_link.clicks, CLICKS);
    }
}
