//! Rederive found / not-found state from the outcome log.

use std::collections::{BTreeMap, HashSet};

use super::{Outcome, OutcomeEntry};

/// Oldest first. Stable, so entries sharing a timestamp keep append order.
pub fn sort_log(log: &mut [OutcomeEntry]) {
    log.sort_by_key(|e| e.timestamp);
}

/// Rebuild the maps from `log` (already sorted).
///
/// A `found` entry sets the url and clears not-found. A `not_found` entry
/// never clears a url: once found, a key stays found. Keys the log never
/// mentions (compared case-insensitively) keep their previous values, so
/// outcomes trimmed from the log are not forgotten. Every write goes to
/// both the case-preserved and the lowercased key.
pub fn replay(
    log: &[OutcomeEntry],
    urls: &mut BTreeMap<String, String>,
    not_found: &mut BTreeMap<String, bool>,
) {
    let prior_urls = std::mem::take(urls);
    let prior_not_found = std::mem::take(not_found);
    let logged: HashSet<String> = log.iter().map(|e| e.key.to_lowercase()).collect();

    for entry in log {
        let lower = entry.key.to_lowercase();
        match &entry.outcome {
            Outcome::Found { url } => {
                urls.insert(entry.key.clone(), url.clone());
                urls.insert(lower.clone(), url.clone());
                not_found.remove(&entry.key);
                not_found.remove(&lower);
            }
            Outcome::NotFound => {
                if urls.contains_key(&entry.key) || urls.contains_key(&lower) {
                    continue;
                }
                not_found.insert(entry.key.clone(), true);
                not_found.insert(lower, true);
            }
        }
    }

    for (key, url) in prior_urls {
        if !logged.contains(&key.to_lowercase()) {
            urls.entry(key).or_insert(url);
        }
    }
    for (key, flag) in prior_not_found {
        if !logged.contains(&key.to_lowercase()) {
            not_found.entry(key).or_insert(flag);
        }
    }
}
