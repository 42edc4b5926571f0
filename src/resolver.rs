//! Path resolution and checkpoint resolution.
//!
//! Both are modeled as pure functions over already-fetched data plus one
//! thin async orchestration function each; control flow that would otherwise
//! be exception-driven ("raise a listing/redirect") is instead an explicit
//! [`ResolveOutcome`] enum the caller matches on.

use std::sync::Arc;

use anyhow::Result;
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::models::Distribution;
use crate::store::Store;

/// Result of matching a URL path against the distributions of a domain.
pub enum ResolveOutcome {
    /// Exactly one distribution matched; `rel_path` is what remains after its `base_path`.
    /// `trailing_slash_present` only matters when `rel_path` is empty: it distinguishes a
    /// request for the distribution root with the trailing slash from one without.
    Resolved { distribution: Distribution, rel_path: String, trailing_slash_present: bool },
    /// The path is an ancestor of one or more distributions; list their next segment.
    NeedsListing,
    /// The path matched a distribution root but without the trailing slash.
    NeedsRedirect(String),
    /// No distribution could ever match this path.
    NotFound,
}

/// Computes the list of candidate base paths for `path`, longest (most specific)
/// first, by repeatedly stripping the last segment.
pub fn candidate_base_paths(path: &str) -> Vec<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return vec![];
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    (1..=segments.len())
        .rev()
        .map(|n| segments[..n].join("/"))
        .collect()
}

/// Resolves `path` (already stripped of the content prefix) against the domain's
/// distributions.
pub async fn resolve(store: &Arc<dyn Store>, domain_id: uuid::Uuid, path: &str) -> Result<ResolveOutcome> {
    let candidates = candidate_base_paths(path);
    if candidates.is_empty() {
        return Ok(ResolveOutcome::NotFound);
    }

    if let Some(distribution) = store.find_distribution(domain_id, &candidates).await? {
        let rel_path = path
            .trim_start_matches('/')
            .strip_prefix(distribution.base_path.trim_matches('/'))
            .unwrap_or("")
            .trim_start_matches('/')
            .to_string();
        let trailing_slash_present = path.ends_with('/');
        return Ok(ResolveOutcome::Resolved { distribution, rel_path, trailing_slash_present });
    }

    // No exact match: the trimmed path may still be an ancestor of some distribution.
    let trimmed = path.trim_matches('/').to_string();
    let has_descendants = !store
        .list_distributions(domain_id, false)
        .await?
        .iter()
        .filter(|d| d.base_path.trim_matches('/').starts_with(&format!("{trimmed}/")))
        .collect::<Vec<_>>()
        .is_empty();

    if has_descendants {
        if path.ends_with('/') || path.is_empty() {
            Ok(ResolveOutcome::NeedsListing)
        } else {
            Ok(ResolveOutcome::NeedsRedirect(format!("{path}/")))
        }
    } else {
        Ok(ResolveOutcome::NotFound)
    }
}

/// Regex-free check that `s` has the exact `YYYYMMDDThhmmssZ` shape.
pub fn parse_checkpoint_timestamp(s: &str) -> Option<OffsetDateTime> {
    if s.len() != 16 {
        return None;
    }
    let bytes = s.as_bytes();
    if bytes[8] != b'T' || bytes[15] != b'Z' {
        return None;
    }
    if !s[0..8].bytes().all(|b| b.is_ascii_digit()) || !s[9..15].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let format = time::macros::format_description!("[year][month][day]T[hour][minute][second]Z");
    time::PrimitiveDateTime::parse(s, &format)
        .ok()
        .map(|dt| dt.assume_utc())
}

pub fn format_checkpoint_timestamp(at: OffsetDateTime) -> String {
    let format = time::macros::format_description!("[year][month][day]T[hour][minute][second]Z");
    let primitive = time::PrimitiveDateTime::new(at.date(), at.time());
    primitive.format(&format).expect("well-formed checkpoint timestamp")
}

/// Splits a per-distribution remainder into `(checkpoint_segment, rest)`.
pub fn split_checkpoint_segment(remainder: &str) -> (Option<&str>, &str) {
    match remainder.split_once('/') {
        Some((first, rest)) => (Some(first), rest),
        None if !remainder.is_empty() => (Some(remainder), ""),
        None => (None, ""),
    }
}

/// Outcome of resolving a checkpoint path segment against the available checkpoint
/// publications for a repository.
pub enum CheckpointOutcome {
    /// `remainder` became the publication-relative path after stripping the timestamp.
    Resolved { publication_id: uuid::Uuid, rel_path: String },
    /// The timestamp parsed but did not match the canonical formatting of the selected
    /// publication; redirect to the canonical segment.
    NeedsRedirect(String),
    /// No segment given: list all checkpoint timestamps.
    NeedsListing,
    NotFound,
}

pub async fn resolve_checkpoint(
    store: &Arc<dyn Store>,
    repository_id: uuid::Uuid,
    remainder: &str,
) -> Result<CheckpointOutcome> {
    let (segment, rest) = split_checkpoint_segment(remainder);
    let Some(segment) = segment else {
        return Ok(CheckpointOutcome::NeedsListing);
    };

    let Some(requested) = parse_checkpoint_timestamp(segment) else {
        return Ok(CheckpointOutcome::NotFound);
    };
    if requested > OffsetDateTime::now_utc() {
        return Ok(CheckpointOutcome::NotFound);
    }
    // Treat the request timestamp as end-of-second: add a microsecond tail so a
    // publication created within the same second still qualifies.
    let at_or_before = requested + TimeDuration::microseconds(999_999);

    match store.latest_checkpoint_publication(repository_id, at_or_before).await? {
        Some(publication) => {
            let canonical = format_checkpoint_timestamp(publication.created_at);
            if canonical != segment {
                Ok(CheckpointOutcome::NeedsRedirect(format!("{canonical}/{rest}")))
            } else {
                Ok(CheckpointOutcome::Resolved {
                    publication_id: publication.id,
                    rel_path: rest.to_string(),
                })
            }
        }
        None => Ok(CheckpointOutcome::NotFound),
    }
}

#[test]
fn test_candidate_base_paths_longest_first() {
    let candidates = candidate_base_paths("a/b/c");
    assert_eq!(candidates, vec!["a/b/c", "a/b", "a"]);
}

#[test]
fn test_candidate_base_paths_empty() {
    assert!(candidate_base_paths("").is_empty());
    assert!(candidate_base_paths("/").is_empty());
}

#[test]
fn test_parse_checkpoint_timestamp_valid() {
    let parsed = parse_checkpoint_timestamp("20250101T000000Z");
    assert!(parsed.is_some());
}

#[test]
fn test_parse_checkpoint_timestamp_rejects_malformed() {
    assert!(parse_checkpoint_timestamp("not-a-timestamp").is_none());
    assert!(parse_checkpoint_timestamp("20250101T0000Z").is_none());
    assert!(parse_checkpoint_timestamp("20251301T000000Z").is_none());
}

#[test]
fn test_format_roundtrip() {
    let original = "20250115T120000Z";
    let parsed = parse_checkpoint_timestamp(original).unwrap();
    assert_eq!(format_checkpoint_timestamp(parsed), original);
}

#[test]
fn test_split_checkpoint_segment() {
    assert_eq!(split_checkpoint_segment(""), (None, ""));
    assert_eq!(
        split_checkpoint_segment("20250101T000000Z"),
        (Some("20250101T000000Z"), "")
    );
    assert_eq!(
        split_checkpoint_segment("20250101T000000Z/pool/a.deb"),
        (Some("20250101T000000Z"), "pool/a.deb")
    );
}
