//! Catalog sync reconciler.
//!
//! Decides whether a catalog needs a fetch, drives the fetch through the
//! router, and writes the outcome back into the catalog's status. The
//! caller persists the updated catalog.

use std::sync::Arc;

use a3s_catalog_core::catalog::{reasons, retain_known_conditions, TYPE_PROGRESSING, TYPE_SERVING};
use a3s_catalog_core::error::{CatalogError, ErrorKind, Result};
use a3s_catalog_core::{Catalog, CatalogStatus, ConditionStatus, ResolvedSource};
use chrono::{DateTime, Utc};

use crate::cache::{ContentCache, ContentTree};
use crate::io::{now_seconds, run_blocking};
use crate::source::{FetchOptions, FetchResult, SourceRouter};

/// Persistence seam for catalog records.
pub trait CatalogStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Catalog>>;
    fn put(&self, catalog: &Catalog) -> Result<()>;
    /// Removing a missing record is not an error.
    fn delete(&self, name: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<Catalog>>;
}

/// Why a fetch is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    NoStoredRecord,
    ContentMissing,
    StatusDrift,
    GenerationChanged,
    PollDue,
}

impl std::fmt::Display for FetchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            FetchReason::NoStoredRecord => "no stored record",
            FetchReason::ContentMissing => "content missing",
            FetchReason::StatusDrift => "status drift",
            FetchReason::GenerationChanged => "generation changed",
            FetchReason::PollDue => "poll interval elapsed",
        };
        write!(f, "{}", reason)
    }
}

/// What a sync call should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Availability is off: drop content and report it.
    MakeUnavailable,
    /// A terminal failure was recorded for this generation.
    Blocked,
    UpToDate,
    Fetch(FetchReason),
}

impl SyncDecision {
    /// Decide from the declared catalog, its stored copy, whether the
    /// stored resolved content is on disk, and the current time.
    pub fn evaluate(
        catalog: &Catalog,
        stored: Option<&Catalog>,
        content_present: bool,
        now: DateTime<Utc>,
    ) -> Self {
        if catalog.is_unavailable() {
            return SyncDecision::MakeUnavailable;
        }

        if let Some(progressing) = catalog.status.condition(TYPE_PROGRESSING) {
            if progressing.status == ConditionStatus::False
                && progressing.reason == reasons::BLOCKED
                && progressing.observed_generation == catalog.generation
            {
                return SyncDecision::Blocked;
            }
        }

        let stored = match stored {
            Some(stored) => stored,
            None => return SyncDecision::Fetch(FetchReason::NoStoredRecord),
        };
        if stored.status.resolved_source.is_none() || !content_present {
            return SyncDecision::Fetch(FetchReason::ContentMissing);
        }
        let expected = expected_status(stored, content_present);
        if StatusFingerprint::of(&catalog.status) != StatusFingerprint::of(&expected) {
            return SyncDecision::Fetch(FetchReason::StatusDrift);
        }
        if catalog.generation != stored.generation {
            return SyncDecision::Fetch(FetchReason::GenerationChanged);
        }
        if needs_poll(catalog, stored, now) {
            return SyncDecision::Fetch(FetchReason::PollDue);
        }
        SyncDecision::UpToDate
    }

    pub fn needs_fetch(&self) -> bool {
        matches!(self, SyncDecision::Fetch(_))
    }
}

/// Status the stored record implies.
///
/// Conditions this system does not own are dropped. When the stored
/// content is on disk, Progressing is Succeeded at the stored generation.
pub fn expected_status(stored: &Catalog, content_present: bool) -> CatalogStatus {
    let mut expected = stored.clone();
    retain_known_conditions(&mut expected.status.conditions);
    if content_present {
        expected.set_condition(
            TYPE_PROGRESSING,
            ConditionStatus::True,
            reasons::SUCCEEDED,
            SUCCEEDED_MESSAGE,
        );
    }
    expected.status
}

/// The status fields that decide whether cached content is still right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFingerprint {
    resolved_source: Option<ResolvedSource>,
    conditions: Vec<Option<(ConditionStatus, String, i64)>>,
}

impl StatusFingerprint {
    pub fn of(status: &CatalogStatus) -> Self {
        let conditions = [TYPE_PROGRESSING, TYPE_SERVING]
            .iter()
            .map(|type_| {
                status
                    .condition(type_)
                    .map(|c| (c.status, c.reason.clone(), c.observed_generation))
            })
            .collect();
        Self {
            resolved_source: status.resolved_source.clone(),
            conditions,
        }
    }
}

/// Whether the declared poll interval has elapsed since the last
/// successful fetch recorded in `stored`.
pub fn needs_poll(catalog: &Catalog, stored: &Catalog, now: DateTime<Utc>) -> bool {
    let interval = match catalog.spec.source.poll_interval() {
        Some(interval) => interval,
        None => return false,
    };
    let last = match stored
        .status
        .last_successful_poll_attempt
        .or(stored.status.last_unpacked)
    {
        Some(last) => last,
        None => return false,
    };
    now >= last + interval
}

const SUCCEEDED_MESSAGE: &str = "Successfully unpacked and stored content from resolved source";
const SERVING_MESSAGE: &str = "Serving desired content from resolved source";
const UNAVAILABLE_MESSAGE: &str = "Catalog availability mode is set to Unavailable";

/// Result of one sync call.
#[derive(Debug)]
pub enum SyncOutcome {
    Unavailable,
    Blocked,
    UpToDate,
    Fetched {
        reason: FetchReason,
        result: FetchResult,
    },
}

/// Reconciles declared catalogs against the content cache.
pub struct CatalogSync {
    store: Arc<dyn CatalogStore>,
    router: SourceRouter,
    cache: ContentCache,
}

impl CatalogSync {
    pub fn new(store: Arc<dyn CatalogStore>, router: SourceRouter, cache: ContentCache) -> Self {
        Self {
            store,
            router,
            cache,
        }
    }

    pub fn store(&self) -> &dyn CatalogStore {
        self.store.as_ref()
    }

    /// Sync `catalog` now.
    pub async fn sync(&self, catalog: &mut Catalog, options: &FetchOptions) -> Result<SyncOutcome> {
        self.sync_at(catalog, options, now_seconds()).await
    }

    /// Sync `catalog` as of `now`.
    ///
    /// On failure the status records the error (Retrying or Blocked) and the
    /// previously resolved content stays in place. Invariant violations
    /// leave the status untouched.
    pub async fn sync_at(
        &self,
        catalog: &mut Catalog,
        options: &FetchOptions,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome> {
        let decision = if catalog.is_unavailable() {
            SyncDecision::MakeUnavailable
        } else {
            let stored = self.store.get(&catalog.name)?;
            let content_present = match &stored {
                Some(stored) => self.has_resolved_content(stored)?,
                None => false,
            };
            SyncDecision::evaluate(catalog, stored.as_ref(), content_present, now)
        };
        tracing::debug!(name = %catalog.name, generation = catalog.generation, decision = ?decision, "Sync decision");

        match decision {
            SyncDecision::MakeUnavailable => {
                self.remove_content(&catalog.name).await?;
                catalog.set_condition(
                    TYPE_PROGRESSING,
                    ConditionStatus::True,
                    reasons::SUCCEEDED,
                    UNAVAILABLE_MESSAGE,
                );
                catalog.set_condition(
                    TYPE_SERVING,
                    ConditionStatus::False,
                    reasons::USER_SPECIFIED_UNAVAILABLE,
                    UNAVAILABLE_MESSAGE,
                );
                Ok(SyncOutcome::Unavailable)
            }
            SyncDecision::Blocked => Ok(SyncOutcome::Blocked),
            SyncDecision::UpToDate => Ok(SyncOutcome::UpToDate),
            SyncDecision::Fetch(reason) => {
                tracing::info!(name = %catalog.name, reason = %reason, "Fetching catalog content");
                match self.router.fetch(catalog, options).await {
                    Ok(result) => {
                        catalog.status.last_unpacked = Some(result.unpack_time);
                        catalog.status.last_successful_poll_attempt = Some(now);
                        catalog.status.resolved_source = Some(result.resolved_source.clone());
                        catalog.set_condition(
                            TYPE_PROGRESSING,
                            ConditionStatus::True,
                            reasons::SUCCEEDED,
                            SUCCEEDED_MESSAGE,
                        );
                        catalog.set_condition(
                            TYPE_SERVING,
                            ConditionStatus::True,
                            reasons::AVAILABLE,
                            SERVING_MESSAGE,
                        );
                        Ok(SyncOutcome::Fetched { reason, result })
                    }
                    Err(e) => {
                        record_failure(catalog, &e);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Remove a catalog's cached content and its stored record.
    pub async fn delete(&self, catalog: &Catalog) -> Result<()> {
        self.remove_content(&catalog.name).await?;
        self.store.delete(&catalog.name)
    }

    /// Content for the catalog's resolved source.
    pub fn content(&self, catalog: &Catalog) -> Result<ContentTree> {
        let resolved = catalog.status.resolved_source.as_ref().ok_or_else(|| {
            CatalogError::CacheError(format!("Catalog {} has not been synced yet", catalog.name))
        })?;
        self.cache.open(&catalog.name, &resolved.content_key()?)
    }

    fn has_resolved_content(&self, stored: &Catalog) -> Result<bool> {
        let key = match stored
            .status
            .resolved_source
            .as_ref()
            .and_then(|resolved| resolved.content_key().ok())
        {
            Some(key) => key,
            None => return Ok(false),
        };
        self.cache.has_content(&stored.name, &key)
    }

    async fn remove_content(&self, name: &str) -> Result<()> {
        let cache = self.cache.clone();
        let name = name.to_string();
        run_blocking("cache removal", move || cache.remove(&name)).await
    }
}

fn record_failure(catalog: &mut Catalog, error: &CatalogError) {
    let message = format!("source catalog content: {}", error);
    match error.kind() {
        ErrorKind::Terminal => {
            tracing::warn!(name = %catalog.name, error = %error, "Catalog sync blocked");
            catalog.set_condition(TYPE_PROGRESSING, ConditionStatus::False, reasons::BLOCKED, message);
        }
        ErrorKind::Retryable => {
            tracing::warn!(name = %catalog.name, error = %error, "Catalog sync failed, will retry");
            catalog.set_condition(TYPE_PROGRESSING, ConditionStatus::True, reasons::RETRYING, message);
        }
        ErrorKind::Invariant => {
            tracing::error!(name = %catalog.name, error = %error, "Invariant violated during catalog sync");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_catalog_core::{Availability, ContentKey, SourceDescriptor};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn web(poll: Option<u32>) -> Catalog {
        Catalog::new(
            "operatorhub",
            SourceDescriptor::Web {
                url: "https://example.com/catalogs".to_string(),
                poll_interval_minutes: poll,
            },
        )
    }

    /// A catalog as it looks after a successful sync at `at`.
    fn synced(poll: Option<u32>, at: DateTime<Utc>) -> Catalog {
        let mut catalog = web(poll);
        catalog.status.last_unpacked = Some(at);
        catalog.status.last_successful_poll_attempt = Some(at);
        catalog.status.resolved_source = Some(ResolvedSource::Web {
            url: "https://example.com/catalogs/catalog.yaml".to_string(),
            digest: ContentKey::sha256("abcd"),
        });
        catalog.set_condition(TYPE_PROGRESSING, ConditionStatus::True, reasons::SUCCEEDED, SUCCEEDED_MESSAGE);
        catalog.set_condition(TYPE_SERVING, ConditionStatus::True, reasons::AVAILABLE, SERVING_MESSAGE);
        catalog
    }

    #[test]
    fn test_no_stored_record_fetches() {
        let decision = SyncDecision::evaluate(&web(None), None, false, now());
        assert_eq!(decision, SyncDecision::Fetch(FetchReason::NoStoredRecord));
        assert!(decision.needs_fetch());
    }

    #[test]
    fn test_up_to_date() {
        let catalog = synced(None, now());
        let decision = SyncDecision::evaluate(&catalog, Some(&catalog), true, now());
        assert_eq!(decision, SyncDecision::UpToDate);
    }

    #[test]
    fn test_missing_content_fetches() {
        let catalog = synced(None, now());
        let decision = SyncDecision::evaluate(&catalog, Some(&catalog), false, now());
        assert_eq!(decision, SyncDecision::Fetch(FetchReason::ContentMissing));
    }

    #[test]
    fn test_generation_bump_fetches() {
        let stored = synced(None, now());
        let mut declared = stored.clone();
        declared.generation += 1;
        let decision = SyncDecision::evaluate(&declared, Some(&stored), true, now());
        assert_eq!(decision, SyncDecision::Fetch(FetchReason::GenerationChanged));
    }

    #[test]
    fn test_retrying_status_drifts() {
        let stored = synced(None, now());
        let mut declared = stored.clone();
        declared.set_condition(TYPE_PROGRESSING, ConditionStatus::True, reasons::RETRYING, "boom");
        let decision = SyncDecision::evaluate(&declared, Some(&stored), true, now());
        assert_eq!(decision, SyncDecision::Fetch(FetchReason::StatusDrift));
    }

    #[test]
    fn test_unknown_conditions_and_messages_do_not_drift() {
        let stored = synced(None, now());
        let mut declared = stored.clone();
        declared.set_condition("Custom", ConditionStatus::True, "Whatever", "ignored");
        declared.set_condition(TYPE_SERVING, ConditionStatus::True, reasons::AVAILABLE, "new text");
        let decision = SyncDecision::evaluate(&declared, Some(&stored), true, now());
        assert_eq!(decision, SyncDecision::UpToDate);
    }

    #[test]
    fn test_blocked_at_current_generation() {
        let mut catalog = synced(None, now());
        catalog.set_condition(TYPE_PROGRESSING, ConditionStatus::False, reasons::BLOCKED, "bad url");
        let decision = SyncDecision::evaluate(&catalog, Some(&catalog), true, now());
        assert_eq!(decision, SyncDecision::Blocked);

        catalog.generation += 1;
        let decision = SyncDecision::evaluate(&catalog, Some(&catalog), true, now());
        assert!(decision.needs_fetch());
    }

    #[test]
    fn test_unavailable_wins() {
        let mut catalog = synced(None, now());
        catalog.spec.availability = Availability::Unavailable;
        let decision = SyncDecision::evaluate(&catalog, Some(&catalog), true, now());
        assert_eq!(decision, SyncDecision::MakeUnavailable);
    }

    #[test]
    fn test_poll_gating() {
        let catalog = synced(Some(10), now());
        let at = |minutes| now() + Duration::minutes(minutes);

        assert_eq!(
            SyncDecision::evaluate(&catalog, Some(&catalog), true, at(9)),
            SyncDecision::UpToDate
        );
        assert_eq!(
            SyncDecision::evaluate(&catalog, Some(&catalog), true, at(10)),
            SyncDecision::Fetch(FetchReason::PollDue)
        );
        assert_eq!(
            SyncDecision::evaluate(&catalog, Some(&catalog), true, at(11)),
            SyncDecision::Fetch(FetchReason::PollDue)
        );
    }

    #[test]
    fn test_poll_uses_last_unpacked_without_poll_attempt() {
        let mut catalog = synced(Some(10), now());
        catalog.status.last_successful_poll_attempt = None;
        assert!(needs_poll(&catalog, &catalog, now() + Duration::minutes(10)));
        assert!(!needs_poll(&catalog, &catalog, now() + Duration::minutes(5)));
    }

    #[test]
    fn test_no_interval_never_polls() {
        let catalog = synced(None, now());
        assert!(!needs_poll(&catalog, &catalog, now() + Duration::days(365)));
    }

    #[test]
    fn test_expected_status_prunes_unknown() {
        let mut stored = synced(None, now());
        stored.set_condition("Custom", ConditionStatus::True, "Whatever", "");
        stored.set_condition(TYPE_PROGRESSING, ConditionStatus::True, reasons::RETRYING, "boom");

        let expected = expected_status(&stored, true);
        assert!(expected.condition("Custom").is_none());
        assert_eq!(expected.condition(TYPE_PROGRESSING).unwrap().reason, reasons::SUCCEEDED);

        let expected = expected_status(&stored, false);
        assert_eq!(expected.condition(TYPE_PROGRESSING).unwrap().reason, reasons::RETRYING);
    }

    #[test]
    fn test_record_failure_kinds() {
        let mut catalog = web(None);
        record_failure(&mut catalog, &CatalogError::InvalidReference("x".to_string()));
        let progressing = catalog.status.condition(TYPE_PROGRESSING).unwrap();
        assert_eq!(progressing.status, ConditionStatus::False);
        assert_eq!(progressing.reason, reasons::BLOCKED);

        record_failure(
            &mut catalog,
            &CatalogError::HttpStatus {
                url: "http://x".to_string(),
                status_code: 503,
            },
        );
        let progressing = catalog.status.condition(TYPE_PROGRESSING).unwrap();
        assert_eq!(progressing.status, ConditionStatus::True);
        assert_eq!(progressing.reason, reasons::RETRYING);
        assert!(progressing.message.contains("503"));

        let before = catalog.status.clone();
        record_failure(&mut catalog, &CatalogError::Invariant("x".to_string()));
        assert_eq!(catalog.status, before);
    }
}
