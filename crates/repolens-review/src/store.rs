//! In-memory review history keyed by repository.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use repolens_core::{
    sort_findings, Category, FileRef, Finding, RepolensError, RepositoryKey, Result, Review,
    ReviewId, ReviewStatus,
};
use serde::Serialize;

#[derive(Debug, Default)]
struct ReviewHistory {
    reviews: Vec<Arc<Review>>,
    last_id: u64,
}

impl ReviewHistory {
    fn pending(&self) -> Option<&Arc<Review>> {
        self.reviews
            .iter()
            .rev()
            .find(|r| r.status == ReviewStatus::Pending)
    }

    fn find_mut(&mut self, key: &RepositoryKey, id: ReviewId) -> Result<&mut Arc<Review>> {
        self.reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RepolensError::NotFound(format!("review {id} of {key}")))
    }
}

/// Per-repository entry returned by [`ReviewStore::list_keys`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSummary {
    pub repo_key: RepositoryKey,
    pub last_reviewed_at: DateTime<Utc>,
    pub focus_areas: Vec<Category>,
    pub review_count: usize,
    pub latest_review_id: ReviewId,
    pub latest_status: ReviewStatus,
}

/// Shared, cloneable handle to the review history of every repository.
///
/// All mutations take the write lock for their whole read-check-write
/// sequence, so at most one review per repository is ever pending. The lock
/// is never held across an `.await`. Readers get `Arc<Review>` snapshots
/// that later transitions do not change.
///
/// # Examples
///
/// ```
/// use repolens_core::{RepositoryKey, ReviewStatus};
/// use repolens_review::store::ReviewStore;
///
/// let store = ReviewStore::new();
/// let key = RepositoryKey::parse("octocat/demo").unwrap();
///
/// let id = store.put_pending(&key, vec![]).unwrap();
/// assert!(store.put_pending(&key, vec![]).is_err());
///
/// store.complete(&key, id, vec![], "clean".into()).unwrap();
/// assert_eq!(store.get_latest(&key).unwrap().status, ReviewStatus::Complete);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReviewStore {
    inner: Arc<RwLock<HashMap<RepositoryKey, ReviewHistory>>>,
}

impl ReviewStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new pending review for `key` and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Conflict`] if a review of `key` is already pending.
    pub fn put_pending(&self, key: &RepositoryKey, focus_areas: Vec<Category>) -> Result<ReviewId> {
        let mut map = self.inner.write();
        let history = map.entry(key.clone()).or_default();
        if let Some(pending) = history.pending() {
            tracing::debug!(repo = %key, review_id = %pending.id, "review already pending");
            return Err(RepolensError::Conflict(key.to_string()));
        }
        history.last_id += 1;
        let id = ReviewId(history.last_id);
        history
            .reviews
            .push(Arc::new(Review::pending(id, key.clone(), focus_areas)));
        Ok(id)
    }

    /// Attach the fetched files to a pending review.
    ///
    /// # Errors
    ///
    /// [`RepolensError::NotFound`] for an unknown review,
    /// [`RepolensError::State`] if it is no longer pending.
    pub fn record_snapshot(
        &self,
        key: &RepositoryKey,
        id: ReviewId,
        files: Vec<FileRef>,
    ) -> Result<()> {
        self.transition(key, id, |review| {
            review.files = files;
        })?;
        Ok(())
    }

    /// Mark a pending review complete with its findings and summary.
    ///
    /// Findings are stored ordered by severity, ties in the given order.
    ///
    /// # Errors
    ///
    /// [`RepolensError::NotFound`] for an unknown review,
    /// [`RepolensError::State`] if it is not pending.
    pub fn complete(
        &self,
        key: &RepositoryKey,
        id: ReviewId,
        mut findings: Vec<Finding>,
        summary: String,
    ) -> Result<Arc<Review>> {
        sort_findings(&mut findings);
        self.transition(key, id, |review| {
            review.status = ReviewStatus::Complete;
            review.findings = findings;
            review.summary = Some(summary);
        })
    }

    /// Mark a pending review failed.
    ///
    /// # Errors
    ///
    /// Same as [`complete`](Self::complete).
    pub fn fail(&self, key: &RepositoryKey, id: ReviewId, reason: String) -> Result<Arc<Review>> {
        self.transition(key, id, |review| {
            review.status = ReviewStatus::Failed;
            review.failure_reason = Some(reason);
        })
    }

    fn transition(
        &self,
        key: &RepositoryKey,
        id: ReviewId,
        apply: impl FnOnce(&mut Review),
    ) -> Result<Arc<Review>> {
        let mut map = self.inner.write();
        let history = map
            .get_mut(key)
            .ok_or_else(|| RepolensError::NotFound(format!("no reviews for {key}")))?;
        let slot = history.find_mut(key, id)?;
        if slot.status.is_terminal() {
            return Err(RepolensError::State(format!(
                "review {id} of {key} is already {}",
                slot.status
            )));
        }
        // copy-on-write: readers holding the old Arc keep their snapshot
        let review = Arc::make_mut(slot);
        apply(review);
        review.updated_at = Utc::now();
        Ok(Arc::clone(slot))
    }

    /// Most recent review of `key` in any status.
    pub fn get_latest(&self, key: &RepositoryKey) -> Option<Arc<Review>> {
        self.inner
            .read()
            .get(key)
            .and_then(|h| h.reviews.last().cloned())
    }

    /// A specific review.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::NotFound`] if `key` or `id` is unknown.
    pub fn get(&self, key: &RepositoryKey, id: ReviewId) -> Result<Arc<Review>> {
        self.inner
            .read()
            .get(key)
            .and_then(|h| h.reviews.iter().find(|r| r.id == id).cloned())
            .ok_or_else(|| RepolensError::NotFound(format!("review {id} of {key}")))
    }

    /// Most recent completed review of `key`.
    pub fn latest_completed(&self, key: &RepositoryKey) -> Option<Arc<Review>> {
        self.inner.read().get(key).and_then(|h| {
            h.reviews
                .iter()
                .rev()
                .find(|r| r.status == ReviewStatus::Complete)
                .cloned()
        })
    }

    /// Every review of `key`, oldest first.
    pub fn history(&self, key: &RepositoryKey) -> Vec<Arc<Review>> {
        self.inner
            .read()
            .get(key)
            .map(|h| h.reviews.clone())
            .unwrap_or_default()
    }

    /// Every reviewed repository, most recently updated first.
    pub fn list_keys(&self) -> Vec<RepoSummary> {
        let map = self.inner.read();
        let mut summaries: Vec<RepoSummary> = map
            .iter()
            .filter_map(|(key, history)| {
                let latest = history.reviews.last()?;
                Some(RepoSummary {
                    repo_key: key.clone(),
                    last_reviewed_at: latest.updated_at,
                    focus_areas: latest.focus_areas.clone(),
                    review_count: history.reviews.len(),
                    latest_review_id: latest.id,
                    latest_status: latest.status,
                })
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.last_reviewed_at
                .cmp(&a.last_reviewed_at)
                .then_with(|| a.repo_key.cmp(&b.repo_key))
        });
        summaries
    }

    /// Fail every pending review created more than `timeout` ago.
    pub fn reclaim_stale(&self, timeout: Duration) -> Vec<(RepositoryKey, ReviewId)> {
        self.reclaim_stale_at(Utc::now(), timeout)
    }

    /// [`reclaim_stale`](Self::reclaim_stale) against an explicit clock.
    pub fn reclaim_stale_at(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<(RepositoryKey, ReviewId)> {
        let mut reclaimed = Vec::new();
        let mut map = self.inner.write();
        for (key, history) in map.iter_mut() {
            for slot in history.reviews.iter_mut() {
                if slot.status.is_terminal() {
                    continue;
                }
                let expired = now
                    .signed_duration_since(slot.created_at)
                    .to_std()
                    .is_ok_and(|age| age >= timeout);
                if !expired {
                    continue;
                }
                let review = Arc::make_mut(slot);
                review.status = ReviewStatus::Failed;
                review.failure_reason = Some(format!(
                    "timed out: still pending after {}s",
                    timeout.as_secs()
                ));
                review.updated_at = now;
                reclaimed.push((key.clone(), review.id));
            }
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use repolens_core::Severity;

    use super::*;

    fn key(s: &str) -> RepositoryKey {
        RepositoryKey::parse(s).unwrap()
    }

    #[test]
    fn ids_increase_per_key() {
        let store = ReviewStore::new();
        let a = key("octocat/a");
        let b = key("octocat/b");

        let a1 = store.put_pending(&a, vec![]).unwrap();
        store.complete(&a, a1, vec![], "ok".into()).unwrap();
        let a2 = store.put_pending(&a, vec![]).unwrap();
        let b1 = store.put_pending(&b, vec![]).unwrap();

        assert_eq!(a1, ReviewId(1));
        assert_eq!(a2, ReviewId(2));
        assert_eq!(b1, ReviewId(1));
    }

    #[test]
    fn second_pending_conflicts_until_terminal() {
        let store = ReviewStore::new();
        let k = key("octocat/demo");
        let id = store.put_pending(&k, vec![Category::Security]).unwrap();

        let err = store.put_pending(&k, vec![]).unwrap_err();
        assert!(matches!(err, RepolensError::Conflict(_)));
        assert_eq!(store.history(&k).len(), 1);

        store.fail(&k, id, "rate limit exceeded".into()).unwrap();
        assert!(store.put_pending(&k, vec![]).is_ok());
    }

    #[test]
    fn transitions_are_one_way() {
        let store = ReviewStore::new();
        let k = key("octocat/demo");
        let id = store.put_pending(&k, vec![]).unwrap();
        store.complete(&k, id, vec![], "done".into()).unwrap();

        let err = store.fail(&k, id, "late".into()).unwrap_err();
        assert!(matches!(err, RepolensError::State(_)));
        let err = store.complete(&k, id, vec![], "again".into()).unwrap_err();
        assert!(matches!(err, RepolensError::State(_)));
        let err = store.record_snapshot(&k, id, vec![]).unwrap_err();
        assert!(matches!(err, RepolensError::State(_)));

        let review = store.get(&k, id).unwrap();
        assert_eq!(review.status, ReviewStatus::Complete);
        assert_eq!(review.summary.as_deref(), Some("done"));
    }

    #[test]
    fn unknown_reviews_are_not_found() {
        let store = ReviewStore::new();
        let k = key("octocat/demo");
        assert!(matches!(
            store.complete(&k, ReviewId(1), vec![], String::new()),
            Err(RepolensError::NotFound(_))
        ));
        store.put_pending(&k, vec![]).unwrap();
        assert!(matches!(
            store.get(&k, ReviewId(9)),
            Err(RepolensError::NotFound(_))
        ));
        assert!(store.get_latest(&key("octocat/other")).is_none());
    }

    #[test]
    fn completed_findings_are_sorted() {
        let store = ReviewStore::new();
        let k = key("octocat/demo");
        let id = store.put_pending(&k, vec![]).unwrap();
        let findings = vec![
            Finding::new(Category::Quality, Severity::Low, "l1"),
            Finding::new(Category::Security, Severity::Critical, "c1"),
            Finding::new(Category::Quality, Severity::Low, "l2"),
        ];
        let review = store.complete(&k, id, findings, "s".into()).unwrap();
        let order: Vec<&str> = review.findings.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(order, vec!["c1", "l1", "l2"]);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = ReviewStore::new();
        let k = key("octocat/demo");
        let id = store.put_pending(&k, vec![]).unwrap();
        let before = store.get_latest(&k).unwrap();
        store.complete(&k, id, vec![], "s".into()).unwrap();
        assert_eq!(before.status, ReviewStatus::Pending);
        assert_eq!(store.get_latest(&k).unwrap().status, ReviewStatus::Complete);
    }

    #[test]
    fn latest_after_n_cycles_is_nth() {
        let store = ReviewStore::new();
        let k = key("octocat/demo");
        for n in 1..=5 {
            let id = store.put_pending(&k, vec![]).unwrap();
            store.complete(&k, id, vec![], format!("cycle {n}")).unwrap();
        }
        let latest = store.get_latest(&k).unwrap();
        assert_eq!(latest.id, ReviewId(5));
        assert_eq!(latest.summary.as_deref(), Some("cycle 5"));

        let listed = store.list_keys();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].review_count, 5);
        assert_eq!(listed[0].last_reviewed_at, latest.updated_at);
    }

    #[test]
    fn latest_completed_skips_failed_and_pending() {
        let store = ReviewStore::new();
        let k = key("octocat/demo");
        let first = store.put_pending(&k, vec![]).unwrap();
        store.complete(&k, first, vec![], "good".into()).unwrap();
        let second = store.put_pending(&k, vec![]).unwrap();
        store.fail(&k, second, "boom".into()).unwrap();
        store.put_pending(&k, vec![]).unwrap();

        assert_eq!(store.latest_completed(&k).unwrap().id, first);
        assert_eq!(store.get_latest(&k).unwrap().id, ReviewId(3));
    }

    #[test]
    fn list_keys_orders_most_recent_first() {
        let store = ReviewStore::new();
        let a = key("octocat/a");
        let b = key("octocat/b");
        let id_a = store.put_pending(&a, vec![]).unwrap();
        let id_b = store.put_pending(&b, vec![Category::Performance]).unwrap();
        store.complete(&b, id_b, vec![], "b".into()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.complete(&a, id_a, vec![], "a".into()).unwrap();

        let listed = store.list_keys();
        assert_eq!(listed[0].repo_key, a);
        assert_eq!(listed[1].repo_key, b);
        assert_eq!(listed[1].focus_areas, vec![Category::Performance]);
        assert_eq!(listed[1].latest_status, ReviewStatus::Complete);
    }

    #[test]
    fn reclaim_fails_only_old_pending_reviews() {
        let store = ReviewStore::new();
        let old = key("octocat/old");
        let fresh = key("octocat/fresh");
        let old_id = store.put_pending(&old, vec![]).unwrap();
        store.put_pending(&fresh, vec![]).unwrap();

        let now = Utc::now();
        assert!(store.reclaim_stale_at(now, Duration::from_secs(60)).is_empty());

        let later = now + chrono::Duration::seconds(120);
        let reclaimed = store.reclaim_stale_at(later, Duration::from_secs(60));
        assert_eq!(reclaimed.len(), 2);
        let review = store.get(&old, old_id).unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert!(review.failure_reason.as_deref().unwrap().contains("timed out"));
        assert!(store.put_pending(&old, vec![]).is_ok());
    }

    #[test]
    fn concurrent_put_pending_admits_one() {
        let store = ReviewStore::new();
        let k = key("octocat/demo");
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let k = k.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.put_pending(&k, vec![]).is_ok()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(store.history(&k).len(), 1);
    }
}
