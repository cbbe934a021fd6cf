//! Parent→child links and chain resolution.
//!
//! Cycles and excessive depth are rejected at link time; the depth walker is
//! still capped so a hydration anomaly cannot hang a traversal.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::error::CoreError;
use crate::models::{ExceptionType, Link, LinkOptions, Series};
use crate::store::completions::CompletionReader;
use crate::store::exceptions::ExceptionReader;
use crate::store::series::SeriesReader;
use crate::time::{default_pattern_time, resolve_local_time};

pub const MAX_CHAIN_DEPTH: usize = 32;

/// Per-build parent end-times, keyed by (series, date). Supplied by the
/// schedule engine for topo-sorted siblings.
pub type ChainEnds = HashMap<(Uuid, NaiveDate), NaiveDateTime>;

/// Owns the link table and computes parent end-times for chain placement.
pub struct LinkManager {
    adapter: Arc<dyn Adapter>,
    /// Keyed by child: a child has at most one parent.
    links: Arc<RwLock<HashMap<Uuid, Link>>>,
    series: SeriesReader,
    completions: CompletionReader,
    exceptions: ExceptionReader,
    tz: Tz,
}

impl LinkManager {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        series: SeriesReader,
        completions: CompletionReader,
        exceptions: ExceptionReader,
        tz: Tz,
    ) -> Self {
        Self {
            adapter,
            links: Arc::new(RwLock::new(HashMap::new())),
            series,
            completions,
            exceptions,
            tz,
        }
    }

    pub async fn link(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        options: LinkOptions,
    ) -> Result<Link, CoreError> {
        if !self.series.contains(parent_id) {
            return Err(CoreError::NotFound(format!("Series {} not found", parent_id)));
        }
        let child = self
            .series
            .get(child_id)
            .ok_or_else(|| CoreError::NotFound(format!("Series {} not found", child_id)))?;
        if parent_id == child_id {
            return Err(CoreError::CycleDetected {
                parent: parent_id,
                child: child_id,
            });
        }
        if options.distance_minutes < 0
            || options.early_wobble_minutes < 0
            || options.late_wobble_minutes < 0
        {
            return Err(CoreError::Validation(
                "Link distance and wobble must not be negative".to_string(),
            ));
        }
        let snapshot = self.snapshot();
        if snapshot.contains_key(&child_id) {
            return Err(CoreError::Validation(format!(
                "Series {} is already linked to a parent",
                child_id
            )));
        }
        if (options.early_wobble_minutes > 0 || options.late_wobble_minutes > 0)
            && child.patterns.iter().any(|p| p.fixed)
        {
            return Err(CoreError::Validation(
                "A fixed series cannot carry wobble".to_string(),
            ));
        }

        // Walk the parent's ancestor chain: a cycle shows up as the child.
        let mut parent_depth = 0usize;
        let mut current = parent_id;
        while let Some(link) = snapshot.get(&current) {
            if link.parent_id == child_id {
                return Err(CoreError::CycleDetected {
                    parent: parent_id,
                    child: child_id,
                });
            }
            current = link.parent_id;
            parent_depth += 1;
            if parent_depth > MAX_CHAIN_DEPTH {
                return Err(CoreError::ChainDepthExceeded {
                    depth: parent_depth,
                    max: MAX_CHAIN_DEPTH,
                });
            }
        }
        let depth = parent_depth + 1 + subtree_height(&snapshot, child_id);
        if depth > MAX_CHAIN_DEPTH {
            return Err(CoreError::ChainDepthExceeded {
                depth,
                max: MAX_CHAIN_DEPTH,
            });
        }

        let link = Link {
            parent_id,
            child_id,
            distance_minutes: options.distance_minutes,
            early_wobble_minutes: options.early_wobble_minutes,
            late_wobble_minutes: options.late_wobble_minutes,
        };
        self.adapter.create_link(&link).await?;
        self.write().insert(child_id, link.clone());
        Ok(link)
    }

    /// Idempotent removal of a child's link.
    pub async fn unlink(&self, child_id: Uuid) -> Result<(), CoreError> {
        if self.snapshot().contains_key(&child_id) {
            self.adapter.delete_link(child_id).await?;
            self.write().remove(&child_id);
        }
        Ok(())
    }

    pub fn link_for_child(&self, child_id: Uuid) -> Option<Link> {
        self.snapshot().get(&child_id).cloned()
    }

    pub fn has_children(&self, parent_id: Uuid) -> bool {
        self.snapshot().values().any(|l| l.parent_id == parent_id)
    }

    /// Snapshot of the whole link table, keyed by child.
    pub fn snapshot(&self) -> HashMap<Uuid, Link> {
        self.links.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of ancestors above `id`. Roots have depth 0. Capped at one past
    /// the maximum in case corrupt data ever introduces a cycle.
    pub fn chain_depth(&self, id: Uuid) -> Result<usize, CoreError> {
        let snapshot = self.snapshot();
        let mut depth = 0usize;
        let mut current = id;
        while let Some(link) = snapshot.get(&current) {
            depth += 1;
            current = link.parent_id;
            if depth > MAX_CHAIN_DEPTH {
                return Err(CoreError::ChainDepthExceeded {
                    depth,
                    max: MAX_CHAIN_DEPTH,
                });
            }
        }
        Ok(depth)
    }

    /// Effective end-time of `parent` on `date`, in precedence order: a
    /// completion with a recorded end time, a rescheduled exception plus the
    /// parent's duration, an engine-built chain end, and finally the parent's
    /// own pattern time plus duration.
    pub fn parent_end_time(
        &self,
        parent: &Series,
        date: NaiveDate,
        chain_ends: &ChainEnds,
    ) -> Option<NaiveDateTime> {
        if let Some(completion) = self.completions.get_for_date(parent.id, date) {
            if let Some(end) = completion.end_time {
                return Some(date.and_time(end));
            }
        }
        if let Some(exception) = self.exceptions.get(parent.id, date) {
            if exception.exception_type == ExceptionType::Rescheduled {
                if let Some(new_time) = exception.new_time {
                    return Some(new_time + Duration::minutes(first_pattern_duration(parent)));
                }
            }
        }
        if let Some(end) = chain_ends.get(&(parent.id, date)) {
            return Some(*end);
        }
        let pattern = parent.patterns.first()?;
        let time = resolve_local_time(
            self.tz,
            date,
            pattern.time.unwrap_or_else(default_pattern_time),
        );
        Some(date.and_time(time) + Duration::minutes(pattern.duration_minutes.unwrap_or(0)))
    }

    /// Mirror an incoming link onto a split-off series.
    pub async fn copy_for_split(&self, original: Uuid, clone: Uuid) -> Result<(), CoreError> {
        let Some(link) = self.link_for_child(original) else {
            return Ok(());
        };
        let mirrored = Link {
            parent_id: link.parent_id,
            child_id: clone,
            distance_minutes: link.distance_minutes,
            early_wobble_minutes: link.early_wobble_minutes,
            late_wobble_minutes: link.late_wobble_minutes,
        };
        self.adapter.create_link(&mirrored).await?;
        self.write().insert(clone, mirrored);
        Ok(())
    }

    pub async fn hydrate(&self) -> Result<(), CoreError> {
        for link in self.adapter.get_all_links().await? {
            self.write().entry(link.child_id).or_insert(link);
        }
        Ok(())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Link>> {
        self.links.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn first_pattern_duration(series: &Series) -> i64 {
    series
        .patterns
        .first()
        .and_then(|p| p.duration_minutes)
        .unwrap_or(0)
}

/// Levels below `id` in the link tree, capped alongside the depth limit.
fn subtree_height(links: &HashMap<Uuid, Link>, id: Uuid) -> usize {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for link in links.values() {
        children.entry(link.parent_id).or_default().push(link.child_id);
    }
    let mut height = 0usize;
    let mut frontier = vec![id];
    while !frontier.is_empty() && height <= MAX_CHAIN_DEPTH {
        frontier = frontier
            .iter()
            .flat_map(|node| children.get(node).cloned().unwrap_or_default())
            .collect();
        if frontier.is_empty() {
            break;
        }
        height += 1;
    }
    height
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryAdapter;
    use crate::models::{NewSeriesData, Pattern, PatternRule};
    use crate::store::completions::CompletionTracker;
    use crate::store::exceptions::ExceptionStore;
    use crate::store::series::SeriesStore;
    use crate::time::parse_date;

    struct Fixture {
        series: SeriesStore,
        completions: CompletionTracker,
        exceptions: ExceptionStore,
        links: LinkManager,
    }

    fn fixture() -> Fixture {
        let adapter = Arc::new(MemoryAdapter::new());
        let series = SeriesStore::new(adapter.clone());
        let completions = CompletionTracker::new(adapter.clone());
        let exceptions = ExceptionStore::new(adapter.clone());
        let links = LinkManager::new(
            adapter,
            series.reader(),
            completions.reader(),
            exceptions.reader(),
            "UTC".parse().unwrap(),
        );
        Fixture {
            series,
            completions,
            exceptions,
            links,
        }
    }

    async fn add_series(fixture: &Fixture, title: &str) -> Uuid {
        fixture
            .series
            .create(NewSeriesData {
                title: title.to_string(),
                patterns: vec![Pattern::new(PatternRule::Daily)],
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_child_has_single_parent() {
        let f = fixture();
        let a = add_series(&f, "a").await;
        let b = add_series(&f, "b").await;
        let c = add_series(&f, "c").await;
        f.links.link(a, c, LinkOptions::default()).await.unwrap();
        let result = f.links.link(b, c, LinkOptions::default()).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_cycle_rejected() {
        let f = fixture();
        let a = add_series(&f, "a").await;
        let b = add_series(&f, "b").await;
        let c = add_series(&f, "c").await;
        f.links.link(a, b, LinkOptions::default()).await.unwrap();
        f.links.link(b, c, LinkOptions::default()).await.unwrap();
        let result = f.links.link(c, a, LinkOptions::default()).await;
        assert!(matches!(result, Err(CoreError::CycleDetected { .. })));
        let result = f.links.link(a, a, LinkOptions::default()).await;
        assert!(matches!(result, Err(CoreError::CycleDetected { .. })));
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let f = fixture();
        let mut ids = Vec::new();
        for i in 0..=MAX_CHAIN_DEPTH + 1 {
            ids.push(add_series(&f, &format!("s{}", i)).await);
        }
        // Chain of 33 series reaches depth 32; the 34th link is rejected.
        for i in 0..MAX_CHAIN_DEPTH {
            f.links
                .link(ids[i], ids[i + 1], LinkOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(f.links.chain_depth(ids[MAX_CHAIN_DEPTH]).unwrap(), MAX_CHAIN_DEPTH);
        let result = f
            .links
            .link(ids[MAX_CHAIN_DEPTH], ids[MAX_CHAIN_DEPTH + 1], LinkOptions::default())
            .await;
        assert!(matches!(result, Err(CoreError::ChainDepthExceeded { .. })));
    }

    #[tokio::test]
    async fn test_unlink_is_idempotent() {
        let f = fixture();
        let a = add_series(&f, "a").await;
        let b = add_series(&f, "b").await;
        f.links.link(a, b, LinkOptions::default()).await.unwrap();
        f.links.unlink(b).await.unwrap();
        f.links.unlink(b).await.unwrap();
        assert!(f.links.link_for_child(b).is_none());
    }

    #[tokio::test]
    async fn test_fixed_child_rejects_wobble() {
        let f = fixture();
        let a = add_series(&f, "a").await;
        let mut pattern = Pattern::new(PatternRule::Daily);
        pattern.fixed = true;
        let b = f
            .series
            .create(NewSeriesData {
                title: "b".to_string(),
                patterns: vec![pattern],
                ..Default::default()
            })
            .await
            .unwrap()
            .id;
        let result = f
            .links
            .link(
                a,
                b,
                LinkOptions {
                    distance_minutes: 10,
                    early_wobble_minutes: 0,
                    late_wobble_minutes: 5,
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_parent_end_time_precedence() {
        let f = fixture();
        let a = add_series(&f, "a").await;
        let date = parse_date("2025-01-19").unwrap();
        let parent = f.series.reader().get(a).unwrap();
        let chain_ends = ChainEnds::new();

        // Pattern fallback: default 09:00 plus zero duration.
        let end = f.links.parent_end_time(&parent, date, &chain_ends).unwrap();
        assert_eq!(end, date.and_time(crate::time::parse_time("09:00").unwrap()));

        // Built chain ends outrank the pattern.
        let mut built = ChainEnds::new();
        built.insert((a, date), date.and_time(crate::time::parse_time("10:15").unwrap()));
        let end = f.links.parent_end_time(&parent, date, &built).unwrap();
        assert_eq!(end, date.and_time(crate::time::parse_time("10:15").unwrap()));

        // A rescheduled exception outranks built chain ends.
        f.exceptions
            .set(crate::models::InstanceException {
                series_id: a,
                date,
                exception_type: ExceptionType::Rescheduled,
                new_time: Some(date.and_time(crate::time::parse_time("11:00").unwrap())),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let end = f.links.parent_end_time(&parent, date, &built).unwrap();
        assert_eq!(end, date.and_time(crate::time::parse_time("11:00").unwrap()));

        // A completion end time outranks everything.
        f.completions
            .log(
                a,
                date,
                Some(crate::time::parse_time("09:00").unwrap()),
                Some(crate::time::parse_time("09:20").unwrap()),
            )
            .await
            .unwrap();
        let end = f.links.parent_end_time(&parent, date, &built).unwrap();
        assert_eq!(end, date.and_time(crate::time::parse_time("09:20").unwrap()));
    }

    #[tokio::test]
    async fn test_copy_for_split_mirrors_incoming_link() {
        let f = fixture();
        let parent = add_series(&f, "parent").await;
        let child = add_series(&f, "child").await;
        let clone = add_series(&f, "clone").await;
        f.links
            .link(
                parent,
                child,
                LinkOptions {
                    distance_minutes: 30,
                    early_wobble_minutes: 5,
                    late_wobble_minutes: 10,
                },
            )
            .await
            .unwrap();
        f.links.copy_for_split(child, clone).await.unwrap();
        let mirrored = f.links.link_for_child(clone).unwrap();
        assert_eq!(mirrored.parent_id, parent);
        assert_eq!(mirrored.distance_minutes, 30);
    }
}
