//! Retention window evaluation
//!
//! Every window is evaluated on its own against the full inventory. Inside a
//! window, images are grouped into `interval`-sized slices walked forward
//! from the window's older boundary; in every slice holding more than one
//! image the earliest one survives (ties broken by id) and the rest are
//! marked for purge. Images outside every window are never purged.

use super::window::RetentionWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// The survivor and victims of one crowded slice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketDecision {
    /// Position of the window in the configured list
    pub window: usize,
    pub window_spec: String,
    pub slice_start: DateTime<Utc>,
    pub slice_end: DateTime<Utc>,
    pub survivor: String,
    pub purged: Vec<String>,
}

/// Result of evaluating a set of windows over an inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgePlan {
    /// Images to delete, each at most once
    pub purge: BTreeSet<String>,
    /// Every slice that held more than one image, in window then time order
    pub buckets: Vec<BucketDecision>,
}

impl PurgePlan {
    pub fn is_empty(&self) -> bool {
        self.purge.is_empty()
    }

    pub fn len(&self) -> usize {
        self.purge.len()
    }
}

/// Compute the purge plan for `inventory` (image id, backup timestamp).
///
/// The result depends only on the set of pairs, never on their order. If an
/// id is listed twice its earliest timestamp is used.
pub fn evaluate<'a, I>(inventory: I, windows: &[RetentionWindow]) -> PurgePlan
where
    I: IntoIterator<Item = (&'a str, DateTime<Utc>)>,
{
    let mut ages: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
    for (id, ts) in inventory {
        ages.entry(id)
            .and_modify(|t| *t = (*t).min(ts))
            .or_insert(ts);
    }

    let mut plan = PurgePlan::default();

    for (index, window) in windows.iter().enumerate() {
        let mut slices: BTreeMap<i64, Vec<(DateTime<Utc>, &str)>> = BTreeMap::new();
        for (&id, &ts) in &ages {
            if let Some(slice) = window.slice_index(ts) {
                slices.entry(slice).or_default().push((ts, id));
            }
        }

        for (slice, mut members) in slices {
            if members.len() < 2 {
                continue;
            }
            members.sort();
            let (slice_start, slice_end) = window.slice_bounds(slice);
            let survivor = members[0].1.to_string();
            let purged: Vec<String> = members[1..].iter().map(|(_, id)| id.to_string()).collect();

            plan.purge.extend(purged.iter().cloned());
            plan.buckets.push(BucketDecision {
                window: index,
                window_spec: window.spec().to_string(),
                slice_start,
                slice_end,
                survivor,
                purged,
            });
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn ago(delta: TimeDelta) -> DateTime<Utc> {
        now() - delta
    }

    fn window(spec: &str) -> RetentionWindow {
        RetentionWindow::parse(spec, now()).unwrap()
    }

    fn owned(images: &[(String, DateTime<Utc>)]) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        images.iter().map(|(id, t)| (id.as_str(), *t))
    }

    #[test]
    fn test_one_image_per_day_purges_nothing() {
        // Ten daily backups taken at the same time of day, the newest 1h ago
        let images: Vec<(String, DateTime<Utc>)> = (0..10)
            .map(|day| {
                (
                    format!("ami-{day:02}"),
                    ago(TimeDelta::days(day) + TimeDelta::hours(1)),
                )
            })
            .collect();

        let plan = evaluate(owned(&images), &[window("1d:1d:7d")]);
        assert!(plan.is_empty());
        assert!(plan.buckets.is_empty());
    }

    #[test]
    fn test_crowded_bucket_keeps_oldest() {
        let images = vec![
            ("ami-a".to_string(), ago(TimeDelta::days(3))),
            ("ami-b".to_string(), ago(TimeDelta::days(3) - TimeDelta::minutes(2))),
            ("ami-c".to_string(), ago(TimeDelta::days(3) - TimeDelta::minutes(5))),
        ];

        let plan = evaluate(owned(&images), &[window("1d:1d:7d")]);
        assert_eq!(
            plan.purge,
            BTreeSet::from(["ami-b".to_string(), "ami-c".to_string()])
        );
        assert_eq!(plan.buckets.len(), 1);
        assert_eq!(plan.buckets[0].survivor, "ami-a");
    }

    #[test]
    fn test_identical_timestamps_break_ties_by_id() {
        let t = ago(TimeDelta::days(2));
        let images = vec![
            ("ami-zz".to_string(), t),
            ("ami-aa".to_string(), t),
            ("ami-mm".to_string(), t),
        ];

        let plan = evaluate(owned(&images), &[window("1d:1d:7d")]);
        assert_eq!(plan.buckets[0].survivor, "ami-aa");
        assert!(!plan.purge.contains("ami-aa"));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_overlapping_windows_purge_once() {
        let images = vec![
            ("ami-1".to_string(), ago(TimeDelta::days(10))),
            ("ami-2".to_string(), ago(TimeDelta::days(10) - TimeDelta::hours(1))),
        ];

        let windows = [window("1d:2d:20d"), window("7d:5d:30d")];
        let plan = evaluate(owned(&images), &windows);
        assert_eq!(plan.purge, BTreeSet::from(["ami-2".to_string()]));
        assert_eq!(plan.buckets.len(), 2);
    }

    #[test]
    fn test_images_outside_every_window_are_kept() {
        let images = vec![
            ("ami-new1".to_string(), ago(TimeDelta::hours(1))),
            ("ami-new2".to_string(), ago(TimeDelta::hours(2))),
            ("ami-old1".to_string(), ago(TimeDelta::days(400))),
            ("ami-old2".to_string(), ago(TimeDelta::days(400) - TimeDelta::hours(1))),
        ];
        let plan = evaluate(owned(&images), &[window("1d:1d:30d")]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_window_boundaries_are_half_open() {
        let w = window("1d:1d:3d");
        // At exactly `start` (3d ago) the image is inside; at `stop` (1d ago) it is not.
        let images = vec![
            ("ami-at-start".to_string(), w.start()),
            ("ami-after-start".to_string(), w.start() + TimeDelta::hours(1)),
            ("ami-at-stop".to_string(), w.stop()),
            ("ami-after-stop".to_string(), w.stop() + TimeDelta::minutes(1)),
        ];
        let plan = evaluate(owned(&images), &[w]);
        assert_eq!(plan.purge, BTreeSet::from(["ami-after-start".to_string()]));
    }

    #[test]
    fn test_interval_wider_than_window() {
        let images = vec![
            ("ami-1".to_string(), ago(TimeDelta::days(6))),
            ("ami-2".to_string(), ago(TimeDelta::days(2))),
        ];
        let plan = evaluate(owned(&images), &[window("10000d:1d:7d")]);
        assert_eq!(plan.purge, BTreeSet::from(["ami-2".to_string()]));
        assert_eq!(plan.buckets[0].slice_start, ago(TimeDelta::days(7)));
        assert_eq!(plan.buckets[0].slice_end, ago(TimeDelta::days(1)));
    }

    #[test]
    fn test_no_windows_purge_nothing() {
        let images = vec![
            ("ami-1".to_string(), ago(TimeDelta::days(1))),
            ("ami-2".to_string(), ago(TimeDelta::days(1))),
        ];
        assert!(evaluate(owned(&images), &[]).is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        const HOUR: i64 = 3_600;

        fn inventory() -> impl Strategy<Value = Vec<(String, DateTime<Utc>)>> {
            prop::collection::vec(0i64..2_000 * HOUR, 0..40).prop_map(|ages| {
                ages.into_iter()
                    .enumerate()
                    .map(|(i, age)| (format!("ami-{i:04x}"), now() - TimeDelta::seconds(age)))
                    .collect()
            })
        }

        fn retention_window() -> impl Strategy<Value = RetentionWindow> {
            (1i64..200, 0i64..400, 1i64..1_000).prop_map(|(interval, start_age, span)| {
                RetentionWindow::new(
                    TimeDelta::hours(interval),
                    now() - TimeDelta::hours(start_age + span),
                    now() - TimeDelta::hours(start_age),
                )
                .unwrap()
            })
        }

        fn windows() -> impl Strategy<Value = Vec<RetentionWindow>> {
            prop::collection::vec(retention_window(), 0..4)
        }

        proptest! {
            /// Only images inside some window's span can be purged
            #[test]
            fn outside_every_window_is_never_purged(
                images in inventory(),
                windows in windows(),
            ) {
                let plan = evaluate(owned(&images), &windows);
                for (id, ts) in &images {
                    if !windows.iter().any(|w| w.contains(*ts)) {
                        prop_assert!(!plan.purge.contains(id.as_str()), "{} purged outside every window", id);
                    }
                }
            }

            /// Purged ids always come from the inventory
            #[test]
            fn purge_set_is_subset_of_inventory(
                images in inventory(),
                windows in windows(),
            ) {
                let plan = evaluate(owned(&images), &windows);
                let ids: BTreeSet<&str> = images.iter().map(|(id, _)| id.as_str()).collect();
                for id in &plan.purge {
                    prop_assert!(ids.contains(id.as_str()));
                }
            }

            /// Each occupied slice of a single window keeps exactly its earliest image
            #[test]
            fn one_survivor_per_bucket(
                images in inventory(),
                window in retention_window(),
            ) {
                let plan = evaluate(owned(&images), std::slice::from_ref(&window));

                let mut slices: BTreeMap<i64, Vec<(DateTime<Utc>, &str)>> = BTreeMap::new();
                for (id, ts) in &images {
                    if let Some(slice) = window.slice_index(*ts) {
                        slices.entry(slice).or_default().push((*ts, id.as_str()));
                    }
                }

                for members in slices.values() {
                    let kept: Vec<_> = members.iter().filter(|(_, id)| !plan.purge.contains(*id)).collect();
                    prop_assert_eq!(kept.len(), 1);
                    let earliest = members.iter().min().unwrap();
                    prop_assert_eq!(kept[0], earliest);
                }
            }

            /// Evaluating what is left after a purge finds nothing more to purge
            #[test]
            fn evaluation_is_idempotent(
                images in inventory(),
                windows in windows(),
            ) {
                let plan = evaluate(owned(&images), &windows);
                let remaining: Vec<(String, DateTime<Utc>)> = images
                    .iter()
                    .filter(|(id, _)| !plan.purge.contains(id.as_str()))
                    .cloned()
                    .collect();
                prop_assert!(evaluate(owned(&remaining), &windows).is_empty());
            }

            /// Input order never changes the outcome
            #[test]
            fn order_independent(
                (images, shuffled) in inventory().prop_flat_map(|inv| {
                    let copy = inv.clone();
                    (Just(inv), Just(copy).prop_shuffle())
                }),
                windows in windows(),
            ) {
                prop_assert_eq!(
                    evaluate(owned(&images), &windows),
                    evaluate(owned(&shuffled), &windows)
                );
            }
        }
    }
}
