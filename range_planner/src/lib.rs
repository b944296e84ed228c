// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Computes the disjoint time windows of a channel's history that still need collecting.
//!
//! The algorithm (`disjoint_ranges`) is a pure function over an already-sorted slice of
//! existing collection windows, kept free of any database dependency so it can be unit
//! tested directly; [`plan_ranges`] is the thin SQL-backed wrapper used in production.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// A closed time interval `[from, to]` that has already been collected for some entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectedRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Returns the disjoint sub-ranges of `[from, to]` not covered by `existing`, which must
/// already be sorted by `from` ascending and restricted to ranges overlapping `[from, to]`
/// (both guaranteed by the SQL wrapper's query; callers of the pure function directly must
/// provide them pre-sorted and pre-filtered, matching how the overlap query feeds this).
pub fn disjoint_ranges(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    existing: &[CollectedRange],
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    if existing.is_empty() {
        return vec![(from, to)];
    }

    let mut out = Vec::new();
    let mut cursor = from;
    for range in existing {
        if cursor < range.from {
            out.push((cursor, range.from));
        }
        if range.to > cursor {
            cursor = range.to;
        }
    }
    if cursor < to {
        out.push((cursor, to));
    }
    out
}

/// Fetches the collection records overlapping `[from, to]` for `entity_id` and returns the
/// disjoint ranges still needing collection. `to` defaults to "now" when `None`, matching
/// the incremental/backfill callers that omit an explicit upper bound.
pub async fn plan_ranges(
    pool: &PgPool,
    entity_id: i64,
    from: DateTime<Utc>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, sqlx::Error> {
    let to = to.unwrap_or_else(Utc::now);

    let rows = sqlx::query!(
        r#"
        SELECT from_datetime, to_datetime
        FROM crawler.channel_collections
        WHERE entity_id = $1
          AND (
                (from_datetime <= $2 AND $2 <= to_datetime)
             OR (from_datetime <= $3 AND $3 <= to_datetime)
             OR ($2 <= from_datetime AND to_datetime <= $3)
          )
        ORDER BY from_datetime ASC
        "#,
        entity_id,
        from,
        to,
    )
    .fetch_all(pool)
    .await?;

    let existing: Vec<CollectedRange> = rows
        .into_iter()
        .map(|row| CollectedRange {
            from: row.from_datetime,
            to: row.to_datetime,
        })
        .collect();

    Ok(disjoint_ranges(from, to, &existing))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{disjoint_ranges, CollectedRange};

    fn dt(hour: u32, minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn no_existing_ranges_returns_whole_window() {
        let result = disjoint_ranges(dt(9, 0), dt(10, 0), &[]);
        assert_eq!(result, vec![(dt(9, 0), dt(10, 0))]);
    }

    #[test]
    fn full_overlap_excludes_requested_window() {
        let existing = [CollectedRange {
            from: dt(10, 0),
            to: dt(11, 0),
        }];
        assert_eq!(
            disjoint_ranges(dt(9, 30), dt(10, 45), &existing),
            vec![(dt(9, 30), dt(10, 0))]
        );
        assert_eq!(disjoint_ranges(dt(10, 30), dt(10, 45), &existing), vec![]);
        assert_eq!(
            disjoint_ranges(dt(10, 30), dt(11, 30), &existing),
            vec![(dt(11, 0), dt(11, 30))]
        );
    }

    #[test]
    fn gaps_between_existing_ranges_are_returned() {
        let existing = [
            CollectedRange {
                from: dt(0, 0),
                to: dt(1, 0),
            },
            CollectedRange {
                from: dt(2, 0),
                to: dt(3, 0),
            },
        ];
        assert_eq!(
            disjoint_ranges(dt(0, 30), dt(2, 30), &existing),
            vec![(dt(1, 0), dt(2, 0))]
        );
    }

    #[test]
    fn ranges_are_pairwise_disjoint_and_contained() {
        let existing = [
            CollectedRange {
                from: dt(1, 0),
                to: dt(2, 0),
            },
            CollectedRange {
                from: dt(4, 0),
                to: dt(5, 0),
            },
        ];
        let result = disjoint_ranges(dt(0, 0), dt(6, 0), &existing);
        assert_eq!(
            result,
            vec![(dt(0, 0), dt(1, 0)), (dt(2, 0), dt(4, 0)), (dt(5, 0), dt(6, 0))]
        );
        for window in result.windows(2) {
            assert!(window[0].1 <= window[1].0);
        }
        for (a, b) in &result {
            assert!(*a >= dt(0, 0) && *b <= dt(6, 0));
        }
    }
}
