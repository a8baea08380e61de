//! Query window planning.
//!
//! Each run queries the verifiable range through a fixed set of windows:
//! the last hour, the last day, the 23h–24h boundary (where query sharding
//! and caching typically split) and one random window. Windows are clipped
//! to what the history says is queryable.

use std::time::Duration;

use rand::Rng;

use crate::error::TestError;
use crate::history::WriteReadHistory;
use crate::model::{duration_ms, Timestamp};

/// Most points a single range query may return before its step is widened.
pub const MAX_POINTS_PER_QUERY: i64 = 1_000;

const HOUR_MS: i64 = 60 * 60 * 1_000;

/// Range and instant query windows for one profile and one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryPlan {
    /// `(start, end)` of each range query.
    pub ranges: Vec<(Timestamp, Timestamp)>,
    /// Evaluation timestamp of each instant query.
    pub instants: Vec<Timestamp>,
}

/// Plans the query windows for a profile.
///
/// # Errors
///
/// Returns `TestError::NoQueryRange` if nothing has been written
/// successfully yet, and `TestError::QueryRangeTooOld` if everything written
/// is older than `max_query_age`.
pub fn plan_queries<R: Rng + ?Sized>(
    now: Timestamp,
    history: &WriteReadHistory,
    max_query_age: Duration,
    rng: &mut R,
) -> Result<QueryPlan, TestError> {
    let range = history.query_range().ok_or(TestError::NoQueryRange)?;

    let adjusted_min = range.min.max(now.saturating_sub(duration_ms(max_query_age)));
    if range.max < adjusted_min {
        return Err(TestError::QueryRangeTooOld {
            min: range.min,
            max: range.max,
            max_query_age,
        });
    }

    let last_1h = now - HOUR_MS;
    let last_23h = now - 23 * HOUR_MS;
    let last_24h = now - 24 * HOUR_MS;
    let mut plan = QueryPlan::default();

    if range.max > last_1h {
        plan.ranges.push((adjusted_min.max(last_1h), range.max.min(now)));
        plan.instants.push(range.max.min(now));
    }

    // Only when the range reaches further back than the last hour.
    if range.max > last_24h && adjusted_min < last_1h {
        plan.ranges.push((adjusted_min.max(last_24h), range.max.min(now)));
        plan.instants.push(adjusted_min.max(last_24h));
    }

    if adjusted_min < last_23h && range.max > last_23h {
        plan.ranges.push((adjusted_min.max(last_24h), range.max.min(last_23h)));
    }

    let random_start = rand_time(adjusted_min, range.max, rng);
    plan.ranges.push((random_start, rand_time(random_start, range.max, rng)));
    plan.instants.push(random_start);

    Ok(plan)
}

/// Picks a random whole second in `[min, max)`.
///
/// Returns `min` unchanged when the two are less than a second apart.
pub fn rand_time<R: Rng + ?Sized>(min: Timestamp, max: Timestamp, rng: &mut R) -> Timestamp {
    let min_secs = min.div_euclid(1_000);
    let delta = max.div_euclid(1_000) - min_secs;
    if delta <= 0 {
        return min;
    }
    (rng.gen_range(0..delta) + min_secs) * 1_000
}

/// Returns the step for a range query over `[start, end]`.
///
/// The step is `align_interval` unless that yields more than
/// [`MAX_POINTS_PER_QUERY`] points, in which case it is widened to the next
/// multiple of `align_interval` that fits.
#[must_use]
pub fn query_step(start: Timestamp, end: Timestamp, align_interval: Duration) -> Duration {
    let interval_ms = duration_ms(align_interval).max(1);
    let range_ms = end - start;
    if range_ms / interval_ms <= MAX_POINTS_PER_QUERY {
        return align_interval;
    }

    let step_ms = range_ms / MAX_POINTS_PER_QUERY;
    let step_ms = (step_ms / interval_ms + 1) * interval_ms;
    Duration::from_millis(u64::try_from(step_ms).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    // 2024-01-01T00:00:00Z, aligned to every interval used below.
    const NOW: Timestamp = 1_704_067_200_000;
    const MINUTE_MS: i64 = 60_000;
    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn test_two_hours_of_history() {
        let history = WriteReadHistory::recovered(NOW - 2 * HOUR_MS, NOW - 5 * MINUTE_MS);
        let plan = plan_queries(NOW, &history, WEEK, &mut rng()).unwrap();

        // Last 1h, last 24h (clipped to the history) and the random window.
        assert_eq!(plan.ranges.len(), 3);
        assert_eq!(plan.ranges[0], (NOW - HOUR_MS, NOW - 5 * MINUTE_MS));
        assert_eq!(plan.ranges[1], (NOW - 2 * HOUR_MS, NOW - 5 * MINUTE_MS));
        assert_eq!(&plan.instants[..2], &[NOW - 5 * MINUTE_MS, NOW - 2 * HOUR_MS]);

        // The 24h window contains the 1h one.
        assert!(plan.ranges[1].0 <= plan.ranges[0].0);
        assert!(plan.ranges[1].1 >= plan.ranges[0].1);

        let (start, end) = plan.ranges[2];
        assert!(start >= NOW - 2 * HOUR_MS && start < NOW - 5 * MINUTE_MS);
        assert!(end >= start && end <= NOW - 5 * MINUTE_MS);
        assert_eq!(plan.instants[2], start);
    }

    #[test]
    fn test_recent_history_only_queries_last_hour() {
        let history = WriteReadHistory::recovered(NOW - 10 * MINUTE_MS, NOW);
        let plan = plan_queries(NOW, &history, WEEK, &mut rng()).unwrap();

        assert_eq!(plan.ranges.len(), 2);
        assert_eq!(plan.ranges[0], (NOW - 10 * MINUTE_MS, NOW));
        assert_eq!(plan.instants[0], NOW);
    }

    #[test]
    fn test_long_history_queries_day_boundary() {
        let history = WriteReadHistory::recovered(NOW - 30 * HOUR_MS, NOW);
        let plan = plan_queries(NOW, &history, WEEK, &mut rng()).unwrap();

        assert_eq!(plan.ranges.len(), 4);
        assert_eq!(plan.ranges[0], (NOW - HOUR_MS, NOW));
        assert_eq!(plan.ranges[1], (NOW - 24 * HOUR_MS, NOW));
        assert_eq!(plan.ranges[2], (NOW - 24 * HOUR_MS, NOW - 23 * HOUR_MS));
        assert_eq!(&plan.instants[..2], &[NOW, NOW - 24 * HOUR_MS]);
    }

    #[test]
    fn test_max_query_age_clips_min() {
        let history = WriteReadHistory::recovered(NOW - 30 * HOUR_MS, NOW);
        let plan = plan_queries(NOW, &history, Duration::from_secs(2 * 3600), &mut rng()).unwrap();

        assert_eq!(plan.ranges[1], (NOW - 2 * HOUR_MS, NOW));
        assert!(plan.ranges.iter().all(|(start, _)| *start >= NOW - 2 * HOUR_MS));
    }

    #[test]
    fn test_no_query_range() {
        let result = plan_queries(NOW, &WriteReadHistory::new(), WEEK, &mut rng());
        assert!(matches!(result, Err(TestError::NoQueryRange)));
    }

    #[test]
    fn test_query_range_too_old() {
        let history = WriteReadHistory::recovered(NOW - 10 * HOUR_MS, NOW - 9 * HOUR_MS);
        let result = plan_queries(NOW, &history, Duration::from_secs(3600), &mut rng());
        assert!(matches!(result, Err(TestError::QueryRangeTooOld { .. })));
    }

    #[test]
    fn test_rand_time_bounds() {
        let mut rng = rng();
        for _ in 0..100 {
            let ts = rand_time(NOW, NOW + 60_000, &mut rng);
            assert!(ts >= NOW && ts < NOW + 60_000);
            assert_eq!(ts % 1_000, 0);
        }

        // Less than a second apart.
        assert_eq!(rand_time(NOW, NOW + 999, &mut rng), NOW);
        assert_eq!(rand_time(NOW, NOW - 5_000, &mut rng), NOW);
    }

    #[test]
    fn test_rand_time_is_seeded() {
        let a = rand_time(0, NOW, &mut rng());
        let b = rand_time(0, NOW, &mut rng());
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_step() {
        let interval = Duration::from_secs(20);

        // 1000 points fit.
        assert_eq!(query_step(0, 20_000 * 1_000, interval), interval);
        assert_eq!(query_step(0, 0, interval), interval);

        // 24h at 20s is 4320 points: widened to 100s (86.4s rounded up).
        let step = query_step(0, 24 * HOUR_MS, interval);
        assert_eq!(step, Duration::from_secs(100));
        assert!(24 * HOUR_MS / duration_ms(step) <= MAX_POINTS_PER_QUERY);
    }
}
