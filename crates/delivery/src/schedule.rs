/*
 * Robin mail transfer agent
 *
 * Copyright (C) 2024 - the Robin authors
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

//! The retry ladder: how long to wait after the n-th failed attempt.

/// Delay before the next attempt, indexed by attempt count. The ladder
/// ramps up quickly during the first hours, then settles near four hours;
/// the last scheduled retry fires 14220 seconds after attempt 30.
const LADDER: [u64; 30] = [
    60, 120, 240, 420, 660, 960, 1320, 1740, 2220, 2760, // first hour and a half
    3360, 4020, 4740, 5520, 6360, 7260, 7860, 8460, 9060, 9660,
    10260, 10860, 11460, 12060, 12660, 13260, 13560, 13860, 14040, 14220,
];

/// Delay until the next delivery attempt after `attempt` failed ones.
///
/// `None` means the envelope is out of retries: drop it or bounce it.
/// Attempt counts below 1 are clamped to the first rung.
#[must_use]
pub fn next_retry(attempt: i64) -> Option<std::time::Duration> {
    if attempt > LADDER.len() as i64 {
        return None;
    }
    let index = usize::try_from(attempt.max(1) - 1).unwrap_or(0);
    Some(std::time::Duration::from_secs(LADDER[index]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds(attempt: i64) -> Option<u64> {
        next_retry(attempt).map(|d| d.as_secs())
    }

    #[test]
    fn first_retry_is_a_minute_away() {
        assert_eq!(seconds(1), Some(60));
    }

    #[test]
    fn non_positive_attempts_are_clamped() {
        assert_eq!(seconds(0), Some(60));
        assert_eq!(seconds(-5), Some(60));
    }

    #[test]
    fn last_scheduled_retry() {
        assert_eq!(seconds(30), Some(14220));
        assert!(seconds(30).unwrap() < 86400);
    }

    #[test]
    fn past_the_ladder_is_terminal() {
        assert_eq!(seconds(31), None);
        assert_eq!(seconds(1000), None);
    }

    #[test]
    fn monotone_over_the_first_rungs() {
        for attempt in 1..=9 {
            assert!(seconds(attempt + 1).unwrap() >= seconds(attempt).unwrap());
        }
    }

    #[test]
    fn monotone_over_the_whole_ladder() {
        for attempt in 1..=29 {
            assert!(seconds(attempt + 1).unwrap() >= seconds(attempt).unwrap());
        }
    }
}
