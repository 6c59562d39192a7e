//! Ranking policies over sampled results.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{SampleResult, Stability};

/// Anything that wraps a [`SampleResult`] can be ranked.
pub trait AsSample {
    fn sample(&self) -> &SampleResult;
}

impl AsSample for SampleResult {
    fn sample(&self) -> &SampleResult {
        self
    }
}

/// Ordering and best-pick policy.
///
/// Plain speed tests and comparison ordering use `Latency`. Loss-aware
/// selection uses `Stability`, under which a lossy endpoint never wins over a
/// stable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankPolicy {
    /// Succeeded results by latency, then failed ones.
    Latency,
    /// Stable, then unstable (each by latency), then failed.
    #[default]
    Stability,
}

impl FromStr for RankPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latency" => Ok(RankPolicy::Latency),
            "stability" => Ok(RankPolicy::Stability),
            other => Err(format!("unknown rank policy: {}", other)),
        }
    }
}

/// Present latencies first, ascending. Absent ones compare equal.
fn by_latency(a: &SampleResult, b: &SampleResult) -> Ordering {
    match (a.average_latency_ms(), b.average_latency_ms()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn by_stability(a: &SampleResult, b: &SampleResult) -> Ordering {
    a.stability().cmp(&b.stability()).then_with(|| {
        if a.stability() == Stability::Failed {
            Ordering::Equal
        } else {
            by_latency(a, b)
        }
    })
}

fn fastest<'a, T, P>(results: &'a [T], keep: P) -> Option<&'a T>
where
    T: AsSample,
    P: Fn(&SampleResult) -> bool,
{
    results
        .iter()
        .filter(|r| r.sample().succeeded() && keep(r.sample()))
        .min_by(|a, b| by_latency(a.sample(), b.sample()))
}

impl RankPolicy {
    /// Order results for display. The sort is stable, so ties keep input order.
    pub fn rank<T: AsSample>(self, mut results: Vec<T>) -> Vec<T> {
        match self {
            RankPolicy::Latency => results.sort_by(|a, b| by_latency(a.sample(), b.sample())),
            RankPolicy::Stability => results.sort_by(|a, b| by_stability(a.sample(), b.sample())),
        }
        results
    }

    /// Pick the single best result, or `None` when nothing succeeded.
    pub fn best<T: AsSample>(self, results: &[T]) -> Option<&T> {
        match self {
            RankPolicy::Latency => fastest(results, |_| true),
            RankPolicy::Stability => fastest(results, |r| r.stability() == Stability::Stable)
                .or_else(|| fastest(results, |r| r.stability() == Stability::Unstable))
                .or_else(|| fastest(results, |_| true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Target;

    /// Result with `ok` successes out of `attempts`, all at `latency`.
    fn result(addr: &str, attempts: u32, ok: usize, latency: f64) -> SampleResult {
        let lat = vec![latency; ok];
        SampleResult::from_latencies(Target::new(addr, 443).unwrap(), 443, attempts, &lat)
    }

    fn addrs<T: AsSample>(results: &[T]) -> Vec<&str> {
        results.iter().map(|r| r.sample().target().address()).collect()
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("latency".parse::<RankPolicy>().unwrap(), RankPolicy::Latency);
        assert_eq!(" Stability ".parse::<RankPolicy>().unwrap(), RankPolicy::Stability);
        assert!("fastest".parse::<RankPolicy>().is_err());
    }

    #[test]
    fn test_stability_ordering() {
        let results = vec![
            result("failed-a", 3, 0, 0.0),
            result("unstable-slow", 10, 8, 90.0),
            result("stable-slow", 3, 3, 50.0),
            result("lossy-fast", 3, 1, 1.0),
            result("unstable-fast", 10, 8, 20.0),
            result("stable-fast", 3, 3, 30.0),
            result("failed-b", 3, 0, 0.0),
        ];

        let ranked = RankPolicy::Stability.rank(results);
        assert_eq!(
            addrs(&ranked),
            vec![
                "stable-fast",
                "stable-slow",
                "unstable-fast",
                "unstable-slow",
                "failed-a",
                "lossy-fast",
                "failed-b",
            ]
        );
    }

    #[test]
    fn test_stability_tiers_are_monotonic() {
        let results: Vec<SampleResult> = (0..20)
            .map(|i| result(&format!("t{}", i), 10, (i * 7) % 11, ((i * 37) % 100) as f64))
            .collect();
        let ranked = RankPolicy::Stability.rank(results);

        for pair in ranked.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.stability() <= b.stability());
            if a.stability() == b.stability() && a.stability() != Stability::Failed {
                assert!(a.average_latency_ms() <= b.average_latency_ms());
            }
        }
    }

    #[test]
    fn test_latency_ordering_ignores_stability() {
        let results = vec![
            result("failed", 3, 0, 0.0),
            result("stable-slow", 3, 3, 50.0),
            result("lossy-fast", 3, 1, 5.0),
        ];
        let ranked = RankPolicy::Latency.rank(results);
        assert_eq!(addrs(&ranked), vec!["lossy-fast", "stable-slow", "failed"]);
    }

    #[test]
    fn test_equal_latency_keeps_input_order() {
        let results = vec![result("first", 3, 3, 10.0), result("second", 3, 3, 10.0)];
        let ranked = RankPolicy::Stability.rank(results);
        assert_eq!(addrs(&ranked), vec!["first", "second"]);
    }

    #[test]
    fn test_best_prefers_stable_over_faster_unstable() {
        let results = vec![
            result("unstable-fast", 10, 8, 5.0),
            result("stable-slow", 3, 3, 80.0),
        ];
        let best = RankPolicy::Stability.best(&results).unwrap();
        assert_eq!(best.target().address(), "stable-slow");

        let fastest = RankPolicy::Latency.best(&results).unwrap();
        assert_eq!(fastest.target().address(), "unstable-fast");
    }

    #[test]
    fn test_best_falls_back_to_unstable() {
        let results = vec![
            result("dead", 3, 0, 0.0),
            result("unstable-slow", 10, 8, 60.0),
            result("lossy-fastest", 3, 1, 1.0),
            result("unstable-fast", 10, 9, 40.0),
        ];
        let best = RankPolicy::Stability.best(&results).unwrap();
        assert_eq!(best.target().address(), "unstable-fast");
    }

    #[test]
    fn test_best_falls_back_to_any_success() {
        let results = vec![result("dead", 3, 0, 0.0), result("lossy", 3, 1, 70.0)];
        let best = RankPolicy::Stability.best(&results).unwrap();
        assert_eq!(best.target().address(), "lossy");
    }

    #[test]
    fn test_best_absent_when_nothing_succeeded() {
        let results = vec![result("a", 3, 0, 0.0), result("b", 3, 0, 0.0)];
        assert!(RankPolicy::Stability.best(&results).is_none());
        assert!(RankPolicy::Latency.best(&results).is_none());
        assert!(RankPolicy::Latency.best::<SampleResult>(&[]).is_none());
    }

    #[test]
    fn test_speed_scenario() {
        let results = vec![
            SampleResult::from_latencies(Target::new("2.2.2.2", 443).unwrap(), 443, 3, &[]),
            SampleResult::from_latencies(
                Target::new("1.1.1.1", 443).unwrap(),
                443,
                3,
                &[10.0, 12.0, 14.0],
            ),
        ];
        let best = RankPolicy::Stability.best(&results).cloned();
        let ranked = RankPolicy::Stability.rank(results);

        assert_eq!(addrs(&ranked), vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(ranked[0].average_latency_ms(), Some(12.0));
        assert_eq!(ranked[0].stability(), Stability::Stable);
        assert_eq!(ranked[1].loss_ratio(), 100.0);
        assert_eq!(ranked[1].stability(), Stability::Failed);
        assert_eq!(best.unwrap().target().address(), "1.1.1.1");
    }
}
