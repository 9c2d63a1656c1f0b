//! Fleet host selection with seeded uniform sampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use selftest_types::HostId;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Sampling errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    /// Percentage outside (0, 100].
    #[error("sample percentage must be in (0, 100], got {0}")]
    InvalidPercent(f64),
}

/// Share of the fleet to test, validated to lie in (0, 100].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct SamplePercent(f64);

impl SamplePercent {
    /// Test every host.
    pub const ALL: Self = Self(100.0);

    /// Validate a percentage.
    pub fn new(pct: f64) -> Result<Self, SelectionError> {
        if pct.is_finite() && pct > 0.0 && pct <= 100.0 {
            Ok(Self(pct))
        } else {
            Err(SelectionError::InvalidPercent(pct))
        }
    }

    /// The percentage value.
    pub fn get(self) -> f64 {
        self.0
    }

    /// Number of hosts to draw out of `n`: `ceil(pct / 100 * n)`.
    pub fn count_of(self, n: usize) -> usize {
        if self.0 >= 100.0 {
            return n;
        }
        if n == 0 {
            return 0;
        }
        // multiply first so integral percentages stay exact; the tolerance
        // scales with the product so tiny percentages still round up
        let exact = self.0 * n as f64 / 100.0;
        let k = (exact - exact * 1e-12).ceil();
        (k as usize).clamp(1, n)
    }
}

impl Default for SamplePercent {
    fn default() -> Self {
        Self::ALL
    }
}

/// Build the sampling RNG.
///
/// Returns the seed actually used so a run can be reproduced with
/// `--seed`. Without an explicit seed the current time is used.
pub fn seeded_rng(seed: Option<u64>) -> (StdRng, u64) {
    let seed = seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    });
    (StdRng::seed_from_u64(seed), seed)
}

/// Select which hosts a fleet run tests.
///
/// Duplicates are collapsed first (first occurrence wins). Below 100% the
/// hosts are drawn without replacement, uniformly, using `rng`. The result
/// keeps input order.
pub fn select_hosts<R: Rng + ?Sized>(
    hosts: &[HostId],
    pct: SamplePercent,
    rng: &mut R,
) -> Vec<HostId> {
    let mut seen = HashSet::with_capacity(hosts.len());
    let unique: Vec<HostId> = hosts.iter().copied().filter(|id| seen.insert(*id)).collect();

    let k = pct.count_of(unique.len());
    if k == unique.len() {
        return unique;
    }

    let mut picked = rand::seq::index::sample(rng, unique.len(), k).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| unique[i]).collect()
}
