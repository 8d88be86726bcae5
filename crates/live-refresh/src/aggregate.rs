//! Per-cycle summaries derived from a snapshot.

use std::collections::{BTreeMap, HashMap};

use common::{Record, Snapshot};
use serde::Serialize;

/// Default age bucket width, in years.
pub const DEFAULT_BIN_WIDTH: f64 = 5.0;

/// Smallest accepted bucket width. Narrower widths are raised to it.
pub const MIN_BIN_WIDTH: f64 = 1e-3;

/// Once the youngest-to-oldest range spans this many buckets, only occupied
/// buckets are listed.
const MAX_DENSE_BUCKETS: i64 = 1_000;

/// Age histogram binning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramConfig {
    bin_width: f64,
}

impl HistogramConfig {
    /// Creates a config; widths that are not finite and positive fall back
    /// to [`DEFAULT_BIN_WIDTH`], positive widths below [`MIN_BIN_WIDTH`] are
    /// raised to it.
    pub fn new(bin_width: f64) -> Self {
        let bin_width = if bin_width.is_finite() && bin_width > 0.0 {
            bin_width.max(MIN_BIN_WIDTH)
        } else {
            DEFAULT_BIN_WIDTH
        };
        Self { bin_width }
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    fn bucket_index(&self, age: f64) -> i64 {
        (age / self.bin_width).floor() as i64
    }
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIN_WIDTH)
    }
}

/// One histogram bar covering `[lower, upper)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Binned distribution over the `age` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgeHistogram {
    /// Buckets in ascending order, from the youngest to the oldest occupied
    /// bucket.
    pub buckets: Vec<AgeBucket>,
    /// Records left out because `age` was missing or not a number.
    pub excluded: usize,
}

impl AgeHistogram {
    pub fn build(records: &[Record], config: &HistogramConfig) -> Self {
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        let mut excluded = 0;

        for record in records {
            match record.age() {
                Some(age) => *counts.entry(config.bucket_index(age)).or_default() += 1,
                None => excluded += 1,
            }
        }

        let width = config.bin_width();
        let bucket = |index: i64, count: usize| {
            let lower = index as f64 * width;
            AgeBucket {
                lower,
                upper: lower + width,
                count,
            }
        };

        let span = counts
            .keys()
            .next()
            .copied()
            .zip(counts.keys().next_back().copied());
        let buckets = match span {
            Some((first, last)) if last.saturating_sub(first) < MAX_DENSE_BUCKETS - 1 => {
                (first..=last)
                    .map(|index| bucket(index, counts.get(&index).copied().unwrap_or(0)))
                    .collect()
            }
            _ => counts
                .into_iter()
                .map(|(index, count)| bucket(index, count))
                .collect(),
        };

        Self { buckets, excluded }
    }

    /// Number of records placed in a bucket.
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Buckets holding at least one record.
    pub fn non_empty(&self) -> impl Iterator<Item = &AgeBucket> {
        self.buckets.iter().filter(|b| b.count > 0)
    }
}

/// Number of users from one country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryCount {
    pub country: String,
    pub count: usize,
}

/// Group-by on `country`, collapsed to counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountryTally {
    /// Most frequent first; ties keep first-encounter order.
    pub counts: Vec<CountryCount>,
    /// Records left out because `country` was missing or not a string.
    pub excluded: usize,
}

impl CountryTally {
    pub fn build(records: &[Record]) -> Self {
        let mut counts: Vec<CountryCount> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut excluded = 0;

        for record in records {
            let Some(country) = record.country() else {
                excluded += 1;
                continue;
            };
            match index.get(country) {
                Some(&i) => counts[i].count += 1,
                None => {
                    index.insert(country, counts.len());
                    counts.push(CountryCount {
                        country: country.to_string(),
                        count: 1,
                    });
                }
            }
        }

        // Stable: equal counts stay in encounter order.
        counts.sort_by(|a, b| b.count.cmp(&a.count));

        Self { counts, excluded }
    }

    /// Count for a single country.
    pub fn get(&self, country: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|c| c.country == country)
            .map(|c| c.count)
    }

    /// Number of records counted.
    pub fn total(&self) -> usize {
        self.counts.iter().map(|c| c.count).sum()
    }
}

/// Everything the dashboard charts for one snapshot. Rebuilt from scratch
/// every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateView {
    pub age_histogram: AgeHistogram,
    pub country_tally: CountryTally,
}

impl AggregateView {
    pub fn from_snapshot(snapshot: &Snapshot, config: &HistogramConfig) -> Self {
        Self {
            age_histogram: AgeHistogram::build(&snapshot.records, config),
            country_tally: CountryTally::build(&snapshot.records),
        }
    }
}
