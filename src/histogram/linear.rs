// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::collections::HashMap;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{bucket_minimum_from_ranges, Bucketing, Histogram};

/// Create the possible ranges in a linear distribution from `min` to `max` with
/// `count` buckets.
///
/// This algorithm calculates `count` buckets from `min` (clamped to at least 1)
/// to `max`, with an additional underflow bucket at 0.
pub fn linear_range(min: u64, max: u64, count: usize) -> Vec<u64> {
    let mut ranges = Vec::with_capacity(count);
    ranges.push(0);

    let min = cmp::max(1, min);
    match count {
        0 | 1 => return ranges,
        2 => {
            ranges.push(min);
            return ranges;
        }
        _ => {}
    }

    // Interpolate in 128 bits, `max` can be close to `u64::MAX`.
    let (min, max) = (u128::from(min), u128::from(cmp::max(min, max)));
    let count = count as u128;
    for i in 1..count {
        let range = (min * (count - 1 - i) + max * (i - 1)) / (count - 2);
        ranges.push(range as u64);
    }

    ranges
}

/// A linear bucketing algorithm.
///
/// Buckets are pre-computed at instantiation with a linear distribution from `min` to `max`
/// and `bucket_count` buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecomputedLinear {
    // Don't serialize the (potentially large) array of ranges, instead compute them on first
    // access.
    #[serde(skip)]
    bucket_ranges: OnceCell<Vec<u64>>,
    min: u64,
    max: u64,
    bucket_count: usize,
}

impl PartialEq for PrecomputedLinear {
    fn eq(&self, other: &Self) -> bool {
        self.min == other.min && self.max == other.max && self.bucket_count == other.bucket_count
    }
}

impl Bucketing for PrecomputedLinear {
    fn sample_to_bucket_minimum(&self, sample: u64) -> u64 {
        bucket_minimum_from_ranges(self.ranges(), sample)
    }

    fn ranges(&self) -> &[u64] {
        // Create the linear range on first access.
        self.bucket_ranges
            .get_or_init(|| linear_range(self.min, self.max, self.bucket_count))
    }
}

impl Histogram<PrecomputedLinear> {
    /// Creates a histogram with `bucket_count` linear buckets in the range `min` to `max`.
    pub fn linear(min: u64, max: u64, bucket_count: usize) -> Histogram<PrecomputedLinear> {
        Histogram {
            values: HashMap::new(),
            count: 0,
            sum: 0,
            bucketing: PrecomputedLinear {
                bucket_ranges: OnceCell::new(),
                min,
                max,
                bucket_count,
            },
        }
    }
}
