use crate::utils::utils_errors::SwitchoptError;

/// Tolerance used to treat nearly equal time stamps as equal when locating intervals.
pub const WEAK_EPSILON: f64 = 1e-6;

pub struct IntervalUtils;
impl IntervalUtils {
    /// Finds the interval `i` such that `time_intervals[i] < enquiry_time <= time_intervals[i+1]`,
    /// where comparisons are made against `enquiry_time - epsilon`.
    ///
    /// Returns -1 when the enquiry time lies below the first boundary and `time_intervals.len() - 1`
    /// when it lies above the last one.  An enquiry time at (or marginally above) the first boundary
    /// maps to interval 0.  With a negative epsilon the lookup picks intervals in the `<=` sense, so
    /// `time_intervals[i] <= enquiry_time < time_intervals[i+1]`.
    ///
    /// ## Example
    /// ```
    /// use switchopt::utils::utils_math::interval::{IntervalUtils, WEAK_EPSILON};
    /// let boundaries = vec![0.0, 1.0, 2.0];
    /// assert_eq!(IntervalUtils::find_active_interval_index(&boundaries, 0.5, 0, WEAK_EPSILON).unwrap(), 0);
    /// assert_eq!(IntervalUtils::find_active_interval_index(&boundaries, 1.0, 0, WEAK_EPSILON).unwrap(), 0);
    /// assert_eq!(IntervalUtils::find_active_interval_index(&boundaries, 1.0, 0, -WEAK_EPSILON).unwrap(), 1);
    /// assert_eq!(IntervalUtils::find_active_interval_index(&boundaries, 3.0, 0, WEAK_EPSILON).unwrap(), 2);
    /// ```
    pub fn find_active_interval_index(time_intervals: &[f64], enquiry_time: f64, guessed_active_interval: usize, epsilon: f64) -> Result<isize, SwitchoptError> {
        if time_intervals.len() < 2 {
            return Err(SwitchoptError::new_generic_error_str(&format!("The time interval array needs at least two boundaries, but it has {}.", time_intervals.len()), file!(), line!()));
        }
        let num_intervals = time_intervals.len() - 1;
        if guessed_active_interval >= num_intervals {
            return Err(SwitchoptError::new_idx_out_of_range_error_str(&format!("The guessed interval {} is outside of [0, {}].", guessed_active_interval, num_intervals - 1), file!(), line!()));
        }

        let time_minus = enquiry_time - epsilon;
        let mut index: isize = -1;

        if time_minus < time_intervals[guessed_active_interval] {
            for i in (0..=guessed_active_interval).rev() {
                if time_intervals[i] <= time_minus {
                    index = i as isize;
                    break;
                }
            }
        } else {
            for i in guessed_active_interval..=num_intervals {
                index = i as isize;
                if time_minus < time_intervals[i] {
                    index -= 1;
                    break;
                }
            }
        }

        // boundary cases
        if index == -1 && epsilon > 0.0 && enquiry_time >= time_intervals[0] - epsilon {
            index = 0;
        }
        if index == num_intervals as isize && epsilon < 0.0 && enquiry_time <= time_intervals[num_intervals] - epsilon {
            index = num_intervals as isize - 1;
        }

        Ok(index)
    }
    /// Finds the active partition of `partitioning_times` at the given time.  The time must lie inside
    /// the partitioned horizon, otherwise an index error is returned.
    pub fn find_active_partition_index(partitioning_times: &[f64], time: f64, ceiling: bool) -> Result<usize, SwitchoptError> {
        let epsilon = if ceiling { WEAK_EPSILON } else { -WEAK_EPSILON };
        let index = Self::find_active_interval_index(partitioning_times, time, 0, epsilon)?;

        if index < 0 {
            return Err(SwitchoptError::new_idx_out_of_range_error_str(&format!("Given time {} is less than the start time (i.e. givenTime < partitioningTimes.front() = {}).", time, partitioning_times[0]), file!(), line!()));
        }
        if index as usize == partitioning_times.len() - 1 {
            return Err(SwitchoptError::new_idx_out_of_range_error_str(&format!("Given time {} is greater than the final time (i.e. partitioningTimes.back() = {} < givenTime).", time, partitioning_times[partitioning_times.len() - 1]), file!(), line!()));
        }

        Ok(index as usize)
    }
}

/// Interval lookup that remembers the last returned interval and uses it as the guess for the next query.
///
/// Nearby consecutive queries are answered in constant time.  Since every query mutates the stored
/// guess, one finder must not be shared between workers; use
/// [`IntervalUtils::find_active_interval_index`] with an explicit guess instead.
#[derive(Clone, Debug)]
pub struct ActiveIntervalFinder {
    guessed_active_interval: usize,
    epsilon: f64
}
impl ActiveIntervalFinder {
    pub fn new(epsilon: f64) -> Self {
        Self { guessed_active_interval: 0, epsilon }
    }
    pub fn new_floor() -> Self { Self::new(-WEAK_EPSILON) }
    pub fn find(&mut self, time_intervals: &[f64], enquiry_time: f64) -> Result<isize, SwitchoptError> {
        // a stored guess may belong to a longer array than the current one
        let max_guess = time_intervals.len().saturating_sub(2);
        let guess = self.guessed_active_interval.min(max_guess);
        let index = IntervalUtils::find_active_interval_index(time_intervals, enquiry_time, guess, self.epsilon)?;
        self.guessed_active_interval = index.max(0) as usize;
        Ok(index)
    }
    pub fn reset(&mut self) {
        self.guessed_active_interval = 0;
    }
    pub fn guessed_active_interval(&self) -> usize {
        self.guessed_active_interval
    }
}
impl Default for ActiveIntervalFinder {
    fn default() -> Self { Self::new(WEAK_EPSILON) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_boundaries(rng: &mut ChaCha8Rng) -> Vec<f64> {
        let n = rng.gen_range(2..12);
        let mut out = vec![rng.gen_range(-5.0..5.0)];
        for _ in 1..n { let last = out[out.len() - 1]; out.push(last + rng.gen_range(0.01..2.0)); }
        out
    }

    #[test]
    fn ceiling_lookup_brackets_query() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..500 {
            let b = random_boundaries(&mut rng);
            let n = b.len();
            let q = rng.gen_range(b[0]..b[n - 1]);
            let guess = rng.gen_range(0..n - 1);
            let i = IntervalUtils::find_active_interval_index(&b, q, guess, WEAK_EPSILON).unwrap();
            assert!(i >= 0 && (i as usize) < n - 1);
            let i = i as usize;
            assert!(b[i] < q + WEAK_EPSILON, "{:?} {} {}", b, q, i);
            assert!(q <= b[i + 1] + WEAK_EPSILON, "{:?} {} {}", b, q, i);
        }
    }

    #[test]
    fn sentinels_outside_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..100 {
            let b = random_boundaries(&mut rng);
            let n = b.len();
            let guess = rng.gen_range(0..n - 1);
            let below = IntervalUtils::find_active_interval_index(&b, b[0] - 0.5, guess, WEAK_EPSILON).unwrap();
            let above = IntervalUtils::find_active_interval_index(&b, b[n - 1] + 0.5, guess, WEAK_EPSILON).unwrap();
            assert_eq!(below, -1);
            assert_eq!(above, n as isize - 1);
        }
    }

    #[test]
    fn boundary_cases() {
        let b = vec![0.0, 1.0, 2.0, 3.0];
        assert_eq!(IntervalUtils::find_active_interval_index(&b, 0.0, 2, WEAK_EPSILON).unwrap(), 0);
        assert_eq!(IntervalUtils::find_active_interval_index(&b, 2.0, 0, WEAK_EPSILON).unwrap(), 1);
        assert_eq!(IntervalUtils::find_active_interval_index(&b, 2.0, 0, -WEAK_EPSILON).unwrap(), 2);
        assert_eq!(IntervalUtils::find_active_interval_index(&b, 3.0, 0, -WEAK_EPSILON).unwrap(), 2);
        assert_eq!(IntervalUtils::find_active_interval_index(&b, 3.0, 0, WEAK_EPSILON).unwrap(), 2);
    }

    #[test]
    fn malformed_inputs_fail() {
        assert!(IntervalUtils::find_active_interval_index(&[1.0], 0.5, 0, WEAK_EPSILON).is_err());
        assert!(IntervalUtils::find_active_interval_index(&[], 0.5, 0, WEAK_EPSILON).is_err());
        let r = IntervalUtils::find_active_interval_index(&[0.0, 1.0, 2.0], 0.5, 2, WEAK_EPSILON);
        assert!(matches!(r, Err(SwitchoptError::IdxOutOfBoundError(_))));
    }

    #[test]
    fn partition_lookup() {
        let p = vec![0.0, 0.5, 1.0];
        assert_eq!(IntervalUtils::find_active_partition_index(&p, 0.0, true).unwrap(), 0);
        assert_eq!(IntervalUtils::find_active_partition_index(&p, 0.5, true).unwrap(), 0);
        assert_eq!(IntervalUtils::find_active_partition_index(&p, 0.5, false).unwrap(), 1);
        assert_eq!(IntervalUtils::find_active_partition_index(&p, 1.0, true).unwrap(), 1);
        assert!(IntervalUtils::find_active_partition_index(&p, -0.1, true).is_err());
        assert!(IntervalUtils::find_active_partition_index(&p, 1.1, true).is_err());
    }

    #[test]
    fn stateful_finder_matches_explicit_guess() {
        let b: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let mut finder = ActiveIntervalFinder::default();
        for k in 0..60 {
            let q = 1.9 * ((k * 7) % 60) as f64 / 60.0 + 0.01;
            let expected = IntervalUtils::find_active_interval_index(&b, q, 0, WEAK_EPSILON).unwrap();
            assert_eq!(finder.find(&b, q).unwrap(), expected);
        }
        finder.find(&b, -1.0).unwrap();
        assert_eq!(finder.guessed_active_interval(), 0);
    }
}
