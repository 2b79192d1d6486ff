use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::interval::{IntervalUtils, WEAK_EPSILON};

/// Sorted subsystem boundaries `[f64::MIN, event_times..., f64::MAX]`.  Subsystem `i` is active between
/// event `i - 1` and event `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct SubsystemLookupTable {
    partitioning_times: Vec<f64>
}
impl SubsystemLookupTable {
    pub fn new(event_times: &[f64]) -> Result<Self, SwitchoptError> {
        for w in event_times.windows(2) {
            if w[1] < w[0] {
                return Err(SwitchoptError::new_generic_error_str(&format!("Event times must be non-decreasing, but {} is followed by {}.", w[0], w[1]), file!(), line!()));
            }
        }
        let mut partitioning_times = Vec::with_capacity(event_times.len() + 2);
        partitioning_times.push(f64::MIN);
        partitioning_times.extend_from_slice(event_times);
        partitioning_times.push(f64::MAX);
        Ok(Self { partitioning_times })
    }
    pub fn num_subsystems(&self) -> usize {
        self.partitioning_times.len() - 1
    }
    pub fn event_times(&self) -> &[f64] {
        &self.partitioning_times[1..self.partitioning_times.len() - 1]
    }
    /// With `ceiling` an event time belongs to the subsystem before it, otherwise to the one after it.
    pub fn find_active_subsystem_index(&self, time: f64, ceiling: bool) -> Result<usize, SwitchoptError> {
        let epsilon = if ceiling { WEAK_EPSILON } else { -WEAK_EPSILON };
        let index = IntervalUtils::find_active_interval_index(&self.partitioning_times, time, 0, epsilon)?;
        Ok(index.max(0).min(self.num_subsystems() as isize - 1) as usize)
    }
    /// Multiplier of event `event_time_index` for the subsystem that is active over one event segment.
    /// The subsystem is looked up at the middle of the segment, so the repeated event time samples at
    /// both ends of a segment cannot select a neighbouring subsystem.
    pub fn compute_segment_multiplier(&self, event_time_index: usize, segment_time_trajectory: &[f64], init_time: f64, final_time: f64) -> Result<f64, SwitchoptError> {
        if segment_time_trajectory.is_empty() {
            return Err(SwitchoptError::new_generic_error_str("Cannot find the active subsystem of an empty event segment.", file!(), line!()));
        }
        let mid_time = 0.5 * (segment_time_trajectory[0] + segment_time_trajectory[segment_time_trajectory.len() - 1]);
        let active_subsystem_index = self.find_active_subsystem_index(mid_time, true)?;
        EquivalentSystemUtils::compute_equivalent_system_multiplier(event_time_index, active_subsystem_index, self.event_times(), init_time, final_time)
    }
}

pub struct EquivalentSystemUtils;
impl EquivalentSystemUtils {
    /// Scale of the flow map forcing that moving event `event_time_index` injects into the dynamics of
    /// subsystem `active_subsystem_index`.
    ///
    /// The subsystem right before the event gets `+1/T` and the one right after it gets `-1/T`, where
    /// `T` is the duration of that subsystem.  The first subsystem starts at `init_time` and the last one
    /// ends at `final_time`.  All other subsystems get 0.
    ///
    /// ## Example
    /// ```
    /// use switchopt::event_time_sensitivity::equivalent_system::EquivalentSystemUtils;
    /// let event_times = vec![0.2, 0.5, 0.9];
    /// let before = EquivalentSystemUtils::compute_equivalent_system_multiplier(1, 1, &event_times, 0.0, 1.0).unwrap();
    /// let after = EquivalentSystemUtils::compute_equivalent_system_multiplier(1, 2, &event_times, 0.0, 1.0).unwrap();
    /// assert!((before - 1.0 / 0.3).abs() < 1e-12);
    /// assert!((after + 1.0 / 0.4).abs() < 1e-12);
    /// ```
    pub fn compute_equivalent_system_multiplier(event_time_index: usize, active_subsystem_index: usize, event_times: &[f64], init_time: f64, final_time: f64) -> Result<f64, SwitchoptError> {
        SwitchoptError::new_check_for_idx_out_of_bound_error(event_time_index, event_times.len(), file!(), line!())?;
        let event_time = event_times[event_time_index];

        if active_subsystem_index == event_time_index + 1 {
            let time_period = if active_subsystem_index == event_times.len() {
                if final_time < event_time {
                    return Err(SwitchoptError::new_generic_error_str(&format!("Final time {} is smaller than the last event time {}.", final_time, event_time), file!(), line!()));
                }
                final_time - event_time
            } else {
                event_times[event_time_index + 1] - event_time
            };
            Self::check_time_period(time_period, active_subsystem_index)?;
            return Ok(-1.0 / time_period);
        }

        if active_subsystem_index == event_time_index {
            let time_period = if active_subsystem_index == 0 {
                if init_time > event_time {
                    return Err(SwitchoptError::new_generic_error_str(&format!("Initial time {} is greater than the first event time {}.", init_time, event_time), file!(), line!()));
                }
                event_time - init_time
            } else {
                event_time - event_times[event_time_index - 1]
            };
            Self::check_time_period(time_period, active_subsystem_index)?;
            return Ok(1.0 / time_period);
        }

        Ok(0.0)
    }
    fn check_time_period(time_period: f64, active_subsystem_index: usize) -> Result<(), SwitchoptError> {
        if !(time_period > 0.0) {
            return Err(SwitchoptError::new_generic_error_str(&format!("Subsystem {} has a degenerate duration of {}.", active_subsystem_index, time_period), file!(), line!()));
        }
        Ok(())
    }
}
