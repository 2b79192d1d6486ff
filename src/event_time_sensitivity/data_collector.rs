use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use crate::integration::event_segments::{EventSegment, EventSegmentsUtils};
use crate::utils::utils_errors::SwitchoptError;

/// Nominal solution of one time partition, as produced by the outer trajectory optimizer.
///
/// The nominal arrays share `time_trajectory`.  The Riccati arrays and the controller feedback gains
/// share `ss_time_trajectory`.  Both time grids repeat the event time at every event inside the
/// partition: the sample before the event closes one event segment and the sample after it opens the next.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartitionData {
    pub time_trajectory: Vec<f64>,
    pub events_past_the_end_indices: Vec<usize>,
    pub state_trajectory: Vec<DVector<f64>>,
    pub input_trajectory: Vec<DVector<f64>>,
    pub flow_map_trajectory: Vec<DVector<f64>>,
    pub am_trajectory: Vec<DMatrix<f64>>,
    pub bm_trajectory: Vec<DMatrix<f64>>,
    /// Intermediate cost.
    pub q_trajectory: Vec<f64>,
    pub qv_trajectory: Vec<DVector<f64>>,
    pub qm_trajectory: Vec<DMatrix<f64>>,
    pub rv_trajectory: Vec<DVector<f64>>,
    pub rm_trajectory: Vec<DMatrix<f64>>,
    pub rm_inverse_trajectory: Vec<DMatrix<f64>>,
    /// Input-state cross term of the cost Hessian.
    pub pm_trajectory: Vec<DMatrix<f64>>,
    /// Terminal cost expansion of the subsystem ending at each event of this partition.
    pub q_final: Vec<f64>,
    pub qv_final: Vec<DVector<f64>>,
    pub qm_final: Vec<DMatrix<f64>>,
    pub ss_time_trajectory: Vec<f64>,
    pub ss_events_past_the_end_indices: Vec<usize>,
    pub sm_trajectory: Vec<DMatrix<f64>>,
    pub sv_trajectory: Vec<DVector<f64>>,
    pub s_trajectory: Vec<f64>,
    pub controller_feedback_trajectory: Vec<DMatrix<f64>>
}
impl PartitionData {
    pub fn num_events(&self) -> usize {
        self.events_past_the_end_indices.len()
    }
    pub fn num_samples(&self) -> usize {
        self.time_trajectory.len()
    }
    pub fn num_ss_samples(&self) -> usize {
        self.ss_time_trajectory.len()
    }
    pub fn input_dim(&self) -> usize {
        self.input_trajectory.first().map(|u| u.len()).unwrap_or(0)
    }
    /// Event segments of the nominal time trajectory.
    pub fn segments(&self) -> Result<Vec<EventSegment>, SwitchoptError> {
        EventSegmentsUtils::get_segments(self.num_samples(), &self.events_past_the_end_indices)
    }
    /// Event segments of the Riccati time trajectory.
    pub fn ss_segments(&self) -> Result<Vec<EventSegment>, SwitchoptError> {
        EventSegmentsUtils::get_segments(self.num_ss_samples(), &self.ss_events_past_the_end_indices)
    }
    /// Index of the last nominal sample before event `j` of this partition.
    pub fn pre_event_index(&self, j: usize) -> usize {
        self.events_past_the_end_indices[j].max(1) - 1
    }
    fn validate(&self, partition_index: usize, state_dim: usize) -> Result<(), SwitchoptError> {
        let n = self.num_samples();
        if n == 0 {
            return Err(SwitchoptError::new_generic_error_str(&format!("Active partition {} has an empty nominal trajectory.", partition_index), file!(), line!()));
        }
        let nominal_lengths = [
            ("state", self.state_trajectory.len()),
            ("input", self.input_trajectory.len()),
            ("flow map", self.flow_map_trajectory.len()),
            ("Am", self.am_trajectory.len()),
            ("Bm", self.bm_trajectory.len()),
            ("q", self.q_trajectory.len()),
            ("Qv", self.qv_trajectory.len()),
            ("Qm", self.qm_trajectory.len()),
            ("Rv", self.rv_trajectory.len()),
            ("Rm", self.rm_trajectory.len()),
            ("RmInverse", self.rm_inverse_trajectory.len()),
            ("Pm", self.pm_trajectory.len())
        ];
        for (name, len) in nominal_lengths {
            if len != n {
                return Err(SwitchoptError::new_generic_error_str(&format!("The {} trajectory of partition {} has {} samples, but its time trajectory has {}.", name, partition_index, len, n), file!(), line!()));
            }
        }

        let ns = self.num_ss_samples();
        if ns == 0 {
            return Err(SwitchoptError::new_generic_error_str(&format!("Active partition {} has an empty Riccati trajectory.", partition_index), file!(), line!()));
        }
        let ss_lengths = [
            ("Sm", self.sm_trajectory.len()),
            ("Sv", self.sv_trajectory.len()),
            ("s", self.s_trajectory.len()),
            ("controller feedback", self.controller_feedback_trajectory.len())
        ];
        for (name, len) in ss_lengths {
            if len != ns {
                return Err(SwitchoptError::new_generic_error_str(&format!("The {} trajectory of partition {} has {} samples, but its Riccati time trajectory has {}.", name, partition_index, len, ns), file!(), line!()));
            }
        }

        let ne = self.num_events();
        if self.ss_events_past_the_end_indices.len() != ne || self.q_final.len() != ne || self.qv_final.len() != ne || self.qm_final.len() != ne {
            return Err(SwitchoptError::new_generic_error_str(&format!("Partition {} has inconsistent event lists (nominal {}, Riccati {}, terminal costs {}).", partition_index, ne, self.ss_events_past_the_end_indices.len(), self.q_final.len()), file!(), line!()));
        }
        let segments = self.segments()?;
        let ss_segments = self.ss_segments()?;
        for (segment, ss_segment) in segments.iter().zip(ss_segments.iter()) {
            if segment.is_empty() != ss_segment.is_empty() {
                return Err(SwitchoptError::new_generic_error_str(&format!("Event segment {} of partition {} is empty on only one of the nominal and Riccati time trajectories.", segment.index, partition_index), file!(), line!()));
            }
        }

        if self.state_trajectory[0].len() != state_dim {
            return Err(SwitchoptError::new_generic_error_str(&format!("Partition {} has states of dimension {}, expected {}.", partition_index, self.state_trajectory[0].len(), state_dim), file!(), line!()));
        }

        Ok(())
    }
}

/// Read-only view on everything the sensitivity computation needs from the outer optimizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlqDataCollector {
    pub init_time: f64,
    pub final_time: f64,
    pub init_state: DVector<f64>,
    pub partitioning_times: Vec<f64>,
    pub init_active_partition: usize,
    pub final_active_partition: usize,
    pub partitions: Vec<PartitionData>,
    /// Heuristic terminal value function expansion at the final time.
    pub sm_heuristics: DMatrix<f64>,
    pub sv_heuristics: DVector<f64>,
    pub s_heuristics: f64
}
impl Default for SlqDataCollector {
    fn default() -> Self {
        Self {
            init_time: 0.0,
            final_time: 0.0,
            init_state: DVector::zeros(0),
            partitioning_times: vec![],
            init_active_partition: 0,
            final_active_partition: 0,
            partitions: vec![],
            sm_heuristics: DMatrix::zeros(0, 0),
            sv_heuristics: DVector::zeros(0),
            s_heuristics: 0.0
        }
    }
}
impl SlqDataCollector {
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }
    pub fn state_dim(&self) -> usize {
        self.init_state.len()
    }
    pub fn is_partition_active(&self, partition_index: usize) -> bool {
        partition_index >= self.init_active_partition && partition_index <= self.final_active_partition
    }
    /// Checks the shapes of the nominal data before any integration starts.
    pub fn validate(&self) -> Result<(), SwitchoptError> {
        if self.partitions.is_empty() {
            return Err(SwitchoptError::new_generic_error_str("The number of Partitions cannot be zero!", file!(), line!()));
        }
        if self.partitioning_times.len() != self.partitions.len() + 1 {
            return Err(SwitchoptError::new_generic_error_str(&format!("There are {} partitioning times for {} partitions.", self.partitioning_times.len(), self.partitions.len()), file!(), line!()));
        }
        if self.init_active_partition > self.final_active_partition {
            return Err(SwitchoptError::new_generic_error_str(&format!("The initial active partition {} comes after the final active partition {}.", self.init_active_partition, self.final_active_partition), file!(), line!()));
        }
        SwitchoptError::new_check_for_idx_out_of_bound_error(self.final_active_partition, self.partitions.len(), file!(), line!())?;
        if self.final_time < self.init_time {
            return Err(SwitchoptError::new_generic_error_str(&format!("The final time {} is smaller than the initial time {}.", self.final_time, self.init_time), file!(), line!()));
        }
        if self.sv_heuristics.len() != self.state_dim() || self.sm_heuristics.nrows() != self.state_dim() || self.sm_heuristics.ncols() != self.state_dim() {
            return Err(SwitchoptError::new_generic_error_str("The heuristic terminal value function does not match the state dimension.", file!(), line!()));
        }

        for i in self.init_active_partition..=self.final_active_partition {
            self.partitions[i].validate(i, self.state_dim())?;
        }

        Ok(())
    }
}
