use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use crate::event_time_sensitivity::data_collector::SlqDataCollector;
use crate::event_time_sensitivity::equivalent_system::SubsystemLookupTable;
use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::interpolation::LinearInterpolation;
use crate::utils::utils_math::interval::IntervalUtils;

/// Derivative of the nominal LQ cost expansion with respect to one event time.  Inactive partitions
/// hold empty arrays.
#[derive(Clone, Debug, Default)]
pub struct LqSensitivityExpansion {
    pub nabla_q_trajectories_stock: Vec<Vec<f64>>,
    pub nabla_qv_trajectories_stock: Vec<Vec<DVector<f64>>>,
    pub nabla_rv_trajectories_stock: Vec<Vec<DVector<f64>>>,
    /// One entry per event of the partition.
    pub nabla_q_final_stock: Vec<Vec<f64>>,
    pub nabla_qv_final_stock: Vec<Vec<DVector<f64>>>
}

/// Derivative of the Riccati solution with respect to one event time, on the Riccati time grid.
#[derive(Clone, Debug, Default)]
pub struct RiccatiSensitivityTrajectories {
    pub nabla_s_trajectories_stock: Vec<Vec<f64>>,
    pub nabla_sv_trajectories_stock: Vec<Vec<DVector<f64>>>,
    pub nabla_sm_trajectories_stock: Vec<Vec<DMatrix<f64>>>
}
impl RiccatiSensitivityTrajectories {
    pub fn is_empty(&self) -> bool {
        self.nabla_s_trajectories_stock.iter().all(|p| p.is_empty())
    }
}

pub struct DerivativeAssemblerUtils;
impl DerivativeAssemblerUtils {
    /// Chain rule through the nominal LQ expansion:
    /// `nabla_q = Qv' nabla_x + Rv' nabla_u`, `nabla_Qv = Qm nabla_x + Pm' nabla_u`,
    /// `nabla_Rv = Pm nabla_x + Rm nabla_u`.  The terminal terms of every event use the last
    /// sample before that event.
    pub fn approximate_nominal_lq_sensitivity(dc: &SlqDataCollector,
                                              sensitivity_state_trajectories_stock: &[Vec<DVector<f64>>],
                                              sensitivity_input_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<LqSensitivityExpansion, SwitchoptError> {
        Self::check_rollout_sensitivity_lengths(dc, sensitivity_state_trajectories_stock, sensitivity_input_trajectories_stock)?;
        let mut out = LqSensitivityExpansion::default();

        for (i, p) in dc.partitions.iter().enumerate() {
            if !dc.is_partition_active(i) {
                out.nabla_q_trajectories_stock.push(vec![]);
                out.nabla_qv_trajectories_stock.push(vec![]);
                out.nabla_rv_trajectories_stock.push(vec![]);
                out.nabla_q_final_stock.push(vec![]);
                out.nabla_qv_final_stock.push(vec![]);
                continue;
            }

            let sens_x = &sensitivity_state_trajectories_stock[i];
            let sens_u = &sensitivity_input_trajectories_stock[i];
            let n = p.num_samples();

            let mut nabla_q = Vec::with_capacity(n);
            let mut nabla_qv = Vec::with_capacity(n);
            let mut nabla_rv = Vec::with_capacity(n);
            for k in 0..n {
                let pm_t = p.pm_trajectory[k].transpose();
                nabla_q.push(p.qv_trajectory[k].dot(&sens_x[k]) + p.rv_trajectory[k].dot(&sens_u[k]));
                nabla_qv.push(&p.qm_trajectory[k] * &sens_x[k] + pm_t * &sens_u[k]);
                nabla_rv.push(&p.pm_trajectory[k] * &sens_x[k] + &p.rm_trajectory[k] * &sens_u[k]);
            }

            let mut nabla_q_final = Vec::with_capacity(p.num_events());
            let mut nabla_qv_final = Vec::with_capacity(p.num_events());
            for j in 0..p.num_events() {
                let sens_x_event = &sens_x[p.pre_event_index(j)];
                nabla_q_final.push(p.qv_final[j].dot(sens_x_event));
                nabla_qv_final.push(&p.qm_final[j] * sens_x_event);
            }

            out.nabla_q_trajectories_stock.push(nabla_q);
            out.nabla_qv_trajectories_stock.push(nabla_qv);
            out.nabla_rv_trajectories_stock.push(nabla_rv);
            out.nabla_q_final_stock.push(nabla_q_final);
            out.nabla_qv_final_stock.push(nabla_qv_final);
        }

        Ok(out)
    }
    /// Derivative of the heuristic terminal value function, `(Sv_heuristics' nabla_x, Sm_heuristics nabla_x)`.
    pub fn approximate_nominal_heuristics_sensitivity(dc: &SlqDataCollector, sensitivity_final_state: &DVector<f64>) -> (f64, DVector<f64>) {
        (dc.sv_heuristics.dot(sensitivity_final_state), &dc.sm_heuristics * sensitivity_final_state)
    }
    /// Total cost derivative: trapezoidal quadrature of `multiplier * q + Qv' nabla_x + Rv' nabla_u` over
    /// every event segment plus the terminal cost terms of the events and the heuristic terminal term.
    pub fn calculate_cost_derivative(dc: &SlqDataCollector,
                                     lookup: &SubsystemLookupTable,
                                     event_time_index: usize,
                                     sensitivity_state_trajectories_stock: &[Vec<DVector<f64>>],
                                     sensitivity_input_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<f64, SwitchoptError> {
        Self::check_rollout_sensitivity_lengths(dc, sensitivity_state_trajectories_stock, sensitivity_input_trajectories_stock)?;
        let mut cost_derivative = 0.0;

        for i in dc.init_active_partition..=dc.final_active_partition {
            let p = &dc.partitions[i];
            let sens_x = &sensitivity_state_trajectories_stock[i];
            let sens_u = &sensitivity_input_trajectories_stock[i];

            for segment in p.segments()? {
                if !segment.is_empty() {
                    let multiplier = lookup.compute_segment_multiplier(event_time_index, &p.time_trajectory[segment.range.clone()], dc.init_time, dc.final_time)?;
                    let intermediate = |k: usize| {
                        multiplier * p.q_trajectory[k] + sens_x[k].dot(&p.qv_trajectory[k]) + sens_u[k].dot(&p.rv_trajectory[k])
                    };

                    for (k0, k1) in segment.range.clone().tuple_windows() {
                        cost_derivative += 0.5 * (p.time_trajectory[k1] - p.time_trajectory[k0]) * (intermediate(k0) + intermediate(k1));
                    }
                }

                if segment.index < p.num_events() {
                    cost_derivative += sens_x[p.pre_event_index(segment.index)].dot(&p.qv_final[segment.index]);
                }
            }
        }

        let final_sens_x = sensitivity_state_trajectories_stock[dc.final_active_partition].last()
            .ok_or_else(|| SwitchoptError::new_generic_error_str("The final active partition has no rollout sensitivity.", file!(), line!()))?;
        cost_derivative += final_sens_x.dot(&dc.sv_heuristics);

        Ok(cost_derivative)
    }
    /// The rollout sensitivities need one array per partition, and every active partition needs one
    /// sample per nominal time stamp.
    pub fn check_rollout_sensitivity_lengths(dc: &SlqDataCollector,
                                             sensitivity_state_trajectories_stock: &[Vec<DVector<f64>>],
                                             sensitivity_input_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<(), SwitchoptError> {
        let num_partitions = dc.num_partitions();
        if sensitivity_state_trajectories_stock.len() != num_partitions || sensitivity_input_trajectories_stock.len() != num_partitions {
            return Err(SwitchoptError::new_generic_error_str(&format!("Rollout sensitivity has {} state and {} input partitions, expected {}.", sensitivity_state_trajectories_stock.len(), sensitivity_input_trajectories_stock.len(), num_partitions), file!(), line!()));
        }
        if dc.final_active_partition >= num_partitions {
            return Err(SwitchoptError::new_idx_out_of_bound_error(dc.final_active_partition, num_partitions, file!(), line!()));
        }
        for i in dc.init_active_partition..=dc.final_active_partition {
            let n = dc.partitions[i].num_samples();
            let (sens_x, sens_u) = (&sensitivity_state_trajectories_stock[i], &sensitivity_input_trajectories_stock[i]);
            if sens_x.len() != n || sens_u.len() != n {
                return Err(SwitchoptError::new_generic_error_str(&format!("Rollout sensitivity of partition {} has {} state and {} input samples, expected {}.", i, sens_x.len(), sens_u.len(), n), file!(), line!()));
            }
        }
        Ok(())
    }
    /// Second order expansion `nabla_s + dx' nabla_Sv + 0.5 dx' nabla_Sm dx` around the nominal state,
    /// with `dx = state - x_nominal(time)`.
    pub fn value_function_derivative(dc: &SlqDataCollector,
                                     riccati_sensitivity: &RiccatiSensitivityTrajectories,
                                     time: f64,
                                     state: &DVector<f64>) -> Result<f64, SwitchoptError> {
        let i = IntervalUtils::find_active_partition_index(&dc.partitioning_times, time, true)?;
        if !dc.is_partition_active(i) {
            return Err(SwitchoptError::new_generic_error_str(&format!("Time {} lies in the inactive partition {}.", time, i), file!(), line!()));
        }
        let p = &dc.partitions[i];

        let mut nominal_state_func = LinearInterpolation::new_with_data(&p.time_trajectory, &p.state_trajectory);
        let delta_state = state - nominal_state_func.interpolate(time)?;

        let mut nabla_s_func = LinearInterpolation::new_with_data(&p.ss_time_trajectory, &riccati_sensitivity.nabla_s_trajectories_stock[i]);
        let nabla_s = nabla_s_func.interpolate(time)?;
        let index = nabla_s_func.greatest_less_time_stamp_index();
        let nabla_sv = LinearInterpolation::new_with_data(&p.ss_time_trajectory, &riccati_sensitivity.nabla_sv_trajectories_stock[i]).interpolate_with_hint(time, index)?;
        let nabla_sm = LinearInterpolation::new_with_data(&p.ss_time_trajectory, &riccati_sensitivity.nabla_sm_trajectories_stock[i]).interpolate_with_hint(time, index)?;

        Ok(nabla_s + delta_state.dot(&nabla_sv) + 0.5 * delta_state.dot(&(nabla_sm * &delta_state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::event_time_sensitivity::data_collector::PartitionData;

    /// Scalar partition over [0, 1] with one event at 0.5 and constant data.
    fn scalar_collector() -> SlqDataCollector {
        let t = vec![0.0, 0.25, 0.5, 0.5, 0.75, 1.0];
        let n = t.len();
        let v = |x: f64| vec![DVector::from_element(1, x); n];
        let m = |x: f64| vec![DMatrix::from_element(1, 1, x); n];
        let p = PartitionData {
            ss_time_trajectory: t.clone(),
            ss_events_past_the_end_indices: vec![3],
            time_trajectory: t,
            events_past_the_end_indices: vec![3],
            state_trajectory: v(1.0),
            input_trajectory: v(0.0),
            flow_map_trajectory: v(0.0),
            am_trajectory: m(0.0),
            bm_trajectory: m(1.0),
            q_trajectory: vec![2.0; n],
            qv_trajectory: v(1.0),
            qm_trajectory: m(3.0),
            rv_trajectory: v(0.5),
            rm_trajectory: m(4.0),
            rm_inverse_trajectory: m(0.25),
            pm_trajectory: m(0.0),
            q_final: vec![0.0],
            qv_final: vec![DVector::from_element(1, 10.0)],
            qm_final: vec![DMatrix::from_element(1, 1, 2.0)],
            sm_trajectory: m(0.0),
            sv_trajectory: v(0.0),
            s_trajectory: vec![0.0; n],
            controller_feedback_trajectory: m(0.0)
        };
        SlqDataCollector {
            init_time: 0.0,
            final_time: 1.0,
            init_state: DVector::from_element(1, 1.0),
            partitioning_times: vec![0.0, 1.0],
            init_active_partition: 0,
            final_active_partition: 0,
            partitions: vec![p],
            sm_heuristics: DMatrix::from_element(1, 1, 1.0),
            sv_heuristics: DVector::from_element(1, 100.0),
            s_heuristics: 0.0
        }
    }

    #[test]
    fn lq_expansion_chain_rule() {
        let dc = scalar_collector();
        let sens_x = vec![(0..6).map(|k| DVector::from_element(1, k as f64)).collect::<Vec<_>>()];
        let sens_u = vec![vec![DVector::from_element(1, 2.0); 6]];
        let e = DerivativeAssemblerUtils::approximate_nominal_lq_sensitivity(&dc, &sens_x, &sens_u).unwrap();
        assert_relative_eq!(e.nabla_q_trajectories_stock[0][4], 4.0 + 1.0, epsilon = 1e-12);
        assert_relative_eq!(e.nabla_qv_trajectories_stock[0][4][0], 12.0, epsilon = 1e-12);
        assert_relative_eq!(e.nabla_rv_trajectories_stock[0][4][0], 8.0, epsilon = 1e-12);
        // last sample before the event is sample 2
        assert_relative_eq!(e.nabla_q_final_stock[0][0], 20.0, epsilon = 1e-12);
        assert_relative_eq!(e.nabla_qv_final_stock[0][0][0], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn cost_derivative_of_zero_sensitivity_is_the_cost_rate_difference() {
        let dc = scalar_collector();
        let lookup = SubsystemLookupTable::new(&[0.5]).unwrap();
        let zeros = vec![vec![DVector::zeros(1); 6]];
        let u_zeros = vec![vec![DVector::zeros(1); 6]];
        let d = DerivativeAssemblerUtils::calculate_cost_derivative(&dc, &lookup, 0, &zeros, &u_zeros).unwrap();
        // (1/0.5) * 2 * 0.5 - (1/0.5) * 2 * 0.5
        assert_relative_eq!(d, 0.0, epsilon = 1e-12);

        let ones = vec![vec![DVector::from_element(1, 1.0); 6]];
        let d = DerivativeAssemblerUtils::calculate_cost_derivative(&dc, &lookup, 0, &ones, &u_zeros).unwrap();
        // running Qv term over [0, 1], event terminal term and heuristic term
        assert_relative_eq!(d, 1.0 + 10.0 + 100.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_rollout_sensitivity_is_rejected() {
        let dc = scalar_collector();
        let lookup = SubsystemLookupTable::new(&[0.5]).unwrap();
        let full = vec![vec![DVector::zeros(1); 6]];
        let short = vec![vec![DVector::zeros(1); 5]];

        for (sens_x, sens_u) in [(&vec![], &full), (&full, &vec![]), (&short, &full), (&full, &short)] {
            match DerivativeAssemblerUtils::calculate_cost_derivative(&dc, &lookup, 0, sens_x, sens_u) {
                Err(SwitchoptError::GenericError(s)) => { assert!(s.contains("Rollout sensitivity")); }
                other => panic!("expected a length error, got {:?}", other)
            }
            assert!(DerivativeAssemblerUtils::approximate_nominal_lq_sensitivity(&dc, sens_x, sens_u).is_err());
        }
    }

    #[test]
    fn value_function_expansion() {
        let dc = scalar_collector();
        let riccati = RiccatiSensitivityTrajectories {
            nabla_s_trajectories_stock: vec![vec![1.5; 6]],
            nabla_sv_trajectories_stock: vec![vec![DVector::from_element(1, 2.0); 6]],
            nabla_sm_trajectories_stock: vec![vec![DMatrix::from_element(1, 1, 4.0); 6]]
        };
        let at_nominal = DerivativeAssemblerUtils::value_function_derivative(&dc, &riccati, 0.3, &DVector::from_element(1, 1.0)).unwrap();
        assert_relative_eq!(at_nominal, 1.5, epsilon = 1e-12);
        let off_nominal = DerivativeAssemblerUtils::value_function_derivative(&dc, &riccati, 0.3, &DVector::from_element(1, 1.5)).unwrap();
        assert_relative_eq!(off_nominal, 1.5 + 1.0 + 0.5 * 4.0 * 0.25, epsilon = 1e-12);
        assert!(DerivativeAssemblerUtils::value_function_derivative(&dc, &riccati, 2.0, &DVector::from_element(1, 1.0)).is_err());
        assert!(!riccati.is_empty());
    }
}
