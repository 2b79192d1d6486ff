use std::sync::{Mutex, MutexGuard};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;
use crate::event_time_sensitivity::data_collector::{PartitionData, SlqDataCollector};
use crate::event_time_sensitivity::derivative_assembler::{DerivativeAssemblerUtils, LqSensitivityExpansion, RiccatiSensitivityTrajectories};
use crate::event_time_sensitivity::equivalent_system::SubsystemLookupTable;
use crate::event_time_sensitivity::numerical_stability::{FiniteTrajectory, NumericalStabilityUtils, SweepDirection};
use crate::event_time_sensitivity::settings::SensitivitySettings;
use crate::integration::event_segments::{EventSegment, EventSegmentsUtils};
use crate::integration::integrator::AdaptiveIntegrator;
use crate::integration::ode_base::OdeBase;
use crate::integration::system_event_handler::{KillIntegrationToken, SystemEventHandler};
use crate::sensitivity_equations::SensitivityEquations;
use crate::sensitivity_equations::bvp_sensitivity_equations::{BvpSensitivityData, BvpSensitivityEquations};
use crate::sensitivity_equations::bvp_sensitivity_error_equations::{BvpSensitivityErrorData, BvpSensitivityErrorEquations};
use crate::sensitivity_equations::riccati_sensitivity_equations::{RiccatiSensitivityData, RiccatiSensitivityEquations};
use crate::sensitivity_equations::rollout_sensitivity_equations::{RolloutSensitivityData, RolloutSensitivityEquations};
use crate::utils::utils_console::{switchopt_print, PrintColor, PrintMode};
use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::interpolation::LinearInterpolation;

/// Integrators owned by one worker thread.
struct SensitivityWorker {
    rollout_integrator: AdaptiveIntegrator,
    riccati_integrator: AdaptiveIntegrator,
    bvp_integrator: AdaptiveIntegrator,
    bvp_error_integrator: AdaptiveIntegrator
}
impl SensitivityWorker {
    fn new(settings: &SensitivitySettings) -> Result<Self, SwitchoptError> {
        Ok(Self {
            rollout_integrator: AdaptiveIntegrator::new(settings.integrator_type)?,
            riccati_integrator: AdaptiveIntegrator::new(settings.integrator_type)?,
            bvp_integrator: AdaptiveIntegrator::new(settings.integrator_type)?,
            bvp_error_integrator: AdaptiveIntegrator::new(settings.integrator_type)?
        })
    }
}

/// Everything computed for one event time in the last `run`.  Partitions outside of the active
/// partition range hold empty arrays, and so do the quantities the selected method does not compute.
#[derive(Clone, Debug)]
pub struct EventSensitivityTrajectories {
    pub sensitivity_state_trajectories_stock: Vec<Vec<DVector<f64>>>,
    pub sensitivity_input_trajectories_stock: Vec<Vec<DVector<f64>>>,
    /// Feedforward part of the sensitivity controller on the Riccati time grid.
    pub sensitivity_controller_feedforward_stock: Vec<Vec<DVector<f64>>>,
    pub lq_sensitivity_expansion: LqSensitivityExpansion,
    pub nabla_s_heuristics: f64,
    pub nabla_sv_heuristics: DVector<f64>,
    pub riccati_sensitivity: RiccatiSensitivityTrajectories,
    pub mv_trajectories_stock: Vec<Vec<DVector<f64>>>,
    pub mve_trajectories_stock: Vec<Vec<DVector<f64>>>,
    pub cost_function_derivative: f64
}
impl Default for EventSensitivityTrajectories {
    fn default() -> Self {
        Self {
            sensitivity_state_trajectories_stock: vec![],
            sensitivity_input_trajectories_stock: vec![],
            sensitivity_controller_feedforward_stock: vec![],
            lq_sensitivity_expansion: LqSensitivityExpansion::default(),
            nabla_s_heuristics: 0.0,
            nabla_sv_heuristics: DVector::zeros(0),
            riccati_sensitivity: RiccatiSensitivityTrajectories::default(),
            mv_trajectories_stock: vec![],
            mve_trajectories_stock: vec![],
            cost_function_derivative: 0.0
        }
    }
}

/// Computes the derivative of the optimal cost with respect to every event (switching) time of a
/// nominal solution of the outer optimizer.
///
/// Two methods are available:
/// - the LQ method, which iterates rollout sensitivity, LQ sensitivity expansion, Riccati sensitivity
///   and sensitivity controller update a fixed number of times;
/// - the sweeping BVP method, which solves for the costate sensitivity offsets `Mv` and `Mve`, derives
///   the sensitivity controller from them and integrates the cost derivative along one rollout.
///
/// Events are processed in parallel on a dedicated thread pool.  Every worker thread uses its own
/// integrators.
pub struct EventTimeSensitivityModule {
    settings: SensitivitySettings,
    worker_stock: Vec<Mutex<SensitivityWorker>>,
    thread_pool: ThreadPool,
    kill_integration_token: KillIntegrationToken,
    lookup: SubsystemLookupTable,
    num_partitions: usize,
    active_event_time_begin_index: usize,
    active_event_time_end_index: usize,
    nominal_costate_trajectories_stock: Vec<Vec<DVector<f64>>>,
    event_sensitivities: Vec<EventSensitivityTrajectories>,
    cost_function_derivative: DVector<f64>
}
impl EventTimeSensitivityModule {
    pub fn new(settings: SensitivitySettings) -> Result<Self, SwitchoptError> {
        if settings.thread_count == 0 {
            return Err(SwitchoptError::new_generic_error_str("thread_count must be at least one.", file!(), line!()));
        }
        if settings.max_num_lq_iterations == 0 {
            return Err(SwitchoptError::new_generic_error_str("max_num_lq_iterations must be at least one.", file!(), line!()));
        }

        let mut worker_stock = Vec::with_capacity(settings.thread_count);
        for _ in 0..settings.thread_count {
            worker_stock.push(Mutex::new(SensitivityWorker::new(&settings)?));
        }

        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(settings.thread_count)
            .thread_name(|i| format!("event_time_sensitivity_worker_{}", i))
            .build()
            .map_err(|e| SwitchoptError::new_generic_error_str(&format!("Could not build the worker thread pool: {}", e), file!(), line!()))?;

        Ok(Self {
            settings,
            worker_stock,
            thread_pool,
            kill_integration_token: KillIntegrationToken::new(),
            lookup: SubsystemLookupTable::new(&[])?,
            num_partitions: 0,
            active_event_time_begin_index: 0,
            active_event_time_end_index: 0,
            nominal_costate_trajectories_stock: vec![],
            event_sensitivities: vec![],
            cost_function_derivative: DVector::zeros(0)
        })
    }
    pub fn settings(&self) -> &SensitivitySettings {
        &self.settings
    }
    /// Shared handle that cancels every running integration once activated.
    pub fn kill_integration_token(&self) -> KillIntegrationToken {
        self.kill_integration_token.clone()
    }
    pub fn event_times(&self) -> &[f64] {
        self.lookup.event_times()
    }
    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }
    /// Half open range `[begin, end)` of the events inside the horizon of the last run.
    pub fn active_event_time_range(&self) -> (usize, usize) {
        (self.active_event_time_begin_index, self.active_event_time_end_index)
    }
    /// Computes the cost derivative with respect to every event time.  Events outside of the horizon
    /// get a zero derivative.
    pub fn run(&mut self, event_times: &[f64], dc: &SlqDataCollector) -> Result<(), SwitchoptError> {
        dc.validate()?;

        self.lookup = SubsystemLookupTable::new(event_times)?;
        self.num_partitions = dc.num_partitions();
        self.active_event_time_begin_index = self.lookup.find_active_subsystem_index(dc.init_time, true)?;
        self.active_event_time_end_index = self.lookup.find_active_subsystem_index(dc.final_time, true)?;

        let num_event_times = event_times.len();
        self.event_sensitivities = vec![EventSensitivityTrajectories::default(); num_event_times];
        self.cost_function_derivative = DVector::zeros(num_event_times);
        self.nominal_costate_trajectories_stock.clear();

        if self.settings.display_info {
            switchopt_print("\n#### Calculating cost function sensitivity ...", PrintMode::Println, PrintColor::Cyan, true);
        }

        let results = if self.settings.use_lq_for_derivatives {
            self.run_lq_based_method(dc)?
        } else {
            self.nominal_costate_trajectories_stock = self.compute_missing_slq_data(dc)?;
            self.run_sweeping_bvp_method(dc, &self.nominal_costate_trajectories_stock)?
        };

        for (index, result) in results {
            self.cost_function_derivative[index] = result.cost_function_derivative;
            self.event_sensitivities[index] = result;
        }

        if self.settings.display_info {
            switchopt_print(&format!("cost function derivative: {:?}", self.cost_function_derivative.as_slice()), PrintMode::Println, PrintColor::Cyan, false);
        }

        Ok(())
    }
    fn run_lq_based_method(&self, dc: &SlqDataCollector) -> Result<Vec<(usize, EventSensitivityTrajectories)>, SwitchoptError> {
        let active_indices: Vec<usize> = (self.active_event_time_begin_index..self.active_event_time_end_index).collect();

        // the first sweep starts from a zero feedforward
        let zero_feedforward: Vec<Vec<DVector<f64>>> = dc.partitions.iter().enumerate().map(|(i, p)| {
            if dc.is_partition_active(i) { vec![DVector::zeros(p.input_dim()); p.num_ss_samples()] } else { vec![] }
        }).collect();
        let mut nabla_lv_stock_set = vec![zero_feedforward; active_indices.len()];

        let mut results = vec![];
        for iteration in 0..self.settings.max_num_lq_iterations {
            debug!(iteration, num_events = active_indices.len(), "LQ based sensitivity sweep");
            results = self.thread_pool.install(|| {
                active_indices.par_iter().zip(nabla_lv_stock_set.par_iter()).map(|(&index, nabla_lv_stock)| {
                    self.run_lq_based_iteration(index, dc, nabla_lv_stock)
                }).collect::<Result<Vec<EventSensitivityTrajectories>, SwitchoptError>>()
            })?;
            nabla_lv_stock_set = results.iter().map(|r| r.sensitivity_controller_feedforward_stock.clone()).collect();
        }

        Ok(active_indices.into_iter().zip(results.into_iter()).collect())
    }
    fn run_lq_based_iteration(&self, event_time_index: usize, dc: &SlqDataCollector, nabla_lv_stock: &[Vec<DVector<f64>>]) -> Result<EventSensitivityTrajectories, SwitchoptError> {
        debug!(event_time_index, "LQ based sensitivity of event time");

        let (sens_x, sens_u) = self.propagate_rollout_sensitivity(event_time_index, dc, nabla_lv_stock)?;
        let lq_sensitivity_expansion = self.approximate_nominal_lq_sensitivity_to_event_time(event_time_index, dc, &sens_x, &sens_u)?;
        let (nabla_s_heuristics, nabla_sv_heuristics) = self.approximate_nominal_heuristics_sensitivity_to_event_time(event_time_index, dc, &sens_x)?;

        // a zero learning rate only updates the gains and leaves the nominal trajectory unchanged
        let n = dc.state_dim();
        let riccati_sensitivity = self.solve_sensitivity_riccati_equations(event_time_index, dc, 0.0, &lq_sensitivity_expansion, nabla_s_heuristics, &nabla_sv_heuristics, &DMatrix::zeros(n, n))?;
        let nabla_lv = self.calculate_lq_sensitivity_controller_forward(event_time_index, dc, &lq_sensitivity_expansion, &riccati_sensitivity)?;
        let cost_function_derivative = DerivativeAssemblerUtils::value_function_derivative(dc, &riccati_sensitivity, dc.init_time, &dc.init_state)?;

        Ok(EventSensitivityTrajectories {
            sensitivity_state_trajectories_stock: sens_x,
            sensitivity_input_trajectories_stock: sens_u,
            sensitivity_controller_feedforward_stock: nabla_lv,
            lq_sensitivity_expansion,
            nabla_s_heuristics,
            nabla_sv_heuristics,
            riccati_sensitivity,
            mv_trajectories_stock: vec![],
            mve_trajectories_stock: vec![],
            cost_function_derivative
        })
    }
    fn run_sweeping_bvp_method(&self, dc: &SlqDataCollector, costate_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<Vec<(usize, EventSensitivityTrajectories)>, SwitchoptError> {
        let active_indices: Vec<usize> = (self.active_event_time_begin_index..self.active_event_time_end_index).collect();

        self.thread_pool.install(|| {
            active_indices.par_iter().map(|&index| -> Result<(usize, EventSensitivityTrajectories), SwitchoptError> {
                debug!(event_time_index = index, "sweeping BVP sensitivity of event time");

                let (mv, mve) = self.solve_sensitivity_bvp(index, dc, costate_trajectories_stock)?;
                let lv = self.calculate_bvp_sensitivity_controller_forward(index, dc, costate_trajectories_stock, &mv, &mve)?;
                let (sens_x, sens_u) = self.propagate_rollout_sensitivity(index, dc, &lv)?;
                let cost_function_derivative = self.calculate_cost_derivative(index, dc, &sens_x, &sens_u)?;

                Ok((index, EventSensitivityTrajectories {
                    sensitivity_state_trajectories_stock: sens_x,
                    sensitivity_input_trajectories_stock: sens_u,
                    sensitivity_controller_feedforward_stock: lv,
                    mv_trajectories_stock: mv,
                    mve_trajectories_stock: mve,
                    cost_function_derivative,
                    ..Default::default()
                }))
            }).collect()
        })
    }
    /// Nominal costate `lambda = Sv` on the nominal time grid of every active partition.
    pub fn compute_missing_slq_data(&self, dc: &SlqDataCollector) -> Result<Vec<Vec<DVector<f64>>>, SwitchoptError> {
        let mut out = Vec::with_capacity(dc.num_partitions());
        for (i, p) in dc.partitions.iter().enumerate() {
            if !dc.is_partition_active(i) {
                out.push(vec![]);
                continue;
            }
            out.push(Self::calculate_rollout_costate(p, &p.time_trajectory, &p.events_past_the_end_indices, &p.state_trajectory)?);
        }
        Ok(out)
    }
    /// Costate `lambda = Sv + Sm (x - x_nominal)` along a state trajectory of one partition.  The given
    /// trajectory must have the same events as the partition.  Each event segment only reads the Riccati
    /// data of the matching segment.
    pub fn calculate_rollout_costate(p: &PartitionData,
                                     time_trajectory: &[f64],
                                     events_past_the_end_indices: &[usize],
                                     state_trajectory: &[DVector<f64>]) -> Result<Vec<DVector<f64>>, SwitchoptError> {
        if time_trajectory.len() != state_trajectory.len() {
            return Err(SwitchoptError::new_generic_error_str(&format!("Time trajectory (length {}) and state trajectory (length {}) do not match.", time_trajectory.len(), state_trajectory.len()), file!(), line!()));
        }
        if events_past_the_end_indices.len() != p.num_events() {
            return Err(SwitchoptError::new_generic_error_str(&format!("The trajectory has {} events but the partition has {}.", events_past_the_end_indices.len(), p.num_events()), file!(), line!()));
        }

        let segments = EventSegmentsUtils::get_segments(time_trajectory.len(), events_past_the_end_indices)?;
        let nominal_segments = p.segments()?;
        let ss_segments = p.ss_segments()?;

        let mut out = Vec::with_capacity(time_trajectory.len());
        for segment in &segments {
            if segment.is_empty() { continue; }
            let nominal = &nominal_segments[segment.index];
            let ss = &ss_segments[segment.index];
            if nominal.is_empty() {
                return Err(SwitchoptError::new_generic_error_str(&format!("Event segment {} has no nominal data.", segment.index), file!(), line!()));
            }

            let mut sm_func = LinearInterpolation::new_with_data(&p.ss_time_trajectory[ss.range.clone()], &p.sm_trajectory[ss.range.clone()]);
            let mut sv_func = LinearInterpolation::new_with_data(&p.ss_time_trajectory[ss.range.clone()], &p.sv_trajectory[ss.range.clone()]);
            let mut nominal_state_func = LinearInterpolation::new_with_data(&p.time_trajectory[nominal.range.clone()], &p.state_trajectory[nominal.range.clone()]);

            for k in segment.range.clone() {
                let t = time_trajectory[k];
                let sm = sm_func.interpolate(t)?;
                let sv = sv_func.interpolate_with_hint(t, sm_func.greatest_less_time_stamp_index())?;
                let nominal_state = nominal_state_func.interpolate(t)?;
                out.push(sv + sm * (&state_trajectory[k] - nominal_state));
            }
        }

        Ok(out)
    }
    /// Forward integration of the state sensitivity under the sensitivity controller
    /// `nabla_u = K nabla_x + Lv`, where `K` is the nominal feedback gain and `Lv` is given on the Riccati
    /// time grid.  Returns the state and input sensitivities on the nominal time grid.
    pub fn propagate_rollout_sensitivity(&self,
                                         event_time_index: usize,
                                         dc: &SlqDataCollector,
                                         lv_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<(Vec<Vec<DVector<f64>>>, Vec<Vec<DVector<f64>>>), SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;
        if lv_trajectories_stock.len() != dc.num_partitions() {
            return Err(SwitchoptError::new_generic_error_str(&format!("The sensitivity controller has {} partitions, expected {}.", lv_trajectories_stock.len(), dc.num_partitions()), file!(), line!()));
        }

        let tolerances = self.settings.integrator_tolerances();
        let mut worker = self.lock_worker()?;
        let mut eq = RolloutSensitivityEquations::new();

        let mut sens_x_stock = Vec::with_capacity(dc.num_partitions());
        let mut sens_u_stock = Vec::with_capacity(dc.num_partitions());
        let mut nabla_x_init = DVector::zeros(dc.state_dim());

        for (i, p) in dc.partitions.iter().enumerate() {
            if !dc.is_partition_active(i) {
                sens_x_stock.push(vec![]);
                sens_u_stock.push(vec![]);
                continue;
            }
            if lv_trajectories_stock[i].len() != p.num_ss_samples() {
                return Err(SwitchoptError::new_generic_error_str(&format!("The sensitivity controller of partition {} has {} samples, expected {}.", i, lv_trajectories_stock[i].len(), p.num_ss_samples()), file!(), line!()));
            }

            let event_handler = self.event_handler(&p.time_trajectory);
            let ss_segments = p.ss_segments()?;
            let mut sens_x = Vec::with_capacity(p.num_samples());
            let mut sens_u = Vec::with_capacity(p.num_samples());

            for segment in p.segments()? {
                if segment.is_empty() { continue; }
                let ss = &ss_segments[segment.index];
                let time_trajectory = &p.time_trajectory[segment.range.clone()];

                eq.reset();
                eq.set_data(RolloutSensitivityData {
                    time_trajectory,
                    am_trajectory: &p.am_trajectory[segment.range.clone()],
                    bm_trajectory: &p.bm_trajectory[segment.range.clone()],
                    flow_map_trajectory: &p.flow_map_trajectory[segment.range.clone()],
                    controller_time_trajectory: &p.ss_time_trajectory[ss.range.clone()],
                    controller_feedback_trajectory: &p.controller_feedback_trajectory[ss.range.clone()],
                    controller_feedforward_trajectory: &lv_trajectories_stock[i][ss.range.clone()]
                });
                eq.set_multiplier(self.lookup.compute_segment_multiplier(event_time_index, time_trajectory, dc.init_time, dc.final_time)?);

                worker.rollout_integrator.integrate(&mut eq, &nabla_x_init, time_trajectory, &tolerances, &event_handler, &mut sens_x)?;
                for k in segment.range.clone() {
                    sens_u.push(eq.compute_input(p.time_trajectory[k], &sens_x[k])?);
                }

                let event_time = p.time_trajectory[segment.last()];
                nabla_x_init = eq.compute_jump_map(event_time, &sens_x[segment.last()])?;
            }

            if self.settings.check_numerical_stability {
                NumericalStabilityUtils::check_trajectories(&format!("rollout sensitivity of event {}, partition {}", event_time_index, i),
                                                           &p.time_trajectory,
                                                           &[("nabla_x", &sens_x as &dyn FiniteTrajectory), ("nabla_u", &sens_u as &dyn FiniteTrajectory)],
                                                           SweepDirection::Forward)?;
            }

            sens_x_stock.push(sens_x);
            sens_u_stock.push(sens_u);
        }

        Ok((sens_x_stock, sens_u_stock))
    }
    pub fn approximate_nominal_lq_sensitivity_to_event_time(&self,
                                                            event_time_index: usize,
                                                            dc: &SlqDataCollector,
                                                            sensitivity_state_trajectories_stock: &[Vec<DVector<f64>>],
                                                            sensitivity_input_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<LqSensitivityExpansion, SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;
        DerivativeAssemblerUtils::approximate_nominal_lq_sensitivity(dc, sensitivity_state_trajectories_stock, sensitivity_input_trajectories_stock)
    }
    /// Returns `(nabla_s_heuristics, nabla_Sv_heuristics)` at the final time.
    pub fn approximate_nominal_heuristics_sensitivity_to_event_time(&self,
                                                                    event_time_index: usize,
                                                                    dc: &SlqDataCollector,
                                                                    sensitivity_state_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<(f64, DVector<f64>), SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;
        let final_sens_x = sensitivity_state_trajectories_stock.get(dc.final_active_partition).and_then(|p| p.last())
            .ok_or_else(|| SwitchoptError::new_generic_error_str("The final active partition has no rollout sensitivity.", file!(), line!()))?;
        Ok(DerivativeAssemblerUtils::approximate_nominal_heuristics_sensitivity(dc, final_sens_x))
    }
    /// Backward integration of the Riccati sensitivity from the heuristic terminal values.  At every
    /// event the terminal cost sensitivity of the event is added to `nabla_Sv` and `nabla_s`.
    pub fn solve_sensitivity_riccati_equations(&self,
                                               event_time_index: usize,
                                               dc: &SlqDataCollector,
                                               learning_rate: f64,
                                               lq_sensitivity_expansion: &LqSensitivityExpansion,
                                               nabla_s_final: f64,
                                               nabla_sv_final: &DVector<f64>,
                                               nabla_sm_final: &DMatrix<f64>) -> Result<RiccatiSensitivityTrajectories, SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;

        let n = dc.state_dim();
        let tolerances = self.settings.integrator_tolerances();
        let mut worker = self.lock_worker()?;
        let mut eq = RiccatiSensitivityEquations::new(n);

        let num_partitions = dc.num_partitions();
        let mut out = RiccatiSensitivityTrajectories {
            nabla_s_trajectories_stock: vec![vec![]; num_partitions],
            nabla_sv_trajectories_stock: vec![vec![]; num_partitions],
            nabla_sm_trajectories_stock: vec![vec![]; num_partitions]
        };

        let mut all_ss_final = RiccatiSensitivityEquations::convert_to_vector(nabla_sm_final, nabla_sv_final, nabla_s_final);

        for i in (dc.init_active_partition..=dc.final_active_partition).rev() {
            let p = &dc.partitions[i];
            let segments = p.segments()?;
            let ss_segments = p.ss_segments()?;
            let event_handler = self.event_handler(&p.ss_time_trajectory);
            let ns = p.num_ss_samples();

            // filled backward in time
            let mut r_all_ss: Vec<DVector<f64>> = Vec::with_capacity(ns);

            for j in (0..=p.num_events()).rev() {
                if j < p.num_events() {
                    all_ss_final += RiccatiSensitivityEquations::convert_to_vector(&DMatrix::zeros(n, n),
                                                                                   &lq_sensitivity_expansion.nabla_qv_final_stock[i][j],
                                                                                   lq_sensitivity_expansion.nabla_q_final_stock[i][j]);
                }

                let ss = &ss_segments[j];
                if ss.is_empty() { continue; }
                let r = segments[j].range.clone();

                eq.reset();
                eq.set_data(learning_rate, RiccatiSensitivityData {
                    ss_time_trajectory: &p.ss_time_trajectory[ss.range.clone()],
                    sm_trajectory: &p.sm_trajectory[ss.range.clone()],
                    sv_trajectory: &p.sv_trajectory[ss.range.clone()],
                    time_trajectory: &p.time_trajectory[r.clone()],
                    am_trajectory: &p.am_trajectory[r.clone()],
                    bm_trajectory: &p.bm_trajectory[r.clone()],
                    q_trajectory: &p.q_trajectory[r.clone()],
                    qv_trajectory: &p.qv_trajectory[r.clone()],
                    qm_trajectory: &p.qm_trajectory[r.clone()],
                    rv_trajectory: &p.rv_trajectory[r.clone()],
                    rm_inverse_trajectory: &p.rm_inverse_trajectory[r.clone()],
                    rm_trajectory: &p.rm_trajectory[r.clone()],
                    pm_trajectory: &p.pm_trajectory[r.clone()],
                    nabla_q_trajectory: &lq_sensitivity_expansion.nabla_q_trajectories_stock[i][r.clone()],
                    nabla_qv_trajectory: &lq_sensitivity_expansion.nabla_qv_trajectories_stock[i][r.clone()],
                    nabla_rv_trajectory: &lq_sensitivity_expansion.nabla_rv_trajectories_stock[i][r.clone()]
                });
                eq.set_multiplier(self.lookup.compute_segment_multiplier(event_time_index, &p.ss_time_trajectory[ss.range.clone()], dc.init_time, dc.final_time)?);

                let backward_times = Self::backward_time_stamps(&p.ss_time_trajectory, ss);
                worker.riccati_integrator.integrate(&mut eq, &all_ss_final, &backward_times, &tolerances, &event_handler, &mut r_all_ss)?;
                all_ss_final = r_all_ss[r_all_ss.len() - 1].clone();
            }

            if r_all_ss.len() != ns {
                return Err(SwitchoptError::new_generic_error_str(&format!("Riccati sensitivity of partition {} has {} samples, expected {}.", i, r_all_ss.len(), ns), file!(), line!()));
            }

            let mut nabla_s = Vec::with_capacity(ns);
            let mut nabla_sv = Vec::with_capacity(ns);
            let mut nabla_sm = Vec::with_capacity(ns);
            for all_ss in r_all_ss.iter().rev() {
                let (sm, sv, s) = RiccatiSensitivityEquations::convert_to_matrix(all_ss, n);
                nabla_sm.push(sm);
                nabla_sv.push(sv);
                nabla_s.push(s);
            }

            if self.settings.check_numerical_stability {
                NumericalStabilityUtils::check_trajectories(&format!("Riccati sensitivity of event {}, partition {}", event_time_index, i),
                                                           &p.ss_time_trajectory,
                                                           &[("nabla_Sm", &nabla_sm as &dyn FiniteTrajectory), ("nabla_Sv", &nabla_sv as &dyn FiniteTrajectory), ("nabla_s", &nabla_s as &dyn FiniteTrajectory)],
                                                           SweepDirection::Backward)?;
            }

            out.nabla_s_trajectories_stock[i] = nabla_s;
            out.nabla_sv_trajectories_stock[i] = nabla_sv;
            out.nabla_sm_trajectories_stock[i] = nabla_sm;
        }

        Ok(out)
    }
    /// Backward integration of `Mv` and `Mve` from zero final values.  Both are continuous across events.
    /// Returns `(Mv, Mve)` on the Riccati time grid.
    pub fn solve_sensitivity_bvp(&self,
                                 event_time_index: usize,
                                 dc: &SlqDataCollector,
                                 costate_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<(Vec<Vec<DVector<f64>>>, Vec<Vec<DVector<f64>>>), SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;
        self.check_costate(dc, costate_trajectories_stock)?;

        let tolerances = self.settings.integrator_tolerances();
        let mut worker = self.lock_worker()?;
        let worker = &mut *worker;
        let mut bvp_eq = BvpSensitivityEquations::new();
        let mut bvp_error_eq = BvpSensitivityErrorEquations::new();

        let num_partitions = dc.num_partitions();
        let mut mv_stock = vec![vec![]; num_partitions];
        let mut mve_stock = vec![vec![]; num_partitions];
        let mut mv_final = DVector::zeros(dc.state_dim());
        let mut mve_final = DVector::zeros(dc.state_dim());

        for i in (dc.init_active_partition..=dc.final_active_partition).rev() {
            let p = &dc.partitions[i];
            let segments = p.segments()?;
            let ss_segments = p.ss_segments()?;
            let event_handler = self.event_handler(&p.ss_time_trajectory);
            let ns = p.num_ss_samples();

            let mut r_mv: Vec<DVector<f64>> = Vec::with_capacity(ns);
            let mut r_mve: Vec<DVector<f64>> = Vec::with_capacity(ns);

            for j in (0..=p.num_events()).rev() {
                let ss = &ss_segments[j];
                if ss.is_empty() { continue; }
                let r = segments[j].range.clone();
                let ss_time_trajectory = &p.ss_time_trajectory[ss.range.clone()];

                bvp_eq.reset();
                bvp_eq.set_data(BvpSensitivityData {
                    time_trajectory: &p.time_trajectory[r.clone()],
                    am_trajectory: &p.am_trajectory[r.clone()],
                    bm_trajectory: &p.bm_trajectory[r.clone()],
                    qv_trajectory: &p.qv_trajectory[r.clone()],
                    flow_map_trajectory: &p.flow_map_trajectory[r.clone()],
                    costate_trajectory: &costate_trajectories_stock[i][r.clone()],
                    ss_time_trajectory,
                    sm_trajectory: &p.sm_trajectory[ss.range.clone()],
                    controller_feedback_trajectory: &p.controller_feedback_trajectory[ss.range.clone()]
                });
                bvp_error_eq.reset();
                bvp_error_eq.set_data(BvpSensitivityErrorData {
                    time_trajectory: &p.time_trajectory[r.clone()],
                    am_trajectory: &p.am_trajectory[r.clone()],
                    bm_trajectory: &p.bm_trajectory[r.clone()],
                    rv_trajectory: &p.rv_trajectory[r.clone()],
                    costate_trajectory: &costate_trajectories_stock[i][r.clone()],
                    ss_time_trajectory,
                    controller_feedback_trajectory: &p.controller_feedback_trajectory[ss.range.clone()]
                });
                let multiplier = self.lookup.compute_segment_multiplier(event_time_index, ss_time_trajectory, dc.init_time, dc.final_time)?;
                bvp_eq.set_multiplier(multiplier);
                bvp_error_eq.set_multiplier(multiplier);

                let backward_times = Self::backward_time_stamps(&p.ss_time_trajectory, ss);
                worker.bvp_integrator.integrate(&mut bvp_eq, &mv_final, &backward_times, &tolerances, &event_handler, &mut r_mv)?;
                worker.bvp_error_integrator.integrate(&mut bvp_error_eq, &mve_final, &backward_times, &tolerances, &event_handler, &mut r_mve)?;

                let event_time = p.ss_time_trajectory[ss.first()];
                mv_final = bvp_eq.compute_jump_map(event_time, &r_mv[r_mv.len() - 1])?;
                mve_final = bvp_error_eq.compute_jump_map(event_time, &r_mve[r_mve.len() - 1])?;
            }

            if r_mv.len() != ns || r_mve.len() != ns {
                return Err(SwitchoptError::new_generic_error_str(&format!("BVP sensitivity of partition {} has {} samples, expected {}.", i, r_mv.len(), ns), file!(), line!()));
            }
            r_mv.reverse();
            r_mve.reverse();

            if self.settings.check_numerical_stability {
                NumericalStabilityUtils::check_trajectories(&format!("BVP sensitivity of event {}, partition {}", event_time_index, i),
                                                           &p.ss_time_trajectory,
                                                           &[("Mv", &r_mv as &dyn FiniteTrajectory), ("Mve", &r_mve as &dyn FiniteTrajectory)],
                                                           SweepDirection::Backward)?;
            }

            mv_stock[i] = r_mv;
            mve_stock[i] = r_mve;
        }

        Ok((mv_stock, mve_stock))
    }
    /// LQ sensitivity controller `nabla_Lv = -Rm^-1 (nabla_Rv + Bm' nabla_Sv)` on the Riccati time grid.
    pub fn calculate_lq_sensitivity_controller_forward(&self,
                                                       event_time_index: usize,
                                                       dc: &SlqDataCollector,
                                                       lq_sensitivity_expansion: &LqSensitivityExpansion,
                                                       riccati_sensitivity: &RiccatiSensitivityTrajectories) -> Result<Vec<Vec<DVector<f64>>>, SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;

        let mut out = Vec::with_capacity(dc.num_partitions());
        for (i, p) in dc.partitions.iter().enumerate() {
            if !dc.is_partition_active(i) {
                out.push(vec![]);
                continue;
            }
            let segments = p.segments()?;
            let mut nabla_lv = Vec::with_capacity(p.num_ss_samples());

            for ss in p.ss_segments()? {
                if ss.is_empty() { continue; }
                let r = segments[ss.index].range.clone();
                let time_trajectory = &p.time_trajectory[r.clone()];
                let mut bm_func = LinearInterpolation::new_with_data(time_trajectory, &p.bm_trajectory[r.clone()]);
                let mut rm_inverse_func = LinearInterpolation::new_with_data(time_trajectory, &p.rm_inverse_trajectory[r.clone()]);
                let mut nabla_rv_func = LinearInterpolation::new_with_data(time_trajectory, &lq_sensitivity_expansion.nabla_rv_trajectories_stock[i][r.clone()]);

                for k in ss.range.clone() {
                    let t = p.ss_time_trajectory[k];
                    let bm = bm_func.interpolate(t)?;
                    let index = bm_func.greatest_less_time_stamp_index();
                    let rm_inverse = rm_inverse_func.interpolate_with_hint(t, index)?;
                    let nabla_rv = nabla_rv_func.interpolate_with_hint(t, index)?;
                    nabla_lv.push(-(rm_inverse * (nabla_rv + bm.transpose() * &riccati_sensitivity.nabla_sv_trajectories_stock[i][k])));
                }
            }

            out.push(nabla_lv);
        }

        Ok(out)
    }
    /// BVP sensitivity controller `Lv = -Rm^-1 (Bm' (Mv + Mve) + multiplier (Rv + Bm' lambda))` on the
    /// Riccati time grid.
    pub fn calculate_bvp_sensitivity_controller_forward(&self,
                                                        event_time_index: usize,
                                                        dc: &SlqDataCollector,
                                                        costate_trajectories_stock: &[Vec<DVector<f64>>],
                                                        mv_trajectories_stock: &[Vec<DVector<f64>>],
                                                        mve_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<Vec<Vec<DVector<f64>>>, SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;
        self.check_costate(dc, costate_trajectories_stock)?;

        let mut out = Vec::with_capacity(dc.num_partitions());
        for (i, p) in dc.partitions.iter().enumerate() {
            if !dc.is_partition_active(i) {
                out.push(vec![]);
                continue;
            }
            let segments = p.segments()?;
            let mut lv = Vec::with_capacity(p.num_ss_samples());

            for ss in p.ss_segments()? {
                if ss.is_empty() { continue; }
                let r = segments[ss.index].range.clone();
                let time_trajectory = &p.time_trajectory[r.clone()];
                let multiplier = self.lookup.compute_segment_multiplier(event_time_index, &p.ss_time_trajectory[ss.range.clone()], dc.init_time, dc.final_time)?;
                let mut bm_func = LinearInterpolation::new_with_data(time_trajectory, &p.bm_trajectory[r.clone()]);
                let mut rm_inverse_func = LinearInterpolation::new_with_data(time_trajectory, &p.rm_inverse_trajectory[r.clone()]);
                let mut rv_func = LinearInterpolation::new_with_data(time_trajectory, &p.rv_trajectory[r.clone()]);
                let mut costate_func = LinearInterpolation::new_with_data(time_trajectory, &costate_trajectories_stock[i][r.clone()]);

                for k in ss.range.clone() {
                    let t = p.ss_time_trajectory[k];
                    let bm = bm_func.interpolate(t)?;
                    let index = bm_func.greatest_less_time_stamp_index();
                    let rm_inverse = rm_inverse_func.interpolate_with_hint(t, index)?;
                    let rv = rv_func.interpolate_with_hint(t, index)?;
                    let costate = costate_func.interpolate_with_hint(t, index)?;
                    let bm_t = bm.transpose();
                    let m = &mv_trajectories_stock[i][k] + &mve_trajectories_stock[i][k];
                    lv.push(-(rm_inverse * (&bm_t * m + (rv + &bm_t * costate) * multiplier)));
                }
            }

            out.push(lv);
        }

        Ok(out)
    }
    pub fn calculate_cost_derivative(&self,
                                     event_time_index: usize,
                                     dc: &SlqDataCollector,
                                     sensitivity_state_trajectories_stock: &[Vec<DVector<f64>>],
                                     sensitivity_input_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<f64, SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;
        DerivativeAssemblerUtils::calculate_cost_derivative(dc, &self.lookup, event_time_index, sensitivity_state_trajectories_stock, sensitivity_input_trajectories_stock)
    }
    /// Cost derivatives of the last run, one entry per event time.
    pub fn get_cost_function_derivative(&self) -> &DVector<f64> {
        &self.cost_function_derivative
    }
    /// Returns the state and input sensitivities of the last run on the nominal time grid of every
    /// partition.
    pub fn get_rollout_sensitivity_to_event_time(&self, event_time_index: usize) -> Result<(&Vec<Vec<DVector<f64>>>, &Vec<Vec<DVector<f64>>>), SwitchoptError> {
        let e = self.get_event_sensitivity(event_time_index)?;
        Ok((&e.sensitivity_state_trajectories_stock, &e.sensitivity_input_trajectories_stock))
    }
    /// Feedforward part of the sensitivity controller computed in the last run.
    pub fn get_sensitivity_controller_feedforward(&self, event_time_index: usize) -> Result<&Vec<Vec<DVector<f64>>>, SwitchoptError> {
        Ok(&self.get_event_sensitivity(event_time_index)?.sensitivity_controller_feedforward_stock)
    }
    pub fn get_event_sensitivity(&self, event_time_index: usize) -> Result<&EventSensitivityTrajectories, SwitchoptError> {
        SwitchoptError::new_check_for_idx_out_of_bound_error(event_time_index, self.event_sensitivities.len(), file!(), line!())?;
        Ok(&self.event_sensitivities[event_time_index])
    }
    /// Nominal costate of the last sweeping BVP run.
    pub fn nominal_costate_trajectories_stock(&self) -> &Vec<Vec<DVector<f64>>> {
        &self.nominal_costate_trajectories_stock
    }
    /// Derivative of the value function at `(time, state)` with respect to an event time.  Needs the
    /// Riccati sensitivity, so it is only available after a run of the LQ method.
    pub fn get_value_function_derivative(&self, dc: &SlqDataCollector, event_time_index: usize, time: f64, state: &DVector<f64>) -> Result<f64, SwitchoptError> {
        self.check_active_event_time_index(event_time_index)?;
        let e = self.get_event_sensitivity(event_time_index)?;
        if e.riccati_sensitivity.is_empty() {
            return Err(SwitchoptError::new_unsupported_operation_error("get_value_function_derivative", "The Riccati sensitivity is only computed by the LQ method (use_lq_for_derivatives).", file!(), line!()));
        }
        DerivativeAssemblerUtils::value_function_derivative(dc, &e.riccati_sensitivity, time, state)
    }
    fn check_active_event_time_index(&self, event_time_index: usize) -> Result<(), SwitchoptError> {
        if event_time_index < self.active_event_time_begin_index || event_time_index >= self.active_event_time_end_index {
            return Err(SwitchoptError::new_inactive_event_error(event_time_index, self.active_event_time_begin_index, self.active_event_time_end_index, file!(), line!()));
        }
        Ok(())
    }
    fn check_costate(&self, dc: &SlqDataCollector, costate_trajectories_stock: &[Vec<DVector<f64>>]) -> Result<(), SwitchoptError> {
        for i in dc.init_active_partition..=dc.final_active_partition {
            let len = costate_trajectories_stock.get(i).map(|c| c.len()).unwrap_or(0);
            if len != dc.partitions[i].num_samples() {
                return Err(SwitchoptError::new_generic_error_str(&format!("The costate of partition {} has {} samples, expected {}.", i, len, dc.partitions[i].num_samples()), file!(), line!()));
            }
        }
        Ok(())
    }
    fn lock_worker(&self) -> Result<MutexGuard<'_, SensitivityWorker>, SwitchoptError> {
        let worker_index = rayon::current_thread_index().unwrap_or(0) % self.worker_stock.len();
        self.worker_stock[worker_index].lock()
            .map_err(|_| SwitchoptError::new_generic_error_str(&format!("Integrators of worker {} are poisoned by an earlier panic.", worker_index), file!(), line!()))
    }
    fn event_handler(&self, time_trajectory: &[f64]) -> SystemEventHandler {
        let duration = match (time_trajectory.first(), time_trajectory.last()) {
            (Some(first), Some(last)) => { last - first }
            _ => { 0.0 }
        };
        SystemEventHandler::new_for_duration(self.settings.max_integration_steps_per_second, duration, Some(self.kill_integration_token.clone()))
    }
    fn backward_time_stamps(time_trajectory: &[f64], segment: &EventSegment) -> Vec<f64> {
        time_trajectory[segment.range.clone()].iter().rev().copied().collect()
    }
}
