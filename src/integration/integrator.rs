use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;
use tracing::warn;
use crate::integration::ode_base::OdeBase;
use crate::integration::system_event_handler::{SystemEvent, SystemEventHandler};
use crate::utils::utils_enums::EnumUtils;
use crate::utils::utils_errors::SwitchoptError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumIter)]
pub enum IntegratorType {
    /// Dormand-Prince 5(4).
    Ode45,
    /// Runge-Kutta-Fehlberg 4(5).
    Rkf45,
    AdamsBashforth
}
impl IntegratorType {
    pub fn is_supported_for_sensitivity_equations(&self) -> bool {
        return match self {
            IntegratorType::Ode45 => { true }
            IntegratorType::Rkf45 => { true }
            IntegratorType::AdamsBashforth => { false }
        }
    }
    pub fn supported_types() -> Vec<IntegratorType> {
        EnumUtils::get_all_variants_of_enum::<IntegratorType>().into_iter().filter(|t| t.is_supported_for_sensitivity_equations()).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntegratorTolerances {
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
    /// Initial step size and lower bound for the adaptive step size.
    pub min_time_step: f64
}
impl Default for IntegratorTolerances {
    fn default() -> Self {
        Self { absolute_tolerance: 1e-9, relative_tolerance: 1e-6, min_time_step: 1e-3 }
    }
}

/// Explicit embedded Runge-Kutta scheme.  `error_weights` are the differences between the propagated
/// and the embedded weights.
struct ButcherTableau {
    c: &'static [f64],
    a: &'static [&'static [f64]],
    weights: &'static [f64],
    error_weights: &'static [f64]
}

const DORMAND_PRINCE: ButcherTableau = ButcherTableau {
    c: &[0.0, 1.0/5.0, 3.0/10.0, 4.0/5.0, 8.0/9.0, 1.0, 1.0],
    a: &[
        &[],
        &[1.0/5.0],
        &[3.0/40.0, 9.0/40.0],
        &[44.0/45.0, -56.0/15.0, 32.0/9.0],
        &[19372.0/6561.0, -25360.0/2187.0, 64448.0/6561.0, -212.0/729.0],
        &[9017.0/3168.0, -355.0/33.0, 46732.0/5247.0, 49.0/176.0, -5103.0/18656.0],
        &[35.0/384.0, 0.0, 500.0/1113.0, 125.0/192.0, -2187.0/6784.0, 11.0/84.0]
    ],
    weights: &[35.0/384.0, 0.0, 500.0/1113.0, 125.0/192.0, -2187.0/6784.0, 11.0/84.0, 0.0],
    error_weights: &[71.0/57600.0, 0.0, -71.0/16695.0, 71.0/1920.0, -17253.0/339200.0, 22.0/525.0, -1.0/40.0]
};

const FEHLBERG: ButcherTableau = ButcherTableau {
    c: &[0.0, 1.0/4.0, 3.0/8.0, 12.0/13.0, 1.0, 1.0/2.0],
    a: &[
        &[],
        &[1.0/4.0],
        &[3.0/32.0, 9.0/32.0],
        &[1932.0/2197.0, -7200.0/2197.0, 7296.0/2197.0],
        &[439.0/216.0, -8.0, 3680.0/513.0, -845.0/4104.0],
        &[-8.0/27.0, 2.0, -3544.0/2565.0, 1859.0/4104.0, -11.0/40.0]
    ],
    weights: &[16.0/135.0, 0.0, 6656.0/12825.0, 28561.0/56430.0, -9.0/50.0, 2.0/55.0],
    error_weights: &[16.0/135.0 - 25.0/216.0, 0.0, 6656.0/12825.0 - 1408.0/2565.0, 28561.0/56430.0 - 2197.0/4104.0, -9.0/50.0 + 1.0/5.0, 2.0/55.0]
};

const SAFETY_FACTOR: f64 = 0.9;
const MAX_GROWTH: f64 = 5.0;
const MAX_SHRINK: f64 = 0.1;

/// Adaptive step size integrator that reports the state at a prescribed sequence of time stamps.
///
/// Time stamps may be increasing (forward integration) or decreasing (backward integration).  The
/// stage buffers are kept between calls, so one integrator should be owned by one worker.
pub struct AdaptiveIntegrator {
    integrator_type: IntegratorType,
    stages: Vec<DVector<f64>>,
    num_steps: usize
}
impl AdaptiveIntegrator {
    pub fn new(integrator_type: IntegratorType) -> Result<Self, SwitchoptError> {
        if !integrator_type.is_supported_for_sensitivity_equations() {
            return Err(SwitchoptError::new_unsupported_operation_error("AdaptiveIntegrator::new", &format!("{:?} is not implemented for sensitivity equations. Supported integrators are {:?}.", integrator_type, IntegratorType::supported_types()), file!(), line!()));
        }
        Ok(Self { integrator_type, stages: vec![], num_steps: 0 })
    }
    pub fn integrator_type(&self) -> IntegratorType {
        self.integrator_type
    }
    /// Total number of accepted and rejected steps since construction.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }
    /// Integrates `ode` from `init_state` at `time_stamps[0]` and appends the state at every time stamp
    /// (including the first) to `state_trajectory`.
    pub fn integrate<O: OdeBase>(&mut self,
                                 ode: &mut O,
                                 init_state: &DVector<f64>,
                                 time_stamps: &[f64],
                                 tolerances: &IntegratorTolerances,
                                 event_handler: &SystemEventHandler,
                                 state_trajectory: &mut Vec<DVector<f64>>) -> Result<(), SwitchoptError> {
        if time_stamps.is_empty() { return Ok(()); }

        let direction = if time_stamps[time_stamps.len() - 1] < time_stamps[0] { -1.0 } else { 1.0 };
        for w in time_stamps.windows(2) {
            if (w[1] - w[0]) * direction < 0.0 {
                return Err(SwitchoptError::new_generic_error_str(&format!("Integration time stamps must be monotone, but {} is followed by {}.", w[0], w[1]), file!(), line!()));
            }
        }

        state_trajectory.push(init_state.clone());

        let min_time_step = tolerances.min_time_step.abs();
        let mut x = init_state.clone();
        let mut t = time_stamps[0];
        let mut h = direction * min_time_step;
        let mut num_steps = 0;

        for &target in &time_stamps[1..] {
            while (target - t) * direction > 0.0 {
                if let Some(event) = event_handler.check_event(num_steps) {
                    return match event {
                        SystemEvent::KillIntegration => {
                            Err(SwitchoptError::new_integration_error(&format!("Integration was cancelled at time {}.", t), file!(), line!()))
                        }
                        SystemEvent::MaxNumStepsReached { max_num_steps } => {
                            Err(SwitchoptError::new_integration_error(&format!("Maximum number of integration steps ({}) reached at time {}.", max_num_steps, t), file!(), line!()))
                        }
                    }
                }

                let remaining = target - t;
                let hits_target = h.abs() >= remaining.abs();
                let h_try = if hits_target { remaining } else { h };

                let (x_new, error) = self.step(ode, t, &x, h_try)?;
                num_steps += 1;
                self.num_steps += 1;

                let error_norm = Self::error_norm(&x, &x_new, &error, tolerances);
                let at_floor = h_try.abs() <= min_time_step;

                // a non-finite estimate cannot be reduced by refining the step
                if !error_norm.is_finite() || error_norm <= 1.0 || at_floor {
                    if error_norm.is_finite() && error_norm > 1.0 {
                        warn!(time = t, error_norm, "accepting integration step at the minimum step size");
                    }
                    t = if hits_target { target } else { t + h_try };
                    x = x_new;
                    if error_norm.is_finite() && !hits_target {
                        h = h_try * Self::growth_factor(error_norm);
                    }
                } else {
                    let shrunk = h_try * (SAFETY_FACTOR * error_norm.powf(-0.25)).max(MAX_SHRINK);
                    h = direction * shrunk.abs().max(min_time_step);
                }
            }
            state_trajectory.push(x.clone());
        }

        Ok(())
    }
    fn step<O: OdeBase>(&mut self, ode: &mut O, t: f64, x: &DVector<f64>, h: f64) -> Result<(DVector<f64>, DVector<f64>), SwitchoptError> {
        let tableau = match self.integrator_type {
            IntegratorType::Ode45 => { &DORMAND_PRINCE }
            IntegratorType::Rkf45 => { &FEHLBERG }
            IntegratorType::AdamsBashforth => {
                return Err(SwitchoptError::new_unsupported_operation_error("AdaptiveIntegrator::step", "AdamsBashforth is not implemented for sensitivity equations.", file!(), line!()));
            }
        };

        self.stages.clear();
        for i in 0..tableau.c.len() {
            let mut stage_state = x.clone();
            for (j, a) in tableau.a[i].iter().enumerate() {
                if *a != 0.0 { stage_state += &self.stages[j] * (h * a); }
            }
            let k = ode.compute_flow_map(t + tableau.c[i] * h, &stage_state)?;
            self.stages.push(k);
        }

        let mut x_new = x.clone();
        let mut error = DVector::zeros(x.len());
        for (i, k) in self.stages.iter().enumerate() {
            if tableau.weights[i] != 0.0 { x_new += k * (h * tableau.weights[i]); }
            if tableau.error_weights[i] != 0.0 { error += k * (h * tableau.error_weights[i]); }
        }

        Ok((x_new, error))
    }
    fn error_norm(x: &DVector<f64>, x_new: &DVector<f64>, error: &DVector<f64>, tolerances: &IntegratorTolerances) -> f64 {
        let mut out: f64 = 0.0;
        for i in 0..error.len() {
            let scale = tolerances.absolute_tolerance + tolerances.relative_tolerance * x[i].abs().max(x_new[i].abs());
            let e = error[i].abs() / scale;
            if !e.is_finite() { return f64::NAN; }
            out = out.max(e);
        }
        out
    }
    fn growth_factor(error_norm: f64) -> f64 {
        if error_norm <= 0.0 { return MAX_GROWTH; }
        (SAFETY_FACTOR * error_norm.powf(-0.2)).min(MAX_GROWTH).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use crate::integration::system_event_handler::KillIntegrationToken;

    struct LinearOde {
        a: DMatrix<f64>,
        num_function_calls: usize
    }
    impl OdeBase for LinearOde {
        fn compute_flow_map(&mut self, _t: f64, x: &DVector<f64>) -> Result<DVector<f64>, SwitchoptError> {
            self.num_function_calls += 1;
            Ok(&self.a * x)
        }
        fn num_function_calls(&self) -> usize { self.num_function_calls }
        fn reset_num_function_calls(&mut self) { self.num_function_calls = 0; }
    }

    fn decay() -> LinearOde {
        LinearOde { a: DMatrix::from_element(1, 1, -1.0), num_function_calls: 0 }
    }

    fn oscillator() -> LinearOde {
        LinearOde { a: DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0]), num_function_calls: 0 }
    }

    fn tight() -> IntegratorTolerances {
        IntegratorTolerances { absolute_tolerance: 1e-10, relative_tolerance: 1e-10, min_time_step: 1e-4 }
    }

    #[test]
    fn exponential_decay_at_output_times() {
        for t in [IntegratorType::Ode45, IntegratorType::Rkf45] {
            let mut integrator = AdaptiveIntegrator::new(t).unwrap();
            let mut ode = decay();
            let times: Vec<f64> = (0..11).map(|i| i as f64 * 0.2).collect();
            let mut out = vec![];
            integrator.integrate(&mut ode, &DVector::from_element(1, 1.0), &times, &tight(), &SystemEventHandler::new(100_000, None), &mut out).unwrap();
            assert_eq!(out.len(), times.len());
            for (k, x) in out.iter().enumerate() {
                assert_relative_eq!(x[0], (-times[k]).exp(), epsilon = 1e-8);
            }
            assert!(ode.num_function_calls() > 0);
        }
    }

    #[test]
    fn backward_integration() {
        let mut integrator = AdaptiveIntegrator::new(IntegratorType::Ode45).unwrap();
        let mut ode = oscillator();
        let times = vec![3.0, 2.0, 1.0, 0.0];
        let mut out = vec![];
        let x_final = DVector::from_vec(vec![3.0_f64.cos(), -(3.0_f64.sin())]);
        integrator.integrate(&mut ode, &x_final, &times, &tight(), &SystemEventHandler::new(100_000, None), &mut out).unwrap();
        assert_relative_eq!(out[3][0], 1.0, epsilon = 1e-7);
        assert_relative_eq!(out[3][1], 0.0, epsilon = 1e-7);
        assert_relative_eq!(out[1][0], 2.0_f64.cos(), epsilon = 1e-7);
    }

    #[test]
    fn repeated_time_stamps_repeat_the_state() {
        let mut integrator = AdaptiveIntegrator::new(IntegratorType::Ode45).unwrap();
        let mut ode = decay();
        let mut out = vec![];
        integrator.integrate(&mut ode, &DVector::from_element(1, 2.0), &[0.5, 0.5], &tight(), &SystemEventHandler::new(10, None), &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1][0], 2.0);
    }

    #[test]
    fn step_budget_is_enforced() {
        let mut integrator = AdaptiveIntegrator::new(IntegratorType::Ode45).unwrap();
        let mut ode = oscillator();
        let mut out = vec![];
        let r = integrator.integrate(&mut ode, &DVector::from_vec(vec![1.0, 0.0]), &[0.0, 100.0], &tight(), &SystemEventHandler::new(5, None), &mut out);
        assert!(matches!(r, Err(SwitchoptError::IntegrationError(_))));
    }

    #[test]
    fn activated_token_cancels() {
        let token = KillIntegrationToken::new();
        token.activate();
        let mut integrator = AdaptiveIntegrator::new(IntegratorType::Rkf45).unwrap();
        let mut ode = decay();
        let mut out = vec![];
        let r = integrator.integrate(&mut ode, &DVector::from_element(1, 1.0), &[0.0, 1.0], &tight(), &SystemEventHandler::new(1000, Some(token)), &mut out);
        match r {
            Err(SwitchoptError::IntegrationError(s)) => { assert!(s.contains("cancelled")); }
            _ => panic!("integration should have been cancelled")
        }
    }

    #[test]
    fn non_monotone_time_stamps_fail() {
        let mut integrator = AdaptiveIntegrator::new(IntegratorType::Ode45).unwrap();
        let mut ode = decay();
        let mut out = vec![];
        let r = integrator.integrate(&mut ode, &DVector::from_element(1, 1.0), &[0.0, 1.0, 0.5, 2.0], &tight(), &SystemEventHandler::new(1000, None), &mut out);
        assert!(r.is_err());
    }

    #[test]
    fn adams_bashforth_is_rejected_at_setup() {
        let r = AdaptiveIntegrator::new(IntegratorType::AdamsBashforth);
        assert!(matches!(r, Err(SwitchoptError::UnsupportedOperationError(_))));
        assert_eq!(IntegratorType::supported_types(), vec![IntegratorType::Ode45, IntegratorType::Rkf45]);
    }
}
