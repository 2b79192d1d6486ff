use nalgebra::{DMatrix, DVector};
use crate::integration::ode_base::OdeBase;
use crate::sensitivity_equations::{MULTIPLIER_THRESHOLD, SensitivityEquations};
use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::interpolation::LinearInterpolation;

/// Nominal data of one event segment used by [`RolloutSensitivityEquations`].
#[derive(Clone, Copy, Debug)]
pub struct RolloutSensitivityData<'a> {
    pub time_trajectory: &'a [f64],
    pub am_trajectory: &'a [DMatrix<f64>],
    pub bm_trajectory: &'a [DMatrix<f64>],
    pub flow_map_trajectory: &'a [DVector<f64>],
    pub controller_time_trajectory: &'a [f64],
    pub controller_feedback_trajectory: &'a [DMatrix<f64>],
    pub controller_feedforward_trajectory: &'a [DVector<f64>]
}

/// Forward dynamics of the state sensitivity under the affine sensitivity controller
/// `nabla_u = K(t) nabla_x + Lv(t)`:
///
/// `d nabla_x / dt = A nabla_x + B nabla_u + multiplier * f`
pub struct RolloutSensitivityEquations<'a> {
    am_func: LinearInterpolation<'a, DMatrix<f64>>,
    bm_func: LinearInterpolation<'a, DMatrix<f64>>,
    flow_map_func: LinearInterpolation<'a, DVector<f64>>,
    k_func: LinearInterpolation<'a, DMatrix<f64>>,
    lv_func: LinearInterpolation<'a, DVector<f64>>,
    multiplier: f64,
    num_function_calls: usize
}
impl<'a> RolloutSensitivityEquations<'a> {
    pub fn new() -> Self {
        Self {
            am_func: LinearInterpolation::new(),
            bm_func: LinearInterpolation::new(),
            flow_map_func: LinearInterpolation::new(),
            k_func: LinearInterpolation::new(),
            lv_func: LinearInterpolation::new(),
            multiplier: 0.0,
            num_function_calls: 0
        }
    }
    pub fn set_data(&mut self, data: RolloutSensitivityData<'a>) {
        self.am_func.set_time_stamp(data.time_trajectory);
        self.am_func.set_data(data.am_trajectory);
        self.bm_func.set_time_stamp(data.time_trajectory);
        self.bm_func.set_data(data.bm_trajectory);
        self.flow_map_func.set_time_stamp(data.time_trajectory);
        self.flow_map_func.set_data(data.flow_map_trajectory);
        self.k_func.set_time_stamp(data.controller_time_trajectory);
        self.k_func.set_data(data.controller_feedback_trajectory);
        self.lv_func.set_time_stamp(data.controller_time_trajectory);
        self.lv_func.set_data(data.controller_feedforward_trajectory);
    }
    /// Input sensitivity of the sensitivity controller at time `t`.
    pub fn compute_input(&mut self, t: f64, nabla_x: &DVector<f64>) -> Result<DVector<f64>, SwitchoptError> {
        let k = self.k_func.interpolate(t)?;
        let lv = self.lv_func.interpolate_with_hint(t, self.k_func.greatest_less_time_stamp_index())?;
        Ok(k * nabla_x + lv)
    }
}
impl<'a> Default for RolloutSensitivityEquations<'a> {
    fn default() -> Self { Self::new() }
}
impl<'a> OdeBase for RolloutSensitivityEquations<'a> {
    fn compute_flow_map(&mut self, t: f64, nabla_x: &DVector<f64>) -> Result<DVector<f64>, SwitchoptError> {
        self.num_function_calls += 1;

        let am = self.am_func.interpolate(t)?;
        let index = self.am_func.greatest_less_time_stamp_index();
        let bm = self.bm_func.interpolate_with_hint(t, index)?;
        let nabla_u = self.compute_input(t, nabla_x)?;

        let mut out = am * nabla_x + bm * nabla_u;
        if self.multiplier.abs() > MULTIPLIER_THRESHOLD {
            let flow_map = self.flow_map_func.interpolate_with_hint(t, index)?;
            out += flow_map * self.multiplier;
        }

        Ok(out)
    }
    fn num_function_calls(&self) -> usize { self.num_function_calls }
    fn reset_num_function_calls(&mut self) { self.num_function_calls = 0; }
}
impl<'a> SensitivityEquations for RolloutSensitivityEquations<'a> {
    fn reset(&mut self) {
        self.am_func.reset();
        self.bm_func.reset();
        self.flow_map_func.reset();
        self.k_func.reset();
        self.lv_func.reset();
        self.multiplier = 0.0;
    }
    fn set_multiplier(&mut self, multiplier: f64) { self.multiplier = multiplier; }
    fn multiplier(&self) -> f64 { self.multiplier }
}
