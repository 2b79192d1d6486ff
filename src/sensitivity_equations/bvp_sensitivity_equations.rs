use nalgebra::{DMatrix, DVector};
use crate::integration::ode_base::OdeBase;
use crate::sensitivity_equations::{MULTIPLIER_THRESHOLD, SensitivityEquations};
use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::interpolation::LinearInterpolation;

#[derive(Clone, Copy, Debug)]
pub struct BvpSensitivityData<'a> {
    pub time_trajectory: &'a [f64],
    pub am_trajectory: &'a [DMatrix<f64>],
    pub bm_trajectory: &'a [DMatrix<f64>],
    pub qv_trajectory: &'a [DVector<f64>],
    pub flow_map_trajectory: &'a [DVector<f64>],
    pub costate_trajectory: &'a [DVector<f64>],
    pub ss_time_trajectory: &'a [f64],
    pub sm_trajectory: &'a [DMatrix<f64>],
    pub controller_feedback_trajectory: &'a [DMatrix<f64>]
}

/// Backward dynamics of the affine part `Mv` of the costate sensitivity sweep
/// `nabla_lambda = Sm nabla_x + Mv`:
///
/// `-d Mv / dt = (A + B K)' Mv + multiplier * (Sm f + Qv + A' lambda)`
pub struct BvpSensitivityEquations<'a> {
    am_func: LinearInterpolation<'a, DMatrix<f64>>,
    bm_func: LinearInterpolation<'a, DMatrix<f64>>,
    qv_func: LinearInterpolation<'a, DVector<f64>>,
    flow_map_func: LinearInterpolation<'a, DVector<f64>>,
    costate_func: LinearInterpolation<'a, DVector<f64>>,
    sm_func: LinearInterpolation<'a, DMatrix<f64>>,
    k_func: LinearInterpolation<'a, DMatrix<f64>>,
    multiplier: f64,
    num_function_calls: usize
}
impl<'a> BvpSensitivityEquations<'a> {
    pub fn new() -> Self {
        Self {
            am_func: LinearInterpolation::new(),
            bm_func: LinearInterpolation::new(),
            qv_func: LinearInterpolation::new(),
            flow_map_func: LinearInterpolation::new(),
            costate_func: LinearInterpolation::new(),
            sm_func: LinearInterpolation::new(),
            k_func: LinearInterpolation::new(),
            multiplier: 0.0,
            num_function_calls: 0
        }
    }
    pub fn set_data(&mut self, data: BvpSensitivityData<'a>) {
        let t = data.time_trajectory;
        self.am_func.set_time_stamp(t);
        self.am_func.set_data(data.am_trajectory);
        self.bm_func.set_time_stamp(t);
        self.bm_func.set_data(data.bm_trajectory);
        self.qv_func.set_time_stamp(t);
        self.qv_func.set_data(data.qv_trajectory);
        self.flow_map_func.set_time_stamp(t);
        self.flow_map_func.set_data(data.flow_map_trajectory);
        self.costate_func.set_time_stamp(t);
        self.costate_func.set_data(data.costate_trajectory);
        self.sm_func.set_time_stamp(data.ss_time_trajectory);
        self.sm_func.set_data(data.sm_trajectory);
        self.k_func.set_time_stamp(data.ss_time_trajectory);
        self.k_func.set_data(data.controller_feedback_trajectory);
    }
}
impl<'a> Default for BvpSensitivityEquations<'a> {
    fn default() -> Self { Self::new() }
}
impl<'a> OdeBase for BvpSensitivityEquations<'a> {
    fn compute_flow_map(&mut self, t: f64, mv: &DVector<f64>) -> Result<DVector<f64>, SwitchoptError> {
        self.num_function_calls += 1;

        let am = self.am_func.interpolate(t)?;
        let index = self.am_func.greatest_less_time_stamp_index();
        let bm = self.bm_func.interpolate_with_hint(t, index)?;
        let k = self.k_func.interpolate(t)?;

        let closed_loop_am = &am + &bm * &k;
        let mut out = closed_loop_am.transpose() * mv;

        if self.multiplier.abs() > MULTIPLIER_THRESHOLD {
            let sm = self.sm_func.interpolate_with_hint(t, self.k_func.greatest_less_time_stamp_index())?;
            let qv = self.qv_func.interpolate_with_hint(t, index)?;
            let flow_map = self.flow_map_func.interpolate_with_hint(t, index)?;
            let costate = self.costate_func.interpolate_with_hint(t, index)?;
            out += (sm * flow_map + qv + am.transpose() * costate) * self.multiplier;
        }

        Ok(-out)
    }
    fn num_function_calls(&self) -> usize { self.num_function_calls }
    fn reset_num_function_calls(&mut self) { self.num_function_calls = 0; }
}
impl<'a> SensitivityEquations for BvpSensitivityEquations<'a> {
    fn reset(&mut self) {
        self.am_func.reset();
        self.bm_func.reset();
        self.qv_func.reset();
        self.flow_map_func.reset();
        self.costate_func.reset();
        self.sm_func.reset();
        self.k_func.reset();
        self.multiplier = 0.0;
    }
    fn set_multiplier(&mut self, multiplier: f64) { self.multiplier = multiplier; }
    fn multiplier(&self) -> f64 { self.multiplier }
}
