use nalgebra::{DMatrix, DVector};
use crate::integration::ode_base::OdeBase;
use crate::sensitivity_equations::{MULTIPLIER_THRESHOLD, SensitivityEquations};
use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::interpolation::LinearInterpolation;

#[derive(Clone, Copy, Debug)]
pub struct BvpSensitivityErrorData<'a> {
    pub time_trajectory: &'a [f64],
    pub am_trajectory: &'a [DMatrix<f64>],
    pub bm_trajectory: &'a [DMatrix<f64>],
    pub rv_trajectory: &'a [DVector<f64>],
    pub costate_trajectory: &'a [DVector<f64>],
    pub ss_time_trajectory: &'a [f64],
    pub controller_feedback_trajectory: &'a [DMatrix<f64>]
}

/// Backward dynamics of `Mve`, the part of the costate sensitivity sweep driven by the stationarity
/// residual `Rv + B' lambda` of the nominal solution:
///
/// `-d Mve / dt = (A + B K)' Mve + multiplier * K' (Rv + B' lambda)`
///
/// The residual vanishes on an exactly optimal nominal trajectory.
pub struct BvpSensitivityErrorEquations<'a> {
    am_func: LinearInterpolation<'a, DMatrix<f64>>,
    bm_func: LinearInterpolation<'a, DMatrix<f64>>,
    rv_func: LinearInterpolation<'a, DVector<f64>>,
    costate_func: LinearInterpolation<'a, DVector<f64>>,
    k_func: LinearInterpolation<'a, DMatrix<f64>>,
    multiplier: f64,
    num_function_calls: usize
}
impl<'a> BvpSensitivityErrorEquations<'a> {
    pub fn new() -> Self {
        Self {
            am_func: LinearInterpolation::new(),
            bm_func: LinearInterpolation::new(),
            rv_func: LinearInterpolation::new(),
            costate_func: LinearInterpolation::new(),
            k_func: LinearInterpolation::new(),
            multiplier: 0.0,
            num_function_calls: 0
        }
    }
    pub fn set_data(&mut self, data: BvpSensitivityErrorData<'a>) {
        let t = data.time_trajectory;
        self.am_func.set_time_stamp(t);
        self.am_func.set_data(data.am_trajectory);
        self.bm_func.set_time_stamp(t);
        self.bm_func.set_data(data.bm_trajectory);
        self.rv_func.set_time_stamp(t);
        self.rv_func.set_data(data.rv_trajectory);
        self.costate_func.set_time_stamp(t);
        self.costate_func.set_data(data.costate_trajectory);
        self.k_func.set_time_stamp(data.ss_time_trajectory);
        self.k_func.set_data(data.controller_feedback_trajectory);
    }
}
impl<'a> Default for BvpSensitivityErrorEquations<'a> {
    fn default() -> Self { Self::new() }
}
impl<'a> OdeBase for BvpSensitivityErrorEquations<'a> {
    fn compute_flow_map(&mut self, t: f64, mve: &DVector<f64>) -> Result<DVector<f64>, SwitchoptError> {
        self.num_function_calls += 1;

        let am = self.am_func.interpolate(t)?;
        let index = self.am_func.greatest_less_time_stamp_index();
        let bm = self.bm_func.interpolate_with_hint(t, index)?;
        let k = self.k_func.interpolate(t)?;

        let mut out = (&am + &bm * &k).transpose() * mve;

        if self.multiplier.abs() > MULTIPLIER_THRESHOLD {
            let rv = self.rv_func.interpolate_with_hint(t, index)?;
            let costate = self.costate_func.interpolate_with_hint(t, index)?;
            let stationarity_residual = rv + bm.transpose() * costate;
            out += k.transpose() * stationarity_residual * self.multiplier;
        }

        Ok(-out)
    }
    fn num_function_calls(&self) -> usize { self.num_function_calls }
    fn reset_num_function_calls(&mut self) { self.num_function_calls = 0; }
}
impl<'a> SensitivityEquations for BvpSensitivityErrorEquations<'a> {
    fn reset(&mut self) {
        self.am_func.reset();
        self.bm_func.reset();
        self.rv_func.reset();
        self.costate_func.reset();
        self.k_func.reset();
        self.multiplier = 0.0;
    }
    fn set_multiplier(&mut self, multiplier: f64) { self.multiplier = multiplier; }
    fn multiplier(&self) -> f64 { self.multiplier }
}
