use nalgebra::{DMatrix, DVector};
use crate::integration::ode_base::OdeBase;
use crate::sensitivity_equations::{MULTIPLIER_THRESHOLD, SensitivityEquations};
use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::interpolation::LinearInterpolation;

/// Nominal Riccati solution, nominal LQ expansion and LQ sensitivity of one event segment.
#[derive(Clone, Copy, Debug)]
pub struct RiccatiSensitivityData<'a> {
    pub ss_time_trajectory: &'a [f64],
    pub sm_trajectory: &'a [DMatrix<f64>],
    pub sv_trajectory: &'a [DVector<f64>],
    pub time_trajectory: &'a [f64],
    pub am_trajectory: &'a [DMatrix<f64>],
    pub bm_trajectory: &'a [DMatrix<f64>],
    pub q_trajectory: &'a [f64],
    pub qv_trajectory: &'a [DVector<f64>],
    pub qm_trajectory: &'a [DMatrix<f64>],
    pub rv_trajectory: &'a [DVector<f64>],
    pub rm_inverse_trajectory: &'a [DMatrix<f64>],
    pub rm_trajectory: &'a [DMatrix<f64>],
    pub pm_trajectory: &'a [DMatrix<f64>],
    pub nabla_q_trajectory: &'a [f64],
    pub nabla_qv_trajectory: &'a [DVector<f64>],
    pub nabla_rv_trajectory: &'a [DVector<f64>]
}

/// Backward dynamics of the derivative of the Riccati solution `(Sm, Sv, s)` with respect to one event
/// time, with the feedback gains `K = -Rm^-1 (Pm + Bm' Sm)` held at their nominal value.
///
/// The state is `[vec(nabla_Sm); nabla_Sv; nabla_s]` with `nabla_Sm` stored column-major.
pub struct RiccatiSensitivityEquations<'a> {
    state_dim: usize,
    learning_rate: f64,
    sm_func: LinearInterpolation<'a, DMatrix<f64>>,
    sv_func: LinearInterpolation<'a, DVector<f64>>,
    am_func: LinearInterpolation<'a, DMatrix<f64>>,
    bm_func: LinearInterpolation<'a, DMatrix<f64>>,
    q_func: LinearInterpolation<'a, f64>,
    qv_func: LinearInterpolation<'a, DVector<f64>>,
    qm_func: LinearInterpolation<'a, DMatrix<f64>>,
    rv_func: LinearInterpolation<'a, DVector<f64>>,
    rm_inverse_func: LinearInterpolation<'a, DMatrix<f64>>,
    rm_func: LinearInterpolation<'a, DMatrix<f64>>,
    pm_func: LinearInterpolation<'a, DMatrix<f64>>,
    nabla_q_func: LinearInterpolation<'a, f64>,
    nabla_qv_func: LinearInterpolation<'a, DVector<f64>>,
    nabla_rv_func: LinearInterpolation<'a, DVector<f64>>,
    multiplier: f64,
    num_function_calls: usize
}
impl<'a> RiccatiSensitivityEquations<'a> {
    pub fn new(state_dim: usize) -> Self {
        Self {
            state_dim,
            learning_rate: 0.0,
            sm_func: LinearInterpolation::new(),
            sv_func: LinearInterpolation::new(),
            am_func: LinearInterpolation::new(),
            bm_func: LinearInterpolation::new(),
            q_func: LinearInterpolation::new(),
            qv_func: LinearInterpolation::new(),
            qm_func: LinearInterpolation::new(),
            rv_func: LinearInterpolation::new(),
            rm_inverse_func: LinearInterpolation::new(),
            rm_func: LinearInterpolation::new(),
            pm_func: LinearInterpolation::new(),
            nabla_q_func: LinearInterpolation::new(),
            nabla_qv_func: LinearInterpolation::new(),
            nabla_rv_func: LinearInterpolation::new(),
            multiplier: 0.0,
            num_function_calls: 0
        }
    }
    pub fn set_data(&mut self, learning_rate: f64, data: RiccatiSensitivityData<'a>) {
        self.learning_rate = learning_rate;

        self.sm_func.set_time_stamp(data.ss_time_trajectory);
        self.sm_func.set_data(data.sm_trajectory);
        self.sv_func.set_time_stamp(data.ss_time_trajectory);
        self.sv_func.set_data(data.sv_trajectory);

        let t = data.time_trajectory;
        self.am_func.set_time_stamp(t);
        self.am_func.set_data(data.am_trajectory);
        self.bm_func.set_time_stamp(t);
        self.bm_func.set_data(data.bm_trajectory);
        self.q_func.set_time_stamp(t);
        self.q_func.set_data(data.q_trajectory);
        self.qv_func.set_time_stamp(t);
        self.qv_func.set_data(data.qv_trajectory);
        self.qm_func.set_time_stamp(t);
        self.qm_func.set_data(data.qm_trajectory);
        self.rv_func.set_time_stamp(t);
        self.rv_func.set_data(data.rv_trajectory);
        self.rm_inverse_func.set_time_stamp(t);
        self.rm_inverse_func.set_data(data.rm_inverse_trajectory);
        self.rm_func.set_time_stamp(t);
        self.rm_func.set_data(data.rm_trajectory);
        self.pm_func.set_time_stamp(t);
        self.pm_func.set_data(data.pm_trajectory);
        self.nabla_q_func.set_time_stamp(t);
        self.nabla_q_func.set_data(data.nabla_q_trajectory);
        self.nabla_qv_func.set_time_stamp(t);
        self.nabla_qv_func.set_data(data.nabla_qv_trajectory);
        self.nabla_rv_func.set_time_stamp(t);
        self.nabla_rv_func.set_data(data.nabla_rv_trajectory);
    }
    pub fn convert_to_vector(nabla_sm: &DMatrix<f64>, nabla_sv: &DVector<f64>, nabla_s: f64) -> DVector<f64> {
        let n = nabla_sv.len();
        let mut out = DVector::zeros(n * n + n + 1);
        out.rows_mut(0, n * n).copy_from_slice(nabla_sm.as_slice());
        out.rows_mut(n * n, n).copy_from(nabla_sv);
        out[n * n + n] = nabla_s;
        out
    }
    pub fn convert_to_matrix(all_ss: &DVector<f64>, state_dim: usize) -> (DMatrix<f64>, DVector<f64>, f64) {
        let n = state_dim;
        let nabla_sm = DMatrix::from_column_slice(n, n, &all_ss.as_slice()[0..n * n]);
        let nabla_sv = DVector::from_column_slice(&all_ss.as_slice()[n * n..n * n + n]);
        (nabla_sm, nabla_sv, all_ss[n * n + n])
    }
    pub fn state_dim(&self) -> usize {
        self.state_dim
    }
}
impl<'a> OdeBase for RiccatiSensitivityEquations<'a> {
    fn compute_flow_map(&mut self, t: f64, all_ss: &DVector<f64>) -> Result<DVector<f64>, SwitchoptError> {
        self.num_function_calls += 1;

        let (nabla_sm, nabla_sv, _) = Self::convert_to_matrix(all_ss, self.state_dim);

        let sm = self.sm_func.interpolate(t)?;
        let ss_index = self.sm_func.greatest_less_time_stamp_index();
        let sv = self.sv_func.interpolate_with_hint(t, ss_index)?;

        let am = self.am_func.interpolate(t)?;
        let index = self.am_func.greatest_less_time_stamp_index();
        let bm = self.bm_func.interpolate_with_hint(t, index)?;
        let rv = self.rv_func.interpolate_with_hint(t, index)?;
        let rm_inverse = self.rm_inverse_func.interpolate_with_hint(t, index)?;
        let pm = self.pm_func.interpolate_with_hint(t, index)?;
        let nabla_q = self.nabla_q_func.interpolate_with_hint(t, index)?;
        let nabla_qv = self.nabla_qv_func.interpolate_with_hint(t, index)?;
        let nabla_rv = self.nabla_rv_func.interpolate_with_hint(t, index)?;

        let bm_t = bm.transpose();
        let pm_plus_bsm = &pm + &bm_t * &sm;
        let rv_plus_bsv = &rv + &bm_t * &sv;
        let k = -(&rm_inverse * &pm_plus_bsm);
        let lv = -(&rm_inverse * &rv_plus_bsv);
        let closed_loop_am = &am + &bm * &k;
        let closed_loop_am_t = closed_loop_am.transpose();
        let lr = self.learning_rate;

        // right hand sides of -d/dt
        let mut d_sm = &closed_loop_am_t * &nabla_sm + &nabla_sm * &closed_loop_am;
        let mut d_sv = &nabla_qv + &closed_loop_am_t * &nabla_sv + k.transpose() * &nabla_rv + &nabla_sm * &bm * &lv;
        let mut d_s = nabla_q + lr * (lr - 2.0) * rv_plus_bsv.dot(&(&rm_inverse * (&nabla_rv + &bm_t * &nabla_sv)));

        if self.multiplier.abs() > MULTIPLIER_THRESHOLD {
            let q = self.q_func.interpolate_with_hint(t, index)?;
            let qv = self.qv_func.interpolate_with_hint(t, index)?;
            let qm = self.qm_func.interpolate_with_hint(t, index)?;
            let rm = self.rm_func.interpolate_with_hint(t, index)?;
            let am_t = am.transpose();
            let k_t = k.transpose();

            let flow_sm = &qm + &am_t * &sm + &sm * &am - &k_t * &rm * &k;
            let flow_sv = &qv + &am_t * &sv - &k_t * &rm * &lv;
            let flow_s = q + lr * (0.5 * lr - 1.0) * lv.dot(&(&rm * &lv));

            d_sm += flow_sm * self.multiplier;
            d_sv += flow_sv * self.multiplier;
            d_s += flow_s * self.multiplier;
        }

        Ok(-Self::convert_to_vector(&d_sm, &d_sv, d_s))
    }
    fn num_function_calls(&self) -> usize { self.num_function_calls }
    fn reset_num_function_calls(&mut self) { self.num_function_calls = 0; }
}
impl<'a> SensitivityEquations for RiccatiSensitivityEquations<'a> {
    fn reset(&mut self) {
        self.sm_func.reset();
        self.sv_func.reset();
        self.am_func.reset();
        self.bm_func.reset();
        self.q_func.reset();
        self.qv_func.reset();
        self.qm_func.reset();
        self.rv_func.reset();
        self.rm_inverse_func.reset();
        self.rm_func.reset();
        self.pm_func.reset();
        self.nabla_q_func.reset();
        self.nabla_qv_func.reset();
        self.nabla_rv_func.reset();
        self.multiplier = 0.0;
    }
    fn set_multiplier(&mut self, multiplier: f64) { self.multiplier = multiplier; }
    fn multiplier(&self) -> f64 { self.multiplier }
}
