#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};
use switchopt::event_time_sensitivity::data_collector::{PartitionData, SlqDataCollector};
use switchopt::event_time_sensitivity::settings::SensitivitySettings;
use switchopt::integration::integrator::IntegratorType;

/// Two linear subsystems that alternate at every event, with a quadratic cost and a quadratic
/// terminal cost at every event and at the final time.  The optimal solution comes from the exact
/// Riccati equations integrated with fixed step RK4.
pub struct SwitchedLqProblem {
    pub event_times: Vec<f64>,
    pub init_time: f64,
    pub final_time: f64,
    pub init_state: DVector<f64>,
    pub steps_per_subsystem: usize
}

/// Optimal solution of a [`SwitchedLqProblem`] in the layout the sensitivity module expects.
pub struct NominalSolution {
    pub data_collector: SlqDataCollector,
    pub optimal_cost: f64
}

struct Subsystem {
    a: DMatrix<f64>,
    b: DMatrix<f64>
}

struct QuadraticCost {
    qm: DMatrix<f64>,
    qv: DVector<f64>,
    q: f64
}
impl QuadraticCost {
    fn value(&self, x: &DVector<f64>) -> f64 {
        0.5 * x.dot(&(&self.qm * x)) + self.qv.dot(x) + self.q
    }
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.qm * x + &self.qv
    }
}

/// Value function `0.5 x' P x + p' x + c`.
#[derive(Clone)]
struct ValueFunction {
    p_m: DMatrix<f64>,
    p_v: DVector<f64>,
    c: f64
}
impl ValueFunction {
    fn axpy(&self, h: f64, d: &ValueFunction) -> ValueFunction {
        ValueFunction { p_m: &self.p_m + &d.p_m * h, p_v: &self.p_v + &d.p_v * h, c: self.c + d.c * h }
    }
}

fn subsystem(mode: usize) -> Subsystem {
    if mode % 2 == 0 {
        Subsystem { a: DMatrix::from_row_slice(2, 2, &[0.6, 1.2, -0.8, 3.4]), b: DMatrix::from_column_slice(2, 1, &[1.0, 1.0]) }
    } else {
        Subsystem { a: DMatrix::from_row_slice(2, 2, &[4.0, 3.0, -1.0, 0.0]), b: DMatrix::from_column_slice(2, 1, &[2.0, -1.0]) }
    }
}

fn running_cost() -> QuadraticCost {
    QuadraticCost { qm: DMatrix::from_diagonal(&DVector::from_vec(vec![0.0, 1.0])), qv: DVector::from_vec(vec![0.0, -2.0]), q: 2.0 }
}

fn input_weight() -> DMatrix<f64> {
    DMatrix::identity(1, 1)
}

fn event_cost() -> QuadraticCost {
    QuadraticCost { qm: DMatrix::identity(2, 2) * 0.5, qv: DVector::from_vec(vec![-0.5, -0.5]), q: 0.5 }
}

fn final_cost() -> QuadraticCost {
    QuadraticCost { qm: DMatrix::identity(2, 2), qv: DVector::from_vec(vec![-4.0, -2.0]), q: 10.0 }
}

/// Forward time derivative of the value function of one subsystem.
fn riccati_flow_map(s: &Subsystem, v: &ValueFunction) -> ValueFunction {
    let l = running_cost();
    let r_inverse = input_weight();
    let pb = &v.p_m * &s.b;
    let bp = s.b.transpose() * &v.p_v;
    let a_t = s.a.transpose();
    ValueFunction {
        p_m: -(&l.qm + &a_t * &v.p_m + &v.p_m * &s.a - &pb * &r_inverse * pb.transpose()),
        p_v: -(&l.qv + &a_t * &v.p_v - &pb * &r_inverse * &bp),
        c: -(l.q - 0.5 * bp.dot(&(&r_inverse * &bp)))
    }
}

fn rk4_value_function(s: &Subsystem, v: &ValueFunction, h: f64) -> ValueFunction {
    let k1 = riccati_flow_map(s, v);
    let k2 = riccati_flow_map(s, &v.axpy(0.5 * h, &k1));
    let k3 = riccati_flow_map(s, &v.axpy(0.5 * h, &k2));
    let k4 = riccati_flow_map(s, &v.axpy(h, &k3));
    ValueFunction {
        p_m: &v.p_m + (&k1.p_m + &k2.p_m * 2.0 + &k3.p_m * 2.0 + &k4.p_m) * (h / 6.0),
        p_v: &v.p_v + (&k1.p_v + &k2.p_v * 2.0 + &k3.p_v * 2.0 + &k4.p_v) * (h / 6.0),
        c: v.c + (k1.c + 2.0 * k2.c + 2.0 * k3.c + k4.c) * (h / 6.0)
    }
}

fn optimal_input(s: &Subsystem, p_m: &DMatrix<f64>, p_v: &DVector<f64>, x: &DVector<f64>) -> DVector<f64> {
    -(input_weight() * s.b.transpose() * (p_m * x + p_v))
}

impl SwitchedLqProblem {
    pub fn new(event_times: Vec<f64>) -> Self {
        Self {
            event_times,
            init_time: 0.0,
            final_time: 1.0,
            init_state: DVector::from_vec(vec![0.0, 2.0]),
            steps_per_subsystem: 200
        }
    }
    /// Boundaries of the subsystems inside the horizon.
    fn subsystem_boundaries(&self) -> Vec<f64> {
        let mut out = vec![self.init_time];
        out.extend(self.event_times.iter().copied());
        out.push(self.final_time);
        out
    }
    /// Time grid with every event time repeated and the past-the-end index of every event.
    fn time_grid(&self) -> (Vec<f64>, Vec<usize>) {
        let boundaries = self.subsystem_boundaries();
        let mut time_trajectory = vec![];
        let mut events_past_the_end_indices = vec![];
        for w in boundaries.windows(2) {
            if !time_trajectory.is_empty() { events_past_the_end_indices.push(time_trajectory.len()); }
            let h = (w[1] - w[0]) / self.steps_per_subsystem as f64;
            for k in 0..self.steps_per_subsystem {
                time_trajectory.push(w[0] + k as f64 * h);
            }
            time_trajectory.push(w[1]);
        }
        (time_trajectory, events_past_the_end_indices)
    }
    pub fn solve(&self) -> NominalSolution {
        let (time_trajectory, events_past_the_end_indices) = self.time_grid();
        let n = time_trajectory.len();
        let num_subsystems = self.event_times.len() + 1;
        let segment_len = self.steps_per_subsystem + 1;
        let mode_of_sample = |k: usize| k / segment_len;

        // value function, backward
        let terminal = final_cost();
        let mut value_functions = vec![ValueFunction { p_m: DMatrix::zeros(2, 2), p_v: DVector::zeros(2), c: 0.0 }; n];
        let mut v = ValueFunction { p_m: terminal.qm.clone(), p_v: terminal.qv.clone(), c: terminal.q };
        for mode in (0..num_subsystems).rev() {
            let s = subsystem(mode);
            let first = mode * segment_len;
            let last = first + segment_len - 1;
            if mode + 1 < num_subsystems {
                let e = event_cost();
                v = ValueFunction { p_m: &v.p_m + &e.qm, p_v: &v.p_v + &e.qv, c: v.c + e.q };
            }
            value_functions[last] = v.clone();
            for k in (first..last).rev() {
                v = rk4_value_function(&s, &v, time_trajectory[k] - time_trajectory[k + 1]);
                value_functions[k] = v.clone();
            }
        }

        // closed loop rollout, forward
        let mut state_trajectory = Vec::with_capacity(n);
        let mut x = self.init_state.clone();
        for k in 0..n {
            if k > 0 && mode_of_sample(k) == mode_of_sample(k - 1) {
                let s = subsystem(mode_of_sample(k));
                let h = time_trajectory[k] - time_trajectory[k - 1];
                let (v0, v1) = (&value_functions[k - 1], &value_functions[k]);
                let p_mid = (&v0.p_m + &v1.p_m) * 0.5;
                let pv_mid = (&v0.p_v + &v1.p_v) * 0.5;
                let f = |p_m: &DMatrix<f64>, p_v: &DVector<f64>, x: &DVector<f64>| &s.a * x + &s.b * optimal_input(&s, p_m, p_v, x);
                let k1 = f(&v0.p_m, &v0.p_v, &x);
                let k2 = f(&p_mid, &pv_mid, &(&x + &k1 * (0.5 * h)));
                let k3 = f(&p_mid, &pv_mid, &(&x + &k2 * (0.5 * h)));
                let k4 = f(&v1.p_m, &v1.p_v, &(&x + &k3 * h));
                x = &x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0);
            }
            state_trajectory.push(x.clone());
        }

        let l = running_cost();
        let r = input_weight();
        let mut p = PartitionData::default();
        for k in 0..n {
            let s = subsystem(mode_of_sample(k));
            let v = &value_functions[k];
            let x = &state_trajectory[k];
            let u = optimal_input(&s, &v.p_m, &v.p_v, x);

            p.flow_map_trajectory.push(&s.a * x + &s.b * &u);
            p.q_trajectory.push(l.value(x) + 0.5 * u.dot(&(&r * &u)));
            p.qv_trajectory.push(l.gradient(x));
            p.qm_trajectory.push(l.qm.clone());
            p.rv_trajectory.push(&r * &u);
            p.rm_trajectory.push(r.clone());
            p.rm_inverse_trajectory.push(r.clone());
            p.pm_trajectory.push(DMatrix::zeros(1, 2));
            p.sm_trajectory.push(v.p_m.clone());
            p.sv_trajectory.push(&v.p_m * x + &v.p_v);
            p.s_trajectory.push(0.5 * x.dot(&(&v.p_m * x)) + v.p_v.dot(x) + v.c);
            p.controller_feedback_trajectory.push(-(&r * s.b.transpose() * &v.p_m));
            p.am_trajectory.push(s.a);
            p.bm_trajectory.push(s.b);
            p.input_trajectory.push(u);
        }
        for &index in &events_past_the_end_indices {
            let x = &state_trajectory[index - 1];
            let e = event_cost();
            p.q_final.push(e.value(x));
            p.qv_final.push(e.gradient(x));
            p.qm_final.push(e.qm.clone());
        }
        p.ss_time_trajectory = time_trajectory.clone();
        p.ss_events_past_the_end_indices = events_past_the_end_indices.clone();
        p.time_trajectory = time_trajectory;
        p.events_past_the_end_indices = events_past_the_end_indices;

        let final_state = &state_trajectory[n - 1];
        let v0 = &value_functions[0];
        let optimal_cost = 0.5 * self.init_state.dot(&(&v0.p_m * &self.init_state)) + v0.p_v.dot(&self.init_state) + v0.c;
        p.state_trajectory = state_trajectory.clone();

        NominalSolution {
            data_collector: SlqDataCollector {
                init_time: self.init_time,
                final_time: self.final_time,
                init_state: self.init_state.clone(),
                partitioning_times: vec![self.init_time, self.final_time],
                init_active_partition: 0,
                final_active_partition: 0,
                partitions: vec![p],
                sm_heuristics: terminal.qm.clone(),
                sv_heuristics: terminal.gradient(final_state),
                s_heuristics: terminal.value(final_state)
            },
            optimal_cost
        }
    }
    /// Central difference of the optimal cost with respect to one event time.
    pub fn finite_difference_cost_derivative(&self, event_time_index: usize, epsilon: f64) -> f64 {
        let mut plus = self.event_times.clone();
        plus[event_time_index] += epsilon;
        let mut minus = self.event_times.clone();
        minus[event_time_index] -= epsilon;
        let j_plus = SwitchedLqProblem { event_times: plus, init_state: self.init_state.clone(), ..*self }.solve().optimal_cost;
        let j_minus = SwitchedLqProblem { event_times: minus, init_state: self.init_state.clone(), ..*self }.solve().optimal_cost;
        (j_plus - j_minus) / (2.0 * epsilon)
    }
}

/// Splits the only partition of `dc` at nominal sample `index`, which must come after the last event.
/// The boundary sample is repeated in both partitions.
pub fn split_partition(dc: &SlqDataCollector, index: usize) -> SlqDataCollector {
    let p = &dc.partitions[0];
    assert!(p.events_past_the_end_indices.iter().all(|&e| e <= index));
    let n = p.num_samples();

    let slice = |range: std::ops::Range<usize>, keep_events: bool| -> PartitionData {
        let (events, q_final, qv_final, qm_final) = if keep_events {
            (p.events_past_the_end_indices.clone(), p.q_final.clone(), p.qv_final.clone(), p.qm_final.clone())
        } else {
            (vec![], vec![], vec![], vec![])
        };
        PartitionData {
            time_trajectory: p.time_trajectory[range.clone()].to_vec(),
            events_past_the_end_indices: events.clone(),
            state_trajectory: p.state_trajectory[range.clone()].to_vec(),
            input_trajectory: p.input_trajectory[range.clone()].to_vec(),
            flow_map_trajectory: p.flow_map_trajectory[range.clone()].to_vec(),
            am_trajectory: p.am_trajectory[range.clone()].to_vec(),
            bm_trajectory: p.bm_trajectory[range.clone()].to_vec(),
            q_trajectory: p.q_trajectory[range.clone()].to_vec(),
            qv_trajectory: p.qv_trajectory[range.clone()].to_vec(),
            qm_trajectory: p.qm_trajectory[range.clone()].to_vec(),
            rv_trajectory: p.rv_trajectory[range.clone()].to_vec(),
            rm_trajectory: p.rm_trajectory[range.clone()].to_vec(),
            rm_inverse_trajectory: p.rm_inverse_trajectory[range.clone()].to_vec(),
            pm_trajectory: p.pm_trajectory[range.clone()].to_vec(),
            q_final,
            qv_final,
            qm_final,
            ss_time_trajectory: p.ss_time_trajectory[range.clone()].to_vec(),
            ss_events_past_the_end_indices: events,
            sm_trajectory: p.sm_trajectory[range.clone()].to_vec(),
            sv_trajectory: p.sv_trajectory[range.clone()].to_vec(),
            s_trajectory: p.s_trajectory[range.clone()].to_vec(),
            controller_feedback_trajectory: p.controller_feedback_trajectory[range].to_vec()
        }
    };

    let mut out = dc.clone();
    out.partitions = vec![slice(0..index + 1, true), slice(index..n, false)];
    out.partitioning_times = vec![dc.init_time, p.time_trajectory[index], dc.final_time];
    out.final_active_partition = 1;
    out
}

/// Appends an inactive partition after the horizon.
pub fn with_inactive_tail_partition(dc: &SlqDataCollector) -> SlqDataCollector {
    let mut out = dc.clone();
    out.partitions.push(PartitionData::default());
    out.partitioning_times.push(dc.final_time + 1.0);
    out
}

pub fn test_settings(use_lq_for_derivatives: bool) -> SensitivitySettings {
    SensitivitySettings {
        use_lq_for_derivatives,
        max_integration_steps_per_second: 100_000,
        min_time_step: 1e-5,
        absolute_tolerance: 1e-10,
        relative_tolerance: 1e-8,
        check_numerical_stability: true,
        thread_count: 1,
        integrator_type: IntegratorType::Ode45,
        max_num_lq_iterations: 3,
        display_info: false
    }
}
