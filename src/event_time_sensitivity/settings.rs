use serde::{Deserialize, Serialize};
use crate::integration::integrator::{IntegratorTolerances, IntegratorType};

/// Options of the event time sensitivity computation.
///
/// ## Example
/// ```
/// use switchopt::event_time_sensitivity::settings::SensitivitySettings;
/// use switchopt::utils::utils_traits::ToAndFromTomlString;
/// let settings = SensitivitySettings::load_from_toml_string("use_lq_for_derivatives = true\nthread_count = 2").unwrap();
/// assert!(settings.use_lq_for_derivatives);
/// assert_eq!(settings.max_num_lq_iterations, 3);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivitySettings {
    /// Computes derivatives through the Riccati sensitivity (LQ method) instead of the sweeping BVP method.
    pub use_lq_for_derivatives: bool,
    pub max_integration_steps_per_second: usize,
    pub min_time_step: f64,
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
    pub check_numerical_stability: bool,
    pub thread_count: usize,
    pub integrator_type: IntegratorType,
    /// Number of sweeps of the LQ method.  No convergence test is made between sweeps.
    pub max_num_lq_iterations: usize,
    pub display_info: bool
}
impl SensitivitySettings {
    pub fn integrator_tolerances(&self) -> IntegratorTolerances {
        IntegratorTolerances {
            absolute_tolerance: self.absolute_tolerance,
            relative_tolerance: self.relative_tolerance,
            min_time_step: self.min_time_step
        }
    }
}
impl Default for SensitivitySettings {
    fn default() -> Self {
        Self {
            use_lq_for_derivatives: false,
            max_integration_steps_per_second: 5000,
            min_time_step: 1e-3,
            absolute_tolerance: 1e-9,
            relative_tolerance: 1e-6,
            check_numerical_stability: true,
            thread_count: 4,
            integrator_type: IntegratorType::Ode45,
            max_num_lq_iterations: 3,
            display_info: false
        }
    }
}
