use crate::integration::ode_base::OdeBase;

pub mod bvp_sensitivity_equations;
pub mod bvp_sensitivity_error_equations;
pub mod riccati_sensitivity_equations;
pub mod rollout_sensitivity_equations;

/// Multipliers below this magnitude do not add the flow map forcing.
pub const MULTIPLIER_THRESHOLD: f64 = 1e-9;

/// Common interface of the ODEs describing the derivative of a nominal quantity with respect to one
/// event time.
///
/// Each model borrows the nominal data of one event segment through its own `set_data` method.  The
/// equivalent system multiplier of the segment's subsystem is set before the segment is integrated.
pub trait SensitivityEquations: OdeBase {
    /// Clears the cached interpolation indices and sets the multiplier back to zero.
    fn reset(&mut self);
    fn set_multiplier(&mut self, multiplier: f64);
    fn multiplier(&self) -> f64;
}
