use nalgebra::DVector;
use crate::utils::utils_errors::SwitchoptError;

/// Right hand side of an ordinary differential equation `dx/dt = f(t, x)` consumed by the integrators.
///
/// Implementors count how often their flow map is evaluated.  The jump map applied between two event
/// segments defaults to the identity.
pub trait OdeBase {
    fn compute_flow_map(&mut self, t: f64, x: &DVector<f64>) -> Result<DVector<f64>, SwitchoptError>;
    fn compute_jump_map(&mut self, _t: f64, x: &DVector<f64>) -> Result<DVector<f64>, SwitchoptError> {
        Ok(x.clone())
    }
    fn num_function_calls(&self) -> usize;
    fn reset_num_function_calls(&mut self);
}
