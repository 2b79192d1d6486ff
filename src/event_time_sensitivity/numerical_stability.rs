use tracing::error;
use crate::utils::utils_console::{switchopt_print, PrintColor, PrintMode};
use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::finite::AllFinite;

/// Number of samples printed around an unstable sample.
const DIAGNOSTIC_WINDOW: usize = 10;

/// A sampled trajectory that can be swept for non-finite values.
pub trait FiniteTrajectory {
    fn num_samples(&self) -> usize;
    fn sample_is_finite(&self, k: usize) -> bool;
    fn sample_norm(&self, k: usize) -> f64;
}
impl<T: AllFinite> FiniteTrajectory for Vec<T> {
    fn num_samples(&self) -> usize { self.len() }
    fn sample_is_finite(&self, k: usize) -> bool { self[k].all_finite() }
    fn sample_norm(&self, k: usize) -> f64 { self[k].diagnostic_norm() }
}

/// Order in which the samples are visited.  Forward integrated quantities are swept from the start,
/// backward integrated ones from the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepDirection {
    Forward,
    Backward
}

pub struct NumericalStabilityUtils;
impl NumericalStabilityUtils {
    /// Returns a `NumericalInstabilityError` carrying the time of the first non-finite sample found in
    /// sweep order.  Before returning, the samples next to it are printed in red.
    pub fn check_trajectories(context: &str,
                              time_trajectory: &[f64],
                              quantities: &[(&str, &dyn FiniteTrajectory)],
                              direction: SweepDirection) -> Result<(), SwitchoptError> {
        let n = time_trajectory.len();
        let order: Box<dyn Iterator<Item=usize>> = match direction {
            SweepDirection::Forward => { Box::new(0..n) }
            SweepDirection::Backward => { Box::new((0..n).rev()) }
        };

        for k in order {
            for (name, trajectory) in quantities {
                if k < trajectory.num_samples() && !trajectory.sample_is_finite(k) {
                    let time = time_trajectory[k];
                    error!(context, quantity = *name, time, "sensitivity trajectory is not finite");
                    Self::print_window(context, name, time_trajectory, quantities, k, direction);
                    return Err(SwitchoptError::new_numerical_instability_error(&format!("{} ({})", name, context), time, file!(), line!()));
                }
            }
        }

        Ok(())
    }
    fn print_window(context: &str,
                    name: &str,
                    time_trajectory: &[f64],
                    quantities: &[(&str, &dyn FiniteTrajectory)],
                    k: usize,
                    direction: SweepDirection) {
        let n = time_trajectory.len();
        let window = match direction {
            SweepDirection::Forward => { (k + 1).saturating_sub(DIAGNOSTIC_WINDOW)..k + 1 }
            SweepDirection::Backward => { k..(k + DIAGNOSTIC_WINDOW).min(n) }
        };

        switchopt_print(&format!("{} is unstable at time {} [sec] ({}).", name, time_trajectory[k], context), PrintMode::Println, PrintColor::Red, true);
        for kp in window {
            for (quantity_name, trajectory) in quantities {
                if kp < trajectory.num_samples() {
                    switchopt_print(&format!("{}[{}]:\t{}", quantity_name, time_trajectory[kp], trajectory.sample_norm(kp)), PrintMode::Println, PrintColor::Red, false);
                }
            }
        }
    }
}
