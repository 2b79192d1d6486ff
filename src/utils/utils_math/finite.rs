use nalgebra::{DMatrix, DVector};

/// Trajectory samples that can be swept for NaN or infinite entries.
pub trait AllFinite {
    fn all_finite(&self) -> bool;
    /// Magnitude printed next to the time stamp when a trajectory is reported as unstable.
    fn diagnostic_norm(&self) -> f64;
}
impl AllFinite for f64 {
    fn all_finite(&self) -> bool { self.is_finite() }
    fn diagnostic_norm(&self) -> f64 { self.abs() }
}
impl AllFinite for DVector<f64> {
    fn all_finite(&self) -> bool { self.iter().all(|x| x.is_finite()) }
    fn diagnostic_norm(&self) -> f64 { self.norm() }
}
impl AllFinite for DMatrix<f64> {
    fn all_finite(&self) -> bool { self.iter().all(|x| x.is_finite()) }
    fn diagnostic_norm(&self) -> f64 { self.norm() }
}
