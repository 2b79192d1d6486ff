use nalgebra::{DMatrix, DVector};
use crate::utils::utils_errors::SwitchoptError;
use crate::utils::utils_math::interval::{IntervalUtils, WEAK_EPSILON};

/// Values that can be blended linearly between two samples of a trajectory.
pub trait Interpolatable: Clone {
    /// Returns `alpha * a + (1 - alpha) * b`.
    fn linear_blend(a: &Self, b: &Self, alpha: f64) -> Self;
}
impl Interpolatable for f64 {
    fn linear_blend(a: &Self, b: &Self, alpha: f64) -> Self { alpha * a + (1.0 - alpha) * b }
}
impl Interpolatable for DVector<f64> {
    fn linear_blend(a: &Self, b: &Self, alpha: f64) -> Self { a * alpha + b * (1.0 - alpha) }
}
impl Interpolatable for DMatrix<f64> {
    fn linear_blend(a: &Self, b: &Self, alpha: f64) -> Self { a * alpha + b * (1.0 - alpha) }
}

pub struct LinearInterpolationUtils;
impl LinearInterpolationUtils {
    /// Linearly interpolates `data` at `enquiry_time`.  Queries outside of the time range are clamped
    /// to the nearest end sample.  Returns the interpolated value and the index `k` of the interval
    /// `(t[k], t[k + 1]]` that holds the query.
    pub fn interpolate<T: Interpolatable>(time_stamps: &[f64], data: &[T], enquiry_time: f64, hint_index: usize) -> Result<(T, usize), SwitchoptError> {
        if time_stamps.len() != data.len() {
            return Err(SwitchoptError::new_generic_error_str(&format!("Time stamp array (length {}) and data array (length {}) do not match.", time_stamps.len(), data.len()), file!(), line!()));
        }
        if data.is_empty() {
            return Err(SwitchoptError::new_generic_error_str("Cannot interpolate an empty trajectory.", file!(), line!()));
        }

        let last = data.len() - 1;
        if data.len() == 1 || enquiry_time <= time_stamps[0] { return Ok((data[0].clone(), 0)); }
        if enquiry_time >= time_stamps[last] { return Ok((data[last].clone(), last)); }

        let guess = hint_index.min(last - 1);
        let index = IntervalUtils::find_active_interval_index(time_stamps, enquiry_time, guess, WEAK_EPSILON)?;
        let index = (index.max(0) as usize).min(last - 1);

        let span = time_stamps[index] - time_stamps[index + 1];
        if span == 0.0 { return Ok((data[index + 1].clone(), index)); }

        let alpha = (enquiry_time - time_stamps[index + 1]) / span;
        Ok((T::linear_blend(&data[index], &data[index + 1], alpha), index))
    }
}

/// Piecewise linear interpolation over borrowed time stamp and data arrays.
///
/// The interpolator keeps the last bracketing index as a guess for the next query.  It can be rebound
/// to new arrays with [`LinearInterpolation::set_time_stamp`] and [`LinearInterpolation::set_data`];
/// call [`LinearInterpolation::reset`] whenever the arrays change.
#[derive(Clone, Debug)]
pub struct LinearInterpolation<'a, T: Interpolatable> {
    time_stamps: Option<&'a [f64]>,
    data: Option<&'a [T]>,
    index: usize
}
impl<'a, T: Interpolatable> LinearInterpolation<'a, T> {
    pub fn new() -> Self {
        Self { time_stamps: None, data: None, index: 0 }
    }
    pub fn new_with_data(time_stamps: &'a [f64], data: &'a [T]) -> Self {
        Self { time_stamps: Some(time_stamps), data: Some(data), index: 0 }
    }
    pub fn reset(&mut self) {
        self.index = 0;
    }
    pub fn set_time_stamp(&mut self, time_stamps: &'a [f64]) {
        self.reset();
        self.time_stamps = Some(time_stamps);
    }
    pub fn set_data(&mut self, data: &'a [T]) {
        self.reset();
        self.data = Some(data);
    }
    pub fn interpolate(&mut self, enquiry_time: f64) -> Result<T, SwitchoptError> {
        let (time_stamps, data) = match (self.time_stamps, self.data) {
            (Some(t), Some(d)) => { (t, d) }
            _ => { return Err(SwitchoptError::new_generic_error_str("Interpolation data has not been set.", file!(), line!())) }
        };
        let (out, index) = LinearInterpolationUtils::interpolate(time_stamps, data, enquiry_time, self.index)?;
        self.index = index;
        Ok(out)
    }
    /// Interpolates at `enquiry_time` starting the interval search from `hint_index`.
    pub fn interpolate_with_hint(&mut self, enquiry_time: f64, hint_index: usize) -> Result<T, SwitchoptError> {
        self.index = hint_index;
        self.interpolate(enquiry_time)
    }
    /// Left end of the interval used by the last query.  Intervals are closed on the right, so a query
    /// exactly at an interior sample `t[k]` reports `k - 1`.
    pub fn greatest_less_time_stamp_index(&self) -> usize {
        self.index
    }
}
impl<'a, T: Interpolatable> Default for LinearInterpolation<'a, T> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exact_at_samples_and_linear_between() {
        let t = vec![0.0, 0.5, 1.5, 2.0];
        let d: Vec<DVector<f64>> = vec![
            DVector::from_vec(vec![0.0, 1.0]),
            DVector::from_vec(vec![1.0, 3.0]),
            DVector::from_vec(vec![-1.0, 0.0]),
            DVector::from_vec(vec![2.0, 2.0]),
        ];
        let mut interp = LinearInterpolation::new_with_data(&t, &d);
        for k in 0..t.len() {
            let v = interp.interpolate(t[k]).unwrap();
            assert_relative_eq!(v, d[k].clone(), epsilon = 1e-12);
        }
        let v = interp.interpolate(1.0).unwrap();
        assert_relative_eq!(v[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(v[1], 1.5, epsilon = 1e-12);
        assert_eq!(interp.greatest_less_time_stamp_index(), 1);
    }

    #[test]
    fn query_at_a_sample_reports_the_interval_ending_there() {
        let t = vec![0.0, 1.0, 2.0, 3.0];
        let d = vec![0.0, 10.0, 20.0, 30.0];
        let mut interp = LinearInterpolation::new_with_data(&t, &d);
        assert_relative_eq!(interp.interpolate(2.0).unwrap(), 20.0);
        assert_eq!(interp.greatest_less_time_stamp_index(), 1);
        assert_relative_eq!(interp.interpolate(2.5).unwrap(), 25.0, epsilon = 1e-12);
        assert_eq!(interp.greatest_less_time_stamp_index(), 2);
    }

    #[test]
    fn clamps_outside_range() {
        let t = vec![0.0, 1.0];
        let d = vec![1.0, 3.0];
        let mut interp = LinearInterpolation::new_with_data(&t, &d);
        assert_relative_eq!(interp.interpolate(-1.0).unwrap(), 1.0);
        assert_relative_eq!(interp.interpolate(4.0).unwrap(), 3.0);
        assert_eq!(interp.greatest_less_time_stamp_index(), 1);
        // a stale index beyond the last interval must not break the next query
        assert_relative_eq!(interp.interpolate(0.25).unwrap(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn rebinding_and_single_sample() {
        let t1 = vec![0.0, 1.0, 2.0, 3.0];
        let d1 = vec![0.0, 1.0, 2.0, 3.0];
        let t2 = vec![5.0];
        let d2 = vec![DMatrix::<f64>::identity(2, 2)];
        let mut interp = LinearInterpolation::new_with_data(&t1, &d1);
        assert_relative_eq!(interp.interpolate(2.5).unwrap(), 2.5, epsilon = 1e-12);

        let mut matrix_interp = LinearInterpolation::new();
        assert!(matrix_interp.interpolate(0.0).is_err());
        matrix_interp.set_time_stamp(&t2);
        matrix_interp.set_data(&d2);
        assert_relative_eq!(matrix_interp.interpolate(7.0).unwrap(), DMatrix::identity(2, 2));
    }

    #[test]
    fn hint_does_not_change_result() {
        let t: Vec<f64> = (0..50).map(|i| i as f64 * 0.02).collect();
        let d: Vec<f64> = t.iter().map(|x| x * x).collect();
        let mut interp = LinearInterpolation::new_with_data(&t, &d);
        let a = interp.interpolate_with_hint(0.731, 0).unwrap();
        let b = interp.interpolate_with_hint(0.731, 48).unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-14);
        assert_eq!(interp.greatest_less_time_stamp_index(), 36);
    }

    #[test]
    fn mismatched_lengths_fail() {
        let r = LinearInterpolationUtils::interpolate(&[0.0, 1.0], &[1.0], 0.5, 0);
        assert!(r.is_err());
    }
}
