use std::fmt;

/// A common error type returned by functions throughout the toolbox.
#[derive(Clone, Debug)]
pub enum SwitchoptError {
    GenericError(String),
    IdxOutOfBoundError(String),
    InactiveEventError(String),
    UnsupportedOperationError(String),
    NumericalInstabilityError { message: String, time: f64 },
    IntegrationError(String)
}
impl SwitchoptError {
    pub fn new_generic_error_str(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: {} -- File: {}, Line: {}", s, file, line);
        return Self::GenericError(s);
    }
    pub fn new_idx_out_of_bound_error(given_idx: usize, length_of_array: usize, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Index {:?} is too large for the array of length {:?} -- File: {}, Line: {}", given_idx, length_of_array, file, line);
        return Self::IdxOutOfBoundError(s);
    }
    pub fn new_check_for_idx_out_of_bound_error(given_idx: usize, length_of_array: usize, file: &str, line: u32) -> Result<(), Self> {
        return if given_idx >= length_of_array {
            Err(Self::new_idx_out_of_bound_error(given_idx, length_of_array, file, line))
        } else {
            Ok(())
        }
    }
    pub fn new_idx_out_of_range_error_str(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: {} -- File: {}, Line: {}", s, file, line);
        return Self::IdxOutOfBoundError(s);
    }
    /// Raised when a sensitivity is requested for an event whose switch does not lie inside the horizon.
    pub fn new_inactive_event_error(event_time_index: usize, active_begin_index: usize, active_end_index: usize, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Event time index {} is not active. The active event time indices are [{}, {}) -- File: {}, Line: {}", event_time_index, active_begin_index, active_end_index, file, line);
        return Self::InactiveEventError(s);
    }
    pub fn new_unsupported_operation_error(function_name: &str, message: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Unsupported operation error in function {}.  {} -- File: {}, Line: {}", function_name, message, file, line);
        return Self::UnsupportedOperationError(s);
    }
    pub fn new_numerical_instability_error(quantity_name: &str, time: f64, file: &str, line: u32) -> Self {
        let message = format!("ERROR: {} is unstable at time {} -- File: {}, Line: {}", quantity_name, time, file, line);
        return Self::NumericalInstabilityError { message, time };
    }
    pub fn new_integration_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Integration failed. {} -- File: {}, Line: {}", s, file, line);
        return Self::IntegrationError(s);
    }
    pub fn message(&self) -> &str {
        return match self {
            SwitchoptError::GenericError(s) => { s }
            SwitchoptError::IdxOutOfBoundError(s) => { s }
            SwitchoptError::InactiveEventError(s) => { s }
            SwitchoptError::UnsupportedOperationError(s) => { s }
            SwitchoptError::NumericalInstabilityError { message, .. } => { message }
            SwitchoptError::IntegrationError(s) => { s }
        }
    }
}
impl fmt::Display for SwitchoptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}
impl std::error::Error for SwitchoptError { }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_location() {
        let e = SwitchoptError::new_generic_error_str("bad input", "a.rs", 7);
        assert!(e.to_string().contains("bad input"));
        assert!(e.to_string().contains("File: a.rs, Line: 7"));
    }

    #[test]
    fn idx_check() {
        assert!(SwitchoptError::new_check_for_idx_out_of_bound_error(2, 3, file!(), line!()).is_ok());
        let r = SwitchoptError::new_check_for_idx_out_of_bound_error(3, 3, file!(), line!());
        assert!(matches!(r, Err(SwitchoptError::IdxOutOfBoundError(_))));
    }

    #[test]
    fn instability_error_keeps_time() {
        let e = SwitchoptError::new_numerical_instability_error("nabla_s", 0.25, file!(), line!());
        match e {
            SwitchoptError::NumericalInstabilityError { time, message } => {
                assert_eq!(time, 0.25);
                assert!(message.contains("0.25"));
            }
            _ => panic!("wrong variant")
        }
    }
}
