//! Switchopt computes how the optimal cost of a switched (hybrid) optimal control problem changes when
//! the switching times of its subsystems move.
//!
//! The derivatives are obtained from the nominal solution of a sequential linear-quadratic solver,
//! either by propagating the sensitivity of its Riccati equations (LQ method) or by a sweeping
//! boundary value problem for the costate sensitivity (BVP method).  They are meant to be consumed by
//! an outer optimizer over the event times.

pub mod event_time_sensitivity;
pub mod integration;
pub mod sensitivity_equations;
pub mod utils;
