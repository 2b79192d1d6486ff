pub mod event_segments;
pub mod integrator;
pub mod ode_base;
pub mod system_event_handler;
