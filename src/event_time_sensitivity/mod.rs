pub mod data_collector;
pub mod derivative_assembler;
pub mod equivalent_system;
pub mod event_time_sensitivity_module;
pub mod numerical_stability;
pub mod settings;
