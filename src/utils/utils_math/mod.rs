pub mod finite;
pub mod interpolation;
pub mod interval;
