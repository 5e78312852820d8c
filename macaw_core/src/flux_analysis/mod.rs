//! Flux analyses run on top of a model's linear problem
pub mod fva;
pub mod sampling;
