//! Provides struct representing a variable in an optimization problem
use crate::configuration;
use derive_builder::Builder;

/// A continuous variable in an optimization problem
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(setter(into))]
pub struct Variable {
    /// Used to identify the variable
    pub id: String,
    /// Lowest value the variable can take, may be -inf
    #[builder(default = "configuration::current().lower_bound")]
    pub lower_bound: f64,
    /// Highest value the variable can take, may be +inf
    #[builder(default = "configuration::current().upper_bound")]
    pub upper_bound: f64,
    /// Position of the variable in the problem, set when the variable is added
    #[builder(default = "0")]
    pub(crate) index: usize,
}

impl Variable {
    /// Position of the variable in its problem
    pub fn index(&self) -> usize {
        self.index
    }
}
