//! Provides the linear objective of an optimization problem
use std::fmt::{Display, Formatter};

/// Linear objective, the sum of its terms is minimized or maximized
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Objective {
    /// Terms summed to form the objective
    pub terms: Vec<ObjectiveTerm>,
    /// Whether to minimize or maximize
    pub sense: ObjectiveSense,
}

impl Objective {
    /// Create an objective with no terms
    pub fn new(sense: ObjectiveSense) -> Self {
        Self {
            terms: Vec::new(),
            sense,
        }
    }

    pub fn set_sense(&mut self, sense: ObjectiveSense) {
        self.sense = sense;
    }

    pub fn add_term(&mut self, variable: usize, coefficient: f64) {
        self.terms.push(ObjectiveTerm {
            variable,
            coefficient,
        });
    }
}

/// A single linear objective term `coefficient * variable`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveTerm {
    /// Index of the variable in the problem
    pub variable: usize,
    pub coefficient: f64,
}

/// Direction of optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectiveSense {
    Minimize,
    #[default]
    Maximize,
}

impl ObjectiveSense {
    /// The opposite direction
    pub fn flipped(self) -> Self {
        match self {
            ObjectiveSense::Minimize => ObjectiveSense::Maximize,
            ObjectiveSense::Maximize => ObjectiveSense::Minimize,
        }
    }
}

impl Display for ObjectiveSense {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectiveSense::Minimize => write!(f, "min"),
            ObjectiveSense::Maximize => write!(f, "max"),
        }
    }
}
