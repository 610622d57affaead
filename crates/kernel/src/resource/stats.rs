//! Stats configuration.
//!
//! Each resource attribute gets a [`Stats`] builder naming the calculations a
//! request may ask for via `stats[attribute]=count,sum`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::scope::Aggregate;

/// Custom calculation over the filtered records and the attribute name.
pub type CustomStat = Arc<dyn Fn(&[Value], &str) -> Value + Send + Sync>;

/// A registered calculation.
#[derive(Clone)]
pub enum Calculation {
    /// Computed by the backing store.
    Builtin(Aggregate),
    /// Computed in memory from the filtered records.
    Custom(CustomStat),
}

impl fmt::Debug for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Calculation::Builtin(aggregate) => write!(f, "Builtin({})", aggregate.name()),
            Calculation::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Named calculations for one attribute.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    calculations: BTreeMap<String, Calculation>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(self) -> Self {
        self.builtin(Aggregate::Count)
    }

    pub fn sum(self) -> Self {
        self.builtin(Aggregate::Sum)
    }

    pub fn average(self) -> Self {
        self.builtin(Aggregate::Average)
    }

    pub fn maximum(self) -> Self {
        self.builtin(Aggregate::Maximum)
    }

    pub fn minimum(self) -> Self {
        self.builtin(Aggregate::Minimum)
    }

    pub fn custom(
        mut self,
        name: impl Into<String>,
        calculation: impl Fn(&[Value], &str) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.calculations
            .insert(name.into(), Calculation::Custom(Arc::new(calculation)));
        self
    }

    fn builtin(mut self, aggregate: Aggregate) -> Self {
        self.calculations
            .insert(aggregate.name().to_string(), Calculation::Builtin(aggregate));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Calculation> {
        self.calculations.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.calculations.keys().map(String::as_str)
    }
}
