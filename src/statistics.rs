use crate::floating_type_mod::FT;
use std::collections::BTreeMap;

/// Keys of the per-step run statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatsId {
    RunTime,
    Timestep,
    /// Which criterion limited the step.
    TimestepCriterion,
    /// Quantity and particle that dominated the derivative criterion.
    LimitingQuantity,
    LimitingParticle,
    NeighbourCount,
    CollisionCount,
    MergerCount,
    OverlapCount,
    BounceCount,
    SolverIterations,
    IntegratorRejections,
    StepWallclockMs,
    ParticleCount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MinMaxMean {
    pub min: FT,
    pub max: FT,
    sum: FT,
    count: usize,
}

impl MinMaxMean {
    pub fn new() -> Self {
        MinMaxMean {
            min: FT::INFINITY,
            max: FT::NEG_INFINITY,
            sum: 0.,
            count: 0,
        }
    }

    pub fn accumulate(&mut self, x: FT) {
        self.min = FT::min(self.min, x);
        self.max = FT::max(self.max, x);
        self.sum += x;
        self.count += 1;
    }

    pub fn mean(&self) -> FT {
        if self.count == 0 {
            0.
        } else {
            self.sum / self.count as FT
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsValue {
    Int(i64),
    Float(FT),
    Text(String),
    Means(MinMaxMean),
}

/// Typed bag of run statistics, reset and refilled every step; the means
/// entries aggregate over particles.
#[derive(Debug, Default, Clone)]
pub struct Statistics {
    entries: BTreeMap<StatsId, StatsValue>,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics::default()
    }

    pub fn set_int(&mut self, id: StatsId, value: i64) {
        self.entries.insert(id, StatsValue::Int(value));
    }

    pub fn set_float(&mut self, id: StatsId, value: FT) {
        self.entries.insert(id, StatsValue::Float(value));
    }

    pub fn set_text(&mut self, id: StatsId, value: impl Into<String>) {
        self.entries.insert(id, StatsValue::Text(value.into()));
    }

    pub fn increment(&mut self, id: StatsId, delta: i64) {
        match self.entries.get_mut(&id) {
            Some(StatsValue::Int(value)) => *value += delta,
            _ => {
                self.entries.insert(id, StatsValue::Int(delta));
            }
        }
    }

    pub fn accumulate(&mut self, id: StatsId, x: FT) {
        match self.entries.get_mut(&id) {
            Some(StatsValue::Means(means)) => means.accumulate(x),
            _ => {
                let mut means = MinMaxMean::new();
                means.accumulate(x);
                self.entries.insert(id, StatsValue::Means(means));
            }
        }
    }

    pub fn get(&self, id: StatsId) -> Option<&StatsValue> {
        self.entries.get(&id)
    }

    pub fn get_int(&self, id: StatsId) -> i64 {
        match self.entries.get(&id) {
            Some(StatsValue::Int(value)) => *value,
            _ => 0,
        }
    }

    pub fn get_float(&self, id: StatsId) -> Option<FT> {
        match self.entries.get(&id) {
            Some(StatsValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (StatsId, &StatsValue)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }
}
