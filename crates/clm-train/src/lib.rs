//! Batched training over the compositional scoring engine: gradient
//! accumulation with corrupted-sentence containment, SGD and AdaGrad
//! parameter updates, and the epoch loop.

pub mod accumulator;
pub mod error;
pub mod optim;
pub mod trainer;

pub use accumulator::GradientAccumulator;
pub use error::{TrainError, TrainResult};
pub use optim::{Optimizer, OptimizerKind};
pub use trainer::{EpochStats, FitReport, TrainConfig, Trainer};
