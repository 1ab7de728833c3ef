//! The compositional inside-outside scoring engine.
//!
//! A sentence is scored under a model that blends a fixed PCFG (consumed
//! as black-box probability tables, see `clm-grammar`) with a trainable
//! continuous composition function. The chart dynamic programs live in
//! [`scorer`], the hand-derived gradient passes in [`gradients`], and the
//! batched-execution primitive in [`parallel`]. [`lm::CompositionalLm`]
//! ties them together behind `score` / `score_with_gradients`.

pub mod error;
pub mod gradients;
pub mod lm;
pub mod model;
pub mod parallel;
pub mod params;
pub mod scorer;

pub use error::{ModelError, ModelResult};
pub use gradients::{
    compute_gradients, EmbeddingGradient, GradientClamp, GradientSet, LeafExpectations,
};
pub use lm::{CompositionalLm, LmConfig};
pub use model::CompositionModel;
pub use parallel::{BlockExecutor, Execution};
pub use params::Parameters;
pub use scorer::CompositionalScore;
