pub mod config;
pub mod evolve;
pub mod gpu;
pub mod logging;
pub mod matrix;
pub mod network;
pub mod snake;

// Re-exports — the types most callers need at the crate root
pub use evolve::{
    CancelToken, EvalContext, Evaluation, EvaluationError, Evaluator, EvolutionConfig,
    EvolutionController, EvolveError, FitnessRecord, GenerationReport, Population,
};
pub use matrix::{CpuKernel, DotKernel, KernelSet, Matrix, MatrixError};
pub use network::{Network, NetworkError};
pub use snake::{SnakeConfig, SnakeEvaluator};
