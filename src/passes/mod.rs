//! The transform library (§4.8): one module per pass, re-exported flat so
//! `PassPipeline::raising()` can name each by its bare type.

mod eval;

mod aggressive_dead_code_elimination;
mod algebraic_simplification;
mod branch_folding;
mod compound_assignment;
mod constant_coalescing;
mod constant_folding;
mod constant_propagation;
mod dead_code_elimination;
mod global_value_numbering;
mod loop_invariant_code_motion;
mod redundant_copy_elimination;
mod redundant_return_elimination;
mod simplify_cfg;
mod type_propagation;
mod variable_reconstruction;

pub use aggressive_dead_code_elimination::AggressiveDeadCodeElimination;
pub use algebraic_simplification::AlgebraicSimplification;
pub use branch_folding::BranchFolding;
pub use compound_assignment::CompoundAssignment;
pub use constant_coalescing::ConstantCoalescing;
pub use constant_folding::ConstantFolding;
pub use constant_propagation::ConstantPropagation;
pub use dead_code_elimination::DeadCodeElimination;
pub use global_value_numbering::GlobalValueNumbering;
pub use loop_invariant_code_motion::{AnalysisFlags, LoopInvariantCodeMotion};
pub use redundant_copy_elimination::RedundantCopyElimination;
pub use redundant_return_elimination::RedundantReturnElimination;
pub use simplify_cfg::SimplifyCfg;
pub use type_propagation::TypePropagation;
pub use variable_reconstruction::VariableReconstruction;
