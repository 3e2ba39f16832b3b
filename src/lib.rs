//! SSA intermediate representation and optimization core for an ArkTS/Panda
//! bytecode (`.abc`) decompiler.
//!
//! The crate covers three things, leaves first: the SSA value graph and its
//! closed type/opcode vocabulary (§3-4.3), the IR builder and the
//! accumulator-lowering front end that turns single-accumulator,
//! virtual-register bytecode into SSA (§4.4-4.6), and the pass framework
//! with the portfolio of transforms that raises the IR toward source-level
//! JavaScript (§4.7-4.8). Reading, decoding, and pretty-printing `.abc`
//! files are out of scope; see `SPEC_FULL.md` / `DESIGN.md` for the
//! boundary and the grounding ledger.

pub mod builder;
pub mod converter;
pub mod dominance;
pub mod error;
pub mod function;
pub mod lowering;
pub mod module;
pub mod opcode;
pub mod pass;
pub mod passes;
pub mod textual;
pub mod types;
pub mod value;

pub use builder::{BuilderError, BuilderResult, IRBuilder};
pub use converter::{convert_method, BytecodeOp, DecodedInstruction, MethodRecord};
pub use dominance::{find_natural_loops, reverse_postorder, DominatorTree, Loop};
pub use error::{
    CoreError, CoreResult, DecodeError, DecodeResult, LoweringError, LoweringResult, PassError,
    PassResult, VerifyError, VerifyResult,
};
pub use function::{BasicBlock, Function, Instruction};
pub use lowering::AccumulatorLowering;
pub use module::{ConstantsMut, Module, ModuleView};
pub use opcode::{BinOp, CastOp, CmpOp, Opcode, UnOp};
pub use pass::{
    AnalysisPass, BasicBlockPass, FixedPoint, FunctionPass, LoopPass, ModulePass, PassManager,
    PassMeta, PassPipeline, PassStats, Success,
};
pub use textual::{parse_module, render_function, render_instruction, render_module, TextualError};
pub use types::Type;
pub use value::{Argument, BlockId, ConstId, Constant, GlobalId, GlobalValue, InstId, ValueId};
