//! Structured error kinds for the four failure domains in §7: decoding,
//! lowering, verification, and pass execution. Modeled directly on the
//! teacher's `error::CodeGenError` (one `thiserror` derive per concern,
//! messages carrying the offending names) but split into one enum per
//! domain, since each has a distinct recovery policy (§4.9, §7).

use thiserror::Error;

/// Reported verbatim by the upstream `.abc` decoder; the core refuses the
/// function without attempting interpretation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("undecodable opcode 0x{raw:02x} at offset {offset}")]
    UndecodableOpcode { offset: u32, raw: u8 },
    #[error("truncated instruction stream at offset {offset}")]
    TruncatedStream { offset: u32 },
}

/// Raised while driving the accumulator lowering / bytecode → IR converter
/// (§4.6). A `LoweringError` aborts conversion of the whole function; no
/// partial IR is exposed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoweringError {
    #[error("unrecognized opcode at offset {offset}: {mnemonic}")]
    UnrecognizedOpcode { offset: u32, mnemonic: String },
    #[error("accumulator read with no prior definition at offset {offset}")]
    AccumulatorUnderflow { offset: u32 },
    #[error("branch at offset {from} targets offset {to}, which is not a block boundary")]
    BranchToMidInstruction { from: u32, to: u32 },
    #[error("block '{block}' was never sealed by end-of-stream; its PHI nodes could not be completed")]
    UnsealedBlockAtEnd { block: String },
    #[error("virtual register v{reg} is out of range (numVRegs = {num_vregs})")]
    VRegOutOfRange { reg: u16, num_vregs: u16 },
    #[error("{} error(s) while converting: {}", .0.len(), .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<LoweringError>),
}

/// A verifier failure naming the offending function/block/instruction (§7).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("function '{function}' has no basic blocks")]
    EmptyFunction { function: String },
    #[error("in function '{function}', block '{block}' instruction #{index}: missing terminator at end of block")]
    MissingTerminator { function: String, block: String, index: usize },
    #[error("in function '{function}', block '{block}' instruction #{index}: terminator is not the last instruction")]
    TerminatorNotLast { function: String, block: String, index: usize },
    #[error("in function '{function}', block '{block}': def-use/use-def mismatch for value referenced by instruction #{index}")]
    DanglingOperand { function: String, block: String, index: usize },
    #[error("in function '{function}', block '{block}': PHI arity {got} does not match predecessor count {expected}")]
    PhiArityMismatch { function: String, block: String, got: usize, expected: usize },
    #[error("in function '{function}', block '{block}': PHI incoming blocks are not a permutation of predecessors")]
    PhiIncomingMismatch { function: String, block: String },
    #[error("in function '{function}': successor/predecessor sets disagree between block '{a}' and block '{b}'")]
    CfgEdgeMismatch { function: String, a: String, b: String },
    #[error("in function '{function}': value defined more than once (SSA violation) for id {value_id}")]
    MultipleDefinitions { function: String, value_id: String },
}

/// Raised by a transform whose precondition was broken mid-run; includes
/// the pass name per §7. Transforms do not attempt partial recovery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PassError {
    #[error("pass '{pass}' failed: {reason}")]
    Failed { pass: String, reason: String },
    #[error("pass '{pass}' exceeded its fixed-point iteration budget ({max_iters})")]
    FixedPointDidNotConverge { pass: String, max_iters: usize },
}

/// Umbrella error for call sites that need to propagate any of the four
/// domains uniformly (the converter, principally, which can fail with a
/// `LoweringError` or a post-build `VerifyError`).
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Lowering(#[from] LoweringError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Pass(#[from] PassError),
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
pub type LoweringResult<T> = std::result::Result<T, LoweringError>;
pub type VerifyResult<T> = std::result::Result<T, VerifyError>;
pub type PassResult<T> = std::result::Result<T, PassError>;
pub type CoreResult<T> = std::result::Result<T, CoreError>;
