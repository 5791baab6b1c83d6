use thiserror::Error;

/// A script validation failure.
///
/// Any error aborts execution and invalidates the spend; the variants exist
/// so callers can log *why* a script failed and tests can pin exact
/// failure modes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The final stack was empty or its top element was false.
    #[error("script evaluated without error but finished with a false stack element")]
    EvalFalse,
    /// `OP_RETURN` was executed.
    #[error("OP_RETURN was executed")]
    OpReturn,
    /// A serialized script exceeded the 10,000 byte limit.
    #[error("script is larger than the maximum script size")]
    ScriptSize,
    /// A pushed element exceeded the 520 byte limit.
    #[error("push exceeds the maximum element size")]
    PushSize,
    /// More than 201 non-push operations were executed.
    #[error("script exceeds the operation limit")]
    OpCount,
    /// The combined stack and altstack grew past 1,000 elements.
    #[error("stack exceeds the maximum stack size")]
    StackSize,
    /// A multisig key count was outside 0..=20.
    #[error("multisig public key count out of range")]
    PubKeyCount,
    /// A multisig signature count was outside 0..=key count.
    #[error("multisig signature count out of range")]
    SigCount,
    /// A push opcode ran past the end of the script.
    #[error("push data ran past the end of the script")]
    BadPushData,
    /// A disabled opcode appeared in the script.
    #[error("script contains a disabled opcode")]
    DisabledOpcode,
    /// An unknown or invalid opcode was executed.
    #[error("script contains an invalid opcode")]
    BadOpcode,
    /// An operation needed more stack elements than were present.
    #[error("operation requires more elements than the stack holds")]
    InvalidStackOperation,
    /// A conditional was left open at the end of the script, or `OP_ELSE` /
    /// `OP_ENDIF` appeared outside one.
    #[error("unbalanced conditional")]
    UnbalancedConditional,
    /// `OP_VERIFY`-style opcode saw a false value.
    #[error("verify operation failed")]
    VerifyFailed,
    /// A numeric operand was too large or not minimally encoded.
    #[error("numeric operand overflowed or was not minimally encoded")]
    NumericRange,
    /// A signature was not canonical strict-DER with a low S value.
    #[error("signature encoding is not canonical")]
    SignatureEncoding,
    /// A public key was not a parseable SEC encoding.
    #[error("public key encoding is invalid")]
    PubKeyEncoding,
    /// The `OP_CHECKMULTISIG` dummy element was not null.
    #[error("multisig dummy element is not null")]
    NullDummy,
    /// `OP_CHECKLOCKTIMEVERIFY` requirements were not met.
    #[error("locktime requirement not satisfied")]
    LocktimeNotSatisfied,
    /// `OP_CHECKSEQUENCEVERIFY` requirements were not met.
    #[error("sequence requirement not satisfied")]
    SequenceNotSatisfied,
    /// A witness program's structure did not match its advertised form.
    #[error("witness program mismatch")]
    WitnessProgramMismatch,
    /// The input index handed to `verify` is out of range for the spending
    /// transaction.
    #[error("input index out of range for the spending transaction")]
    InvalidInputIndex,
}
