use thiserror::Error;

/// Top-level error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// The constant pool cannot hold more than 65535 slots
    #[error("constant pool overflow adding {constant} (next index {index})")]
    ConstantPoolOverflow { constant: String, index: usize },

    /// A rewritten method body exceeded the 65535 byte limit of a `Code` attribute
    #[error("method `{name}{descriptor}` exceeds the maximum code size")]
    MethodCodeTooLarge { name: String, descriptor: String },

    /// Predecessors disagree about the frame at a join point
    #[error("inconsistent frames flowing into offset {offset}: {message}")]
    FrameInconsistency { offset: usize, message: String },

    /// A label was attached to two different places in a method body
    #[error("label {label} placed twice")]
    DuplicateLabel { label: String },

    /// A block promised to fall through to one label, but a different one was placed next
    #[error("previous block falls through to {expected}, but {found} was placed next")]
    WrongFallThrough { expected: String, found: String },

    /// A jump or exception handler references a label that was never placed
    #[error("jump or handler references label {label}, which was never placed")]
    UnplacedLabel { label: String },

    /// The last block of a method body has no terminating branch
    #[error("method body ends without a terminating branch")]
    FallsOffEnd,

    /// A class writer was finalized before it saw the class header
    #[error("class writer finished before a class header was received")]
    MissingClassHeader,

    /// Substitute methods that matched nothing in the target class
    #[error("substitutes matching no real method: {}", unmatched.join(", "))]
    UnmatchedSubstitutes { unmatched: Vec<String> },

    #[error(transparent)]
    Redefinition(#[from] RedefinitionError),

    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),

    /// Every constraint failure found at a verification checkpoint, reported together
    #[error("unmet invocation constraints: {}", render_violations(failures))]
    UnmetExpectations { failures: Vec<ConstraintViolation> },

    #[error("class bytes not found for `{class_name}`")]
    ClassNotFound { class_name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Structural problems found while decoding a classfile
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("bad magic number {found:#010x}")]
    BadMagic { found: u32 },

    #[error("unsupported classfile version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("classfile truncated at offset {offset} (wanted {wanted} more bytes)")]
    Truncated { offset: usize, wanted: usize },

    #[error("unknown constant tag {tag} at pool index {index}")]
    BadConstantTag { tag: u8, index: u16 },

    #[error("constant pool index {index} is {found}, expected {expected}")]
    BadConstantType {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },

    #[error("constant pool index {index} out of range")]
    BadConstantIndex { index: u16 },

    #[error("invalid modified UTF-8 in constant pool index {index}")]
    BadUtf8 { index: u16 },

    #[error("unknown opcode {opcode:#04x} at bytecode offset {offset}")]
    BadOpcode { opcode: u8, offset: usize },

    #[error("branch at offset {offset} targets offset {target}, which is not an instruction start")]
    BadBranchTarget { offset: usize, target: usize },

    #[error("attribute `{attribute}` has inconsistent length")]
    BadAttributeLength { attribute: String },

    #[error("unknown method handle kind {kind}")]
    BadHandleKind { kind: u8 },

    #[error("unknown stack map frame tag {tag}")]
    BadFrameTag { tag: u8 },

    #[error("unknown verification type tag {tag}")]
    BadVerificationTag { tag: u8 },

    #[error("{found} bytes left over after the last classfile section")]
    TrailingBytes { found: usize },
}

/// Malformed field or method descriptor
#[derive(Debug, Error)]
#[error("invalid descriptor `{0}`")]
pub struct DescriptorError(pub String);

/// Failures while installing or restoring modified classes
#[derive(Debug, Error)]
pub enum RedefinitionError {
    /// The runtime facility refused the new bytecode
    #[error("redefinition of `{class_name}` rejected: {reason}")]
    Rejected { class_name: String, reason: String },

    /// A rejection traced back to a class the runtime has not loaded yet
    #[error("redefinition of `{class_name}` requires `{dependency}`, which is not loaded")]
    MissingDependency {
        class_name: String,
        dependency: String,
    },

    #[error("`{class_name}` has no modified generation to restore")]
    NothingToRestore { class_name: String },
}

fn render_violations(failures: &[ConstraintViolation]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<String>>()
        .join("; ")
}

/// Invocation count constraint failures
#[derive(Debug, Error)]
pub enum ConstraintViolation {
    /// Raised at the violating call itself
    #[error("substitute `{substitute}` invoked {invocations} times, at most {maximum} allowed")]
    TooManyInvocations {
        substitute: String,
        maximum: usize,
        invocations: usize,
    },

    /// Raised at the verification checkpoint
    #[error("substitute `{substitute}` expected {expected} invocation(s), got {actual}")]
    MissingInvocations {
        substitute: String,
        expected: usize,
        actual: usize,
    },
}
