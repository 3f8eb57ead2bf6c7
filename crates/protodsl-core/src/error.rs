use thiserror::Error;

/// Errors produced by every stage of the toolchain: AST validation, IR
/// lowering, code generation, and the sans-I/O runtime's protocol-level
/// failures (§7 of the design: the interpreter's own runtime errors live in
/// `protodsl-vm` as [`RuntimeError`](crate) is not re-exported there to avoid
/// a dependency cycle — see that crate's `RuntimeError`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A transition names a target state that no `state` block declares.
    #[error("state '{from_state}' has a transition to undefined state '{target}'")]
    UndefinedState { from_state: String, target: String },

    /// A single state mixes read and write outgoing transitions for one agent.
    #[error("state '{state}' mixes read and write transitions (direction invariant violated)")]
    MixedDirection { state: String },

    /// Every state but `Closed` must have at least one outgoing transition.
    #[error("state '{state}' has no outgoing transitions and is not 'Closed'")]
    UnreachableDeadEnd { state: String },

    /// An action references a field name absent from the transition's declared MessageData.
    #[error("identifier '{identifier}' used in state '{state}' is not declared in this transition's fields")]
    UndeclaredIdentifier { state: String, identifier: String },

    /// An identifier is used with an action incompatible with its declared type.
    #[error("identifier '{identifier}' has type {declared_type} incompatible with this action")]
    IncompatibleFieldType {
        identifier: String,
        declared_type: String,
    },

    /// Two or more outgoing read transitions in one state cannot be told apart
    /// within a bounded prefix (identical static first-action prefixes, or an
    /// otherwise ambiguous lookahead set). See Design Notes open question on
    /// tie-breaking; this implementation rejects rather than guesses.
    #[error(
        "state '{state}' has indistinguishable read transitions '{first}' and '{second}': {reason}"
    )]
    IndistinguishableLookahead {
        state: String,
        first: String,
        second: String,
        reason: String,
    },

    /// A loop's terminator is a prefix of its own element grammar's first output,
    /// so the loop could never terminate or could misparse an element as the terminator.
    #[error("loop over '{collection}' in state '{state}' has a terminator that collides with its element prefix")]
    AmbiguousLoopTerminator { state: String, collection: String },

    /// Two transitions in the same state declare the same message name.
    #[error("state '{state}' declares the message '{message}' more than once")]
    DuplicateTransition { state: String, message: String },

    /// Parsed bytes matched no valid transition for the agent's current state.
    #[error("protocol mismatch in state '{state}': {reason}")]
    ProtocolMismatch { state: String, reason: String },

    /// A numeric field's accumulated digits overflow its declared width.
    #[error("numeric field '{field}' overflowed while parsing: {digits}")]
    NumericOverflow { field: String, digits: String },

    /// A required field was absent from a MessageData value passed to a serializer.
    #[error("missing required field '{field}' for message '{message}'")]
    MissingField { message: String, field: String },

    /// The handler returned a message variant invalid from the agent's present state.
    #[error("handler returned '{returned}' which is not a valid write from state '{state}'")]
    HandlerError { state: String, returned: String },

    /// EOF arrived mid-message in a state whose only remaining action is not satisfied by EOF.
    #[error("unexpected EOF in state '{state}' while awaiting '{awaiting}'")]
    UnexpectedEof { state: String, awaiting: String },

    /// Generic I/O passthrough, surfaced at the CLI boundary (reading DSL/AST
    /// input files, writing generated output) — the sans-I/O core itself never
    /// produces this variant.
    #[error("I/O error: {0}")]
    Io(String),

    /// The `--input` file did not deserialize into a well-formed `Protocol` AST.
    #[error("malformed AST input: {0}")]
    MalformedAst(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
