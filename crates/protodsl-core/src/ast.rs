//! The typed AST a protocol is described by: one [`Protocol`] holding a
//! [`Client`](AgentKind::Client) and a [`Server`](AgentKind::Server)
//! [`Agent`], each an ordered map from state name to [`State`] (§3 Data
//! Model). Constructed once, immutable thereafter, and validated before
//! anything lowers it to [`crate::ir`] or interprets it directly.
//!
//! The textual lexer/parser that produces this AST from DSL source is out
//! of scope here; an AST arrives already built (typically deserialized from
//! JSON at the CLI boundary) and is validated with [`Protocol::validate`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::constants::{CLOSED_STATE, OPEN_STATE};
use crate::{Error, Result};

/// Which peer an [`Agent`] describes. Carried only for error messages and
/// generated-code naming; the AST itself does not branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    Client,
    Server,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Client => write!(f, "Client"),
            AgentKind::Server => write!(f, "Server"),
        }
    }
}

/// A field's declared type within a transition's MessageData (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Int { bits: u8, unsigned: bool },
    Str,
    Array(Box<Type>),
    Tuple(Vec<(String, Type)>),
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int { bits, unsigned } => {
                write!(f, "int<{bits}, {}>", if *unsigned { "unsigned" } else { "signed" })
            }
            Type::Str => write!(f, "str"),
            Type::Array(elem) => write!(f, "array<{elem}>"),
            Type::Tuple(fields) => {
                write!(f, "tuple<")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, ">")
            }
        }
    }
}

/// `{character, sequence}`: `character` is the in-memory byte(s) a wire
/// `sequence` stands in for (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscapeInfo {
    pub character: Bytes,
    pub sequence: Bytes,
}

/// One byte-level action within a transition's action list (§3, §4.1, §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    ReadStaticOctets(Bytes),
    WriteStaticOctets(Bytes),
    ReadOctetsUntilTerminator {
        terminator: Bytes,
        field: String,
        escape: Option<EscapeInfo>,
    },
    WriteFromIdentifier {
        field: String,
        escape: Option<EscapeInfo>,
    },
    Loop {
        variable: String,
        collection: String,
        terminator: Bytes,
        inner: Vec<Action>,
    },
}

impl Action {
    /// The identifier this action binds or reads, if any — used by
    /// invariant 5 (identifier/type compatibility) and invariant 6 (loop
    /// terminator collision).
    fn identifier(&self) -> Option<&str> {
        match self {
            Action::ReadOctetsUntilTerminator { field, .. } => Some(field),
            Action::WriteFromIdentifier { field, .. } => Some(field),
            Action::Loop { collection, .. } => Some(collection),
            Action::ReadStaticOctets(_) | Action::WriteStaticOctets(_) => None,
        }
    }
}

/// A field declared by a transition's MessageData (§3): name plus [`Type`].
pub type FieldDecl = (String, Type);

/// Actions consume bytes and bind a MessageData; the advancing transition
/// names the state this agent moves to on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadTransition {
    pub target_state: String,
    pub fields: Vec<FieldDecl>,
    pub actions: Vec<Action>,
}

/// Actions consume a handler-supplied MessageData and produce bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteTransition {
    pub target_state: String,
    pub fields: Vec<FieldDecl>,
    pub actions: Vec<Action>,
}

/// A transition is either a read or a write for the owning agent (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transition {
    Read(ReadTransition),
    Write(WriteTransition),
}

impl Transition {
    pub fn target_state(&self) -> &str {
        match self {
            Transition::Read(t) => &t.target_state,
            Transition::Write(t) => &t.target_state,
        }
    }

    pub fn fields(&self) -> &[FieldDecl] {
        match self {
            Transition::Read(t) => &t.fields,
            Transition::Write(t) => &t.fields,
        }
    }

    pub fn actions(&self) -> &[Action] {
        match self {
            Transition::Read(t) => &t.actions,
            Transition::Write(t) => &t.actions,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Transition::Read(_))
    }
}

/// A state: an ordered map from message name to `(Transition, target state
/// carried on the transition itself)` (§3). Message order is the order
/// transitions are declared, preserved for deterministic codegen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub transitions: Vec<(String, Transition)>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transition(mut self, message: impl Into<String>, transition: Transition) -> Self {
        self.transitions.push((message.into(), transition));
        self
    }

    pub fn get(&self, message: &str) -> Option<&Transition> {
        self.transitions.iter().find(|(m, _)| m == message).map(|(_, t)| t)
    }
}

/// An agent: an ordered map from state name to [`State`] (§3). Must declare
/// [`crate::constants::OPEN_STATE`] and may declare
/// [`crate::constants::CLOSED_STATE`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub states: Vec<(String, State)>,
}

impl Agent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, name: impl Into<String>, state: State) -> Self {
        self.states.push((name.into(), state));
        self
    }

    pub fn get(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.iter().any(|(n, _)| n == name)
    }
}

/// Root AST node: a Client agent and a Server agent over a shared set of
/// state names (§3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub client: Agent,
    pub server: Agent,
}

impl Protocol {
    pub fn new(client: Agent, server: Agent) -> Self {
        Self { client, server }
    }

    /// Runs invariants 1–6 from §3 against both agents. Returns the first
    /// violation found; callers that want every violation should call this
    /// repeatedly after fixing each one, or use [`Protocol::validate_all`].
    pub fn validate(&self) -> Result<()> {
        self.validate_all().into_iter().next().unwrap_or(Ok(()))
    }

    /// Runs every invariant check and collects all resulting errors instead
    /// of stopping at the first one, for tooling that wants a full report.
    pub fn validate_all(&self) -> Vec<Result<()>> {
        let mut results = Vec::new();
        for (kind, agent) in [(AgentKind::Client, &self.client), (AgentKind::Server, &self.server)] {
            validate_agent(kind, agent, &mut results);
        }
        results
    }
}

fn validate_agent(kind: AgentKind, agent: &Agent, out: &mut Vec<Result<()>>) {
    for (state_name, state) in &agent.states {
        let qualified = format!("{kind}::{state_name}");
        validate_dead_end(&qualified, state_name, state, out);
        validate_direction(&qualified, state, out);
        validate_targets(&qualified, agent, state, out);
        validate_duplicate_messages(&qualified, state, out);
        validate_identifiers(&qualified, state, out);
        validate_loop_terminators(&qualified, state, out);
    }
    validate_lookahead(kind, agent, out);
}

fn validate_dead_end(qualified: &str, state_name: &str, state: &State, out: &mut Vec<Result<()>>) {
    if state.transitions.is_empty() && state_name != CLOSED_STATE {
        out.push(Err(Error::UnreachableDeadEnd {
            state: qualified.to_string(),
        }));
    }
}

fn validate_direction(qualified: &str, state: &State, out: &mut Vec<Result<()>>) {
    let mut reads = 0;
    let mut writes = 0;
    for (_, t) in &state.transitions {
        if t.is_read() {
            reads += 1;
        } else {
            writes += 1;
        }
    }
    if reads > 0 && writes > 0 {
        out.push(Err(Error::MixedDirection {
            state: qualified.to_string(),
        }));
    }
}

fn validate_targets(qualified: &str, agent: &Agent, state: &State, out: &mut Vec<Result<()>>) {
    for (_, t) in &state.transitions {
        if !agent.has_state(t.target_state()) {
            out.push(Err(Error::UndefinedState {
                from_state: qualified.to_string(),
                target: t.target_state().to_string(),
            }));
        }
    }
}

fn validate_duplicate_messages(qualified: &str, state: &State, out: &mut Vec<Result<()>>) {
    let mut seen = std::collections::HashSet::new();
    for (message, _) in &state.transitions {
        if !seen.insert(message.as_str()) {
            out.push(Err(Error::DuplicateTransition {
                state: qualified.to_string(),
                message: message.clone(),
            }));
        }
    }
}

fn validate_identifiers(qualified: &str, state: &State, out: &mut Vec<Result<()>>) {
    for (_, t) in &state.transitions {
        let declared: std::collections::HashMap<&str, &Type> =
            t.fields().iter().map(|(n, ty)| (n.as_str(), ty)).collect();
        for action in t.actions() {
            check_action_identifiers(qualified, action, &declared, out);
        }
    }
}

fn check_action_identifiers(
    qualified: &str,
    action: &Action,
    declared: &std::collections::HashMap<&str, &Type>,
    out: &mut Vec<Result<()>>,
) {
    if let Some(id) = action.identifier() {
        match declared.get(id) {
            None => out.push(Err(Error::UndeclaredIdentifier {
                state: qualified.to_string(),
                identifier: id.to_string(),
            })),
            Some(ty) => {
                let compatible = match action {
                    Action::ReadOctetsUntilTerminator { .. } | Action::WriteFromIdentifier { .. } => {
                        matches!(ty, Type::Str | Type::Int { .. })
                    }
                    Action::Loop { .. } => matches!(ty, Type::Array(_)),
                    _ => true,
                };
                if !compatible {
                    out.push(Err(Error::IncompatibleFieldType {
                        identifier: id.to_string(),
                        declared_type: ty.to_string(),
                    }));
                }
            }
        }
    }
    if let Action::Loop { inner, .. } = action {
        for inner_action in inner {
            check_action_identifiers(qualified, inner_action, declared, out);
        }
    }
}

fn validate_loop_terminators(qualified: &str, state: &State, out: &mut Vec<Result<()>>) {
    for (_, t) in &state.transitions {
        for action in t.actions() {
            check_loop_terminator(qualified, action, out);
        }
    }
}

fn check_loop_terminator(qualified: &str, action: &Action, out: &mut Vec<Result<()>>) {
    if let Action::Loop {
        collection,
        terminator,
        inner,
        ..
    } = action
    {
        if let Some(first_literal) = inner.first().and_then(literal_prefix) {
            if first_literal.starts_with(terminator.as_ref()) || terminator.starts_with(first_literal.as_ref()) {
                out.push(Err(Error::AmbiguousLoopTerminator {
                    state: qualified.to_string(),
                    collection: collection.clone(),
                }));
            }
        }
        for inner_action in inner {
            check_loop_terminator(qualified, inner_action, out);
        }
    }
}

fn literal_prefix(action: &Action) -> Option<&Bytes> {
    match action {
        Action::ReadStaticOctets(b) | Action::WriteStaticOctets(b) => Some(b),
        _ => None,
    }
}

/// A transition's first action reduced to the minimal information the
/// runtime's lookahead dispatcher can use to pick between sibling read
/// transitions in one state (§4.3). `Scan` transitions (terminator search,
/// or a loop whose first inner action is itself a scan) carry no bounded
/// static signature.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LookaheadSignature {
    Literal(Bytes),
    Scan,
}

fn lookahead_signature(action: &Action) -> LookaheadSignature {
    match action {
        Action::ReadStaticOctets(lit) => LookaheadSignature::Literal(lit.clone()),
        Action::ReadOctetsUntilTerminator { .. } => LookaheadSignature::Scan,
        Action::Loop { terminator, inner, .. } => match inner.first() {
            Some(first) => lookahead_signature(first),
            None => LookaheadSignature::Literal(terminator.clone()),
        },
        Action::WriteStaticOctets(_) | Action::WriteFromIdentifier { .. } => LookaheadSignature::Scan,
    }
}

/// Invariant 4: every state with multiple outgoing reads must let the
/// runtime pick a transition from a bounded prefix of the input. We reject,
/// rather than guess, the two documented unresolvable shapes: two literal
/// signatures where one is a byte-prefix of the other, and more than one
/// signature that needs unbounded terminator scanning.
fn validate_lookahead(kind: AgentKind, agent: &Agent, out: &mut Vec<Result<()>>) {
    for (state_name, state) in &agent.states {
        let qualified = format!("{kind}::{state_name}");
        let reads: Vec<(&str, &Action)> = state
            .transitions
            .iter()
            .filter_map(|(name, t)| match t {
                Transition::Read(r) => r.actions.first().map(|a| (name.as_str(), a)),
                Transition::Write(_) => None,
            })
            .collect();
        if reads.len() < 2 {
            continue;
        }
        let signatures: Vec<(&str, LookaheadSignature)> = reads
            .iter()
            .map(|(name, action)| (*name, lookahead_signature(action)))
            .collect();
        let scan_count = signatures
            .iter()
            .filter(|(_, s)| *s == LookaheadSignature::Scan)
            .count();
        if scan_count > 1 {
            let scans: Vec<&str> = signatures
                .iter()
                .filter(|(_, s)| *s == LookaheadSignature::Scan)
                .map(|(n, _)| *n)
                .collect();
            out.push(Err(Error::IndistinguishableLookahead {
                state: qualified.clone(),
                first: scans[0].to_string(),
                second: scans[1].to_string(),
                reason: "both require unbounded terminator scanning".to_string(),
            }));
        }
        for i in 0..signatures.len() {
            for j in (i + 1)..signatures.len() {
                if let (LookaheadSignature::Literal(a), LookaheadSignature::Literal(b)) =
                    (&signatures[i].1, &signatures[j].1)
                {
                    if common_prefix_len(a, b) > 0 {
                        out.push(Err(Error::IndistinguishableLookahead {
                            state: qualified.clone(),
                            first: signatures[i].0.to_string(),
                            second: signatures[j].0.to_string(),
                            reason: "share a common byte prefix, so a short buffered prefix \
                                     cannot tell them apart"
                                .to_string(),
                        }));
                    }
                }
            }
        }
    }
}

/// How many leading bytes `a` and `b` have in common. The runtime's
/// dispatcher (`state_machine::select_read`) commits to a literal
/// transition as soon as the buffered bytes match *as much of the literal
/// as has arrived so far* — so any shared prefix, not just one literal
/// being a byte-prefix of the other, makes two sibling reads ambiguous.
fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Convenience constructor used throughout tests and demos: an [`Agent`]
/// whose `Open` state is the only state so far.
pub fn fresh_agent() -> Agent {
    Agent::new().with_state(OPEN_STATE, State::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lit(s: &str) -> Bytes {
        Bytes::from(s.as_bytes().to_vec())
    }

    #[test]
    fn valid_two_state_protocol_validates() {
        let client = Agent::new()
            .with_state(
                OPEN_STATE,
                State::new().with_transition(
                    "Hello",
                    Transition::Write(WriteTransition {
                        target_state: CLOSED_STATE.to_string(),
                        fields: vec![],
                        actions: vec![Action::WriteStaticOctets(lit("HELLO\r\n"))],
                    }),
                ),
            )
            .with_state(CLOSED_STATE, State::new());
        let server = Agent::new()
            .with_state(
                OPEN_STATE,
                State::new().with_transition(
                    "Hello",
                    Transition::Read(ReadTransition {
                        target_state: CLOSED_STATE.to_string(),
                        fields: vec![],
                        actions: vec![Action::ReadStaticOctets(lit("HELLO\r\n"))],
                    }),
                ),
            )
            .with_state(CLOSED_STATE, State::new());
        let protocol = Protocol::new(client, server);
        assert!(protocol.validate().is_ok());
    }

    #[test]
    fn undefined_target_state_is_rejected() {
        let client = Agent::new().with_state(
            OPEN_STATE,
            State::new().with_transition(
                "Hello",
                Transition::Write(WriteTransition {
                    target_state: "Nowhere".to_string(),
                    fields: vec![],
                    actions: vec![Action::WriteStaticOctets(lit("HI\r\n"))],
                }),
            ),
        );
        let protocol = Protocol::new(client, Agent::new().with_state(OPEN_STATE, State::new()));
        assert!(matches!(
            protocol.validate(),
            Err(Error::UndefinedState { .. })
        ));
    }

    #[test]
    fn mixed_direction_state_is_rejected() {
        let state = State::new()
            .with_transition(
                "Read1",
                Transition::Read(ReadTransition {
                    target_state: CLOSED_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit("A"))],
                }),
            )
            .with_transition(
                "Write1",
                Transition::Write(WriteTransition {
                    target_state: CLOSED_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::WriteStaticOctets(lit("B"))],
                }),
            );
        let client = Agent::new()
            .with_state(OPEN_STATE, state)
            .with_state(CLOSED_STATE, State::new());
        let protocol = Protocol::new(client, Agent::new().with_state(OPEN_STATE, State::new()));
        assert!(matches!(protocol.validate(), Err(Error::MixedDirection { .. })));
    }

    #[test]
    fn non_closed_dead_end_is_rejected() {
        let client = Agent::new()
            .with_state(OPEN_STATE, State::new())
            .with_state(CLOSED_STATE, State::new());
        let protocol = Protocol::new(client, Agent::new().with_state(OPEN_STATE, State::new()));
        assert!(matches!(
            protocol.validate(),
            Err(Error::UnreachableDeadEnd { .. })
        ));
    }

    #[test]
    fn undeclared_identifier_is_rejected() {
        let client = Agent::new().with_state(
            OPEN_STATE,
            State::new().with_transition(
                "Hello",
                Transition::Read(ReadTransition {
                    target_state: OPEN_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadOctetsUntilTerminator {
                        terminator: lit("\r\n"),
                        field: "domain".to_string(),
                        escape: None,
                    }],
                }),
            ),
        );
        let protocol = Protocol::new(client, Agent::new().with_state(OPEN_STATE, State::new()));
        assert!(matches!(
            protocol.validate(),
            Err(Error::UndeclaredIdentifier { .. })
        ));
    }

    #[rstest]
    #[case("HELO", "HELO_EXT", false)]
    #[case("HELO", "QUIT", true)]
    #[case("MAIL FROM:", "RCPT TO:", true)]
    #[case("HELO ", "HELP ", false)]
    fn lookahead_distinguishability_depends_on_shared_prefix(
        #[case] first: &str,
        #[case] second: &str,
        #[case] expect_ok: bool,
    ) {
        let state = State::new()
            .with_transition(
                "First",
                Transition::Read(ReadTransition {
                    target_state: OPEN_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit(first))],
                }),
            )
            .with_transition(
                "Second",
                Transition::Read(ReadTransition {
                    target_state: OPEN_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit(second))],
                }),
            );
        let client = Agent::new().with_state(OPEN_STATE, state);
        let protocol = Protocol::new(client, Agent::new().with_state(OPEN_STATE, State::new()));
        assert_eq!(protocol.validate().is_ok(), expect_ok);
    }

    #[test]
    fn loop_terminator_colliding_with_element_prefix_is_rejected() {
        let state = State::new().with_transition(
            "Recipients",
            Transition::Read(ReadTransition {
                target_state: OPEN_STATE.to_string(),
                fields: vec![("to".to_string(), Type::Array(Box::new(Type::Str)))],
                actions: vec![Action::Loop {
                    variable: "addr".to_string(),
                    collection: "to".to_string(),
                    terminator: lit("."),
                    inner: vec![Action::ReadStaticOctets(lit(".COM"))],
                }],
            }),
        );
        let client = Agent::new().with_state(OPEN_STATE, state);
        let protocol = Protocol::new(client, Agent::new().with_state(OPEN_STATE, State::new()));
        assert!(matches!(
            protocol.validate(),
            Err(Error::AmbiguousLoopTerminator { .. })
        ));
    }

    #[test]
    fn duplicate_transition_name_is_rejected() {
        let state = State::new()
            .with_transition(
                "Hello",
                Transition::Read(ReadTransition {
                    target_state: OPEN_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit("A"))],
                }),
            )
            .with_transition(
                "Hello",
                Transition::Read(ReadTransition {
                    target_state: OPEN_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit("B"))],
                }),
            );
        let client = Agent::new().with_state(OPEN_STATE, state);
        let protocol = Protocol::new(client, Agent::new().with_state(OPEN_STATE, State::new()));
        assert!(matches!(
            protocol.validate(),
            Err(Error::DuplicateTransition { .. })
        ));
    }
}
