//! Emits the `State` enum, the `Protocol` AST re-construction function, and
//! the thin `ClientStateMachine`/`ServerStateMachine` wrappers that bake a
//! compiled agent into a configured [`protodsl_runtime::state_machine::StateMachine`]
//! (§6.2: "Per-state Input/Output unions", "ClientStateMachine/ServerStateMachine").

use std::fmt::Write as _;

use protodsl_core::ast::{Action, Agent, AgentKind, Protocol, Transition, Type};

use crate::naming::{byte_string_literal, pascal_case, sanitize_ident};

/// Every distinct state name declared by either agent, in first-seen order.
fn collect_state_names(protocol: &Protocol) -> Vec<String> {
    let mut names = Vec::new();
    for agent in [&protocol.client, &protocol.server] {
        for (name, _) in &agent.states {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

pub fn emit_state_enum(protocol: &Protocol) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("/// Every state declared by this protocol's client or server agent.\n");
    out.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]\n");
    out.push_str("pub enum State {\n");
    for name in collect_state_names(protocol) {
        let _ = writeln!(out, "    {},", sanitize_ident(pascal_case(&name)));
    }
    out.push_str("}\n\n");

    out.push_str("impl State {\n");
    out.push_str("    pub fn as_str(&self) -> &'static str {\n");
    out.push_str("        match self {\n");
    for name in collect_state_names(protocol) {
        let _ = writeln!(
            out,
            "            State::{} => \"{}\",",
            sanitize_ident(pascal_case(&name)),
            name
        );
    }
    out.push_str("        }\n    }\n}\n\n");
    out
}

fn emit_bytes_literal(bytes: &bytes::Bytes) -> String {
    format!("bytes::Bytes::from_static({})", byte_string_literal(bytes))
}

fn emit_action(action: &Action, indent: &str) -> String {
    match action {
        Action::ReadStaticOctets(lit) => {
            format!("{indent}Action::ReadStaticOctets({})", emit_bytes_literal(lit))
        }
        Action::WriteStaticOctets(lit) => {
            format!("{indent}Action::WriteStaticOctets({})", emit_bytes_literal(lit))
        }
        Action::ReadOctetsUntilTerminator {
            terminator,
            field,
            escape,
        } => format!(
            "{indent}Action::ReadOctetsUntilTerminator {{ terminator: {}, field: \"{field}\".to_string(), escape: {} }}",
            emit_bytes_literal(terminator),
            emit_escape(escape),
        ),
        Action::WriteFromIdentifier { field, escape } => format!(
            "{indent}Action::WriteFromIdentifier {{ field: \"{field}\".to_string(), escape: {} }}",
            emit_escape(escape),
        ),
        Action::Loop {
            variable,
            collection,
            terminator,
            inner,
        } => {
            let inner_indent = format!("{indent}    ");
            let inner_actions = inner
                .iter()
                .map(|a| emit_action(a, &inner_indent))
                .collect::<Vec<_>>()
                .join(",\n");
            format!(
                "{indent}Action::Loop {{ variable: \"{variable}\".to_string(), collection: \"{collection}\".to_string(), terminator: {}, inner: vec![\n{inner_actions},\n{indent}] }}",
                emit_bytes_literal(terminator),
            )
        }
    }
}

fn emit_escape(escape: &Option<protodsl_core::ast::EscapeInfo>) -> String {
    match escape {
        None => "None".to_string(),
        Some(e) => format!(
            "Some(EscapeInfo {{ character: {}, sequence: {} }})",
            emit_bytes_literal(&e.character),
            emit_bytes_literal(&e.sequence)
        ),
    }
}

fn emit_type(ty: &Type) -> String {
    match ty {
        Type::Int { bits, unsigned } => format!("Type::Int {{ bits: {bits}, unsigned: {unsigned} }}"),
        Type::Str => "Type::Str".to_string(),
        Type::Array(elem) => format!("Type::Array(Box::new({}))", emit_type(elem)),
        Type::Tuple(fields) => {
            let entries = fields
                .iter()
                .map(|(n, t)| format!("(\"{n}\".to_string(), {})", emit_type(t)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Type::Tuple(vec![{entries}])")
        }
    }
}

fn emit_fields(fields: &[(String, Type)]) -> String {
    let entries = fields
        .iter()
        .map(|(n, t)| format!("(\"{n}\".to_string(), {})", emit_type(t)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("vec![{entries}]")
}

fn emit_transition(transition: &Transition) -> String {
    match transition {
        Transition::Read(t) => {
            let actions = t
                .actions
                .iter()
                .map(|a| emit_action(a, "                "))
                .collect::<Vec<_>>()
                .join(",\n");
            format!(
                "Transition::Read(ReadTransition {{\n            target_state: \"{}\".to_string(),\n            fields: {},\n            actions: vec![\n{}\n            ],\n        }})",
                t.target_state,
                emit_fields(&t.fields),
                actions
            )
        }
        Transition::Write(t) => {
            let actions = t
                .actions
                .iter()
                .map(|a| emit_action(a, "                "))
                .collect::<Vec<_>>()
                .join(",\n");
            format!(
                "Transition::Write(WriteTransition {{\n            target_state: \"{}\".to_string(),\n            fields: {},\n            actions: vec![\n{}\n            ],\n        }})",
                t.target_state,
                emit_fields(&t.fields),
                actions
            )
        }
    }
}

fn emit_agent(agent: &Agent) -> String {
    let mut out = String::from("Agent::new()");
    for (name, state) in &agent.states {
        let _ = write!(out, "\n        .with_state(\"{name}\", State::new()");
        for (message, transition) in &state.transitions {
            let _ = write!(
                out,
                "\n            .with_transition(\"{message}\", {})",
                emit_transition(transition)
            );
        }
        out.push(')');
    }
    out
}

/// Emits `pub fn protocol() -> protodsl_core::ast::Protocol`, reconstructing
/// the exact AST this codegen run validated, via the same builder calls
/// `protodsl_core::ast` exposes to hand-written fixtures.
pub fn emit_protocol_constructor(protocol: &Protocol) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("use protodsl_core::ast::{Action, Agent, EscapeInfo, Protocol, ReadTransition, State, Transition, Type, WriteTransition};\n\n");
    out.push_str("/// Rebuilds the exact protocol AST this module was generated from.\n");
    out.push_str("pub fn protocol() -> Protocol {\n");
    let _ = writeln!(out, "    let client = {};", emit_agent(&protocol.client));
    let _ = writeln!(out, "    let server = {};", emit_agent(&protocol.server));
    out.push_str("    Protocol::new(client, server)\n");
    out.push_str("}\n\n");
    out
}

/// Emits `ClientStateMachine`/`ServerStateMachine`, thin wrappers compiling
/// their half of [`protocol()`] once at construction.
pub fn emit_state_machines() -> String {
    let mut out = String::with_capacity(2048);
    for (kind, wrapper, agent_accessor) in [
        (AgentKind::Client, "ClientStateMachine", "crate::protocol::protocol().client"),
        (AgentKind::Server, "ServerStateMachine", "crate::protocol::protocol().server"),
    ] {
        let _ = writeln!(
            out,
            "/// {kind} side of this protocol, compiled once and driven per connection."
        );
        out.push_str("#[derive(Debug)]\n");
        let _ = writeln!(out, "pub struct {wrapper}(protodsl_runtime::state_machine::StateMachine);\n");
        let _ = writeln!(out, "impl {wrapper} {{");
        out.push_str("    pub fn new() -> Self {\n");
        let _ = writeln!(
            out,
            "        let compiled = std::sync::Arc::new(protodsl_runtime::state_machine::compile(&{agent_accessor}).expect(\"protocol AST already validated at generation time\"));"
        );
        out.push_str(
            "        Self(protodsl_runtime::state_machine::StateMachine::new(compiled, protodsl_core::constants::OPEN_STATE))\n",
        );
        out.push_str("    }\n\n");
        out.push_str("    pub fn current_state(&self) -> &str {\n        self.0.current_state()\n    }\n\n");
        out.push_str(
            "    pub fn feed(&mut self, bytes: &[u8]) -> protodsl_core::Result<Vec<(String, protodsl_core::message_data::MessageData)>> {\n        self.0.feed(bytes)\n    }\n\n",
        );
        out.push_str(
            "    pub fn write(&mut self, message: &str, data: &protodsl_core::message_data::MessageData) -> protodsl_core::Result<bytes::Bytes> {\n        self.0.write(message, data)\n    }\n\n",
        );
        out.push_str("    pub fn writable_messages(&self) -> Vec<String> {\n        self.0.writable_messages()\n    }\n\n");
        out.push_str("    pub fn readable_messages(&self) -> Vec<String> {\n        self.0.readable_messages()\n    }\n\n");
        out.push_str(
            "    pub fn ready_to_evaluate(&self, buffer: &[u8]) -> bool {\n        self.0.ready_to_evaluate(buffer)\n    }\n\n",
        );
        out.push_str("    pub fn on_eof(&mut self) -> protodsl_core::Result<()> {\n        self.0.on_eof()\n    }\n\n");
        out.push_str("    pub fn is_closed(&self) -> bool {\n        self.0.is_closed()\n    }\n");
        out.push_str("}\n\n");
        let _ = writeln!(out, "impl Default for {wrapper} {{\n    fn default() -> Self {{\n        Self::new()\n    }}\n}}\n");
    }
    out
}
