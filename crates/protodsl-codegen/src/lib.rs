//! Emits a thin Rust crate configuring [`protodsl_runtime`] for one
//! validated protocol AST (§6.2: "Generated code surface"). Rather than
//! hand-rolling a parser/serializer per message — which would duplicate
//! `protodsl-runtime`'s generic [`protodsl_runtime::parser::MessageParser`]/
//! [`protodsl_runtime::serializer`] machinery — this crate bakes the AST
//! itself back into Rust source and emits typed wrappers over
//! `protodsl_runtime::state_machine::StateMachine` that close over it.

pub mod emit_manifest;
pub mod emit_state;
pub mod emit_types;
pub mod naming;

use protodsl_core::ast::Protocol;
use protodsl_core::Result;

/// One generated crate: a set of `(relative path, file contents)` pairs
/// ready to be written under an output directory, plus the Cargo.toml
/// fragment for that crate's own manifest (kept separate from `files` so a
/// caller merging into an existing workspace member can place it directly
/// rather than overwrite an existing Cargo.toml wholesale).
#[derive(Debug, Clone)]
pub struct GeneratedOutput {
    pub files: Vec<(String, String)>,
    pub manifest: String,
}

/// Validates `protocol`, then emits `src/types.rs`, `src/protocol.rs`,
/// `src/state.rs`, `src/machines.rs`, an aggregating `src/lib.rs`, and a
/// Cargo.toml fragment for a crate named `package_name`.
///
/// `core_path`/`runtime_path` are the relative paths the generated crate's
/// Cargo.toml uses to depend on `protodsl-core`/`protodsl-runtime` — see
/// [`emit_manifest::emit_manifest`].
pub fn generate(
    protocol: &Protocol,
    package_name: &str,
    core_path: &str,
    runtime_path: &str,
) -> Result<GeneratedOutput> {
    protocol.validate()?;

    let types_rs = emit_types::emit_types(protocol);
    let protocol_rs = emit_state::emit_protocol_constructor(protocol);
    let state_rs = emit_state::emit_state_enum(protocol);
    let machines_rs = emit_state::emit_state_machines();

    let lib_rs = format!(
        "//! Generated by protodsl-codegen for the `{package_name}` protocol.\n//! Do not edit by hand; regenerate from the source protocol AST instead.\n\npub mod machines;\npub mod protocol;\npub mod state;\npub mod types;\n\npub use machines::{{ClientStateMachine, ServerStateMachine}};\npub use protocol::protocol;\npub use state::State;\n"
    );

    let manifest = emit_manifest::emit_manifest(package_name, core_path, runtime_path);

    Ok(GeneratedOutput {
        files: vec![
            ("src/lib.rs".to_string(), lib_rs),
            ("src/types.rs".to_string(), types_rs),
            ("src/protocol.rs".to_string(), protocol_rs),
            ("src/state.rs".to_string(), state_rs),
            ("src/machines.rs".to_string(), machines_rs),
        ],
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use protodsl_core::ast::{Action, Agent, ReadTransition, State, Transition, Type, WriteTransition};
    use protodsl_core::constants::{CLOSED_STATE, OPEN_STATE};
    use bytes::Bytes;

    fn lit(s: &str) -> Bytes {
        Bytes::from(s.as_bytes().to_vec())
    }

    fn sample_protocol() -> Protocol {
        let server = Agent::new()
            .with_state(
                OPEN_STATE,
                State::new().with_transition(
                    "Helo",
                    Transition::Read(ReadTransition {
                        target_state: CLOSED_STATE.to_string(),
                        fields: vec![("domain".to_string(), Type::Str)],
                        actions: vec![Action::ReadOctetsUntilTerminator {
                            terminator: lit("\r\n"),
                            field: "domain".to_string(),
                            escape: None,
                        }],
                    }),
                ),
            )
            .with_state(CLOSED_STATE, State::new());
        let client = Agent::new()
            .with_state(
                OPEN_STATE,
                State::new().with_transition(
                    "Ack",
                    Transition::Write(WriteTransition {
                        target_state: CLOSED_STATE.to_string(),
                        fields: vec![],
                        actions: vec![Action::WriteStaticOctets(lit("OK\r\n"))],
                    }),
                ),
            )
            .with_state(CLOSED_STATE, State::new());
        Protocol::new(client, server)
    }

    #[test]
    fn generates_every_expected_file() {
        let output = generate(&sample_protocol(), "smtp_demo", "../protodsl-core", "../protodsl-runtime").unwrap();
        let paths: Vec<&str> = output.files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "src/lib.rs",
                "src/types.rs",
                "src/protocol.rs",
                "src/state.rs",
                "src/machines.rs",
            ]
        );
        assert!(output.manifest.contains("name = \"smtp_demo\""));
    }

    #[test]
    fn rejects_invalid_protocol_before_emitting_anything() {
        let client = Agent::new().with_state(OPEN_STATE, State::new());
        let server = Agent::new()
            .with_state(OPEN_STATE, State::new())
            .with_state(CLOSED_STATE, State::new());
        let invalid = Protocol::new(client, server);
        assert!(generate(&invalid, "bad", "../protodsl-core", "../protodsl-runtime").is_err());
    }
}
