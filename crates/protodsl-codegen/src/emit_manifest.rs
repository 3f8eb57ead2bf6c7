//! Emits the Cargo.toml fragment for a generated protocol crate (§6.2: "the
//! 'build manifest' is a generated `Cargo.toml` fragment... the concept is
//! unchanged, only the target-language packaging vocabulary"). The caller
//! decides where this crate lives relative to `protodsl-core`/`protodsl-runtime`
//! in the workspace; this only fills in the dependency table and package name.

use std::fmt::Write as _;

/// `package_name` becomes the generated crate's `[package] name`;
/// `core_path`/`runtime_path` are the relative paths the generated crate's
/// Cargo.toml should use to reach `protodsl-core`/`protodsl-runtime` from
/// wherever it's written (typically `../protodsl-core`, `../protodsl-runtime`
/// when dropped alongside the rest of the workspace).
pub fn emit_manifest(package_name: &str, core_path: &str, runtime_path: &str) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("# Generated by protodsl-codegen. Do not edit by hand; regenerate from the\n");
    out.push_str("# source protocol AST instead.\n");
    out.push_str("[package]\n");
    let _ = writeln!(out, "name = \"{package_name}\"");
    out.push_str("version = \"0.1.0\"\n");
    out.push_str("edition = \"2021\"\n\n");
    out.push_str("[lib]\n");
    out.push_str("path = \"src/lib.rs\"\n\n");
    out.push_str("[dependencies]\n");
    let _ = writeln!(out, "protodsl-core = {{ path = \"{core_path}\" }}");
    let _ = writeln!(out, "protodsl-runtime = {{ path = \"{runtime_path}\" }}");
    out.push_str("bytes = \"1\"\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_package_name_and_dependency_paths() {
        let out = emit_manifest("smtp_protocol", "../protodsl-core", "../protodsl-runtime");
        assert!(out.contains("name = \"smtp_protocol\""));
        assert!(out.contains("protodsl-core = { path = \"../protodsl-core\" }"));
        assert!(out.contains("protodsl-runtime = { path = \"../protodsl-runtime\" }"));
    }
}
