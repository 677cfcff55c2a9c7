#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests.
//!
//! These tests verify that Cargo.toml keeps the lint policy, the feature
//! layout and the binary/library targets the project relies on. If any test
//! fails, the manifest has drifted from the agreed-upon layout.
//!
//! All checks are synchronous filesystem reads.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Reads and parses a TOML file relative to the project root.
fn read_toml(relative_path: &str) -> toml::Table {
    let path = project_root().join(relative_path);
    let text = std::fs::read_to_string(&path).unwrap_or_else(|e| {
        panic!("Failed to read '{}': {}", path.display(), e);
    });
    tokio_test::assert_ok!(text.parse::<toml::Table>())
}

fn manifest() -> toml::Table {
    read_toml("Cargo.toml")
}

fn string_array(value: &toml::Value) -> Vec<&str> {
    value
        .as_array()
        .expect("expected an array")
        .iter()
        .map(|v| v.as_str().expect("expected a string"))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: lint_policy
// ─────────────────────────────────────────────────────────────────────────────

mod lint_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_has_all_panic_free_lints() {
        let cargo = manifest();
        let clippy = cargo["lints"]["clippy"]
            .as_table()
            .expect("Cargo.toml is missing [lints.clippy]");

        for lint in REQUIRED_DENY_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(toml::Value::as_str),
                Some("deny"),
                "Cargo.toml must set `{lint} = \"deny\"` in [lints.clippy] to keep \
                 library code panic-free."
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: targets
// ─────────────────────────────────────────────────────────────────────────────

mod targets {
    use super::*;

    #[test]
    fn library_name_matches_crate_imports() {
        let cargo = manifest();
        assert_eq!(cargo["package"]["name"].as_str(), Some("watch-party-relay"));
        assert_eq!(cargo["lib"]["name"].as_str(), Some("watch_party_relay"));
    }

    #[test]
    fn binary_requires_server_feature() {
        let cargo = manifest();
        let bins = cargo["bin"].as_array().expect("[[bin]] entries");
        let relay = bins
            .iter()
            .find(|b| b["name"].as_str() == Some("watch-party-relay"))
            .expect("watch-party-relay binary");
        assert_eq!(relay["path"].as_str(), Some("src/main.rs"));
        assert_eq!(string_array(&relay["required-features"]), ["server"]);
    }

    #[test]
    fn demo_lives_outside_examples_dir() {
        let cargo = manifest();
        for example in cargo["example"].as_array().expect("[[example]] entries") {
            let path = example["path"].as_str().expect("example path");
            assert!(path.starts_with("demos/"), "unexpected example path {path}");
            assert!(
                project_root().join(path).is_file(),
                "example source {path} is missing"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: features
// ─────────────────────────────────────────────────────────────────────────────

mod features {
    use super::*;

    #[test]
    fn default_features_enable_server_and_websocket_client() {
        let cargo = manifest();
        let default = string_array(&cargo["features"]["default"]);
        assert!(default.contains(&"server"));
        assert!(default.contains(&"transport-websocket"));
    }

    #[test]
    fn server_only_dependencies_are_optional() {
        let cargo = manifest();
        let deps = cargo["dependencies"].as_table().expect("[dependencies]");
        for name in ["axum", "tower-http", "tracing-subscriber", "clap", "anyhow"] {
            let optional = deps[name]
                .get("optional")
                .and_then(toml::Value::as_bool)
                .unwrap_or(false);
            assert!(optional, "`{name}` must be optional behind the server feature");
        }

        let server = string_array(&cargo["features"]["server"]);
        for name in ["axum", "tower-http", "tracing-subscriber", "clap", "anyhow"] {
            let dep = format!("dep:{name}");
            assert!(server.contains(&dep.as_str()), "server feature misses {dep}");
        }
    }

    #[test]
    fn fuzz_crate_builds_without_default_features() {
        let fuzz = read_toml("fuzz/Cargo.toml");
        let relay = &fuzz["dependencies"]["watch-party-relay"];
        assert_eq!(relay["path"].as_str(), Some(".."));
        assert_eq!(relay["default-features"].as_bool(), Some(false));
    }
}
