//! Workspace-wide architectural rules

use architectural_enforcement::{find_violations, production_sources, workspace_root};

const CRATES: [&str; 2] = ["relay/core", "relay/daemon"];

#[test]
fn test_crates_have_sources() {
    for krate in CRATES {
        assert!(!production_sources(krate).is_empty(), "{krate} has no sources");
    }
}

#[test]
fn test_no_blocking_sleep_in_production_code() {
    for krate in CRATES {
        let violations = find_violations(krate, "thread::sleep");
        assert!(
            violations.is_empty(),
            "blocking sleep stalls the runtime:\n{}",
            violations.join("\n")
        );
    }
}

#[test]
fn test_no_println_in_production_code() {
    for krate in CRATES {
        for needle in ["println!", "eprintln!", "dbg!"] {
            let violations = find_violations(krate, needle);
            assert!(
                violations.is_empty(),
                "use tracing instead of {needle}:\n{}",
                violations.join("\n")
            );
        }
    }
}

#[test]
fn test_core_does_not_depend_on_http_server() {
    let manifest = std::fs::read_to_string(workspace_root().join("relay/core/Cargo.toml"))
        .expect("core manifest");
    for forbidden in ["axum", "tower-http", "hyper"] {
        assert!(
            !manifest.lines().any(|l| l.trim_start().starts_with(forbidden)),
            "relay-core must not depend on {forbidden}"
        );
    }
}

#[test]
fn test_broker_lock_is_not_std_mutex() {
    let violations = find_violations("relay/core", "std::sync::Mutex");
    assert!(
        violations.is_empty(),
        "use parking_lot for the broker lock:\n{}",
        violations.join("\n")
    );
}
