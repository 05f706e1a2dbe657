//! Release build settings the worker pool depends on
//!
//! A panicking command is recorded as a failed result only when panics
//! unwind. The workspace release profile must not switch to abort.

use std::path::Path;

fn workspace_manifest() -> toml::Value {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("Cargo.toml");
    let content = std::fs::read_to_string(&path).unwrap();
    content.parse::<toml::Value>().unwrap()
}

#[test]
fn test_release_profile_unwinds_on_panic() {
    let manifest = workspace_manifest();
    let panic = manifest
        .get("profile")
        .and_then(|p| p.get("release"))
        .and_then(|r| r.get("panic"))
        .and_then(|v| v.as_str())
        .unwrap_or("unwind");
    assert_eq!(panic, "unwind");
}

#[test]
fn test_no_profile_aborts_on_panic() {
    let manifest = workspace_manifest();
    let Some(profiles) = manifest.get("profile").and_then(|p| p.as_table()) else {
        return;
    };
    for (name, profile) in profiles {
        let panic = profile.get("panic").and_then(|v| v.as_str());
        assert_ne!(panic, Some("abort"), "profile {} aborts on panic", name);
    }
}
