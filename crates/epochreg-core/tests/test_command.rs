#![cfg(unix)]

use std::fs;
use std::path::Path;

use epochreg_core::collab::{
    BackPropagator, Combiner, CommandBackend, DetectionParams, PropagationOutcome,
    PropagationRequest, Registrar, ToolCommand,
};
use epochreg_core::error::EpochRegError;

/// A backend running `sh -c script`; the operation name arrives as `$0`.
fn shell(script: &str) -> CommandBackend {
    CommandBackend::new(ToolCommand {
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
    })
}

fn propagation(workdir: &Path) -> PropagationRequest {
    PropagationRequest {
        workdir: workdir.to_path_buf(),
        source: workdir.join("sn_f125w_e01_12099_A1_nat_drz_sci.fits"),
        targets: vec![workdir.join("ib1a01aaq_flt.fits")],
        old_wcs_name: Some("INTRAVIS".into()),
        wcs_name: "SN_REFIM".into(),
        force: true,
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[test]
fn test_json_response_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let backend = shell(r#"cat >/dev/null; echo '{"outcome":"key_collision","existing":"SN_REFIM"}'"#);

    let outcome = backend.propagate(&propagation(dir.path())).unwrap();
    assert_eq!(
        outcome,
        PropagationOutcome::KeyCollision {
            existing: "SN_REFIM".into()
        }
    );
}

#[test]
fn test_request_on_stdin_and_empty_response() {
    let dir = tempfile::tempdir().unwrap();
    let backend = shell("cat > request.json");

    backend
        .clean_hot_pixels(dir.path(), Path::new("a_flt.fits"), Path::new("b_flt.fits"))
        .unwrap();

    let request: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("request.json")).unwrap())
            .unwrap();
    assert_eq!(request["first"], "a_flt.fits");
    assert_eq!(request["second"], "b_flt.fits");
}

#[test]
fn test_propagation_names_reach_the_tool() {
    let dir = tempfile::tempdir().unwrap();
    let backend = shell(r#"cat > request.json; echo '{"outcome":"applied"}'"#);

    let outcome = backend.propagate(&propagation(dir.path())).unwrap();
    assert_eq!(outcome, PropagationOutcome::Applied);

    let request: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("request.json")).unwrap())
            .unwrap();
    assert_eq!(request["old_wcs_name"], "INTRAVIS");
    assert_eq!(request["wcs_name"], "SN_REFIM");
    assert_eq!(request["force"], true);
}

#[test]
fn test_operation_name_and_workdir_relative_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let backend = shell(r#"cat >/dev/null; printf '{"catalog":"%s.cat"}' "$0""#);
    let detection = DetectionParams {
        threshold: 5.0,
        peak_min: None,
        peak_max: None,
        nbright: None,
    };

    let catalog = backend
        .source_catalog(dir.path(), Path::new("refim.fits"), &detection)
        .unwrap();
    assert_eq!(catalog, dir.path().join("source-catalog.cat"));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_nonzero_exit_is_collaborator_error() {
    let dir = tempfile::tempdir().unwrap();
    let backend = shell("cat >/dev/null; echo boom >&2; exit 3");

    match backend.propagate(&propagation(dir.path())) {
        Err(err @ EpochRegError::Collaborator { .. }) => {
            let message = err.to_string();
            assert!(message.starts_with("propagate failed"), "{message}");
            assert!(message.contains("boom"), "{message}");
            assert!(!err.is_unit_local());
        }
        other => panic!("expected a collaborator error, got {other:?}"),
    }
}

#[test]
fn test_malformed_response() {
    let dir = tempfile::tempdir().unwrap();
    let backend = shell("cat >/dev/null; echo not-json");

    match backend.propagate(&propagation(dir.path())) {
        Err(EpochRegError::Collaborator { message, .. }) => {
            assert!(message.contains("malformed"), "{message}")
        }
        other => panic!("expected a collaborator error, got {other:?}"),
    }
}

#[test]
fn test_missing_program() {
    let dir = tempfile::tempdir().unwrap();
    let backend = CommandBackend::new(ToolCommand {
        program: "epochreg-no-such-tool".into(),
        args: Vec::new(),
    });

    match backend.propagate(&propagation(dir.path())) {
        Err(EpochRegError::Collaborator { message, .. }) => {
            assert!(message.contains("cannot start"), "{message}")
        }
        other => panic!("expected a collaborator error, got {other:?}"),
    }
}
