use invoice_pipeline::config::workflow::Workflow;
use invoice_pipeline::config::SkipCondition;
use invoice_pipeline::stage::StageKind;

fn shipped(name: &str) -> Workflow {
    let path = format!("{}/workflows/{}.toml", env!("CARGO_MANIFEST_DIR"), name);
    Workflow::from_file(&path).expect("Failed to load workflow")
}

#[test]
fn test_shipped_workflows_match_builtins() {
    for builtin in Workflow::builtins() {
        let loaded = shipped(builtin.name());

        assert_eq!(loaded.name(), builtin.name());
        assert_eq!(loaded.description(), builtin.description());
        assert_eq!(loaded.version(), Some("1.0.0"));
        assert_eq!(loaded.steps(), builtin.steps(), "steps of {}", builtin.name());
    }
}

#[test]
fn test_load_fast_track_workflow() {
    let workflow = shipped("fast_track");

    let steps = workflow.steps();
    assert_eq!(steps.len(), 6);
    assert_eq!(steps[2].stage(), StageKind::Validate);
    assert!(!steps[2].is_required());
    assert_eq!(
        steps[2].skip_condition(),
        Some(&SkipCondition::HighConfidence { threshold: 0.95 })
    );
    assert!(!steps[5].is_required());
}

#[test]
fn test_legacy_stage_names_are_accepted() {
    let workflow = shipped("compliance_only");

    let stages: Vec<StageKind> = workflow.steps().iter().map(|s| s.stage()).collect();
    assert_eq!(
        stages,
        vec![
            StageKind::Parse,
            StageKind::Extract,
            StageKind::Validate,
            StageKind::Comply,
            StageKind::Audit,
        ]
    );
    assert!(!workflow.contains(StageKind::Decide));
}

#[test]
fn test_workflow_roundtrip_with_real_file() {
    // Load workflow from file
    let original = shipped("fast_track");

    // Convert to string
    let toml_string = original.to_string().expect("Failed to serialize");

    // Parse back from string
    let restored = Workflow::from_toml(&toml_string).expect("Failed to parse");

    // Verify they match
    assert_eq!(restored, original);
}

#[test]
fn test_workflow_save_and_reload() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("detailed_review.toml");

    let original = shipped("detailed_review");
    original.to_file(&path).expect("Failed to save workflow");

    let reloaded = Workflow::from_file(&path).expect("Failed to reload workflow");
    assert_eq!(reloaded, original);
    assert!(reloaded.steps().iter().all(|s| s.is_required()));
}
