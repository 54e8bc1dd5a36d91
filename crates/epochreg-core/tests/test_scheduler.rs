mod common;

use approx::assert_relative_eq;
use common::{config, two_epoch_exposures, workspace, ExposureSpec, FakeTools, ROOT};
use epochreg_core::collab::{AlignAnchor, CombineType};
use epochreg_core::consts::INTRAVISIT_WCS_NAME;
use epochreg_core::error::EpochRegError;
use epochreg_core::exposure::SkyCoord;
use epochreg_core::io::FitsImage;
use epochreg_core::pipeline::config::{CombinationPolicy, CrMode, StageSelection};
use epochreg_core::pipeline::{
    registered_combine_type, run_pipeline, stack_combine_type, Stage,
};

const REFIM_WCS: &str = "REFIM:sn_wcsref_drz_sci.fits";

// ---------------------------------------------------------------------------
// Full runs
// ---------------------------------------------------------------------------

#[test]
fn test_full_run_produces_every_product() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();

    let summary = run_pipeline(&config(&top), &tools.toolkit()).unwrap();

    assert_eq!(summary.failed_units(), 0);
    assert_eq!(summary.exposures, 4);
    assert_eq!(summary.epochs, vec![0, 1]);
    assert!(top.join("sn_epochs.txt").is_file());
    assert!(top.join("sn.e00/ib1a01aaq_flt.fits").is_file());
    assert!(top.join("sn.e01/ib1a02abq_flt.fits").is_file());
    assert!(top.join("sn.refim/sn_wcsref_drz_sci.fits").is_file());
    assert!(top.join("sn.e00/sn_f125w_e00_12099_A1_nat_drz_sci.fits").is_file());
    assert!(top.join("sn.e01/sn_f125w_e01_12099_B1_nat_drz_sci.fits").is_file());
    assert!(top.join("sn.e00/sn_f125w_e00_reg_drz_sci.fits").is_file());
    assert!(top.join("sn.e01/sn_f125w_e01_reg_drz_sci.fits").is_file());
    assert!(top.join("sn.e01/sn_f125w_e01-e00_sub_masked.fits").is_file());
    assert!(top.join("sn.e01/sn_f125w_e01-e00_sub_wht.fits").is_file());
    // Cleanup removes the unmasked subtraction.
    assert!(!top.join("sn.e01/sn_f125w_e01-e00_sub_sci.fits").exists());
    assert!(summary.report(Stage::Stack).is_none());
}

#[test]
fn test_registration_writes_solution_into_exposures() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    run_pipeline(&config(&top), &tools.toolkit()).unwrap();

    let staged = FitsImage::open(&top.join("sn.e01/ib1a02aaq_flt.fits")).unwrap();
    assert_eq!(staged.header.get_str("WCSNAME").as_deref(), Some(REFIM_WCS));
    let pristine = FitsImage::open(&top.join("sn.flt/ib1a02aaq_flt.fits")).unwrap();
    assert_eq!(pristine.header.get_str("WCSNAME"), None);

    let aligns = tools.aligns();
    assert_eq!(aligns.len(), 2);
    assert!(aligns
        .iter()
        .all(|a| matches!(a.anchor, AlignAnchor::Reference { .. })));
    assert!(aligns.iter().all(|a| a.workdir.is_absolute()));
}

#[test]
fn test_second_run_skips_every_unit() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let config = config(&top);
    run_pipeline(&config, &tools.toolkit()).unwrap();
    tools.clear();

    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    assert!(tools.calls().is_empty());
    for (stage, report) in &summary.stages {
        assert!(report.executed.is_empty(), "{stage} executed {:?}", report.executed);
        assert!(report.failed.is_empty(), "{stage} failed {:?}", report.failed);
    }
    assert_eq!(summary.report(Stage::Native).unwrap().skipped.len(), 2);
    assert_eq!(summary.report(Stage::Register).unwrap().skipped.len(), 2);
    assert_eq!(summary.report(Stage::Difference).unwrap().skipped.len(), 1);
}

#[test]
fn test_clobber_regenerates_selected_stage_only() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    run_pipeline(&config, &tools.toolkit()).unwrap();
    tools.clear();

    config.clobber = 1;
    config.stages = StageSelection {
        native: true,
        ..StageSelection::default()
    };
    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    let native = summary.report(Stage::Native).unwrap();
    assert_eq!(native.executed.len(), 2);
    let combines = tools.combines();
    assert_eq!(combines.len(), 2);
    assert!(combines.iter().all(|c| c.output_root.ends_with("_nat")));
    assert!(combines.iter().all(|c| c.options.clobber));
    assert!(top.join("sn.e00/sn_f125w_e00_reg_drz_sci.fits").is_file());
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

#[test]
fn test_two_visits_feed_one_registered_unit() {
    let (_dir, top) = workspace(&[
        ExposureSpec::uvis("ib1a01aaq", "F555W", 55000.0, "A1.001"),
        ExposureSpec::uvis("ib1a01abq", "F555W", 55000.1, "A1.002"),
        ExposureSpec::uvis("ib1a03aaq", "F555W", 55001.0, "A2.001"),
        ExposureSpec::uvis("ib1a03abq", "F555W", 55001.1, "A2.002"),
    ]);
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages.difference = false;

    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    assert_eq!(summary.report(Stage::Native).unwrap().executed.len(), 2);
    let registered: Vec<_> = tools
        .combines()
        .into_iter()
        .filter(|c| c.output_root.ends_with("_reg"))
        .collect();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].output_root, "sn_f555w_e00_reg");
    assert_eq!(registered[0].inputs.len(), 4);
}

#[test]
fn test_driz_combination_groups_member_filters() {
    let (_dir, top) = workspace(&[
        ExposureSpec::uvis("ib1a01aaq", "F555W", 55000.0, "A1.001"),
        ExposureSpec::uvis("ib1a01abq", "F814W", 55000.1, "A1.002"),
    ]);
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages.difference = false;
    config.combination = CombinationPolicy::Driz {
        name: "broad".into(),
        filters: vec!["f555w".into(), "f814w".into()],
    };

    run_pipeline(&config, &tools.toolkit()).unwrap();

    let roots: Vec<String> = tools.combines().into_iter().map(|c| c.output_root).collect();
    assert!(roots.contains(&"sn_f555w_e00_12099_A1_nat".to_string()));
    assert!(roots.contains(&"sn_f814w_e00_12099_A1_nat".to_string()));
    assert!(roots.contains(&"sn_broad_e00_reg".to_string()));
}

// ---------------------------------------------------------------------------
// Difference stage
// ---------------------------------------------------------------------------

#[test]
fn test_difference_without_template_is_reported_not_fatal() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.only_epochs = vec![1];

    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    let difference = summary.report(Stage::Difference).unwrap();
    assert!(difference.executed.is_empty());
    assert_eq!(difference.failed.len(), 1);
    assert_eq!(difference.failed[0].unit, "sn_f125w_e01-e00_sub");
    assert!(difference.failed[0]
        .reason
        .contains("sn_f125w_e00_reg_drz_sci.fits"));
    assert!(top.join("sn.e01/sn_f125w_e01_reg_drz_sci.fits").is_file());
}

#[test]
fn test_avg_combination_writes_composite() {
    let (_dir, top) = workspace(&[
        ExposureSpec::ir("ib1a01aaq", "F125W", 55000.0, "A1.001"),
        ExposureSpec::ir("ib1a01abq", "F160W", 55000.1, "A1.002"),
        ExposureSpec::ir("ib1a02aaq", "F125W", 55020.0, "B1.001"),
        ExposureSpec::ir("ib1a02abq", "F160W", 55020.1, "B1.002"),
    ]);
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.combination = CombinationPolicy::Avg {
        name: "ir".into(),
        filters: vec!["f125w".into(), "f160w".into()],
    };

    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    let composite = top.join("sn.e01/sn_ir_e01-e00_sub_masked.fits");
    assert_eq!(summary.composites, vec![composite.clone()]);
    assert!(composite.is_file());

    // Each difference weight is 1/(1/1 + 1/1); the composite sums them.
    let weight = FitsImage::open(&top.join("sn.e01/sn_ir_e01-e00_sub_wht.fits")).unwrap();
    assert_relative_eq!(weight.data[[0, 0]], 1.0, epsilon = 1e-6);
    let difference = summary.report(Stage::Difference).unwrap();
    assert_eq!(difference.executed.len(), 3);
}

#[test]
fn test_single_subtractions_cover_each_exposure() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.difference.single_subtractions = true;

    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    assert!(tools
        .combines()
        .iter()
        .filter(|c| c.output_root.ends_with("_reg"))
        .all(|c| c.options.single_products));
    let difference = summary.report(Stage::Difference).unwrap();
    assert_eq!(difference.executed.len(), 3);
    assert!(top
        .join("sn.e01/sn_f125w_e01-e00_ib1a02aaq_single_sub_masked.fits")
        .is_file());
}

#[test]
fn test_template_filters_synthesize_pseudo_template_once() {
    let (_dir, top) = workspace(&[
        ExposureSpec::ir("ib1a01aaq", "F125W", 55000.0, "A1.001"),
        ExposureSpec::ir("ib1a01abq", "F160W", 55000.1, "A1.002"),
        ExposureSpec::ir("ib1a02aaq", "F140W", 55020.0, "B1.001"),
        ExposureSpec::ir("ib1a02abq", "F140W", 55020.1, "B1.002"),
    ]);
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages = StageSelection::all();
    run_pipeline(&config, &tools.toolkit()).unwrap();
    tools.clear();

    config.stages = StageSelection {
        difference: true,
        ..StageSelection::default()
    };
    config.only_filters = vec!["f140w".into()];
    config.only_epochs = vec![1];
    config.difference.template_filters = vec!["f125w".into(), "f160w".into()];
    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    let templates = tools.templates();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].target_bandpass, "WFC3-IR-F140W");
    assert!(templates[0].second.is_some());
    assert!(top.join("sn.e00/sn_~f140w_e00_reg_drz_sci.fits").is_file());
    assert_eq!(summary.report(Stage::Difference).unwrap().executed.len(), 1);
}

// ---------------------------------------------------------------------------
// Combination policies
// ---------------------------------------------------------------------------

#[test]
fn test_registered_combine_type_rules() {
    use epochreg_core::exposure::Camera;

    assert_eq!(registered_combine_type(&Camera::Wfc3Uvis, false, 7), CombineType::Median);
    assert_eq!(registered_combine_type(&Camera::Wfc3Uvis, false, 6), CombineType::MinMed);
    assert_eq!(registered_combine_type(&Camera::Wfc3Ir, false, 12), CombineType::MinMed);
    assert_eq!(registered_combine_type(&Camera::AcsWfc, true, 12), CombineType::MinMed);
}

#[test]
fn test_stack_combine_type_rules() {
    assert_eq!(stack_combine_type(false, 7), CombineType::MinMed);
    assert_eq!(stack_combine_type(false, 8), CombineType::Median);
    assert_eq!(stack_combine_type(true, 2), CombineType::Median);
}

#[test]
fn test_infrared_pair_gets_hot_pixel_cleanup() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages = StageSelection {
        setup: true,
        native: true,
        ..StageSelection::default()
    };

    run_pipeline(&config, &tools.toolkit()).unwrap();

    assert_eq!(tools.hot_pixel_cleanups(), 2);
}

#[test]
fn test_optical_pair_skips_hot_pixel_cleanup() {
    let (_dir, top) = workspace(&[
        ExposureSpec::uvis("ib1a01aaq", "F555W", 55000.0, "A1.001"),
        ExposureSpec::uvis("ib1a01abq", "F555W", 55000.1, "A1.002"),
    ]);
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages = StageSelection {
        setup: true,
        native: true,
        ..StageSelection::default()
    };

    run_pipeline(&config, &tools.toolkit()).unwrap();

    assert_eq!(tools.hot_pixel_cleanups(), 0);
}

#[test]
fn test_multi_visit_rejection_recombines_infrared_pair() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages.difference = false;
    config.combine.cr_mode = epochreg_core::pipeline::config::CrMode::MultiVisit;

    run_pipeline(&config, &tools.toolkit()).unwrap();

    let registered: Vec<_> = tools
        .combines()
        .into_iter()
        .filter(|c| c.output_root == "sn_f125w_e00_reg")
        .collect();
    assert_eq!(registered.len(), 2);
    assert!(registered[0].options.cr_rejection);
    assert!(!registered[1].options.cr_rejection);
    assert!(registered[1].options.clobber);
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn test_key_collision_retries_under_new_name() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    tools.collide_on(REFIM_WCS);

    let summary = run_pipeline(&config(&top), &tools.toolkit()).unwrap();

    assert_eq!(summary.failed_units(), 0);
    let names: Vec<String> = tools.propagations().into_iter().map(|p| p.wcs_name).collect();
    assert_eq!(names.iter().filter(|n| *n == REFIM_WCS).count(), 2);
    assert_eq!(
        names.iter().filter(|n| *n == &format!("{REFIM_WCS}_1")).count(),
        2
    );
}

#[test]
fn test_propagation_carries_previous_solution_name() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.combine.intravisit_registration = true;
    config.stages.difference = false;

    run_pipeline(&config, &tools.toolkit()).unwrap();

    let propagations = tools.propagations();
    assert_eq!(propagations.len(), 2);
    for request in &propagations {
        assert_eq!(request.old_wcs_name.as_deref(), Some(INTRAVISIT_WCS_NAME));
        assert_eq!(request.wcs_name, REFIM_WCS);
        assert!(!request.force);
    }
}

#[test]
fn test_clobbered_registration_forces_propagation() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    run_pipeline(&config, &tools.toolkit()).unwrap();
    assert!(tools.propagations().iter().all(|p| p.old_wcs_name.is_none()));
    tools.clear();

    config.clobber = 1;
    config.stages = StageSelection {
        register: true,
        ..StageSelection::default()
    };
    run_pipeline(&config, &tools.toolkit()).unwrap();

    let propagations = tools.propagations();
    assert_eq!(propagations.len(), 2);
    for request in &propagations {
        assert_eq!(request.old_wcs_name.as_deref(), Some(REFIM_WCS));
        assert!(request.force);
    }
}

#[test]
fn test_intravisit_alignment_uses_reference_catalog() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let catalog = top.join("gaia.cat");
    std::fs::write(&catalog, "# ra dec\n").unwrap();
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.combine.intravisit_registration = true;
    config.reference.catalog = Some(catalog.clone());
    config.stages.difference = false;

    run_pipeline(&config, &tools.toolkit()).unwrap();

    let internal: Vec<_> = tools
        .aligns()
        .into_iter()
        .filter_map(|a| match a.anchor {
            AlignAnchor::Internal { catalog } => Some(catalog),
            _ => None,
        })
        .collect();
    assert_eq!(internal.len(), 2);
    assert!(internal.iter().all(|c| c.as_deref() == Some(catalog.as_path())));
}

#[test]
fn test_second_key_collision_is_fatal() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    tools.collide_on(REFIM_WCS);
    tools.collide_on(&format!("{REFIM_WCS}_1"));

    let err = run_pipeline(&config(&top), &tools.toolkit()).unwrap_err();

    assert!(matches!(err, EpochRegError::WcsPropagation { .. }));
}

#[test]
fn test_single_star_registers_on_target() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.single_star = true;
    config.target = Some(SkyCoord::new(150.1, 2.2));
    config.stages.difference = false;

    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    assert!(summary.report(Stage::Reference).is_none());
    assert!(!top.join("sn.refim").exists());
    let aligns = tools.aligns();
    assert_eq!(aligns.len(), 2);
    assert_eq!(aligns[0].wcs_name, "SINGLESTAR:150.100000,2.200000");
    assert!(matches!(aligns[0].anchor, AlignAnchor::SingleStar { .. }));
}

#[test]
fn test_missing_user_reference_fails_before_any_stage() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.reference.image = Some(top.join("nowhere_drz_sci.fits"));

    let err = run_pipeline(&config, &tools.toolkit()).unwrap_err();

    assert!(matches!(err, EpochRegError::MissingReference(_)));
    assert!(tools.calls().is_empty());
    assert!(!top.join(format!("{ROOT}.e00")).exists());
}

#[test]
fn test_reference_nbright_builds_source_catalog() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.registration.ref_nbright = Some(50);

    run_pipeline(&config, &tools.toolkit()).unwrap();

    let aligns = tools.aligns();
    assert!(aligns.iter().all(|a| matches!(
        &a.anchor,
        AlignAnchor::Reference { catalog: Some(catalog), .. } if catalog.is_file()
    )));
}

// ---------------------------------------------------------------------------
// Stack
// ---------------------------------------------------------------------------

#[test]
fn test_stack_excludes_template_epoch_by_default() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages.stack = true;

    let summary = run_pipeline(&config, &tools.toolkit()).unwrap();

    let stacks: Vec<_> = tools
        .combines()
        .into_iter()
        .filter(|c| c.output_root == "sn_f125w_stack")
        .collect();
    assert_eq!(stacks.len(), 1);
    assert_eq!(stacks[0].inputs.len(), 2);
    assert_eq!(stacks[0].options.combine_type, Some(CombineType::MinMed));
    assert_eq!(summary.report(Stage::Stack).unwrap().executed.len(), 1);
    assert!(top.join("sn.stack/sn_f125w_stack_drz_sci.fits").is_file());
    assert!(top.join("sn.stack/sn_f125w_stack-e00_sub_sci.fits").is_file());
}

#[test]
fn test_stack_includes_template_epoch_on_request() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages.stack = true;
    config.stack.include_template = true;

    run_pipeline(&config, &tools.toolkit()).unwrap();

    let stack = tools
        .combines()
        .into_iter()
        .find(|c| c.output_root == "sn_f125w_stack")
        .unwrap();
    assert_eq!(stack.inputs.len(), 4);
    assert!(stack.inputs.iter().all(|p| p.starts_with(top.join("sn.stack"))));
}

#[test]
fn test_stack_rejects_cosmic_rays_at_default_mode() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages.stack = true;

    run_pipeline(&config, &tools.toolkit()).unwrap();

    let stack = tools
        .combines()
        .into_iter()
        .find(|c| c.output_root == "sn_f125w_stack")
        .unwrap();
    assert!(stack.options.cr_rejection);
}

#[test]
fn test_stack_without_cosmic_ray_rejection() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    config.stages.stack = true;
    config.combine.cr_mode = CrMode::KeepExisting;

    run_pipeline(&config, &tools.toolkit()).unwrap();

    let stack = tools
        .combines()
        .into_iter()
        .find(|c| c.output_root == "sn_f125w_stack")
        .unwrap();
    assert!(!stack.options.cr_rejection);
}

#[test]
fn test_stack_epochs_respect_epoch_restriction() {
    let (_dir, top) = workspace(&two_epoch_exposures());
    let tools = FakeTools::new();
    let mut config = config(&top);
    run_pipeline(&config, &tools.toolkit()).unwrap();
    tools.clear();

    config.stages = StageSelection {
        stack: true,
        ..StageSelection::default()
    };
    config.only_epochs = vec![1];
    config.stack.epochs = vec![0, 1];
    run_pipeline(&config, &tools.toolkit()).unwrap();

    let stack = tools
        .combines()
        .into_iter()
        .find(|c| c.output_root == "sn_f125w_stack")
        .unwrap();
    assert_eq!(stack.inputs.len(), 2);
    assert!(stack.inputs.iter().all(|p| p
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("ib1a02"))));
}
