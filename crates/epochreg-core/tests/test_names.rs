use std::path::Path;

use epochreg_core::artifact::{
    parse_difference_name, Artifact, DifferenceSource, ProductKind, WorkspaceLayout,
};
use epochreg_core::exposure::{DrizzleSuffix, FeGroup, FevGroup};

fn layout() -> WorkspaceLayout {
    WorkspaceLayout::new("/work", "sn2011a")
}

// ---------------------------------------------------------------------------
// File names
// ---------------------------------------------------------------------------

#[test]
fn test_stage_file_names() {
    let root = "sn2011a";
    let native = Artifact::Native {
        group: FevGroup {
            filter: "f125w".into(),
            epoch: 1,
            visit: "12099_A1".into(),
        },
        drz: DrizzleSuffix::Drz,
    };
    assert_eq!(
        native.file_name(root, ProductKind::Science),
        "sn2011a_f125w_e01_12099_A1_nat_drz_sci.fits"
    );

    let registered = Artifact::Registered {
        group: FeGroup::new("f350l", 2),
        drz: DrizzleSuffix::Drc,
    };
    assert_eq!(
        registered.file_name(root, ProductKind::Weight),
        "sn2011a_f350l_e02_reg_drc_wht.fits"
    );

    let single = Artifact::Single {
        group: FeGroup::new("f125w", 0),
        rootname: "ib1a01aaq".into(),
    };
    assert_eq!(
        single.file_name(root, ProductKind::Science),
        "sn2011a_f125w_e00_reg_ib1a01aaq_single_sci.fits"
    );

    let stack = Artifact::Stack {
        filter: "f125w".into(),
    };
    assert_eq!(
        stack.file_name(root, ProductKind::Science),
        "sn2011a_f125w_stack_drz_sci.fits"
    );

    let reference = Artifact::Reference {
        drz: DrizzleSuffix::Drz,
    };
    assert_eq!(
        reference.file_name(root, ProductKind::Science),
        "sn2011a_wcsref_drz_sci.fits"
    );
}

#[test]
fn test_difference_file_names() {
    let diff = Artifact::Difference {
        group: FeGroup::new("f125w", 3),
        template_epoch: 0,
    };
    assert_eq!(diff.output_root("sn"), "sn_f125w_e03-e00_sub");
    assert_eq!(diff.file_name("sn", ProductKind::Masked), "sn_f125w_e03-e00_sub_masked.fits");
    assert_eq!(diff.canonical_kind(), ProductKind::Masked);
    assert!(!diff.kinds().contains(&ProductKind::Context));

    let stack_diff = Artifact::StackDifference {
        filter: "f125w".into(),
        template_epoch: 0,
    };
    assert_eq!(
        stack_diff.file_name("sn", ProductKind::Science),
        "sn_f125w_stack-e00_sub_sci.fits"
    );
    assert_eq!(stack_diff.canonical_kind(), ProductKind::Science);
}

#[test]
fn test_pseudo_template_group() {
    let group = FeGroup::new("f140w", 0).pseudo();
    assert_eq!(group.to_string(), "~f140w_e00");
    let template = Artifact::Registered {
        group,
        drz: DrizzleSuffix::Drz,
    };
    assert_eq!(
        template.file_name("sn", ProductKind::Science),
        "sn_~f140w_e00_reg_drz_sci.fits"
    );
}

// ---------------------------------------------------------------------------
// Parsing difference names
// ---------------------------------------------------------------------------

#[test]
fn test_parse_epoch_difference() {
    let parsed = parse_difference_name("sn_2011_a_f125w_e03-e00_sub_masked.fits").unwrap();
    assert_eq!(parsed.root, "sn_2011_a");
    assert_eq!(parsed.source, DifferenceSource::Epoch(FeGroup::new("f125w", 3)));
    assert_eq!(parsed.template_epoch, 0);
    assert_eq!(parsed.single, None);
    assert_eq!(parsed.kind, ProductKind::Masked);
    assert_eq!(
        parsed.artifact(),
        Artifact::Difference {
            group: FeGroup::new("f125w", 3),
            template_epoch: 0,
        }
    );
}

#[test]
fn test_parse_single_and_stack_differences() {
    let single = parse_difference_name("sn_f160w_e01-e02_ib1a01aaq_single_sub_sci.fits").unwrap();
    assert_eq!(single.root, "sn");
    assert_eq!(single.template_epoch, 2);
    assert_eq!(single.single.as_deref(), Some("ib1a01aaq"));
    assert!(matches!(single.artifact(), Artifact::SingleDifference { .. }));

    let stack = parse_difference_name("sn_f125w_stack-e00_sub_sci.fits").unwrap();
    assert_eq!(
        stack.source,
        DifferenceSource::Stack {
            filter: "f125w".into()
        }
    );
    assert_eq!(stack.root, "sn");
}

#[test]
fn test_parse_inverts_file_name() {
    let artifacts = [
        Artifact::Difference {
            group: FeGroup::new("ir", 4),
            template_epoch: 1,
        },
        Artifact::SingleDifference {
            group: FeGroup::new("f814w", 2),
            template_epoch: 0,
            rootname: "jb1a01aaq".into(),
        },
        Artifact::StackDifference {
            filter: "f160w".into(),
            template_epoch: 0,
        },
    ];
    for artifact in artifacts {
        let name = artifact.file_name("my_target", ProductKind::Science);
        let parsed = parse_difference_name(&name).unwrap();
        assert_eq!(parsed.root, "my_target", "{name}");
        assert_eq!(parsed.artifact(), artifact, "{name}");
    }
}

#[test]
fn test_parse_rejects_other_names() {
    assert!(parse_difference_name("sn_f125w_e03_reg_drz_sci.fits").is_none());
    assert!(parse_difference_name("sn_f125w_e03-eXX_sub_sci.fits").is_none());
    assert!(parse_difference_name("sn_f125w_e03-e00_sub_bogus.fits").is_none());
    assert!(parse_difference_name("sn_f125w_e03-e00_sub_sci.fit").is_none());
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[test]
fn test_layout_directories() {
    let layout = layout();
    assert_eq!(layout.input_dir(), Path::new("/work/sn2011a.flt"));
    assert_eq!(layout.epoch_dir(3), Path::new("/work/sn2011a.e03"));
    assert_eq!(layout.reference_dir(), Path::new("/work/sn2011a.refim"));
    assert_eq!(layout.stack_dir(), Path::new("/work/sn2011a.stack"));
    assert_eq!(layout.epoch_list(), Path::new("/work/sn2011a_epochs.txt"));
}

#[test]
fn test_layout_artifact_paths() {
    let layout = layout();
    let diff = Artifact::Difference {
        group: FeGroup::new("f125w", 2),
        template_epoch: 0,
    };
    assert_eq!(
        layout.path(&diff, ProductKind::Science),
        Path::new("/work/sn2011a.e02/sn2011a_f125w_e02-e00_sub_sci.fits")
    );

    let template = Artifact::Registered {
        group: FeGroup::new("f125w", 0).pseudo(),
        drz: DrizzleSuffix::Drz,
    };
    assert_eq!(layout.directory_of(&template), Path::new("/work/sn2011a.e00"));
    assert_eq!(
        layout.default_reference_image(),
        Path::new("/work/sn2011a.refim/sn2011a_wcsref_drz_sci.fits")
    );
}

#[test]
fn test_default_reference_prefers_existing_drc() {
    let dir = tempfile::tempdir().unwrap();
    let layout = WorkspaceLayout::new(dir.path(), "sn");
    std::fs::create_dir_all(layout.reference_dir()).unwrap();
    let drc = layout.reference_dir().join("sn_wcsref_drc_sci.fits");
    std::fs::write(&drc, "").unwrap();

    assert_eq!(layout.default_reference_image(), drc);
}
