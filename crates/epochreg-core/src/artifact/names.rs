use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::exposure::{DrizzleSuffix, FeGroup, FevGroup};

/// Product kind of a stage artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProductKind {
    Science,
    Weight,
    Context,
    BadPixelMask,
    /// Difference image with the bad-pixel mask applied.
    Masked,
}

impl ProductKind {
    pub const ALL: [ProductKind; 5] = [
        Self::Science,
        Self::Weight,
        Self::Context,
        Self::BadPixelMask,
        Self::Masked,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Science => "sci",
            Self::Weight => "wht",
            Self::Context => "ctx",
            Self::BadPixelMask => "bpx",
            Self::Masked => "masked",
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for ProductKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.suffix() == s)
            .ok_or_else(|| format!("unknown product kind '{s}'"))
    }
}

/// A file-producing unit of work, identified by stage and group key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// The WCS reference image.
    Reference { drz: DrizzleSuffix },
    /// Combine-1 output for one visit.
    Native { group: FevGroup, drz: DrizzleSuffix },
    /// Combine-2 output for one filter and epoch.
    Registered { group: FeGroup, drz: DrizzleSuffix },
    /// Single-exposure product written alongside a Combine-2 output.
    Single { group: FeGroup, rootname: String },
    Difference { group: FeGroup, template_epoch: i32 },
    SingleDifference {
        group: FeGroup,
        template_epoch: i32,
        rootname: String,
    },
    Stack { filter: String },
    StackDifference { filter: String, template_epoch: i32 },
}

impl Artifact {
    /// Output root handed to the combiner; products are
    /// `{output_root}_{suffix}_{kind}.fits`.
    pub fn output_root(&self, root: &str) -> String {
        match self {
            Self::Reference { .. } => format!("{root}_wcsref"),
            Self::Native { group, .. } => format!("{root}_{group}_nat"),
            Self::Registered { group, .. } | Self::Single { group, .. } => {
                format!("{root}_{group}_reg")
            }
            Self::Difference {
                group,
                template_epoch,
            } => format!("{root}_{group}-e{template_epoch:02}_sub"),
            Self::SingleDifference {
                group,
                template_epoch,
                rootname,
            } => format!("{root}_{group}-e{template_epoch:02}_{rootname}_single_sub"),
            Self::Stack { filter } => format!("{root}_{filter}_stack"),
            Self::StackDifference {
                filter,
                template_epoch,
            } => format!("{root}_{filter}_stack-e{template_epoch:02}_sub"),
        }
    }

    pub fn file_name(&self, root: &str, kind: ProductKind) -> String {
        let base = self.output_root(root);
        match self {
            Self::Reference { drz } | Self::Native { drz, .. } | Self::Registered { drz, .. } => {
                format!("{base}_{drz}_{kind}.fits")
            }
            Self::Single { rootname, .. } => format!("{base}_{rootname}_single_{kind}.fits"),
            Self::Stack { .. } => format!("{base}_{}_{kind}.fits", DrizzleSuffix::Drz),
            Self::Difference { .. }
            | Self::SingleDifference { .. }
            | Self::StackDifference { .. } => format!("{base}_{kind}.fits"),
        }
    }

    /// The product whose existence marks the unit as done.
    pub fn canonical_kind(&self) -> ProductKind {
        match self {
            Self::Difference { .. } | Self::SingleDifference { .. } => ProductKind::Masked,
            _ => ProductKind::Science,
        }
    }

    /// Product kinds this artifact can have on disk.
    pub fn kinds(&self) -> &'static [ProductKind] {
        match self {
            Self::Difference { .. } | Self::SingleDifference { .. } => &[
                ProductKind::Science,
                ProductKind::Weight,
                ProductKind::BadPixelMask,
                ProductKind::Masked,
            ],
            Self::StackDifference { .. } => &[ProductKind::Science],
            _ => &[
                ProductKind::Science,
                ProductKind::Weight,
                ProductKind::Context,
                ProductKind::BadPixelMask,
            ],
        }
    }
}

/// What a difference image was made from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DifferenceSource {
    Epoch(FeGroup),
    Stack { filter: String },
}

/// Fields recovered from a difference image file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DifferenceName {
    pub root: String,
    pub source: DifferenceSource,
    pub template_epoch: i32,
    /// Rootname of the exposure for single-exposure differences.
    pub single: Option<String>,
    pub kind: ProductKind,
}

impl DifferenceName {
    pub fn artifact(&self) -> Artifact {
        match (&self.source, &self.single) {
            (DifferenceSource::Epoch(group), None) => Artifact::Difference {
                group: group.clone(),
                template_epoch: self.template_epoch,
            },
            (DifferenceSource::Epoch(group), Some(rootname)) => Artifact::SingleDifference {
                group: group.clone(),
                template_epoch: self.template_epoch,
                rootname: rootname.clone(),
            },
            (DifferenceSource::Stack { filter }, _) => Artifact::StackDifference {
                filter: filter.clone(),
                template_epoch: self.template_epoch,
            },
        }
    }
}

/// Parse a difference file name, right to left.
///
/// Accepts `{root}_{filter}_e{EE}-e{TT}_sub_{kind}.fits`, its
/// `_{rootname}_single_sub_` variant and
/// `{root}_{filter}_stack-e{TT}_sub_{kind}.fits`.
pub fn parse_difference_name(name: &str) -> Option<DifferenceName> {
    let stem = name.strip_suffix(".fits")?;
    let (rest, kind) = stem.rsplit_once('_')?;
    let kind = kind.parse().ok()?;
    let rest = rest.strip_suffix("_sub")?;

    let (head, single) = match rest.strip_suffix("_single") {
        Some(rest) => {
            let (head, rootname) = rest.rsplit_once('_')?;
            (head, Some(rootname.to_string()))
        }
        None => (rest, None),
    };

    let (left, template) = head.rsplit_once("-e")?;
    if template.is_empty() || !template.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let template_epoch = template.parse().ok()?;

    let (root, source) = if let Some(left) = left.strip_suffix("_stack") {
        if single.is_some() {
            return None;
        }
        let (root, filter) = left.rsplit_once('_')?;
        let filter = filter.to_string();
        (root, DifferenceSource::Stack { filter })
    } else {
        let (root_filter, epoch) = left.rsplit_once("_e")?;
        let (root, filter) = root_filter.rsplit_once('_')?;
        let epoch = epoch.parse().ok()?;
        (root, DifferenceSource::Epoch(FeGroup::new(filter, epoch)))
    };
    if root.is_empty() {
        return None;
    }

    Some(DifferenceName {
        root: root.to_string(),
        source,
        template_epoch,
        single,
        kind,
    })
}

/// Directory layout of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceLayout {
    pub top: PathBuf,
    pub root: String,
}

impl WorkspaceLayout {
    pub fn new(top: impl Into<PathBuf>, root: impl Into<String>) -> Self {
        Self {
            top: top.into(),
            root: root.into(),
        }
    }

    /// Pristine input exposures.
    pub fn input_dir(&self) -> PathBuf {
        self.top.join(format!("{}.flt", self.root))
    }

    pub fn epoch_dir(&self, epoch: i32) -> PathBuf {
        self.top.join(format!("{}.e{:02}", self.root, epoch))
    }

    pub fn reference_dir(&self) -> PathBuf {
        self.top.join(format!("{}.refim", self.root))
    }

    pub fn stack_dir(&self) -> PathBuf {
        self.top.join(format!("{}.stack", self.root))
    }

    pub fn epoch_list(&self) -> PathBuf {
        self.top.join(format!("{}_epochs.txt", self.root))
    }

    /// Default reference image path, preferring an existing `drc` variant.
    pub fn default_reference_image(&self) -> PathBuf {
        let drc = self.path(&Artifact::Reference { drz: DrizzleSuffix::Drc }, ProductKind::Science);
        if drc.exists() {
            drc
        } else {
            self.path(&Artifact::Reference { drz: DrizzleSuffix::Drz }, ProductKind::Science)
        }
    }

    pub fn directory_of(&self, artifact: &Artifact) -> PathBuf {
        match artifact {
            Artifact::Reference { .. } => self.reference_dir(),
            Artifact::Native { group, .. } => self.epoch_dir(group.epoch),
            Artifact::Registered { group, .. }
            | Artifact::Single { group, .. }
            | Artifact::Difference { group, .. }
            | Artifact::SingleDifference { group, .. } => {
                // Pseudo templates live with the real template-epoch products.
                self.epoch_dir(group.epoch)
            }
            Artifact::Stack { .. } | Artifact::StackDifference { .. } => self.stack_dir(),
        }
    }

    pub fn path(&self, artifact: &Artifact, kind: ProductKind) -> PathBuf {
        self.directory_of(artifact)
            .join(artifact.file_name(&self.root, kind))
    }
}
