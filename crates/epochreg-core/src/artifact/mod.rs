pub mod names;
pub mod store;

pub use names::{
    parse_difference_name, Artifact, DifferenceName, DifferenceSource, ProductKind,
    WorkspaceLayout,
};
pub use store::{ArtifactStore, FsArtifactStore};
