pub mod cli;
pub mod detection;
pub mod editor;
pub mod error;
pub mod geometry;
pub mod refine;
pub mod transform;

pub use cli::{Cli, Command, ScanConfig};
pub use detection::{
    binarize, detect_document_corners, edge_map, AreaScorer, Candidate, CandidateScorer,
    CentralityScorer, CornerDetector, DetectorParams,
};
pub use editor::{CornerEditor, EditState, PointerEvent};
pub use error::ScanError;
pub use geometry::{Point, Quadrilateral, Transform};
pub use refine::refine_corners;
pub use transform::{
    rectify_perspective, rectify_perspective_with, warp_perspective, Interpolation, Rectified,
    RectifyParams,
};
