use serde::{Deserialize, Serialize};

use crate::geometry::CenterBox;

/// One detected object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Centre/extent box, in the coordinate space the backend declares.
    pub bbox: CenterBox,
    pub confidence: f32,
    #[serde(default)]
    pub class_id: u32,
}
