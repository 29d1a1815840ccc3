//! Results handed to the screen after capture

use serde::{Deserialize, Serialize};

use deposit_ocr::MicrFields;

/// Payload for the capture summary screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureHandoff {
    /// JPEG still as a `data:` URI
    pub front_image_data_uri: String,
    pub front_fields: MicrFields,
}

/// Screen that receives the capture on continue
pub trait NextScreen {
    fn present(&self, handoff: CaptureHandoff);
}
