//! Locating output images in a `/history/{prompt_id}` response.
//!
//! The body looks like
//! `{"<prompt_id>": {"outputs": {"<node_id>": {"images": [{"filename", "subfolder", "type"}]}}}}`.

use serde::Deserialize;

/// One image written by a ComfyUI output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output` for saved images, `temp` for previews.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

/// All images recorded for `prompt_id`, saved outputs first.
///
/// Node ids are visited in ascending numeric order so the result is
/// deterministic.
pub fn output_images(history: &serde_json::Value, prompt_id: &str) -> Vec<OutputImage> {
    let Some(outputs) = history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(|outputs| outputs.as_object())
    else {
        return Vec::new();
    };

    let mut nodes: Vec<(&String, &serde_json::Value)> = outputs.iter().collect();
    nodes.sort_by_key(|(id, _)| id.parse::<u64>().unwrap_or(u64::MAX));

    let mut images: Vec<OutputImage> = nodes
        .into_iter()
        .filter_map(|(_, node)| node.get("images"))
        .filter_map(|images| serde_json::from_value::<Vec<OutputImage>>(images.clone()).ok())
        .flatten()
        .collect();
    images.sort_by_key(|image| image.kind != "output");
    images
}
