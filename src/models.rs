use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// One candidate image for one item. Created by the variant resolver for a
/// single resolution attempt and immutable afterwards; lives only inside the
/// response payload of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageVariant {
    pub file_name: String,
    pub original_url: String,
    pub preview_url: String,
    /// Normalized host of the backing image, or `"Failed"` for placeholders.
    pub source: String,
    pub short_description: String,
    pub description: String,
    pub item_id: String,
    pub is_placeholder: bool,
}

/// Per-item aggregate returned to the caller. The two shapes are kept as an
/// explicit mode tag in code and serialized untagged to preserve the wire
/// contract of each mode.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GalleryItem {
    Legacy(LegacyGalleryItem),
    Pos(PosGalleryItem),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyGalleryItem {
    pub item_id: String,
    pub product_name: String,
    /// Echoed as given, `null` when the caller supplied no item number.
    pub reference_id: Option<String>,
    pub variants: Vec<ImageVariant>,
    /// Set when every variant resolved from the same host, else empty.
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PosGalleryItem {
    #[serde(rename = "itemId")]
    pub item_id: String,
    /// Echo of the input description; capitalized key kept for the frontend.
    #[serde(rename = "ShortDescription")]
    pub short_description: String,
    #[serde(rename = "url1Variants")]
    pub url1_variants: Vec<ImageVariant>,
    #[serde(rename = "url2Variants")]
    pub url2_variants: Vec<ImageVariant>,
    #[serde(rename = "googleVariants")]
    pub google_variants: Vec<ImageVariant>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingItem {
    pub item_id: String,
    pub product_name: String,
    pub reason: String,
}

/// Caller's final choice for one item. Extra descriptive fields the frontend
/// may attach are ignored on deserialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub original_url: String,
}

// ---------------------------------------------------------------------------
// Request / response envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryGenerateRequest {
    #[serde(default, rename = "posItems")]
    pub pos_items: Vec<PosItemInput>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub item_numbers: Vec<String>,
    #[serde(default)]
    pub sites: Option<String>,
    #[serde(default)]
    pub images_per_item: Option<usize>,
    #[serde(default)]
    pub image_filters: Option<String>,
    /// 1-based pagination offset into the search results.
    #[serde(default)]
    pub start_index: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PosItemInput {
    #[serde(default, rename = "itemId")]
    pub item_id: String,
    #[serde(default, rename = "imageURL1")]
    pub image_url1: String,
    #[serde(default, rename = "imageURL2")]
    pub image_url2: String,
    #[serde(default, rename = "shortDescription")]
    pub short_description: String,
}

#[derive(Debug, Serialize)]
pub struct GalleryGenerateResponse {
    pub success: bool,
    pub items: Vec<GalleryItem>,
    #[serde(rename = "missingItems")]
    pub missing_items: Vec<MissingItem>,
}

/// Extra fields the frontend sends (`prefix` among them) are accepted and
/// ignored; only the selections drive the archive.
#[derive(Debug, Clone, Deserialize)]
pub struct GalleryFinalizeRequest {
    #[serde(default)]
    pub selections: Vec<Selection>,
}

#[derive(Debug, Serialize)]
pub struct GalleryFinalizeResponse {
    pub success: bool,
    pub zip_content: String,
    pub zip_filename: String,
    pub image_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadImagesRequest {
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub sites: Option<String>,
    #[serde(default)]
    pub images_per_item: Option<usize>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub item_numbers: Vec<String>,
    #[serde(default)]
    pub image_filters: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DownloadImagesResponse {
    pub success: bool,
    pub csv_content: String,
    pub csv_filename: String,
    pub zip_content: String,
    pub zip_filename: String,
    pub row_count: usize,
    pub image_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub org: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateItemsRequest {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub extra_prompt: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateItemsResponse {
    pub success: bool,
    pub products: Vec<String>,
    pub output_text: String,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateWmRequest {
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub csv_data: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadMediaRequest {
    #[serde(default)]
    pub files: Vec<UploadFileInput>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub preset: String,
}

/// One file in an upload request, content base64-encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadFileInput {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content: String,
}

/// Uniform failure envelope; every error surfaces to the caller as
/// `{"success": false, "error": …}`. The `requires_reauth` flag appears only
/// when the WMS rejected the caller's token.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub requires_reauth: Option<bool>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            requires_reauth: None,
        }
    }

    pub fn reauth(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            requires_reauth: Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(item_id: &str) -> ImageVariant {
        ImageVariant {
            file_name: format!("{item_id}_v01"),
            original_url: "https://cdn.example.com/a.jpg".into(),
            preview_url: "https://cdn.example.com/a_t.jpg".into(),
            source: "example.com".into(),
            short_description: "Sample".into(),
            description: "Sample".into(),
            item_id: item_id.to_string(),
            is_placeholder: false,
        }
    }

    #[test]
    fn legacy_item_serializes_with_camel_case_keys() {
        let item = GalleryItem::Legacy(LegacyGalleryItem {
            item_id: "A1".into(),
            product_name: "Shoe".into(),
            reference_id: None,
            variants: vec![variant("A1")],
            source: "example.com".into(),
        });
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["itemId"], "A1");
        assert_eq!(value["productName"], "Shoe");
        assert!(value["referenceId"].is_null());
        assert_eq!(value["variants"][0]["fileName"], "A1_v01");
        assert_eq!(value["variants"][0]["isPlaceholder"], false);
    }

    #[test]
    fn pos_item_keeps_capitalized_description_key() {
        let item = GalleryItem::Pos(PosGalleryItem {
            item_id: "P1".into(),
            short_description: "Red Mug".into(),
            url1_variants: vec![variant("P1")],
            url2_variants: vec![],
            google_variants: vec![],
        });
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["ShortDescription"], "Red Mug");
        assert_eq!(value["url1Variants"][0]["itemId"], "P1");
        assert!(value["url2Variants"].as_array().unwrap().is_empty());
    }

    #[test]
    fn selection_ignores_extra_descriptive_fields() {
        let raw = serde_json::json!({
            "itemId": "X",
            "fileName": "X_v02",
            "originalUrl": "https://example.com/x.png",
            "shortDescription": "unused",
            "source": "unused"
        });
        let selection: Selection = serde_json::from_value(raw).unwrap();
        assert_eq!(selection.item_id, "X");
        assert_eq!(selection.file_name, "X_v02");
    }

    #[test]
    fn error_body_omits_reauth_unless_set() {
        let value = serde_json::to_value(ErrorBody::new("boom")).unwrap();
        assert_eq!(value["success"], false);
        assert!(value.get("requires_reauth").is_none());

        let value = serde_json::to_value(ErrorBody::reauth("Token expired")).unwrap();
        assert_eq!(value["requires_reauth"], true);
    }
}
