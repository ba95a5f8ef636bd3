use crate::archive::{ArchiveBuilder, ArchiveError, split_extension};
use crate::http::clip_text;
use crate::models::Selection;
use crate::resolver::extension_for_mime;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Local;
use reqwest::Client;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("No selections were provided.")]
    NoSelections,
    /// Fatal for the whole call; selections are assumed pre-validated during
    /// gallery assembly, so a blank URL here means corrupt caller state.
    #[error("No image URL provided for {0}")]
    MissingImageUrl(String),
    #[error("Failed to download {file_name}: {message}")]
    Fetch { file_name: String, message: String },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl FinalizeError {
    pub fn is_input(&self) -> bool {
        matches!(self, FinalizeError::NoSelections)
    }
}

#[derive(Debug)]
pub struct FinalizeOutcome {
    pub zip_content: String,
    pub zip_filename: String,
    pub image_count: usize,
}

/// Re-fetches every selected image and packs the bytes into one archive. All
/// or nothing: the first selection that cannot be fetched fails the call.
pub async fn finalize_selections(
    client: &Client,
    selections: &[Selection],
) -> Result<FinalizeOutcome, FinalizeError> {
    if selections.is_empty() {
        return Err(FinalizeError::NoSelections);
    }

    let deduped = dedupe_selections(selections);
    let mut builder = ArchiveBuilder::new();

    for selection in &deduped {
        let url = selection.original_url.trim();
        if url.is_empty() {
            return Err(FinalizeError::MissingImageUrl(selection.item_id.clone()));
        }
        let base_name = if selection.file_name.trim().is_empty() {
            selection.item_id.clone()
        } else {
            selection.file_name.clone()
        };

        let response = client.get(url).send().await.map_err(|err| {
            FinalizeError::Fetch {
                file_name: base_name.clone(),
                message: clip_text(err.to_string(), 120),
            }
        })?;
        if !response.status().is_success() {
            return Err(FinalizeError::Fetch {
                file_name: base_name,
                message: format!("HTTP {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        let extension = extension_for_mime(&content_type);
        let file_name = apply_extension(&base_name, extension);

        let bytes = response.bytes().await.map_err(|err| FinalizeError::Fetch {
            file_name: file_name.clone(),
            message: err.to_string(),
        })?;
        builder.add(&file_name, bytes.to_vec());
    }

    let image_count = builder.len();
    let blob = builder.finish()?;
    let zip_filename = format!(
        "downloaded_items_{}.zip",
        Local::now().format("%y%m%d-%H%M")
    );
    info!(
        target = "itemgen.finalize",
        image_count, zip_filename, "finalize complete"
    );

    Ok(FinalizeOutcome {
        zip_content: BASE64.encode(&blob),
        zip_filename,
        image_count,
    })
}

/// Keyed by item id, last occurrence wins, output in first-occurrence order.
/// Selections without an item id are dropped.
fn dedupe_selections(selections: &[Selection]) -> Vec<Selection> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Selection> = HashMap::new();
    for selection in selections {
        let id = selection.item_id.trim();
        if id.is_empty() {
            continue;
        }
        if !by_id.contains_key(id) {
            order.push(id.to_string());
        }
        by_id.insert(id.to_string(), selection.clone());
    }
    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

/// Renames `file_name` to carry `extension` unless it already ends with it
/// (case-insensitive); any existing extension is stripped first.
fn apply_extension(file_name: &str, extension: &str) -> String {
    if file_name.to_lowercase().ends_with(extension) {
        return file_name.to_string();
    }
    let (stem, _) = split_extension(file_name);
    format!("{stem}{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(item_id: &str, file_name: &str, url: &str) -> Selection {
        Selection {
            item_id: item_id.to_string(),
            file_name: file_name.to_string(),
            original_url: url.to_string(),
        }
    }

    #[test]
    fn dedupe_keeps_last_selection_in_first_occurrence_order() {
        let deduped = dedupe_selections(&[
            selection("A", "A_v01", "https://example.com/1.jpg"),
            selection("B", "B_v01", "https://example.com/2.jpg"),
            selection("A", "A_v07", "https://example.com/7.jpg"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].item_id, "A");
        assert_eq!(deduped[0].file_name, "A_v07");
        assert_eq!(deduped[1].item_id, "B");
    }

    #[test]
    fn dedupe_drops_selections_without_an_item_id() {
        let deduped = dedupe_selections(&[
            selection("", "x", "https://example.com/x.jpg"),
            selection("A", "A_v01", "https://example.com/1.jpg"),
        ]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].item_id, "A");
    }

    #[test]
    fn extension_is_replaced_unless_already_present() {
        assert_eq!(apply_extension("item_v01", ".png"), "item_v01.png");
        assert_eq!(apply_extension("item_v01.webp", ".png"), "item_v01.png");
        assert_eq!(apply_extension("item_v01.PNG", ".png"), "item_v01.PNG");
        assert_eq!(apply_extension("item.with.dots.gif", ".jpg"), "item.with.dots.jpg");
    }

    #[tokio::test]
    async fn empty_selections_fail_before_any_network_call() {
        let client = Client::new();
        let err = finalize_selections(&client, &[]).await.unwrap_err();
        assert!(err.is_input());
        assert_eq!(err.to_string(), "No selections were provided.");
    }

    #[tokio::test]
    async fn blank_url_fails_the_whole_call() {
        let client = Client::new();
        let err = finalize_selections(&client, &[selection("A1", "A1_v01", "  ")])
            .await
            .unwrap_err();
        assert!(!err.is_input());
        assert_eq!(err.to_string(), "No image URL provided for A1");
    }
}
