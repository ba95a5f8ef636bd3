use crate::archive::{ArchiveBuilder, ArchiveError, split_extension};
use crate::filters::ImageFilters;
use crate::resolver::{ErrorKind, SearchResult, VariantResolver, build_query, normalize_host};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MANIFEST_COLUMNS: usize = 16;
const MIN_IMAGE_BYTES: usize = 1500;
const MIN_GIF_BYTES: usize = 8000;
const KNOWN_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("No products provided")]
    NoProducts,
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl DownloadError {
    pub fn is_input(&self) -> bool {
        matches!(self, DownloadError::NoProducts)
    }
}

/// Resolved request parameters for one batch-download call.
#[derive(Debug, Clone)]
pub struct BatchDownloadSpec {
    pub products: Vec<String>,
    pub item_numbers: Vec<String>,
    pub sites: Vec<String>,
    pub images_per_item: usize,
    /// URL prefix applied to archive names to form the manifest's ImageUrl.
    pub prefix: String,
    pub filters: ImageFilters,
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub csv_content: String,
    pub csv_filename: String,
    pub zip_content: String,
    pub zip_filename: String,
    pub row_count: usize,
    pub image_count: usize,
}

/// One search per product, then fetches candidates until `images_per_item`
/// pass the size/content checks. Every requested slot produces a manifest
/// row: a real one, or a `FAILED:`/`DL_FAILED:` marker row. The archive holds
/// only the image bytes; the CSV manifest travels separately.
pub async fn run_batch_download(
    resolver: &VariantResolver,
    fetch_client: &Client,
    spec: &BatchDownloadSpec,
) -> Result<DownloadOutcome, DownloadError> {
    if spec.products.is_empty() {
        return Err(DownloadError::NoProducts);
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut builder = ArchiveBuilder::new();

    for (idx, product) in spec.products.iter().enumerate() {
        let ordinal = idx + 1;
        let product = product.trim();
        let clean_name = clean_product_name(product);
        let assigned_number = spec.item_numbers.get(idx).cloned();
        let query = build_query(product, &spec.sites);

        let results = match resolver
            .search_raw(&query, spec.images_per_item, &spec.filters, 1)
            .await
        {
            Ok(results) => results,
            Err(err) if err.kind() == ErrorKind::NoResults => Vec::new(),
            Err(err) => {
                warn!(
                    target = "itemgen.download",
                    product, error = %err, "search failed for product"
                );
                for _ in 0..spec.images_per_item {
                    rows.push(manifest_row(
                        assigned_number.clone().unwrap_or_default(),
                        product,
                        &format!("FAILED: {err}"),
                        "",
                    ));
                }
                continue;
            }
        };

        let mut valid = 0;
        for result in &results {
            if valid >= spec.images_per_item {
                break;
            }
            if result.link.is_empty() {
                continue;
            }
            let Some((bytes, extension)) = fetch_candidate(fetch_client, result).await else {
                continue;
            };

            let base_name = format!("{clean_name}_v{}{extension}", valid + 1);
            let final_name = builder.add(&base_name, bytes);
            let public_url = if spec.prefix.is_empty() {
                String::new()
            } else {
                format!("{}{final_name}", spec.prefix)
            };
            let item_id = assigned_number
                .clone()
                .unwrap_or_else(|| format!("ITEM{ordinal:03}"));
            let source = normalize_host(&result.link).unwrap_or_default();
            rows.push(manifest_row(item_id, product, &public_url, &source));
            valid += 1;
        }

        while valid < spec.images_per_item {
            rows.push(manifest_row(
                assigned_number.clone().unwrap_or_default(),
                product,
                "DL_FAILED: No valid image",
                "",
            ));
            valid += 1;
        }
    }

    // Item numbers beyond the product list still get an empty manifest row.
    for number in spec.item_numbers.iter().skip(spec.products.len()) {
        rows.push(manifest_row(number.clone(), "", "", ""));
    }

    let image_count = count_real_images(&rows);
    let row_count = rows.len();
    let csv_content = render_manifest(&rows);

    let blob = builder.finish()?;
    let zip_unique = Uuid::new_v4().simple().to_string();
    let zip_filename = format!("downloaded_items_{}.zip", &zip_unique[..8]);
    info!(
        target = "itemgen.download",
        products = spec.products.len(),
        row_count,
        image_count,
        zip_filename,
        "batch download complete"
    );

    Ok(DownloadOutcome {
        csv_content: BASE64.encode(csv_content.as_bytes()),
        csv_filename: "imagedownload.csv".to_string(),
        zip_content: BASE64.encode(&blob),
        zip_filename,
        row_count,
        image_count,
    })
}

/// Single-attempt fetch with the acceptance checks applied: tiny bodies,
/// non-image content types, and undersized GIFs are all rejected.
async fn fetch_candidate(client: &Client, result: &SearchResult) -> Option<(Vec<u8>, String)> {
    let response = client.get(&result.link).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();
    let bytes = response.bytes().await.ok()?;

    if bytes.len() < MIN_IMAGE_BYTES {
        debug!(target = "itemgen.download", url = %result.link, "rejected: too small");
        return None;
    }
    if !content_type.starts_with("image/") {
        debug!(target = "itemgen.download", url = %result.link, content_type, "rejected: not an image");
        return None;
    }
    if content_type.contains("gif") && bytes.len() < MIN_GIF_BYTES {
        debug!(target = "itemgen.download", url = %result.link, "rejected: undersized gif");
        return None;
    }

    let thumbnail = result
        .image
        .as_ref()
        .map(|img| img.thumbnail_link.as_str())
        .unwrap_or_default();
    Some((bytes.to_vec(), thumbnail_extension(thumbnail).to_string()))
}

/// Guarantees a trailing slash on a non-empty URL prefix.
pub fn ensure_prefix_url(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

/// Extension taken from the thumbnail link when it is a known image
/// extension, `.jpg` otherwise.
fn thumbnail_extension(thumbnail_link: &str) -> &'static str {
    let (_, ext) = split_extension(thumbnail_link);
    let ext = ext.to_lowercase();
    KNOWN_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .unwrap_or(".jpg")
}

/// Archive-safe product name: forbidden characters removed, spaces become
/// underscores.
fn clean_product_name(product: &str) -> String {
    crate::resolver::sanitize_item_id(product)
        .trim()
        .replace(' ', "_")
}

fn manifest_row(item_id: String, description: &str, url: &str, source: &str) -> Vec<String> {
    let mut row = vec![String::new(); MANIFEST_COLUMNS];
    row[0] = item_id;
    row[1] = description.to_string();
    row[2] = description.to_string();
    row[3] = url.to_string();
    row[15] = source.to_string();
    row
}

fn count_real_images(rows: &[Vec<String>]) -> usize {
    rows.iter()
        .filter(|row| {
            let url = &row[3];
            !url.is_empty() && !url.starts_with("FAILED") && !url.starts_with("DL_FAILED")
        })
        .count()
}

fn render_manifest(rows: &[Vec<String>]) -> String {
    let mut header = vec![String::new(); MANIFEST_COLUMNS];
    header[0] = "ItemId".to_string();
    header[1] = "ShortDescription".to_string();
    header[2] = "Description".to_string();
    header[3] = "ImageUrl".to_string();
    header[15] = "Source".to_string();

    let mut out = String::new();
    out.push_str(&csv_line(&header));
    for row in rows {
        out.push_str(&csv_line(row));
    }
    out
}

fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_quote(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

fn csv_quote(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_names_become_archive_safe() {
        assert_eq!(clean_product_name("Air Max 90"), "Air_Max_90");
        assert_eq!(clean_product_name("Mug: 12oz/red"), "Mug_12ozred");
    }

    #[test]
    fn prefix_gains_a_trailing_slash_once() {
        assert_eq!(ensure_prefix_url(""), "");
        assert_eq!(ensure_prefix_url("https://cdn/x"), "https://cdn/x/");
        assert_eq!(ensure_prefix_url("https://cdn/x/"), "https://cdn/x/");
    }

    #[test]
    fn thumbnail_extension_respects_whitelist() {
        assert_eq!(thumbnail_extension("https://t.example.com/a.PNG"), ".png");
        assert_eq!(thumbnail_extension("https://t.example.com/a.jpeg"), ".jpeg");
        assert_eq!(
            thumbnail_extension("https://t.example.com/thumb?id=9"),
            ".jpg"
        );
        assert_eq!(thumbnail_extension(""), ".jpg");
    }

    #[test]
    fn manifest_rows_keep_the_sixteen_column_layout() {
        let row = manifest_row("A1".into(), "Shoe", "https://cdn/x.jpg", "nike.com");
        assert_eq!(row.len(), MANIFEST_COLUMNS);
        assert_eq!(row[0], "A1");
        assert_eq!(row[1], "Shoe");
        assert_eq!(row[2], "Shoe");
        assert_eq!(row[3], "https://cdn/x.jpg");
        assert_eq!(row[15], "nike.com");
        assert!(row[4..15].iter().all(String::is_empty));
    }

    #[test]
    fn marker_rows_do_not_count_as_images() {
        let rows = vec![
            manifest_row("A".into(), "Shoe", "https://cdn/a.jpg", "x"),
            manifest_row("B".into(), "Shoe", "FAILED: Timeout", ""),
            manifest_row("C".into(), "Shoe", "DL_FAILED: No valid image", ""),
            manifest_row("D".into(), "", "", ""),
        ];
        assert_eq!(count_real_images(&rows), 1);
    }

    #[test]
    fn csv_quoting_escapes_embedded_commas_and_quotes() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn manifest_starts_with_the_header_row() {
        let rendered = render_manifest(&[manifest_row("A".into(), "x", "u", "s")]);
        let mut lines = rendered.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ItemId,ShortDescription,Description,ImageUrl,,,,,,,,,,,,Source"
        );
        assert_eq!(lines.next().unwrap(), "A,x,x,u,,,,,,,,,,,,s");
    }
}
