use crate::filters::ImageFilters;
use crate::models::{
    GalleryItem, ImageVariant, LegacyGalleryItem, MissingItem, PosGalleryItem, PosItemInput,
};
use crate::resolver::{ResolveError, VariantResolver};
use tracing::{info, warn};

/// Per-request knobs shared by every item in one gallery call.
#[derive(Debug, Clone)]
pub struct GalleryContext {
    pub sites: Vec<String>,
    pub images_per_item: usize,
    pub filters: ImageFilters,
    /// 1-based offset into the search results.
    pub start_index: usize,
}

/// Legacy mode: one search-backed item per product name. A failure for one
/// item lands in `missingItems`; the remaining items still resolve.
pub async fn generate_legacy(
    resolver: &VariantResolver,
    products: &[String],
    item_numbers: &[String],
    ctx: &GalleryContext,
) -> (Vec<GalleryItem>, Vec<MissingItem>) {
    let mut items = Vec::new();
    let mut missing = Vec::new();

    for (idx, product) in products.iter().enumerate() {
        let reference_id = item_numbers.get(idx).cloned();
        let item_id = legacy_item_id(idx, reference_id.as_deref());

        let (variants, error) = resolver
            .resolve_search_paged(
                product,
                &item_id,
                &ctx.sites,
                ctx.images_per_item,
                &ctx.filters,
                ctx.start_index,
            )
            .await;

        let (item, unresolved) =
            fold_legacy_outcome(item_id, product.clone(), reference_id, variants, error);
        if let Some(entry) = unresolved {
            warn!(
                target = "itemgen.gallery",
                item_id = %entry.item_id,
                reason = %entry.reason,
                "legacy item unresolved"
            );
            missing.push(entry);
        }
        items.push(GalleryItem::Legacy(item));
    }

    info!(
        target = "itemgen.gallery",
        resolved = items.len(),
        missing = missing.len(),
        "legacy gallery assembled"
    );
    (items, missing)
}

/// POS mode: each input row carries up to two direct URLs plus a description
/// used for search. A row without an item id is skipped and reported; a URL
/// slot that fails to resolve always yields a placeholder so the slot count
/// is preserved.
pub async fn generate_pos(
    resolver: &VariantResolver,
    pos_items: &[PosItemInput],
    ctx: &GalleryContext,
) -> (Vec<GalleryItem>, Vec<MissingItem>) {
    let mut items = Vec::new();
    let mut missing = Vec::new();

    for input in pos_items {
        let item_id = input.item_id.trim();
        if item_id.is_empty() {
            missing.push(MissingItem {
                item_id: "Unknown".to_string(),
                product_name: input.short_description.clone(),
                reason: "Missing ItemID".to_string(),
            });
            continue;
        }

        let url1_variants =
            resolve_url_slot(resolver, &input.image_url1, item_id, "URL1").await;
        let url2_variants =
            resolve_url_slot(resolver, &input.image_url2, item_id, "URL2").await;

        let description = input.short_description.trim();
        let google_variants = if description.is_empty() {
            Vec::new()
        } else {
            let (variants, error) = resolver
                .resolve_search_paged(
                    description,
                    item_id,
                    &ctx.sites,
                    ctx.images_per_item,
                    &ctx.filters,
                    ctx.start_index,
                )
                .await;
            if let Some(err) = error {
                warn!(
                    target = "itemgen.gallery",
                    item_id,
                    error = %err,
                    "search variants unavailable for pos item"
                );
            }
            variants
        };

        items.push(GalleryItem::Pos(PosGalleryItem {
            item_id: item_id.to_string(),
            short_description: input.short_description.clone(),
            url1_variants,
            url2_variants,
            google_variants,
        }));
    }

    info!(
        target = "itemgen.gallery",
        resolved = items.len(),
        missing = missing.len(),
        "pos gallery assembled"
    );
    (items, missing)
}

async fn resolve_url_slot(
    resolver: &VariantResolver,
    url: &str,
    item_id: &str,
    label: &str,
) -> Vec<ImageVariant> {
    if url.trim().is_empty() {
        warn!(target = "itemgen.gallery", item_id, label, "url slot empty");
        return vec![VariantResolver::placeholder(item_id, label)];
    }
    match resolver.resolve_by_url(url, item_id, label).await {
        Ok(variant) => vec![variant],
        Err(err) => {
            warn!(
                target = "itemgen.gallery",
                item_id,
                label,
                error = %err,
                "url slot failed, substituting placeholder"
            );
            vec![VariantResolver::placeholder(item_id, label)]
        }
    }
}

fn legacy_item_id(idx: usize, reference_id: Option<&str>) -> String {
    match reference_id {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => format!("gallery_item_{}", idx + 1),
    }
}

/// Folds one resolution round into the gallery item plus, when zero variants
/// came back, a missing entry. The item is kept in the payload either way so
/// the caller sees every input reflected in the output.
fn fold_legacy_outcome(
    item_id: String,
    product_name: String,
    reference_id: Option<String>,
    variants: Vec<ImageVariant>,
    error: Option<ResolveError>,
) -> (LegacyGalleryItem, Option<MissingItem>) {
    let unresolved = if variants.is_empty() {
        let reason = error
            .map(|err| err.message().to_string())
            .unwrap_or_else(|| "No valid images returned".to_string());
        Some(MissingItem {
            item_id: item_id.clone(),
            product_name: product_name.clone(),
            reason,
        })
    } else {
        None
    };
    let source = group_source(&variants);
    (
        LegacyGalleryItem {
            item_id,
            product_name,
            reference_id,
            variants,
            source,
        },
        unresolved,
    )
}

/// The shared host when every variant came from the same one, else empty.
fn group_source(variants: &[ImageVariant]) -> String {
    let mut unique: Option<&str> = None;
    for variant in variants {
        if variant.source.is_empty() {
            continue;
        }
        match unique {
            None => unique = Some(&variant.source),
            Some(existing) if existing == variant.source => {}
            Some(_) => return String::new(),
        }
    }
    unique.unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(source: &str) -> ImageVariant {
        ImageVariant {
            file_name: "X_v01".into(),
            original_url: "https://example.com/a.jpg".into(),
            preview_url: "https://example.com/a_t.jpg".into(),
            source: source.to_string(),
            short_description: "q".into(),
            description: "q".into(),
            item_id: "X".into(),
            is_placeholder: false,
        }
    }

    #[test]
    fn item_id_falls_back_to_positional_name() {
        assert_eq!(legacy_item_id(0, None), "gallery_item_1");
        assert_eq!(legacy_item_id(4, None), "gallery_item_5");
        assert_eq!(legacy_item_id(2, Some("REF-9")), "REF-9");
    }

    #[test]
    fn group_source_requires_a_single_shared_host() {
        assert_eq!(
            group_source(&[variant("nike.com"), variant("nike.com")]),
            "nike.com"
        );
        assert_eq!(
            group_source(&[variant("nike.com"), variant("amazon.com")]),
            ""
        );
        assert_eq!(group_source(&[]), "");
        assert_eq!(
            group_source(&[variant(""), variant("nike.com")]),
            "nike.com"
        );
    }

    #[test]
    fn zero_variants_keep_the_item_and_add_a_missing_entry() {
        let (item, unresolved) = fold_legacy_outcome(
            "A1".into(),
            "Shoe".into(),
            None,
            Vec::new(),
            Some(ResolveError::no_results()),
        );
        assert!(item.variants.is_empty());
        let entry = unresolved.unwrap();
        assert_eq!(entry.item_id, "A1");
        assert_eq!(entry.reason, "No images returned");

        let (_, unresolved) =
            fold_legacy_outcome("A2".into(), "Mug".into(), None, Vec::new(), None);
        assert_eq!(unresolved.unwrap().reason, "No valid images returned");
    }

    #[test]
    fn resolved_variants_carry_the_group_source() {
        let (item, unresolved) = fold_legacy_outcome(
            "A1".into(),
            "Shoe".into(),
            Some("REF".into()),
            vec![variant("nike.com")],
            None,
        );
        assert!(unresolved.is_none());
        assert_eq!(item.source, "nike.com");
        assert_eq!(item.reference_id.as_deref(), Some("REF"));
    }

    #[test]
    fn blank_reference_ids_fall_back_but_are_still_echoed() {
        assert_eq!(legacy_item_id(0, Some("  ")), "gallery_item_1");
    }

    #[tokio::test]
    async fn every_url_slot_yields_exactly_one_variant() {
        let resolver = VariantResolver::new(crate::config::AppConfig::from_env().search);

        let blank = resolve_url_slot(&resolver, "   ", "P1", "URL1").await;
        assert_eq!(blank.len(), 1);
        assert!(blank[0].is_placeholder);
        assert_eq!(blank[0].file_name, "P1_url1_placeholder");

        // An unparseable URL fails before any network I/O.
        let broken = resolve_url_slot(&resolver, "not a valid url", "P1", "URL2").await;
        assert_eq!(broken.len(), 1);
        assert!(broken[0].is_placeholder);
        assert_eq!(broken[0].file_name, "P1_url2_placeholder");
    }
}
