use thiserror::Error;

/// Recognized search constraints parsed from a free-text filter phrase.
/// Later tokens in the same category overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilters {
    pub img_size: Option<&'static str>,
    pub img_type: Option<&'static str>,
    pub file_type: Option<&'static str>,
    pub dominant_color: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid filter: '{0}'. Try: large, photo, png, red, etc.")]
    UnrecognizedToken(String),
}

const COLORS: &[&str] = &[
    "red", "blue", "green", "yellow", "orange", "purple", "pink", "brown", "gray", "black",
    "white", "teal",
];

impl ImageFilters {
    /// Parses a whitespace/comma/semicolon separated phrase. An unrecognized
    /// token aborts immediately and names the offending token; empty input is
    /// an empty filter set.
    pub fn parse(phrase: &str) -> Result<Self, FilterError> {
        let mut filters = Self::default();
        for token in phrase
            .split([',', ';', ' ', '\t', '\n'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            let word = token.to_lowercase();
            match word.as_str() {
                "large" | "big" => filters.img_size = Some("large"),
                "medium" => filters.img_size = Some("medium"),
                "small" | "tiny" => filters.img_size = Some("small"),
                "photo" | "real" => filters.img_type = Some("photo"),
                "clipart" | "cartoon" => filters.img_type = Some("clipart"),
                "lineart" | "drawing" => filters.img_type = Some("lineart"),
                "jpg" | "jpeg" => filters.file_type = Some("jpg"),
                "png" | "gif" | "webp" => {
                    filters.file_type = Some(match word.as_str() {
                        "png" => "png",
                        "gif" => "gif",
                        _ => "webp",
                    })
                }
                other if COLORS.contains(&other) => {
                    filters.dominant_color = Some(other.to_string())
                }
                _ => return Err(FilterError::UnrecognizedToken(token.to_string())),
            }
        }
        Ok(filters)
    }

    pub fn is_empty(&self) -> bool {
        self.img_size.is_none()
            && self.img_type.is_none()
            && self.file_type.is_none()
            && self.dominant_color.is_none()
    }

    /// Extra query parameters merged into a search request.
    pub fn as_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(size) = self.img_size {
            params.push(("imgSize", size.to_string()));
        }
        if let Some(kind) = self.img_type {
            params.push(("imgType", kind.to_string()));
        }
        if let Some(file) = self.file_type {
            params.push(("fileType", file.to_string()));
        }
        if let Some(color) = &self.dominant_color {
            params.push(("imgDominantColor", color.clone()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_filters() {
        let filters = ImageFilters::parse("").unwrap();
        assert!(filters.is_empty());
        assert!(filters.as_params().is_empty());
    }

    #[test]
    fn unrecognized_token_names_the_offender() {
        let err = ImageFilters::parse("large, neon").unwrap_err();
        assert_eq!(err, FilterError::UnrecognizedToken("neon".into()));
    }

    #[test]
    fn synonyms_normalize_to_canonical_values() {
        let filters = ImageFilters::parse("big real jpeg teal").unwrap();
        assert_eq!(filters.img_size, Some("large"));
        assert_eq!(filters.img_type, Some("photo"));
        assert_eq!(filters.file_type, Some("jpg"));
        assert_eq!(filters.dominant_color.as_deref(), Some("teal"));
    }

    #[test]
    fn later_token_in_same_category_wins() {
        let filters = ImageFilters::parse("small; large").unwrap();
        assert_eq!(filters.img_size, Some("large"));
    }

    #[test]
    fn parse_is_idempotent_over_its_own_output() {
        let first = ImageFilters::parse("cartoon, tiny, png, white").unwrap();
        let restringified = first
            .as_params()
            .into_iter()
            .map(|(_, value)| value)
            .collect::<Vec<_>>()
            .join(", ");
        let second = ImageFilters::parse(&restringified).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mixed_separators_are_accepted() {
        let filters = ImageFilters::parse("large,photo;gif\tblue").unwrap();
        assert_eq!(filters.as_params().len(), 4);
    }
}
