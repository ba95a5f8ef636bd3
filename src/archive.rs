use std::collections::HashSet;
use std::io::{Cursor, Write};
use thiserror::Error;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive write failed: {0}")]
    Storage(String),
}

/// Collects named byte blobs and packs them into one deflated ZIP container,
/// in insertion order. Name collisions get a `_copy<N>` suffix before the
/// extension so every entry keeps a distinct path.
pub struct ArchiveBuilder {
    entries: Vec<(String, Vec<u8>)>,
    names: HashSet<String>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Adds a blob, disambiguating the name if needed, and returns the
    /// archive name actually used.
    pub fn add(&mut self, name: &str, bytes: Vec<u8>) -> String {
        let final_name = self.unique_name(name);
        self.names.insert(final_name.clone());
        self.entries.push((final_name.clone(), bytes));
        final_name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn finish(self) -> Result<Vec<u8>, ArchiveError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in self.entries {
            writer
                .start_file(&name, options)
                .map_err(|err| ArchiveError::Storage(err.to_string()))?;
            writer
                .write_all(&bytes)
                .map_err(|err| ArchiveError::Storage(err.to_string()))?;
        }
        let cursor = writer
            .finish()
            .map_err(|err| ArchiveError::Storage(err.to_string()))?;
        Ok(cursor.into_inner())
    }

    fn unique_name(&self, base: &str) -> String {
        if !self.names.contains(base) {
            return base.to_string();
        }
        let (stem, ext) = split_extension(base);
        let mut counter = 1;
        loop {
            let candidate = format!("{stem}_copy{counter}{ext}");
            if !self.names.contains(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Splits `photo.jpg` into `("photo", ".jpg")`; names without a dot keep an
/// empty extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn colliding_names_get_copy_suffixes() {
        let mut builder = ArchiveBuilder::new();
        assert_eq!(builder.add("item_v01.jpg", vec![1]), "item_v01.jpg");
        assert_eq!(builder.add("item_v01.jpg", vec![2]), "item_v01_copy1.jpg");
        assert_eq!(builder.add("item_v01.jpg", vec![3]), "item_v01_copy2.jpg");
        assert_eq!(builder.len(), 3);
    }

    #[test]
    fn archive_preserves_insertion_order_and_bytes() {
        let mut builder = ArchiveBuilder::new();
        builder.add("b.png", vec![7, 7]);
        builder.add("a.png", vec![9]);
        let blob = builder.finish().unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(blob)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["b.png", "a.png"]);

        let mut first = Vec::new();
        archive.by_name("b.png").unwrap().read_to_end(&mut first).unwrap();
        assert_eq!(first, vec![7, 7]);
    }

    #[test]
    fn split_extension_handles_dotless_names() {
        assert_eq!(split_extension("manifest"), ("manifest", ""));
        assert_eq!(split_extension("a.b.c.webp"), ("a.b.c", ".webp"));
    }
}
