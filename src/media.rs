use crate::archive::split_extension;
use crate::config::MediaConfig;
use crate::http::build_client;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No files provided")]
    NoFiles,
    #[error("No valid image files found. Supported formats: JPG, PNG, GIF, WebP, BMP")]
    NoImages,
    #[error("Upload failed: {0}")]
    Upload(String),
}

impl MediaError {
    pub fn is_input(&self) -> bool {
        matches!(self, MediaError::NoFiles | MediaError::NoImages)
    }
}

/// One file submitted for hosting, decoded from the request body.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Progress events emitted once per batch and once per file. The same
/// sequence drives both the streamed route and the batch summary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UploadEvent {
    Start {
        total: usize,
        folder: String,
        preset: String,
    },
    Progress {
        index: usize,
        total: usize,
        filename: String,
        status: &'static str,
    },
    Success {
        index: usize,
        total: usize,
        filename: String,
        url: String,
        duration: f64,
    },
    #[serde(rename = "error")]
    Failure {
        index: usize,
        total: usize,
        filename: String,
        error: String,
        duration: f64,
    },
    Complete {
        successful: usize,
        failed: usize,
        total: usize,
        total_duration: f64,
    },
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub filename: String,
    pub url: String,
    pub public_id: String,
    pub duration: f64,
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct FailedFile {
    pub filename: String,
    pub error: String,
    pub duration: f64,
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub uploaded: Vec<UploadedFile>,
    pub failed: Vec<FailedFile>,
    pub total: usize,
    pub successful: usize,
    pub failed_count: usize,
}

#[derive(Debug, Deserialize)]
struct HostedImage {
    #[serde(default)]
    secure_url: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    public_id: String,
}

/// Media-hosting upload client. Uploads are single-attempt; per-file failures
/// are recorded and the batch continues.
pub struct MediaClient {
    config: MediaConfig,
    client: Client,
}

impl MediaClient {
    pub fn new(config: MediaConfig) -> Self {
        let client = build_client(config.timeout);
        Self { config, client }
    }

    /// Uploads every valid image file sequentially, emitting one event per
    /// step to `events`. A dropped receiver does not stop the batch.
    pub async fn run_batch(
        &self,
        files: Vec<UploadFile>,
        folder: &str,
        preset: &str,
        events: mpsc::Sender<UploadEvent>,
    ) -> Result<BatchSummary, MediaError> {
        if files.is_empty() {
            return Err(MediaError::NoFiles);
        }
        let images = filter_image_files(files);
        if images.is_empty() {
            return Err(MediaError::NoImages);
        }

        let total = images.len();
        let batch_start = Instant::now();
        let _ = events
            .send(UploadEvent::Start {
                total,
                folder: folder.to_string(),
                preset: preset.to_string(),
            })
            .await;
        info!(target = "itemgen.media", total, folder, "starting media upload batch");

        let mut uploaded = Vec::new();
        let mut failed = Vec::new();

        for (idx, file) in images.into_iter().enumerate() {
            let index = idx + 1;
            let filename = base_name(&file.filename).to_string();
            let _ = events
                .send(UploadEvent::Progress {
                    index,
                    total,
                    filename: filename.clone(),
                    status: "uploading",
                })
                .await;

            let file_start = Instant::now();
            match self.upload_one(&file, folder, preset).await {
                Ok(hosted) => {
                    let duration = round_secs(file_start.elapsed().as_secs_f64());
                    let url = if hosted.secure_url.is_empty() {
                        hosted.url
                    } else {
                        hosted.secure_url
                    };
                    let _ = events
                        .send(UploadEvent::Success {
                            index,
                            total,
                            filename: filename.clone(),
                            url: url.clone(),
                            duration,
                        })
                        .await;
                    uploaded.push(UploadedFile {
                        filename,
                        url,
                        public_id: hosted.public_id,
                        duration,
                        index,
                        total,
                    });
                }
                Err(err) => {
                    let duration = round_secs(file_start.elapsed().as_secs_f64());
                    let error = err.to_string();
                    warn!(
                        target = "itemgen.media",
                        filename, index, total, error, "media upload failed"
                    );
                    let _ = events
                        .send(UploadEvent::Failure {
                            index,
                            total,
                            filename: filename.clone(),
                            error: error.clone(),
                            duration,
                        })
                        .await;
                    failed.push(FailedFile {
                        filename,
                        error,
                        duration,
                        index,
                        total,
                    });
                }
            }
        }

        let summary = BatchSummary {
            successful: uploaded.len(),
            failed_count: failed.len(),
            total,
            uploaded,
            failed,
        };
        let _ = events
            .send(UploadEvent::Complete {
                successful: summary.successful,
                failed: summary.failed_count,
                total,
                total_duration: round_secs(batch_start.elapsed().as_secs_f64()),
            })
            .await;
        info!(
            target = "itemgen.media",
            successful = summary.successful,
            failed = summary.failed_count,
            "media upload batch complete"
        );
        Ok(summary)
    }

    async fn upload_one(
        &self,
        file: &UploadFile,
        folder: &str,
        preset: &str,
    ) -> Result<HostedImage, MediaError> {
        let mut form = vec![
            (
                "file",
                format!(
                    "data:application/octet-stream;base64,{}",
                    BASE64.encode(&file.content)
                ),
            ),
            ("public_id", public_id(&file.filename, folder)),
        ];
        if !preset.is_empty() {
            form.push(("upload_preset", preset.to_string()));
        }
        if let Some(api_key) = &self.config.api_key {
            form.push(("api_key", api_key.clone()));
        }

        let response = self
            .client
            .post(self.config.upload_url())
            .form(&form)
            .send()
            .await
            .map_err(|err| MediaError::Upload(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body =
                crate::http::clip_text(response.text().await.unwrap_or_default(), 200);
            return Err(MediaError::Upload(format!("HTTP {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|err| MediaError::Upload(err.to_string()))
    }
}

fn filter_image_files(files: Vec<UploadFile>) -> Vec<UploadFile> {
    files
        .into_iter()
        .filter(|file| {
            let name = file.filename.to_lowercase();
            IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
        })
        .collect()
}

/// Directory components are discarded so files always land directly in the
/// target folder.
fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}

fn public_id(filename: &str, folder: &str) -> String {
    let (stem, _) = split_extension(base_name(filename));
    if folder.is_empty() {
        stem.to_string()
    } else {
        format!("{folder}/{stem}")
    }
}

fn round_secs(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> UploadFile {
        UploadFile {
            filename: name.to_string(),
            content: vec![0],
        }
    }

    #[test]
    fn only_image_extensions_survive_filtering() {
        let kept = filter_image_files(vec![
            file("a.JPG"),
            file("b.webp"),
            file("notes.txt"),
            file("archive.zip"),
        ]);
        let names: Vec<&str> = kept.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["a.JPG", "b.webp"]);
    }

    #[test]
    fn public_id_ignores_directories_and_extension() {
        assert_eq!(public_id("shots/item_v01.jpg", "sidney"), "sidney/item_v01");
        assert_eq!(public_id("C:\\temp\\mug.png", ""), "mug");
    }

    #[test]
    fn events_carry_lowercase_type_tags() {
        let event = UploadEvent::Start {
            total: 2,
            folder: "f".into(),
            preset: "p".into(),
        };
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "start");

        let event = UploadEvent::Failure {
            index: 1,
            total: 2,
            filename: "a.jpg".into(),
            error: "boom".into(),
            duration: 0.5,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "boom");
    }

    #[tokio::test]
    async fn empty_batches_are_rejected_up_front() {
        let client = MediaClient::new(crate::config::AppConfig::from_env().media);
        let (tx, _rx) = mpsc::channel(4);
        let err = client.run_batch(vec![], "f", "p", tx).await.unwrap_err();
        assert!(matches!(err, MediaError::NoFiles));

        let (tx, _rx) = mpsc::channel(4);
        let err = client
            .run_batch(vec![file("readme.md")], "f", "p", tx)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NoImages));
        assert!(err.is_input());
    }
}
