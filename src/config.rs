use std::env;
use std::time::Duration;

/// Process-wide configuration, read from the environment exactly once at
/// startup and handed to each component constructor. Resolution logic never
/// reaches into the environment on its own.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub search: SearchConfig,
    pub wms: WmsConfig,
    pub namegen: NamegenConfig,
    pub media: MediaConfig,
    pub defaults: RequestDefaults,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key: String,
    pub engine_id: String,
    /// Upstream per-call result maximum.
    pub page_size: usize,
    pub max_attempts: u8,
    pub request_timeout: Duration,
    /// Bound for direct-URL reachability probes.
    pub probe_timeout: Duration,
    /// Bound for re-fetching chosen image bytes (finalize / batch download).
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WmsConfig {
    pub auth_host: String,
    pub api_host: String,
    pub username_base: String,
    pub client_id: String,
    pub password: Option<String>,
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl WmsConfig {
    pub fn token_url(&self) -> String {
        format!("https://{}/oauth/token", self.auth_host)
    }

    pub fn bulk_import_url(&self) -> String {
        format!(
            "https://{}/item-master/api/item-master/item/bulkImport?stopOnFirstError=true",
            self.api_host
        )
    }
}

#[derive(Debug, Clone)]
pub struct NamegenConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub cloud_name: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl MediaConfig {
    pub fn upload_url(&self) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.cloud_name
        )
    }
}

/// Fallbacks applied when a request omits an optional field.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub sites: String,
    pub images_per_item: usize,
    pub prefix: String,
    pub folder: String,
    pub generate_count: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            search: SearchConfig {
                endpoint: env_or(
                    "SEARCH_API_URL",
                    "https://www.googleapis.com/customsearch/v1",
                ),
                api_key: env::var("GOOGLE_API_KEY").unwrap_or_default(),
                engine_id: env_or("GOOGLE_SEARCH_CX", "64924b251f5014f7c"),
                page_size: 10,
                max_attempts: 3,
                request_timeout: secs_or("SEARCH_TIMEOUT_SECS", 15),
                probe_timeout: secs_or("IMAGE_PROBE_TIMEOUT_SECS", 10),
                fetch_timeout: secs_or("IMAGE_FETCH_TIMEOUT_SECS", 20),
            },
            wms: WmsConfig {
                auth_host: env_or("WMS_AUTH_HOST", "salep-auth.sce.manh.com"),
                api_host: env_or("WMS_API_HOST", "salep.sce.manh.com"),
                username_base: env_or("WMS_USERNAME_BASE", "sdtadmin@"),
                client_id: env_or("WMS_CLIENT_ID", "omnicomponent.1.0.0"),
                password: env::var("WMS_PASSWORD").ok(),
                secret: env::var("WMS_SECRET").ok(),
                timeout: secs_or("WMS_TIMEOUT_SECS", 60),
            },
            namegen: NamegenConfig {
                base_url: env_or("NAMEGEN_BASE_URL", "https://api.x.ai/v1"),
                model: env_or("NAMEGEN_MODEL", "grok-3"),
                api_key: env::var("XAI_API_KEY").unwrap_or_default(),
                timeout: secs_or("NAMEGEN_TIMEOUT_SECS", 60),
            },
            media: MediaConfig {
                cloud_name: env_or("MEDIA_CLOUD_NAME", "com-manh-cp"),
                api_key: env::var("MEDIA_API_KEY").ok(),
                timeout: secs_or("MEDIA_TIMEOUT_SECS", 30),
            },
            defaults: RequestDefaults {
                sites: env_or("DEFAULT_SITES", "nike.com, amazon.com"),
                images_per_item: 3,
                prefix: env_or(
                    "DEFAULT_URL_PREFIX",
                    "https://res.cloudinary.com/com-manh-cp/image/upload/sidney/",
                ),
                folder: env_or("DEFAULT_MEDIA_FOLDER", "sidney"),
                generate_count: 30,
            },
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn secs_or(key: &str, fallback: u64) -> Duration {
    let value = env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback);
    Duration::from_secs(value)
}
