use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "MEDIA_GATEWAY_";

/// Which object store implementation backs the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Any S3-compatible service (MinIO, AWS, R2, ...).
    S3,
    /// Process-local map; contents vanish on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown backend `{other}` (expected `s3` or `memory`)"),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: StoreBackend,
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// CDN origin serving the bucket; delivery URLs skip signing when set.
    pub cdn_url: Option<String>,
    /// Public origin of the object store, when clients reach it under a
    /// different host than `endpoint`.
    pub public_base_url: Option<String>,
    pub authz_url: Option<String>,
    pub max_upload_bytes: usize,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8081,
            backend: StoreBackend::S3,
            bucket: "the-monkeys-media".into(),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            cdn_url: None,
            public_base_url: None,
            authz_url: None,
            max_upload_bytes: 256 * 1024 * 1024,
            request_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("cdn_url", &self.cdn_url)
            .field("public_base_url", &self.public_base_url)
            .field("authz_url", &self.authz_url)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Media object storage gateway")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store backend (overrides MEDIA_GATEWAY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StoreBackend>,

    /// Bucket holding every media object (overrides MEDIA_GATEWAY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// S3 endpoint URL (overrides MEDIA_GATEWAY_S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// S3 region (overrides MEDIA_GATEWAY_S3_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// S3 access key (overrides MEDIA_GATEWAY_S3_ACCESS_KEY)
    #[arg(long)]
    pub access_key: Option<String>,

    /// S3 secret key (overrides MEDIA_GATEWAY_S3_SECRET_KEY)
    #[arg(long)]
    pub secret_key: Option<String>,

    /// CDN base URL (overrides MEDIA_GATEWAY_CDN_URL)
    #[arg(long)]
    pub cdn_url: Option<String>,

    /// Public object store URL used for signing (overrides MEDIA_GATEWAY_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Authorization service URL (overrides MEDIA_GATEWAY_AUTHZ_URL)
    #[arg(long)]
    pub authz_url: Option<String>,

    /// Largest accepted request body (overrides MEDIA_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Per-request deadline in seconds (overrides MEDIA_GATEWAY_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Create the bucket if missing and exit
    #[arg(long)]
    pub ensure_bucket: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// ensure-bucket flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let ensure_bucket = args.ensure_bucket;
        let cfg = Self::merge(args, |name| env::var(name).ok())?;
        Ok((cfg, ensure_bucket))
    }

    /// CLI values win over environment values, which win over defaults.
    /// Blank optional values count as unset.
    fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|v| !v.trim().is_empty())
        };
        let defaults = Self::default();

        let port = match args.port {
            Some(port) => port,
            None => parse_env(&var, "PORT")?.unwrap_or(defaults.port),
        };
        let backend = match args.backend {
            Some(backend) => backend,
            None => parse_env(&var, "BACKEND")?.unwrap_or(defaults.backend),
        };
        let max_upload_bytes = match args.max_upload_bytes {
            Some(bytes) => bytes,
            None => parse_env(&var, "MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes),
        };
        let request_timeout_secs = match args.request_timeout_secs {
            Some(secs) => secs,
            None => parse_env(&var, "REQUEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.request_timeout_secs),
        };

        let cfg = Self {
            host: args.host.or(var("HOST")).unwrap_or(defaults.host),
            port,
            backend,
            bucket: args.bucket.or(var("BUCKET")).unwrap_or(defaults.bucket),
            endpoint: args
                .endpoint
                .or(var("S3_ENDPOINT"))
                .unwrap_or(defaults.endpoint),
            region: args.region.or(var("S3_REGION")).unwrap_or(defaults.region),
            access_key: args
                .access_key
                .or(var("S3_ACCESS_KEY"))
                .unwrap_or(defaults.access_key),
            secret_key: args
                .secret_key
                .or(var("S3_SECRET_KEY"))
                .unwrap_or(defaults.secret_key),
            cdn_url: non_blank(args.cdn_url).or(var("CDN_URL")),
            public_base_url: non_blank(args.public_base_url).or(var("PUBLIC_BASE_URL")),
            authz_url: non_blank(args.authz_url).or(var("AUTHZ_URL")),
            max_upload_bytes,
            request_timeout_secs,
        };

        if cfg.request_timeout_secs == 0 {
            bail!("{ENV_PREFIX}REQUEST_TIMEOUT_SECS must be positive");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_env<T>(var: &impl Fn(&str) -> Option<String>, suffix: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match var(suffix) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("parsing {ENV_PREFIX}{suffix} value `{value}`")),
        None => Ok(None),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
