use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Command line / environment. Every required value fails fast at startup.
#[derive(Parser)]
#[command(name = "sqlite-r2-backup", version, about = "Periodic SQLite backups to Cloudflare R2")]
pub struct Cli {
    /// Bucket the backup object is written to.
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket_name: String,

    /// Cloudflare account id; used to derive the R2 endpoint.
    #[arg(long, env = "ACCOUNT_ID")]
    pub account_id: String,

    #[arg(long, env = "ACCESS_KEY_ID")]
    pub access_key_id: String,

    #[arg(long, env = "ACCESS_KEY_SECRET", hide_env_values = true)]
    pub access_key_secret: String,

    /// SQLite database to back up.
    #[arg(long, env = "DB_FILE_PATH")]
    pub db_file_path: PathBuf,

    /// Override the derived R2 endpoint (e.g. a local MinIO).
    #[arg(long, env = "ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Where the metrics endpoint listens.
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3333")]
    pub listen: SocketAddr,

    /// Local staging file, recreated on every run.
    #[arg(long, env = "STAGING_PATH", default_value = "/tmp/backup.db3")]
    pub staging_path: PathBuf,

    /// Remote key; overwritten on every successful run.
    #[arg(long, env = "OBJECT_KEY", default_value = "backup.db3")]
    pub object_key: String,

    /// Seconds between successful runs.
    #[arg(long, env = "BACKUP_PERIOD_SECS", default_value_t = 3 * 60 * 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub backup_period_secs: u64,

    /// Seconds to wait before retrying a failed run.
    #[arg(long, env = "RETRY_BACKOFF_SECS", default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub retry_backoff_secs: u64,

    /// Per-stage timeout in seconds. 0 disables it.
    #[arg(long, env = "STAGE_TIMEOUT_SECS", default_value_t = 3600)]
    pub stage_timeout_secs: u64,

    /// Log level (env-filter syntax).
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log: String,
}

#[derive(Clone)]
pub struct RemoteConfig {
    pub bucket: String,
    pub key: String,
    pub account_id: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub access_key_secret: String,
}

impl RemoteConfig {
    /// Explicit override, otherwise the account's R2 endpoint.
    pub fn endpoint(&self) -> String {
        match &self.endpoint_url {
            Some(url) => url.clone(),
            None => format!("https://{}.r2.cloudflarestorage.com", self.account_id),
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("account_id", &self.account_id)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub listen: SocketAddr,
    pub source_path: PathBuf,
    pub staging_path: PathBuf,
    pub remote: RemoteConfig,
    pub period: Duration,
    pub retry_backoff: Duration,
    pub stage_timeout: Option<Duration>,
}

impl From<Cli> for BackupConfig {
    fn from(cli: Cli) -> Self {
        Self {
            listen: cli.listen,
            source_path: cli.db_file_path,
            staging_path: cli.staging_path,
            remote: RemoteConfig {
                bucket: cli.bucket_name,
                key: cli.object_key,
                account_id: cli.account_id,
                endpoint_url: cli.endpoint_url,
                access_key_id: cli.access_key_id,
                access_key_secret: cli.access_key_secret,
            },
            period: Duration::from_secs(cli.backup_period_secs),
            retry_backoff: Duration::from_secs(cli.retry_backoff_secs),
            stage_timeout: match cli.stage_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}
