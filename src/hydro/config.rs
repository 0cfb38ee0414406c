use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Root of the raw-data file server; instrument folders hang off
    /// `{base_url}{network}/{site}/{instrument}/`.
    pub base_url: String,
    /// Suffix identifying recording files in a day listing.
    pub file_suffix: String,
    /// Day listings larger than this are skipped whole. Calibration against
    /// real folder sizes is unverified, so this stays configurable.
    pub anomaly_threshold_bytes: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            base_url: "https://rawdata.oceanobservatories.org/files/".to_string(),
            file_suffix: ".mseed".to_string(),
            anomaly_threshold_bytes: 200_000,
            fetch_timeout_secs: 30,
        }
    }
}

impl CrawlSettings {
    pub fn instrument_url(&self, network: &str, site: &str, instrument: &str) -> String {
        format!("{}{}/{}/{}/", self.base_url, network, site, instrument)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderSettings {
    /// Decoder binary name or path; resolved from PATH when not absolute.
    pub bin: String,
    /// Wall-clock limit for one decode, in seconds. Zero disables the limit.
    pub timeout_secs: u64,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            bin: "mseed-export".to_string(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanConfig {
    pub crawl: CrawlSettings,
    pub decoder: DecoderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialScanConfig {
    crawl: Option<CrawlSettings>,
    decoder: Option<DecoderSettings>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &ScanConfig) -> Result<()> {
    if cfg.crawl.base_url.trim().is_empty() {
        return Err(anyhow!("invalid base url: cannot be empty"));
    }
    if !cfg.crawl.base_url.ends_with('/') {
        return Err(anyhow!("invalid base url: must end with `/`"));
    }
    if !cfg.crawl.file_suffix.starts_with('.') || cfg.crawl.file_suffix.len() < 2 {
        return Err(anyhow!(
            "invalid file suffix: expected an extension like `.mseed`"
        ));
    }
    if cfg.crawl.anomaly_threshold_bytes == 0 {
        return Err(anyhow!("invalid anomaly threshold: must be >= 1 byte"));
    }
    if cfg.crawl.fetch_timeout_secs == 0 {
        return Err(anyhow!("invalid fetch timeout: must be >= 1 second"));
    }
    if cfg.decoder.bin.trim().is_empty() {
        return Err(anyhow!("invalid decoder binary: cannot be empty"));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("HYDROSCAN_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".hydroscan").join("config.toml"))
}

fn merge_file_config(base: &mut ScanConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialScanConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    if let Some(crawl) = parsed.crawl {
        base.crawl = crawl;
    }
    if let Some(decoder) = parsed.decoder {
        base.decoder = decoder;
    }
    Ok(())
}

pub fn load_config() -> Result<ScanConfig> {
    let mut cfg = ScanConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.crawl.base_url = env_or_string("HYDROSCAN_BASE_URL", &cfg.crawl.base_url);
    cfg.crawl.file_suffix = env_or_string("HYDROSCAN_FILE_SUFFIX", &cfg.crawl.file_suffix);
    cfg.crawl.anomaly_threshold_bytes = env_or_usize(
        "HYDROSCAN_ANOMALY_THRESHOLD_BYTES",
        cfg.crawl.anomaly_threshold_bytes,
    );
    cfg.crawl.fetch_timeout_secs =
        env_or_u64("HYDROSCAN_FETCH_TIMEOUT_SECS", cfg.crawl.fetch_timeout_secs);
    cfg.decoder.bin = env_or_string("HYDROSCAN_DECODER_BIN", &cfg.decoder.bin);
    cfg.decoder.timeout_secs =
        env_or_u64("HYDROSCAN_DECODER_TIMEOUT_SECS", cfg.decoder.timeout_secs);

    validate(&cfg)?;
    Ok(cfg)
}
