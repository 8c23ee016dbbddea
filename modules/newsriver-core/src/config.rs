//! Application configuration, frozen at startup.
//!
//! Secrets and env-specific values come from environment variables; dedup
//! thresholds are plain data (`DedupConfig`) so tests can run alternate
//! profiles without touching the environment.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub embedder: EmbedderConfig,
    pub dedup: DedupConfig,

    /// Articles per embedding batch.
    pub embed_batch_size: usize,
    /// Attempts before a failing embed batch is split into singletons.
    pub embed_max_attempts: u32,
    /// Rows claimed per stage batch; small keeps row-lock hold short.
    pub claim_batch_size: i64,
    /// Wall-clock budget per stage within one `run_once`.
    pub stage_deadline_secs: u64,
    /// Minutes after which a run still `running` is recovered as `failed`.
    pub run_recovery_grace_minutes: i64,
}

/// The embedding model generation this deployment writes vectors for.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub endpoint: String,
    pub model_name: String,
    pub model_version: String,
    pub dim: usize,
}

/// Dedup decision thresholds. Configuration, not constants.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupConfig {
    pub lookback_days: i64,
    pub top_k: usize,
    pub cosine_high: f64,
    pub cosine_override: f64,
    pub cosine_floor: f64,
    pub title_overlap_min: f64,
    pub simhash_max_hamming: u32,
    pub trigram_min: f64,
    pub trigram_window_days: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            top_k: 20,
            cosine_high: 0.935,
            cosine_override: 0.965,
            cosine_floor: 0.89,
            title_overlap_min: 0.30,
            simhash_max_hamming: 3,
            trigram_min: 0.88,
            trigram_window_days: 14,
        }
    }
}

impl DedupConfig {
    /// Tighter profile: fewer auto-merges, wider gray zone. Used by the test
    /// suite and available for precision-sensitive collections.
    pub fn strict_precision() -> Self {
        Self {
            cosine_high: 0.955,
            cosine_override: 0.98,
            cosine_floor: 0.92,
            title_overlap_min: 0.40,
            simhash_max_hamming: 2,
            trigram_min: 0.92,
            trigram_window_days: 7,
            ..Self::default()
        }
    }

    fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            lookback_days: env_parse("DEDUP_LOOKBACK_DAYS", d.lookback_days)?,
            top_k: env_parse("DEDUP_TOPK", d.top_k)?,
            cosine_high: env_parse("DEDUP_COSINE_HIGH", d.cosine_high)?,
            cosine_override: env_parse("DEDUP_COSINE_OVERRIDE", d.cosine_override)?,
            cosine_floor: env_parse("DEDUP_COSINE_FLOOR", d.cosine_floor)?,
            title_overlap_min: env_parse("DEDUP_TITLE_OVERLAP_MIN", d.title_overlap_min)?,
            simhash_max_hamming: env_parse("DEDUP_SIMHASH_HAM", d.simhash_max_hamming)?,
            trigram_min: env_parse("DEDUP_TRIGRAM_MIN", d.trigram_min)?,
            trigram_window_days: env_parse("DEDUP_TRIGRAM_WINDOW_DAYS", d.trigram_window_days)?,
        })
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let embedder = EmbedderConfig {
            endpoint: std::env::var("EMBEDDING_ENDPOINT")
                .context("EMBEDDING_ENDPOINT must be set")?,
            model_name: std::env::var("EMBEDDING_MODEL").context("EMBEDDING_MODEL must be set")?,
            model_version: std::env::var("EMBEDDING_MODEL_VERSION")
                .context("EMBEDDING_MODEL_VERSION must be set")?,
            dim: env_parse_required("EMBEDDING_DIM")?,
        };
        if embedder.dim == 0 {
            anyhow::bail!("EMBEDDING_DIM must be positive");
        }

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            embedder,
            dedup: DedupConfig::from_env()?,
            embed_batch_size: env_parse("EMBED_BATCH_SIZE", 32)?,
            embed_max_attempts: env_parse("EMBED_MAX_ATTEMPTS", 4)?,
            claim_batch_size: env_parse("CLAIM_BATCH_SIZE", 32)?,
            stage_deadline_secs: env_parse("STAGE_DEADLINE_SECS", 600)?,
            run_recovery_grace_minutes: env_parse("RUN_RECOVERY_GRACE_MINUTES", 60)?,
        };

        tracing::info!(
            model = %config.embedder.model_name,
            version = %config.embedder.model_version,
            dim = config.embedder.dim,
            lookback_days = config.dedup.lookback_days,
            top_k = config.dedup.top_k,
            "Config loaded"
        );
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().with_context(|| format!("{key}={raw} is not valid")),
        Err(_) => Ok(default),
    }
}

fn env_parse_required<T: std::str::FromStr>(key: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = std::env::var(key).with_context(|| format!("{key} must be set"))?;
    raw.parse::<T>().with_context(|| format!("{key}={raw} is not valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_match_deployment() {
        let d = DedupConfig::default();
        assert_eq!(d.cosine_high, 0.935);
        assert_eq!(d.cosine_override, 0.965);
        assert_eq!(d.cosine_floor, 0.89);
        assert_eq!(d.title_overlap_min, 0.30);
        assert_eq!(d.simhash_max_hamming, 3);
        assert_eq!(d.trigram_min, 0.88);
        assert_eq!(d.trigram_window_days, 14);
        assert_eq!(d.top_k, 20);
        assert_eq!(d.lookback_days, 365);
    }

    #[test]
    fn strict_profile_is_stricter_everywhere() {
        let d = DedupConfig::default();
        let s = DedupConfig::strict_precision();
        assert!(s.cosine_high > d.cosine_high);
        assert!(s.cosine_override > d.cosine_override);
        assert!(s.cosine_floor > d.cosine_floor);
        assert!(s.title_overlap_min > d.title_overlap_min);
        assert!(s.simhash_max_hamming < d.simhash_max_hamming);
        assert!(s.trigram_min > d.trigram_min);
        assert!(s.trigram_window_days < d.trigram_window_days);
    }
}
