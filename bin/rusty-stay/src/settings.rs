//! Runtime settings: built-in defaults, then an optional `rusty-stay.toml`,
//! then `STAY__SECTION__KEY` environment variables.

use anyhow::{bail, Context};
use config::{Config, Environment, File};
use serde::Deserialize;
use stay_core::ledger::DEFAULT_MAX_NIGHTS;
use stay_core::{FeeSchedule, Rate, RoundingUnit};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub fees: FeeSettings,
    pub limits: LimitSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Defaults to the number of physical cores when unset
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// sqlx URL for the sqlite backend; ignored by the memory store
    pub url: String,
    /// JSON array of listings loaded at startup
    pub seed_listings: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeSettings {
    /// Decimal percent, e.g. "10" or "8.875"
    pub platform_fee: String,
    pub tax_rate: String,
    /// Minor units per rounding step; 1 rounds to the cent, 100 to whole units
    pub rounding: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitSettings {
    /// Longest stay, block or calendar window accepted, in nights
    pub max_nights: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_sources(Some("rusty-stay"), Environment::with_prefix("STAY").separator("__"))
    }

    fn from_sources(file: Option<&str>, env: Environment) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("storage.url", "sqlite:rusty_stay.db")?
            .set_default("fees.platform_fee", "10")?
            .set_default("fees.tax_rate", "8")?
            .set_default("fees.rounding", 1)?
            .set_default("limits.max_nights", i64::from(DEFAULT_MAX_NIGHTS))?
            .set_default("log.level", "info")?;

        if let Some(name) = file {
            builder = builder.add_source(File::with_name(name).required(false));
        }

        builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()
            .context("invalid rusty-stay settings")
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }

    pub fn fee_schedule(&self) -> anyhow::Result<FeeSchedule> {
        if self.fees.rounding < 1 {
            bail!("fees.rounding must be at least 1, got {}", self.fees.rounding);
        }
        Ok(FeeSchedule::new(
            parse_percent(&self.fees.platform_fee).context("fees.platform_fee")?,
            parse_percent(&self.fees.tax_rate).context("fees.tax_rate")?,
        )
        .with_rounding(RoundingUnit::major(self.fees.rounding)))
    }
}

/// Parses a decimal percentage with up to three fraction digits.
pub fn parse_percent(raw: &str) -> anyhow::Result<Rate> {
    let raw = raw.trim().trim_end_matches('%');
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));

    if whole.is_empty() || fraction.len() > 3 {
        bail!("'{raw}' is not a percentage with at most three decimals");
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        bail!("'{raw}' is not a non-negative decimal");
    }

    let whole: u32 = whole.parse()?;
    let fraction: u32 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<3}").parse()?
    };
    let milli = whole
        .checked_mul(1_000)
        .and_then(|w| w.checked_add(fraction))
        .with_context(|| format!("'{raw}' is too large"))?;
    Ok(Rate::millipercent(milli))
}
