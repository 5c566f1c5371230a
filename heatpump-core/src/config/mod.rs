//! Runtime configuration and its persisted JSON document.
//!
//! The document keeps the key names the device has always written
//! (`HOSTNAME`, `MQTT_BROKER`, ...), so a store written by older firmware
//! still loads. Missing keys fall back to the built-in default for that field
//! and unknown keys are skipped.

use core::fmt;

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::current::Calibration;

pub const HOSTNAME_CAPACITY: usize = 32;
pub const BROKER_CAPACITY: usize = 64;
pub const URL_CAPACITY: usize = 96;

/// Longest JSON rendering of a string field holding `bytes` bytes: every byte
/// may be a control character written as `\u00XX`.
#[must_use]
pub const fn escaped_capacity(bytes: usize) -> usize {
    bytes * 6
}

/// Keys, punctuation and the numeric fields at their widest.
const DOCUMENT_OVERHEAD: usize = 256;

/// Upper bound on the encoded document, with every string field at capacity
/// and fully escaped.
pub const MAX_DOCUMENT_LEN: usize = DOCUMENT_OVERHEAD
    + escaped_capacity(HOSTNAME_CAPACITY)
    + escaped_capacity(BROKER_CAPACITY)
    + escaped_capacity(URL_CAPACITY);

pub const DEFAULT_HOSTNAME: &str = "ESP-32";
pub const DEFAULT_BROKER: &str = "192.168.178.120";
pub const DEFAULT_EXTERNAL_URL: &str = "www.telekom.de";
pub const DEFAULT_PUBLISH_INTERVAL_S: u32 = 10;
pub const DEFAULT_VOLTAGE: u16 = 240;

/// Operator-tunable settings, persisted on every change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// MQTT client id and `sender` field of every publication.
    #[serde(rename = "HOSTNAME")]
    pub hostname: String<HOSTNAME_CAPACITY>,
    #[serde(rename = "MQTT_BROKER")]
    pub broker: String<BROKER_CAPACITY>,
    #[serde(rename = "MQTT_PUBLISH_TIME")]
    pub publish_interval_s: u32,
    /// Target of the `/check` reachability query.
    #[serde(rename = "EXTERNAL_URL")]
    pub external_url: String<URL_CAPACITY>,
    /// Nominal supply voltage. Assumed, never measured.
    #[serde(rename = "VOLTAGE")]
    pub voltage: u16,
    #[serde(rename = "SCT_013_010_SLOPE")]
    pub slope: f32,
    #[serde(rename = "SCT_013_010_OFFSET")]
    pub offset: f32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            hostname: bounded(DEFAULT_HOSTNAME),
            broker: bounded(DEFAULT_BROKER),
            publish_interval_s: DEFAULT_PUBLISH_INTERVAL_S,
            external_url: bounded(DEFAULT_EXTERNAL_URL),
            voltage: DEFAULT_VOLTAGE,
            slope: Calibration::DEFAULT_SLOPE,
            offset: Calibration::DEFAULT_OFFSET,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub const fn calibration(&self) -> Calibration {
        Calibration::new(self.slope, self.offset)
    }

    #[must_use]
    pub fn voltage_volts(&self) -> f32 {
        f32::from(self.voltage)
    }

    #[must_use]
    pub fn publish_interval_ms(&self) -> u64 {
        u64::from(self.publish_interval_s) * 1_000
    }

    /// Serializes the persisted document into `buf`, returning its length.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Encode`] when `buf` is too small.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, ConfigError> {
        serde_json_core::to_slice(self, buf).map_err(|_| ConfigError::Encode)
    }

    /// Parses a persisted document, unescaping string fields. Trailing bytes
    /// after the object are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        let mut scratch = [0u8; URL_CAPACITY];
        let (config, used) = serde_json_core::from_slice_escaped::<Self>(bytes, &mut scratch)
            .map_err(|_| ConfigError::Decode)?;
        if bytes[used..].iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(ConfigError::Decode);
        }
        Ok(config)
    }

    /// Assigns one field from its textual form, keyed by the persisted name.
    ///
    /// The config is untouched when the value does not parse or does not fit.
    pub fn set_field(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
        let invalid = ConfigError::InvalidValue(key);
        match key {
            ConfigKey::Hostname => self.hostname = exact(value).ok_or(invalid)?,
            ConfigKey::Broker => self.broker = exact(value).ok_or(invalid)?,
            ConfigKey::ExternalUrl => self.external_url = exact(value).ok_or(invalid)?,
            ConfigKey::PublishInterval => {
                self.publish_interval_s = value.trim().parse().map_err(|_| invalid)?;
            }
            ConfigKey::Voltage => self.voltage = value.trim().parse().map_err(|_| invalid)?,
            ConfigKey::Slope => self.slope = finite(value).ok_or(invalid)?,
            ConfigKey::Offset => self.offset = finite(value).ok_or(invalid)?,
        }
        Ok(())
    }
}

/// Persisted document keys.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigKey {
    Hostname,
    Broker,
    PublishInterval,
    ExternalUrl,
    Voltage,
    Slope,
    Offset,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::Hostname,
        ConfigKey::Broker,
        ConfigKey::PublishInterval,
        ConfigKey::ExternalUrl,
        ConfigKey::Voltage,
        ConfigKey::Slope,
        ConfigKey::Offset,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ConfigKey::Hostname => "HOSTNAME",
            ConfigKey::Broker => "MQTT_BROKER",
            ConfigKey::PublishInterval => "MQTT_PUBLISH_TIME",
            ConfigKey::ExternalUrl => "EXTERNAL_URL",
            ConfigKey::Voltage => "VOLTAGE",
            ConfigKey::Slope => "SCT_013_010_SLOPE",
            ConfigKey::Offset => "SCT_013_010_OFFSET",
        }
    }

    /// Looks up a key by its persisted name (exact match).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte-level persistence for the configuration document.
pub trait ConfigStore {
    /// Copies the stored document into `buf` and returns its length.
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Replaces the stored document with `document`.
    fn save(&mut self, document: &[u8]) -> Result<(), StorageError>;
}

/// Failures reported by a [`ConfigStore`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageError {
    /// Nothing has been stored yet.
    NotFound,
    /// The stored record is damaged.
    Corrupt,
    /// The document does not fit the store or the caller's buffer.
    TooLarge,
    /// The backing medium reported an error.
    Io,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound => f.write_str("no stored configuration"),
            StorageError::Corrupt => f.write_str("stored record is corrupt"),
            StorageError::TooLarge => f.write_str("document exceeds storage capacity"),
            StorageError::Io => f.write_str("storage i/o failure"),
        }
    }
}

/// Configuration encode/decode/persist failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    Storage(StorageError),
    Encode,
    Decode,
    InvalidValue(ConfigKey),
}

impl From<StorageError> for ConfigError {
    fn from(err: StorageError) -> Self {
        ConfigError::Storage(err)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Storage(err) => write!(f, "storage: {err}"),
            ConfigError::Encode => f.write_str("configuration does not serialize"),
            ConfigError::Decode => f.write_str("configuration document is malformed"),
            ConfigError::InvalidValue(key) => write!(f, "invalid value for {key}"),
        }
    }
}

/// Where the startup configuration came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadOutcome {
    Loaded,
    /// Store empty or unreadable; defaults in effect.
    Defaulted(StorageError),
    /// Store readable but the document did not decode; defaults in effect.
    Rejected,
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded => f.write_str("loaded from storage"),
            LoadOutcome::Defaulted(err) => write!(f, "using defaults ({err})"),
            LoadOutcome::Rejected => f.write_str("using defaults (stored document rejected)"),
        }
    }
}

/// Reads the stored configuration, falling back to defaults on any failure.
pub fn load_or_default<S>(store: &mut S) -> (RuntimeConfig, LoadOutcome)
where
    S: ConfigStore + ?Sized,
{
    let mut buf = [0u8; MAX_DOCUMENT_LEN];
    let len = match store.load(&mut buf) {
        Ok(len) => len.min(buf.len()),
        Err(err) => return (RuntimeConfig::default(), LoadOutcome::Defaulted(err)),
    };

    match RuntimeConfig::decode(&buf[..len]) {
        Ok(config) => (config, LoadOutcome::Loaded),
        Err(_) => (RuntimeConfig::default(), LoadOutcome::Rejected),
    }
}

/// Encodes and stores `config`. On error the previously stored document is
/// whatever the store left in place; the caller must not commit `config`.
pub fn persist<S>(store: &mut S, config: &RuntimeConfig) -> Result<(), ConfigError>
where
    S: ConfigStore + ?Sized,
{
    let mut buf = [0u8; MAX_DOCUMENT_LEN];
    let len = config.encode(&mut buf)?;
    store.save(&buf[..len])?;
    Ok(())
}

/// Copies `value`, truncating at capacity.
fn bounded<const N: usize>(value: &str) -> String<N> {
    let mut out = String::new();
    for ch in value.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Copies `value` only when it fits and is non-empty.
fn exact<const N: usize>(value: &str) -> Option<String<N>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let mut out = String::new();
    out.push_str(value).ok()?;
    Some(out)
}

fn finite(value: &str) -> Option<f32> {
    value.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemoryStore {
        document: heapless::Vec<u8, MAX_DOCUMENT_LEN>,
        fail_save: bool,
    }

    impl MemoryStore {
        fn empty() -> Self {
            Self {
                document: heapless::Vec::new(),
                fail_save: false,
            }
        }

        fn with(document: &[u8]) -> Self {
            let mut store = Self::empty();
            store.document.extend_from_slice(document).unwrap();
            store
        }
    }

    impl ConfigStore for MemoryStore {
        fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
            if self.document.is_empty() {
                return Err(StorageError::NotFound);
            }
            buf[..self.document.len()].copy_from_slice(&self.document);
            Ok(self.document.len())
        }

        fn save(&mut self, document: &[u8]) -> Result<(), StorageError> {
            if self.fail_save {
                return Err(StorageError::Io);
            }
            self.document.clear();
            self.document
                .extend_from_slice(document)
                .map_err(|_| StorageError::TooLarge)
        }
    }

    #[test]
    fn defaults_match_factory_settings() {
        let config = RuntimeConfig::default();
        assert_eq!(config.hostname.as_str(), "ESP-32");
        assert_eq!(config.broker.as_str(), "192.168.178.120");
        assert_eq!(config.publish_interval_s, 10);
        assert_eq!(config.external_url.as_str(), "www.telekom.de");
        assert_eq!(config.voltage, 240);
        assert!((config.slope - 3.53).abs() < f32::EPSILON);
        assert!(config.offset.abs() < f32::EPSILON);
        assert_eq!(config.publish_interval_ms(), 10_000);
    }

    #[test]
    fn empty_store_falls_back_to_defaults() {
        let mut store = MemoryStore::empty();
        let (config, outcome) = load_or_default(&mut store);
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(outcome, LoadOutcome::Defaulted(StorageError::NotFound));
    }

    #[test]
    fn corrupt_document_falls_back_to_defaults() {
        let mut store = MemoryStore::with(b"{\"HOSTNAME\": \"pump\", ");
        let (config, outcome) = load_or_default(&mut store);
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(outcome, LoadOutcome::Rejected);
    }

    #[test]
    fn missing_keys_take_defaults_and_unknown_keys_are_ignored() {
        let mut store = MemoryStore::with(
            br#"{"HOSTNAME":"cellar","VOLTAGE":230,"LEGACY_FLAG":true,"SCT_013_010_SLOPE ":9}"#,
        );
        let (config, outcome) = load_or_default(&mut store);
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(config.hostname.as_str(), "cellar");
        assert_eq!(config.voltage, 230);
        assert_eq!(config.broker.as_str(), DEFAULT_BROKER);
        assert!((config.slope - 3.53).abs() < f32::EPSILON);
    }

    #[test]
    fn failed_save_reports_storage_error() {
        let mut store = MemoryStore::with(br#"{"HOSTNAME":"before"}"#);
        store.fail_save = true;

        let mut config = RuntimeConfig::default();
        config.set_field(ConfigKey::Hostname, "after").unwrap();

        assert_eq!(
            persist(&mut store, &config),
            Err(ConfigError::Storage(StorageError::Io))
        );
        assert_eq!(store.document.as_slice(), br#"{"HOSTNAME":"before"}"#);
    }

    #[test]
    fn set_field_rejects_unparseable_values() {
        let mut config = RuntimeConfig::default();
        assert_eq!(
            config.set_field(ConfigKey::Voltage, "two-thirty"),
            Err(ConfigError::InvalidValue(ConfigKey::Voltage))
        );
        assert_eq!(
            config.set_field(ConfigKey::Slope, "NaN"),
            Err(ConfigError::InvalidValue(ConfigKey::Slope))
        );
        assert_eq!(
            config.set_field(ConfigKey::Hostname, ""),
            Err(ConfigError::InvalidValue(ConfigKey::Hostname))
        );
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn set_field_accepts_fractional_calibration() {
        let mut config = RuntimeConfig::default();
        config.set_field(ConfigKey::Slope, "3.75").unwrap();
        config.set_field(ConfigKey::Offset, "-0.25").unwrap();
        assert!((config.slope - 3.75).abs() < f32::EPSILON);
        assert!((config.offset + 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn keys_resolve_by_persisted_name() {
        for key in ConfigKey::ALL {
            assert_eq!(ConfigKey::from_name(key.name()), Some(key));
        }
        assert_eq!(ConfigKey::from_name("hostname"), None);
    }

    #[test]
    fn escaped_strings_reload_unchanged() {
        let mut store = MemoryStore::empty();
        let mut saved = RuntimeConfig::default();
        saved.set_field(ConfigKey::Hostname, r#"pump "cellar""#).unwrap();
        saved.set_field(ConfigKey::ExternalUrl, r"a\b").unwrap();
        saved.set_field(ConfigKey::Broker, "tab\there").unwrap();

        persist(&mut store, &saved).unwrap();
        let (loaded, outcome) = load_or_default(&mut store);
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(loaded, saved);

        // Saving the reloaded value again must not grow it.
        let first = store.document.clone();
        persist(&mut store, &loaded).unwrap();
        assert_eq!(store.document, first);
    }

    #[test]
    fn fully_escaped_document_fits_buffer() {
        let mut config = RuntimeConfig::default();
        config.hostname.clear();
        config.broker.clear();
        config.external_url.clear();
        for _ in 0..HOSTNAME_CAPACITY {
            config.hostname.push('\u{1}').unwrap();
        }
        for _ in 0..BROKER_CAPACITY {
            config.broker.push('"').unwrap();
        }
        for _ in 0..URL_CAPACITY {
            config.external_url.push('\u{1f}').unwrap();
        }
        config.publish_interval_s = u32::MAX;
        config.voltage = u16::MAX;
        config.slope = -1.234_567_9e-12;
        config.offset = -1.234_567_9e-12;

        let mut buf = [0u8; MAX_DOCUMENT_LEN];
        let len = config.encode(&mut buf).unwrap();
        assert_eq!(RuntimeConfig::decode(&buf[..len]), Ok(config));
    }
}
