use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/ledgerdb.db"),
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory database configuration, mostly useful for tests
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
        }
    }
}

/// Stored type of a business-key column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyColumnType {
    Integer,
    Text,
    Blob,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumnConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_key_column_type")]
    pub column_type: KeyColumnType,
}

fn default_key_column_type() -> KeyColumnType {
    KeyColumnType::Integer
}

/// A multi-version table the trimmer is responsible for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Business key columns, leading column first.
    pub key_columns: Vec<KeyColumnConfig>,
    #[serde(default = "default_height_column")]
    pub height_column: String,
    #[serde(default = "default_latest_column")]
    pub latest_column: String,
}

fn default_height_column() -> String {
    "height".to_string()
}

fn default_latest_column() -> String {
    "latest".to_string()
}

/// Configuration for trimming of multi-version tables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrimConfig {
    /// Enable trimming.
    ///
    /// Env: LEDGERDB__TRIM__ENABLED
    #[serde(default = "default_trim_enabled")]
    pub enabled: bool,

    /// Maximum rollback depth in blocks. History newer than
    /// `current_height - max_rollback` is never trimmed.
    ///
    /// Env: LEDGERDB__TRIM__MAX_ROLLBACK
    #[serde(default = "default_max_rollback")]
    pub max_rollback: i64,

    /// Maximum rows deleted per committed batch. `0` disables batching.
    ///
    /// Env: LEDGERDB__TRIM__BATCH_SIZE
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Height that is never trimmed regardless of its age. Must be negative.
    ///
    /// Env: LEDGERDB__TRIM__RETAINED_HEIGHT
    #[serde(default = "default_retained_height")]
    pub retained_height: i64,

    /// Keep rows at `retained_height`. When disabled every height is
    /// subject to trimming.
    ///
    /// Env: LEDGERDB__TRIM__RETAINED_HEIGHT_ENABLED
    #[serde(default = "default_retained_height_enabled")]
    pub retained_height_enabled: bool,

    /// Per-table trim frequency multipliers. A table with multiplier `n` is
    /// trimmed on every `n`-th opportunity. Unlisted tables use 1.
    #[serde(default)]
    pub frequency: HashMap<String, u32>,

    /// Interval between trim opportunities when running as a service.
    ///
    /// Env: LEDGERDB__TRIM__TICK_INTERVAL
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Query returning the current chain height as a single integer.
    ///
    /// Env: LEDGERDB__TRIM__HEIGHT_QUERY
    #[serde(default = "default_height_query")]
    pub height_query: String,

    /// Tables to trim.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

fn default_trim_enabled() -> bool {
    true
}

fn default_max_rollback() -> i64 {
    800
}

fn default_batch_size() -> usize {
    1000
}

fn default_retained_height() -> i64 {
    -1
}

fn default_retained_height_enabled() -> bool {
    true
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_height_query() -> String {
    "SELECT MAX(height) FROM block".to_string()
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            enabled: default_trim_enabled(),
            max_rollback: default_max_rollback(),
            batch_size: default_batch_size(),
            retained_height: default_retained_height(),
            retained_height_enabled: default_retained_height_enabled(),
            frequency: HashMap::new(),
            tick_interval: default_tick_interval(),
            height_query: default_height_query(),
            tables: Vec::new(),
        }
    }
}

impl TrimConfig {
    /// Frequency multiplier for a table, 1 if unlisted.
    pub fn frequency_for(&self, table: &str) -> u32 {
        self.frequency.get(table).copied().unwrap_or(1)
    }

    /// The always-kept height, `None` when disabled.
    pub fn effective_retained_height(&self) -> Option<i64> {
        self.retained_height_enabled.then_some(self.retained_height)
    }

    /// Batch size as an optional limit; `None` means unbounded.
    pub fn batch_limit(&self) -> Option<usize> {
        (self.batch_size > 0).then_some(self.batch_size)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Database holding the multi-version tables
    pub database: DatabaseConfig,
    /// Trim engine configuration
    pub trim: TrimConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from_path(Path::new("ledgerdb.toml"))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LEDGERDB__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.database.dsn, "sqlite://.data/ledgerdb.db");
        assert!(config.trim.enabled);
        assert_eq!(config.trim.max_rollback, 800);
        assert_eq!(config.trim.batch_size, 1000);
        assert_eq!(config.trim.effective_retained_height(), Some(-1));
        assert_eq!(config.trim.tick_interval, Duration::from_secs(10));
        assert!(config.trim.tables.is_empty());
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.database.dsn, "sqlite://.data/ledgerdb.db");
        assert_eq!(config.trim.frequency_for("account"), 1);
    }

    #[test]
    fn test_toml_tables_and_frequency() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "ledgerdb.toml",
                r#"
                [database]
                dsn = "sqlite::memory:"

                [trim]
                max_rollback = 1440
                batch_size = 0
                tick_interval = "30s"

                [trim.frequency]
                asset_history = 10

                [[trim.tables]]
                name = "account_asset"
                key_columns = [
                    { name = "account_id" },
                    { name = "asset_id", type = "integer" },
                ]

                [[trim.tables]]
                name = "alias"
                key_columns = [{ name = "id" }, { name = "alias_name", type = "text" }]
                latest_column = "is_latest"
                "#,
            )?;

            let config = Configuration::load().expect("configuration loads");
            assert_eq!(config.database.dsn, "sqlite::memory:");
            assert_eq!(config.trim.max_rollback, 1440);
            assert_eq!(config.trim.batch_limit(), None);
            assert_eq!(config.trim.tick_interval, Duration::from_secs(30));
            assert_eq!(config.trim.frequency_for("asset_history"), 10);
            assert_eq!(config.trim.frequency_for("account_asset"), 1);

            assert_eq!(config.trim.tables.len(), 2);
            let alias = &config.trim.tables[1];
            assert_eq!(alias.key_columns[1].column_type, KeyColumnType::Text);
            assert_eq!(alias.height_column, "height");
            assert_eq!(alias.latest_column, "is_latest");
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.set_env("LEDGERDB__DATABASE__DSN", "sqlite://./test.db");
            jail.set_env("LEDGERDB__TRIM__BATCH_SIZE", "250");
            jail.set_env("LEDGERDB__TRIM__ENABLED", "false");

            let config = Configuration::load().expect("configuration loads");
            assert_eq!(config.database.dsn, "sqlite://./test.db");
            assert_eq!(config.trim.batch_limit(), Some(250));
            assert!(!config.trim.enabled);
            Ok(())
        });
    }

    #[test]
    fn test_retained_height_can_be_disabled() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "ledgerdb.toml",
                r#"
                [trim]
                retained_height = -7
                "#,
            )?;

            let config = Configuration::load().expect("configuration loads");
            assert_eq!(config.trim.effective_retained_height(), Some(-7));

            jail.set_env("LEDGERDB__TRIM__RETAINED_HEIGHT_ENABLED", "false");
            let config = Configuration::load().expect("configuration loads");
            assert_eq!(config.trim.retained_height, -7);
            assert_eq!(config.trim.effective_retained_height(), None);
            Ok(())
        });
    }
}
