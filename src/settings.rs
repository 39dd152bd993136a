use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Server {
    pub bind: String,
    /// Glob handed to `tera::Tera::new`.
    pub templates: String,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub path: String,
    pub temporary: bool,
}

impl Database {
    pub fn open(&self) -> sled::Result<sled::Db> {
        let config = sled::Config::new().temporary(self.temporary);
        if self.temporary {
            config.open()
        } else {
            config.path(&self.path).open()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Omdb {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub database: Database,
    pub omdb: Omdb,
}

impl Settings {
    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.bind", "127.0.0.1:8080")?
            .set_default(
                "server.templates",
                concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"),
            )?
            .set_default("database.path", "movieweb.db")?
            .set_default("database.temporary", false)?
            .set_default("omdb.base_url", "http://www.omdbapi.com/")?
            .set_default(
                "omdb.api_key",
                std::env::var("OMDB_API_KEY").unwrap_or_default(),
            )
    }

    /// Defaults, then `movieweb.toml`, then `MOVIEWEB__SECTION__KEY` variables.
    pub fn new() -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::with_name("movieweb").required(false))
            .add_source(Environment::with_prefix("MOVIEWEB").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings: Settings = Settings::defaults()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.server.bind, "127.0.0.1:8080");
        assert!(settings.server.templates.ends_with("/templates/**/*"));
        assert_eq!(settings.database.path, "movieweb.db");
        assert!(!settings.database.temporary);
        assert_eq!(settings.omdb.base_url, "http://www.omdbapi.com/");
    }

    #[test]
    fn temporary_database() {
        let database = Database {
            path: "unused.db".to_owned(),
            temporary: true,
        };
        let db = database.open().unwrap();
        assert!(db.is_empty());
        assert!(!std::path::Path::new("unused.db").exists());
    }
}
