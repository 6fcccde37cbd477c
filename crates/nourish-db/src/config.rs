use std::env;

/// Database configuration.
///
/// Reads from the `NOURISH_DATABASE_URL` environment variable, falling back
/// to `postgresql://localhost:5432/nourish` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/nourish";

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        let database_url = env::var("NOURISH_DATABASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// The database name: the last path segment of the URL, without any
    /// query string.
    pub fn database_name(&self) -> Option<&str> {
        self.database_url
            .rsplit('/')
            .next()
            .map(|s| s.split('?').next().unwrap_or(s))
            .filter(|s| !s.is_empty() && !s.contains(':'))
    }

    /// URL of the `postgres` maintenance database on the same server.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => format!("{}/postgres", &self.database_url[..pos]),
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
