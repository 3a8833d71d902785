//! Connection descriptors and the connection registry.
//!
//! This module defines the validated configuration the core consumes: one
//! [`ConnectionDescriptor`] per logical database, server-wide
//! [`ServerSettings`], and a [`ConnectionRegistry`] grouping them under
//! names. Parsing configuration files is the job of an outer layer; the
//! registry only accepts already-structured values and validates them.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    MySql,
    Postgres,
}

impl EngineKind {
    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
        }
    }

    /// Get the conventional port for this engine.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Postgres => 5432,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Validated description of how to reach one database.
///
/// Immutable once handed to an adapter. The secret is masked in `Debug`
/// output and skipped entirely when serializing.
#[derive(Clone, Serialize)]
pub struct ConnectionDescriptor {
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub secret: String,
    pub database: Option<String>,
    /// Inactive descriptors are kept in the registry but refuse resolution.
    pub active: bool,
}

impl ConnectionDescriptor {
    /// Create a validated descriptor. The database name is optional; use
    /// [`with_database`](Self::with_database) to target a specific one.
    pub fn new(
        engine: EngineKind,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        secret: impl Into<String>,
    ) -> DbResult<Self> {
        let host = host.into();
        let user = user.into();

        if host.is_empty() {
            return Err(DbError::validation("Connection host cannot be empty"));
        }
        if user.is_empty() {
            return Err(DbError::validation("Connection user cannot be empty"));
        }
        if port == 0 {
            return Err(DbError::validation("Connection port cannot be 0"));
        }

        Ok(Self {
            engine,
            host,
            port,
            user,
            secret: secret.into(),
            database: None,
            active: true,
        })
    }

    /// Target a specific database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Mark the descriptor inactive.
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Display-safe endpoint string (no credentials).
    pub fn endpoint(&self) -> String {
        match &self.database {
            Some(db) => format!("{}:{}/{}", self.host, self.port, db),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("secret", &"****")
            .field("database", &self.database)
            .field("active", &self.active)
            .finish()
    }
}

/// Server-wide settings supplied by the configuration layer.
///
/// The timeout values are carried for the benefit of callers; this core
/// does not propagate deadlines into connect or execute calls.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    /// Maximum adapter instances per logical connection name.
    pub pool_size: usize,
    pub pool_timeout_secs: u64,
    pub query_timeout_secs: u64,
    /// When true, `delete_records` demands an explicit confirm flag.
    pub confirm_destructive_operations: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            pool_size: 5,
            pool_timeout_secs: 30,
            query_timeout_secs: 60,
            confirm_destructive_operations: true,
        }
    }
}

impl ServerSettings {
    /// Validate settings and return an error describing the first problem.
    pub fn validate(&self) -> DbResult<()> {
        if self.pool_size == 0 {
            return Err(DbError::validation("pool_size must be greater than 0"));
        }
        if self.pool_timeout_secs == 0 || self.query_timeout_secs == 0 {
            return Err(DbError::validation("timeouts must be greater than 0"));
        }
        Ok(())
    }
}

/// Summary of a registered connection, safe to expose to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: Option<String>,
    pub active: bool,
    pub is_default: bool,
}

/// Named collection of validated descriptors plus server settings.
///
/// This is the context object handed to [`CrudService`](crate::CrudService)
/// at construction; there is no global registry instance.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, ConnectionDescriptor>,
    default_connection: Option<String>,
    settings: ServerSettings,
}

impl ConnectionRegistry {
    /// Create an empty registry with the given settings.
    pub fn new(settings: ServerSettings) -> DbResult<Self> {
        settings.validate()?;
        Ok(Self {
            connections: HashMap::new(),
            default_connection: None,
            settings,
        })
    }

    /// Register a descriptor under a name. The first registered connection
    /// becomes the default.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        descriptor: ConnectionDescriptor,
    ) -> DbResult<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(DbError::validation("Connection name cannot be empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DbError::validation(format!(
                "Connection name contains invalid characters: {}",
                name
            )));
        }

        info!(
            connection = %name,
            engine = %descriptor.engine,
            endpoint = %descriptor.endpoint(),
            "Registered connection"
        );

        if self.default_connection.is_none() {
            self.default_connection = Some(name.clone());
        }
        self.connections.insert(name, descriptor);
        Ok(())
    }

    /// Remove a connection. Returns true if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.connections.remove(name).is_some();
        if removed && self.default_connection.as_deref() == Some(name) {
            self.default_connection = None;
        }
        removed
    }

    /// Set the default connection name.
    pub fn set_default(&mut self, name: &str) -> DbResult<()> {
        if !self.connections.contains_key(name) {
            return Err(DbError::unknown_connection(name));
        }
        debug!(connection = %name, "Default connection set");
        self.default_connection = Some(name.to_string());
        Ok(())
    }

    /// Get the default connection name.
    pub fn default_connection(&self) -> Option<&str> {
        self.default_connection.as_deref()
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&ConnectionDescriptor> {
        self.connections.get(name)
    }

    /// Resolve a connection by name, falling back to the default when the
    /// name is omitted. Inactive descriptors refuse resolution.
    pub fn resolve(&self, name: Option<&str>) -> DbResult<(&str, &ConnectionDescriptor)> {
        let name = match name {
            Some(n) => n,
            None => self
                .default_connection
                .as_deref()
                .ok_or_else(|| DbError::validation("No default connection configured"))?,
        };

        let (key, descriptor) = self
            .connections
            .get_key_value(name)
            .ok_or_else(|| DbError::unknown_connection(name))?;

        if !descriptor.active {
            return Err(DbError::validation(format!(
                "Connection '{}' is disabled",
                name
            )));
        }

        Ok((key.as_str(), descriptor))
    }

    /// List all registered connections without secrets.
    pub fn list(&self) -> Vec<ConnectionSummary> {
        let mut summaries: Vec<ConnectionSummary> = self
            .connections
            .iter()
            .map(|(name, d)| ConnectionSummary {
                name: name.clone(),
                engine: d.engine,
                host: d.host.clone(),
                port: d.port,
                user: d.user.clone(),
                database: d.database.clone(),
                active: d.active,
                is_default: self.default_connection.as_deref() == Some(name),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new(EngineKind::MySql, "localhost", 3306, "root", "hunter2")
            .unwrap()
            .with_database("shop")
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(ConnectionDescriptor::new(EngineKind::MySql, "", 3306, "root", "x").is_err());
        assert!(ConnectionDescriptor::new(EngineKind::MySql, "localhost", 0, "root", "x").is_err());
        assert!(ConnectionDescriptor::new(EngineKind::Postgres, "localhost", 5432, "", "x").is_err());
    }

    #[test]
    fn test_descriptor_debug_masks_secret() {
        let debug = format!("{:?}", descriptor());
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_descriptor_serialize_skips_secret() {
        let json = serde_json::to_string(&descriptor()).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("secret"));
        assert!(json.contains("\"engine\":\"mysql\""));
    }

    #[test]
    fn test_descriptor_endpoint() {
        assert_eq!(descriptor().endpoint(), "localhost:3306/shop");
    }

    #[test]
    fn test_engine_kind_defaults() {
        assert_eq!(EngineKind::MySql.default_port(), 3306);
        assert_eq!(EngineKind::Postgres.default_port(), 5432);
        assert_eq!(EngineKind::Postgres.to_string(), "PostgreSQL");
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ServerSettings::default();
        assert_eq!(settings.pool_size, 5);
        assert!(settings.confirm_destructive_operations);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_rejects_zero_pool() {
        let settings = ServerSettings {
            pool_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_registry_first_connection_is_default() {
        let mut registry = ConnectionRegistry::new(ServerSettings::default()).unwrap();
        registry.add("shop", descriptor()).unwrap();
        assert_eq!(registry.default_connection(), Some("shop"));

        let (name, d) = registry.resolve(None).unwrap();
        assert_eq!(name, "shop");
        assert_eq!(d.database.as_deref(), Some("shop"));
    }

    #[test]
    fn test_registry_rejects_invalid_names() {
        let mut registry = ConnectionRegistry::new(ServerSettings::default()).unwrap();
        assert!(registry.add("", descriptor()).is_err());
        assert!(registry.add("bad name", descriptor()).is_err());
        assert!(registry.add("ok-name_1", descriptor()).is_ok());
    }

    #[test]
    fn test_registry_unknown_connection() {
        let registry = ConnectionRegistry::new(ServerSettings::default()).unwrap();
        let err = registry.resolve(Some("missing")).unwrap_err();
        assert!(matches!(err, DbError::UnknownConnection { .. }));
    }

    #[test]
    fn test_registry_inactive_refuses_resolution() {
        let mut registry = ConnectionRegistry::new(ServerSettings::default()).unwrap();
        registry.add("off", descriptor().deactivated()).unwrap();
        let err = registry.resolve(Some("off")).unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
    }

    #[test]
    fn test_registry_list_has_no_secret() {
        let mut registry = ConnectionRegistry::new(ServerSettings::default()).unwrap();
        registry.add("shop", descriptor()).unwrap();
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_default);
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_registry_remove_clears_default() {
        let mut registry = ConnectionRegistry::new(ServerSettings::default()).unwrap();
        registry.add("shop", descriptor()).unwrap();
        assert!(registry.remove("shop"));
        assert_eq!(registry.default_connection(), None);
        assert!(!registry.remove("shop"));
    }
}
