//! The managed-service class catalog.
//!
//! Every provisionable class is a variant of [`ManagedClass`]; port windows,
//! exposure and credential generation all match exhaustively on it, so an
//! unsupported class is unrepresentable rather than a runtime lookup miss.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Width of the external port window each class owns.
pub const PORT_WINDOW: u16 = 200;

/// Highest externally assignable port on the platform (the NodePort range
/// ceiling).
pub const MAX_EXTERNAL_PORT: u16 = 32767;

/// A provisionable data-store class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum ManagedClass {
    #[display("postgres")]
    Postgres,
    #[display("mysql")]
    MySql,
    #[display("redis")]
    Redis,
    #[display("mongodb")]
    MongoDb,
    #[display("rabbitmq")]
    RabbitMq,
    #[display("minio")]
    Minio,
}

/// All supported classes, for range checks and exhaustive tests.
pub const ALL_CLASSES: [ManagedClass; 6] = [
    ManagedClass::Postgres,
    ManagedClass::MySql,
    ManagedClass::Redis,
    ManagedClass::MongoDb,
    ManagedClass::RabbitMq,
    ManagedClass::Minio,
];

/// A secondary HTTP surface a class exposes next to its primary TCP
/// endpoint, e.g. a management console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleEndpoint {
    /// Endpoint label, part of the generated subdomain.
    pub label: &'static str,
    /// Container port the console listens on.
    pub port: u16,
}

/// Static configuration of a managed class, carried as data.
#[derive(Debug, Clone, Copy)]
pub struct ClassProfile {
    /// Container image repository.
    pub image: &'static str,
    /// Image tag used when the service does not pin a version.
    pub default_version: &'static str,
    /// Port the class's primary endpoint listens on inside the container.
    pub primary_port: u16,
    /// Start of this class's external port window. Windows are disjoint
    /// across classes and [`PORT_WINDOW`] wide.
    pub external_base: u16,
    /// Mount path of the persistent data volume.
    pub data_path: &'static str,
    /// Prefix of every generated environment variable for the class.
    pub env_prefix: &'static str,
    /// URL scheme of the connection string, if the class has one.
    pub scheme: Option<&'static str>,
    /// Secondary HTTP endpoint, if the class has one.
    pub console: Option<ConsoleEndpoint>,
}

impl ManagedClass {
    pub fn profile(self) -> ClassProfile {
        match self {
            ManagedClass::Postgres => ClassProfile {
                image: "postgres",
                default_version: "16",
                primary_port: 5432,
                external_base: 30000,
                data_path: "/var/lib/postgresql/data",
                env_prefix: "POSTGRES",
                scheme: Some("postgres"),
                console: None,
            },
            ManagedClass::MySql => ClassProfile {
                image: "mysql",
                default_version: "8.4",
                primary_port: 3306,
                external_base: 30200,
                data_path: "/var/lib/mysql",
                env_prefix: "MYSQL",
                scheme: Some("mysql"),
                console: None,
            },
            ManagedClass::Redis => ClassProfile {
                image: "redis",
                default_version: "7.4",
                primary_port: 6379,
                external_base: 30400,
                data_path: "/data",
                env_prefix: "REDIS",
                scheme: Some("redis"),
                console: None,
            },
            ManagedClass::MongoDb => ClassProfile {
                image: "mongo",
                default_version: "8.0",
                primary_port: 27017,
                external_base: 30600,
                data_path: "/data/db",
                env_prefix: "MONGO",
                scheme: Some("mongodb"),
                console: None,
            },
            ManagedClass::RabbitMq => ClassProfile {
                image: "rabbitmq",
                default_version: "4.0-management",
                primary_port: 5672,
                external_base: 30800,
                data_path: "/var/lib/rabbitmq",
                env_prefix: "RABBITMQ",
                scheme: Some("amqp"),
                console: Some(ConsoleEndpoint {
                    label: "console",
                    port: 15672,
                }),
            },
            ManagedClass::Minio => ClassProfile {
                image: "minio/minio",
                default_version: "latest",
                primary_port: 9000,
                external_base: 31000,
                data_path: "/data",
                env_prefix: "MINIO",
                scheme: None,
                console: Some(ConsoleEndpoint {
                    label: "console",
                    port: 9001,
                }),
            },
        }
    }

    /// Full image reference for an instance, honoring its version pin.
    pub fn image_ref(self, version: Option<&str>) -> String {
        let profile = self.profile();
        format!(
            "{}:{}",
            profile.image,
            version.unwrap_or(profile.default_version)
        )
    }
}

impl std::str::FromStr for ManagedClass {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(ManagedClass::Postgres),
            "mysql" => Ok(ManagedClass::MySql),
            "redis" => Ok(ManagedClass::Redis),
            "mongodb" => Ok(ManagedClass::MongoDb),
            "rabbitmq" => Ok(ManagedClass::RabbitMq),
            "minio" => Ok(ManagedClass::Minio),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown managed class: {other}"
            ))),
        }
    }
}
