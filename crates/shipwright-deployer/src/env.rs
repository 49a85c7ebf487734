//! Per-class environment variable generation for managed services.
//!
//! The generated map is a compatibility surface: variable names are fixed
//! per class, and credential values generated at the first synthesis are
//! reused verbatim on every later one; regenerating them would break
//! every client already holding a connection string.

use std::collections::BTreeMap;
use std::net::IpAddr;

use uuid::Uuid;

use shipwright_core::managed::ManagedClass;
use shipwright_core::service::Service;

use crate::names;

/// Resolved endpoints of a managed instance, input to env generation.
#[derive(Debug, Clone)]
pub struct ManagedEndpoints {
    pub internal_host: String,
    pub internal_port: u16,
    pub external_host: IpAddr,
    pub external_port: u16,
    pub console_url: Option<String>,
}

/// Credentials of a managed instance, generated once per instance.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub database: String,
}

fn fresh_secret() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A previously generated value wins over a fresh one.
fn stable(previous: &BTreeMap<String, String>, key: &str, fresh: impl FnOnce() -> String) -> String {
    previous.get(key).cloned().unwrap_or_else(fresh)
}

/// Extract-or-create the credentials for an instance. Values already in
/// the stored generated env are kept byte-for-byte.
pub fn credentials(service: &Service, class: ManagedClass) -> Credentials {
    let prefix = class.profile().env_prefix;
    let previous = &service.generated_env;
    let name = names::sanitize(&service.name).replace('-', "_");
    Credentials {
        user: stable(previous, &format!("{prefix}_USER"), || name.clone()),
        password: stable(previous, &format!("{prefix}_PASSWORD"), fresh_secret),
        database: stable(previous, &format!("{prefix}_DB"), || name.clone()),
    }
}

/// Build the full generated env map for a managed instance.
pub fn generated_env(
    service: &Service,
    class: ManagedClass,
    endpoints: &ManagedEndpoints,
    creds: &Credentials,
) -> BTreeMap<String, String> {
    let profile = class.profile();
    let p = profile.env_prefix;
    let mut env = BTreeMap::new();

    env.insert(format!("{p}_HOST"), endpoints.internal_host.clone());
    env.insert(format!("{p}_PORT"), endpoints.internal_port.to_string());
    env.insert(
        format!("{p}_EXTERNAL_HOST"),
        endpoints.external_host.to_string(),
    );
    env.insert(
        format!("{p}_EXTERNAL_PORT"),
        endpoints.external_port.to_string(),
    );
    env.insert(format!("{p}_PASSWORD"), creds.password.clone());

    match class {
        ManagedClass::Postgres | ManagedClass::MySql | ManagedClass::MongoDb => {
            env.insert(format!("{p}_USER"), creds.user.clone());
            env.insert(format!("{p}_DB"), creds.database.clone());
        }
        ManagedClass::RabbitMq | ManagedClass::Minio => {
            env.insert(format!("{p}_USER"), creds.user.clone());
        }
        // Redis authenticates with a bare password.
        ManagedClass::Redis => {}
    }

    let (internal_url, external_url) = connection_urls(class, endpoints, creds);
    env.insert(format!("{p}_URL"), internal_url);
    env.insert(format!("{p}_EXTERNAL_URL"), external_url);

    if let Some(console_url) = &endpoints.console_url {
        env.insert(format!("{p}_CONSOLE_URL"), console_url.clone());
    }

    env
}

/// Internal and external connection strings. The external one embeds the
/// host ip and the allocated port, never the internal port.
fn connection_urls(
    class: ManagedClass,
    endpoints: &ManagedEndpoints,
    creds: &Credentials,
) -> (String, String) {
    let internal = (endpoints.internal_host.as_str(), endpoints.internal_port);
    let external = (
        endpoints.external_host.to_string(),
        endpoints.external_port,
    );
    let url = |host: &str, port: u16| -> String {
        match class {
            ManagedClass::Postgres => format!(
                "postgres://{}:{}@{host}:{port}/{}",
                creds.user, creds.password, creds.database
            ),
            ManagedClass::MySql => format!(
                "mysql://{}:{}@{host}:{port}/{}",
                creds.user, creds.password, creds.database
            ),
            ManagedClass::Redis => format!("redis://:{}@{host}:{port}", creds.password),
            ManagedClass::MongoDb => format!(
                "mongodb://{}:{}@{host}:{port}/{}?authSource=admin",
                creds.user, creds.password, creds.database
            ),
            ManagedClass::RabbitMq => {
                format!("amqp://{}:{}@{host}:{port}", creds.user, creds.password)
            }
            ManagedClass::Minio => format!("http://{host}:{port}"),
        }
    };
    (url(internal.0, internal.1), url(&external.0, external.1))
}
