//! Resource plans for managed data-store services.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::{Value, json};

use shipwright_core::managed::ManagedClass;
use shipwright_core::service::{ManagedInstance, Service, ServiceKind};
use shipwright_core::{Error, Result, labels};

use crate::env::Credentials;
use crate::names;

/// The resource set realizing one managed instance, in apply order.
#[derive(Debug, Clone)]
pub struct ManagedPlan {
    pub workload: StatefulSet,
    pub endpoint: KubeService,
    /// NodePort service binding the primary endpoint externally.
    pub external: KubeService,
    pub console_ingress: Option<Ingress>,
}

fn object_labels(service: &Service) -> Value {
    json!({
        labels::MANAGED_BY: labels::MANAGED_BY_VALUE,
        labels::SERVICE_ID: service.id.to_string(),
    })
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Internal(format!("bad manifest: {e}")))
}

/// Compute the full plan for a managed instance. `external_port` is the
/// allocator-assigned port; `console_host` the generated console domain for
/// classes that have one.
pub fn plan(
    service: &Service,
    instance: &ManagedInstance,
    creds: &Credentials,
    external_port: u16,
    console_host: Option<&str>,
) -> Result<ManagedPlan> {
    Ok(ManagedPlan {
        workload: workload(service, instance, creds)?,
        endpoint: endpoint(service, instance.class)?,
        external: external(service, instance.class, external_port)?,
        console_ingress: console_host
            .map(|host| console_ingress(service, instance.class, host))
            .transpose()?,
    })
}

/// Container env and arguments the class image expects, fed from the
/// platform credentials.
fn class_container(class: ManagedClass, creds: &Credentials) -> (Value, Option<Value>) {
    let env = |pairs: &[(&str, &str)]| -> Value {
        pairs
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect()
    };
    match class {
        ManagedClass::Postgres => (
            env(&[
                ("POSTGRES_DB", &creds.database),
                ("POSTGRES_USER", &creds.user),
                ("POSTGRES_PASSWORD", &creds.password),
                // The mount point itself is not writable by initdb.
                ("PGDATA", "/var/lib/postgresql/data/pgdata"),
            ]),
            None,
        ),
        ManagedClass::MySql => (
            env(&[
                ("MYSQL_DATABASE", &creds.database),
                ("MYSQL_USER", &creds.user),
                ("MYSQL_PASSWORD", &creds.password),
                ("MYSQL_ROOT_PASSWORD", &creds.password),
            ]),
            None,
        ),
        ManagedClass::Redis => (
            json!([]),
            Some(json!(["redis-server", "--requirepass", creds.password])),
        ),
        ManagedClass::MongoDb => (
            env(&[
                ("MONGO_INITDB_ROOT_USERNAME", &creds.user),
                ("MONGO_INITDB_ROOT_PASSWORD", &creds.password),
                ("MONGO_INITDB_DATABASE", &creds.database),
            ]),
            None,
        ),
        ManagedClass::RabbitMq => (
            env(&[
                ("RABBITMQ_DEFAULT_USER", &creds.user),
                ("RABBITMQ_DEFAULT_PASS", &creds.password),
            ]),
            None,
        ),
        ManagedClass::Minio => (
            env(&[
                ("MINIO_ROOT_USER", &creds.user),
                ("MINIO_ROOT_PASSWORD", &creds.password),
            ]),
            Some(json!(["server", "/data", "--console-address", ":9001"])),
        ),
    }
}

fn workload(
    service: &Service,
    instance: &ManagedInstance,
    creds: &Credentials,
) -> Result<StatefulSet> {
    let profile = instance.class.profile();
    let name = names::release_name(service);
    let (container_env, args) = class_container(instance.class, creds);

    let mut ports = vec![json!({ "containerPort": profile.primary_port })];
    if let Some(console) = profile.console {
        ports.push(json!({ "containerPort": console.port }));
    }

    parse(json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": { "name": name, "labels": object_labels(service) },
        "spec": {
            "replicas": 1,
            "serviceName": name,
            "selector": { "matchLabels": { labels::SERVICE_ID: service.id.to_string() } },
            "template": {
                "metadata": { "labels": object_labels(service) },
                "spec": {
                    "containers": [{
                        "name": profile.env_prefix.to_lowercase(),
                        "image": instance.class.image_ref(instance.version.as_deref()),
                        "args": args,
                        "ports": ports,
                        "env": container_env,
                        "volumeMounts": [{ "name": "data", "mountPath": profile.data_path }],
                        "resources": {
                            "limits": {
                                "cpu": service.limits.cpu,
                                "memory": service.limits.memory,
                            },
                        },
                    }],
                },
            },
            "volumeClaimTemplates": [{
                "metadata": { "name": "data" },
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": {
                        "requests": { "storage": format!("{}Gi", instance.storage_gb) },
                    },
                },
            }],
        },
    }))
}

fn endpoint(service: &Service, class: ManagedClass) -> Result<KubeService> {
    let profile = class.profile();
    let mut ports = vec![json!({
        "name": "primary",
        "port": profile.primary_port,
        "targetPort": profile.primary_port,
    })];
    if let Some(console) = profile.console {
        ports.push(json!({
            "name": console.label,
            "port": console.port,
            "targetPort": console.port,
        }));
    }

    parse(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": names::release_name(service), "labels": object_labels(service) },
        "spec": {
            "selector": { labels::SERVICE_ID: service.id.to_string() },
            "ports": ports,
        },
    }))
}

/// The primary endpoint is raw TCP, bound straight to a node port without
/// HTTP termination.
fn external(service: &Service, class: ManagedClass, external_port: u16) -> Result<KubeService> {
    let profile = class.profile();
    parse(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": names::external_name(service), "labels": object_labels(service) },
        "spec": {
            "type": "NodePort",
            "selector": { labels::SERVICE_ID: service.id.to_string() },
            "ports": [{
                "name": "primary",
                "port": profile.primary_port,
                "targetPort": profile.primary_port,
                "nodePort": external_port,
            }],
        },
    }))
}

fn console_ingress(service: &Service, class: ManagedClass, host: &str) -> Result<Ingress> {
    let console = class
        .profile()
        .console
        .ok_or_else(|| Error::Internal(format!("{class} has no console endpoint")))?;
    parse(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": { "name": names::console_name(service), "labels": object_labels(service) },
        "spec": {
            "rules": [{
                "host": host,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {
                            "service": {
                                "name": names::release_name(service),
                                "port": { "number": console.port },
                            },
                        },
                    }],
                },
            }],
        },
    }))
}

/// Whether an update to a managed service needs a redeploy.
///
/// The field list is the documented contract: version, limits, storage
/// size, environment and custom domain affect the live resource set.
/// Cosmetic changes (display name) never trigger one.
pub fn requires_redeploy(current: &Service, updated: &Service) -> bool {
    let (ServiceKind::Managed(cur), ServiceKind::Managed(upd)) = (&current.kind, &updated.kind)
    else {
        return true;
    };
    cur.version != upd.version
        || cur.storage_gb != upd.storage_gb
        || current.limits != updated.limits
        || current.environment_id != updated.environment_id
        || current.custom_domain != updated.custom_domain
}
