//! Docker daemon access
//!
//! Thin wrapper over the bollard client: container listing, inspection,
//! and the filtered event stream the controller consumes. All results are
//! flattened into plain structs so the rest of the daemon never touches
//! bollard's optional-heavy models.

use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{EventMessage, MountPointTypeEnum, RestartPolicyNameEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::Stream;
use std::collections::HashMap;

use crate::app::VolumeMapping;
use crate::error::Result;

/// Container ids are shortened to the familiar 12-character prefix.
pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

/// A container as seen in a listing.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct ContainerSummaryInfo {
    /// 12-character id prefix
    pub id: String,
    pub name: String,
    pub image: String,
    /// Coarse state string from the daemon (`running`, `exited`, ...)
    pub state: String,
    /// containerPort -> hostPort, bound ports only
    pub ports: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub network_mode: String,
}

/// Full container details from an inspect call.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct ContainerDetails {
    /// 12-character id prefix
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    /// containerPort -> hostPort, bound ports only
    pub ports: HashMap<String, String>,
    pub env: Vec<String>,
    pub mounts: Vec<VolumeMapping>,
    pub restart_policy: String,
    pub network_mode: String,
    pub running: bool,
}

impl ContainerDetails {
    /// Host port of the lowest-numbered bound container port. The listing
    /// order of the daemon's port map is not stable, so "first" is defined
    /// numerically.
    pub fn first_host_port(&self) -> Option<&str> {
        self.ports
            .iter()
            .min_by_key(|(cport, _)| cport.parse::<u32>().unwrap_or(u32::MAX))
            .map(|(_, hport)| hport.as_str())
    }
}

/// A container lifecycle event.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    /// `start`, `stop`, `die`, or `destroy`
    pub action: String,
    /// 12-character id prefix
    pub id: String,
    pub name: String,
}

impl ContainerEvent {
    /// Flattens a raw daemon event; `None` when the needed fields are
    /// absent.
    pub fn from_message(event: &EventMessage) -> Option<Self> {
        let action = event.action.as_deref()?.to_string();
        let actor = event.actor.as_ref()?;
        let id = short_id(actor.id.as_deref()?).to_string();
        let name = actor
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get("name"))
            .cloned()
            .unwrap_or_default();
        Some(Self { action, id, name })
    }
}

/// Handle to the Docker daemon.
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects to the daemon socket with a 120 second request timeout.
    pub fn connect(socket_path: &str) -> Result<Self> {
        let docker =
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { docker })
    }

    /// Verifies the daemon is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Lists all containers, running or not.
    pub async fn list_all(&self) -> Result<Vec<ContainerSummaryInfo>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        let mut result = Vec::with_capacity(containers.len());
        for c in containers {
            let id = short_id(c.id.as_deref().unwrap_or_default()).to_string();
            let name = c
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default();

            let mut ports = HashMap::new();
            for port in c.ports.unwrap_or_default() {
                if let Some(public) = port.public_port {
                    ports.insert(port.private_port.to_string(), public.to_string());
                }
            }

            result.push(ContainerSummaryInfo {
                id,
                name,
                image: c.image.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
                ports,
                labels: c.labels.unwrap_or_default(),
                network_mode: c
                    .host_config
                    .and_then(|hc| hc.network_mode)
                    .unwrap_or_default(),
            });
        }

        Ok(result)
    }

    /// Inspects one container.
    pub async fn inspect(&self, container_id: &str) -> Result<ContainerDetails> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;

        let config = inspect.config.unwrap_or_default();
        let host_config = inspect.host_config.unwrap_or_default();

        let mut ports = HashMap::new();
        for (port_proto, bindings) in host_config.port_bindings.unwrap_or_default() {
            let cport = port_proto.split('/').next().unwrap_or(&port_proto);
            let hport = bindings
                .unwrap_or_default()
                .into_iter()
                .filter_map(|b| b.host_port)
                .find(|p| !p.is_empty());
            if let Some(hport) = hport {
                ports.insert(cport.to_string(), hport);
            }
        }

        let mounts = inspect
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| VolumeMapping {
                source: m.source.unwrap_or_default(),
                destination: m.destination.unwrap_or_default(),
                read_only: !m.rw.unwrap_or(true),
                kind: mount_kind(m.typ),
            })
            .collect();

        let restart_policy = host_config
            .restart_policy
            .and_then(|p| p.name)
            .map(restart_policy_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "unless-stopped".to_string());

        Ok(ContainerDetails {
            id: short_id(inspect.id.as_deref().unwrap_or_default()).to_string(),
            name: inspect
                .name
                .as_deref()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: config.image.clone().unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            ports,
            env: config.env.unwrap_or_default(),
            mounts,
            restart_policy,
            network_mode: host_config.network_mode.unwrap_or_default(),
            running: inspect
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
        })
    }

    /// Subscribes to container lifecycle events. Callers create a fresh
    /// stream after an error.
    pub fn events(
        &self,
    ) -> impl Stream<Item = std::result::Result<EventMessage, bollard::errors::Error>> {
        let mut filters = HashMap::new();
        filters.insert("type", vec!["container"]);
        filters.insert("event", vec!["start", "stop", "die", "destroy"]);

        let options = EventsOptions {
            since: None,
            until: None,
            filters,
        };
        self.docker.events(Some(options))
    }
}

fn mount_kind(typ: Option<MountPointTypeEnum>) -> String {
    match typ {
        Some(MountPointTypeEnum::BIND) => "bind".to_string(),
        Some(MountPointTypeEnum::VOLUME) => "volume".to_string(),
        Some(MountPointTypeEnum::TMPFS) => "tmpfs".to_string(),
        Some(MountPointTypeEnum::NPIPE) => "npipe".to_string(),
        Some(MountPointTypeEnum::CLUSTER) => "cluster".to_string(),
        _ => String::new(),
    }
}

fn restart_policy_name(name: RestartPolicyNameEnum) -> String {
    match name {
        RestartPolicyNameEnum::NO => "no".to_string(),
        RestartPolicyNameEnum::ALWAYS => "always".to_string(),
        RestartPolicyNameEnum::UNLESS_STOPPED => "unless-stopped".to_string(),
        RestartPolicyNameEnum::ON_FAILURE => "on-failure".to_string(),
        RestartPolicyNameEnum::EMPTY => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::EventActor;

    #[test]
    fn test_short_id() {
        assert_eq!(
            short_id("abc123def456789000000000000000000000"),
            "abc123def456"
        );
        assert_eq!(short_id("short"), "short");
        assert_eq!(short_id(""), "");
    }

    #[test]
    fn test_event_from_message() {
        let event = EventMessage {
            action: Some("start".to_string()),
            actor: Some(EventActor {
                id: Some("abc123def456789000000000000000000000".to_string()),
                attributes: Some(HashMap::from([(
                    "name".to_string(),
                    "memos".to_string(),
                )])),
            }),
            ..Default::default()
        };

        let parsed = ContainerEvent::from_message(&event).unwrap();
        assert_eq!(parsed.action, "start");
        assert_eq!(parsed.id, "abc123def456");
        assert_eq!(parsed.name, "memos");
    }

    #[test]
    fn test_event_from_message_missing_fields() {
        assert!(ContainerEvent::from_message(&EventMessage::default()).is_none());

        let no_actor_id = EventMessage {
            action: Some("start".to_string()),
            actor: Some(EventActor::default()),
            ..Default::default()
        };
        assert!(ContainerEvent::from_message(&no_actor_id).is_none());
    }

    #[test]
    fn test_first_host_port_is_numerically_first() {
        let details = ContainerDetails {
            id: "abc123def456".to_string(),
            name: "web".to_string(),
            image: "nginx".to_string(),
            labels: HashMap::new(),
            ports: HashMap::from([
                ("9000".to_string(), "19000".to_string()),
                ("80".to_string(), "8080".to_string()),
                ("443".to_string(), "8443".to_string()),
            ]),
            env: vec![],
            mounts: vec![],
            restart_policy: "unless-stopped".to_string(),
            network_mode: "bridge".to_string(),
            running: true,
        };

        assert_eq!(details.first_host_port(), Some("8080"));
    }

    #[test]
    fn test_mount_kind_mapping() {
        assert_eq!(mount_kind(Some(MountPointTypeEnum::BIND)), "bind");
        assert_eq!(mount_kind(Some(MountPointTypeEnum::VOLUME)), "volume");
        assert_eq!(mount_kind(None), "");
    }
}
