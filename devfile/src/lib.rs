//! Devfile implements the subset of the Devfile schema this project consumes: container
//! components, commands grouped by kind, endpoints, and inline Kubernetes components.
//!
//! Parsing and validation are intentionally narrow — a full Devfile schema implementation is
//! out of scope here, only the fields the reconciler actually reads.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

pub mod command;

pub use command::{Command, CommandGroup, CommandGroupKind};

/// Error is the set of failures that can occur while parsing or interpreting a Devfile.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Parse indicates the YAML document could not be deserialized.
    #[error("parsing devfile: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// Validate indicates the parsed document failed a structural check.
    #[error("validating devfile: {0}")]
    Validate(String),
    /// NoCommandFound indicates no command of the requested kind exists.
    #[error("no command found for group {0:?}")]
    NoCommandFound(CommandGroupKind),
    /// NoDefaultCommandFound indicates several commands exist but none is marked default.
    #[error("no default command found for group {0:?}")]
    NoDefaultCommandFound(CommandGroupKind),
    /// MoreThanOneDefaultCommand indicates more than one command of the kind is marked default.
    #[error("more than one default command found for group {0:?}")]
    MoreThanOneDefaultCommand(CommandGroupKind),
}

/// Result is the typedef used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Devfile is the parsed, validated, immutable representation of a `devfile.yaml` document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Devfile {
    /// SchemaVersion is the Devfile schema version the document declares.
    #[serde(default)]
    pub schema_version: String,
    /// Metadata carries the component's own name, separate from the cluster component name.
    #[serde(default)]
    pub metadata: Metadata,
    /// Components are the container and inline-Kubernetes components declared.
    #[serde(default)]
    pub components: Vec<Component>,
    /// Commands are the build/run/test/debug commands declared.
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Events lists lifecycle hooks; only `preStart` is consumed, to derive init containers.
    #[serde(default)]
    pub events: Events,
}

/// Metadata is the Devfile's own `metadata` block.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Name is the Devfile project's own name, not the cluster component name.
    #[serde(default)]
    pub name: String,
}

/// Events lists the Devfile's lifecycle hooks.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Events {
    /// PreStart lists command ids run before the main containers start.
    ///
    /// Apply commands referenced here target components that are synthesized as init
    /// containers rather than as sidecars of the main deployment.
    #[serde(default)]
    pub pre_start: Vec<String>,
}

/// Component is a named entry in the Devfile's `components` list.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Component {
    /// Name identifies the component; referenced by commands and by [`Events::pre_start`].
    pub name: String,
    /// Container holds the container definition, if this component is a container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerComponent>,
    /// Kubernetes holds the inline-manifest definition, if this component is a Kubernetes
    /// component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesComponent>,
}

/// ContainerComponent describes a container to run as part of the workload.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerComponent {
    /// Image is the container image. If omitted, the orchestrator's default image is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Command is the container entrypoint override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Args is the container argv override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// MemoryLimit is a Kubernetes quantity string, e.g. `"512Mi"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    /// MemoryRequest is a Kubernetes quantity string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    /// CpuLimit is a Kubernetes quantity string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    /// CpuRequest is a Kubernetes quantity string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    /// MountSources indicates the project source tree should be mounted, at
    /// [`ContainerComponent::source_mapping`] or `/projects` by default.
    #[serde(default)]
    pub mount_sources: bool,
    /// SourceMapping overrides the in-container path sources are mounted at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_mapping: Option<String>,
    /// Env is the list of environment variables to set on the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Endpoints are the ports the container exposes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,
}

/// EnvVar is a single environment variable entry.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct EnvVar {
    /// Name is the environment variable's name.
    pub name: String,
    /// Value is the environment variable's value.
    pub value: String,
}

/// Endpoint is a single declared container port.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Name identifies the endpoint.
    pub name: String,
    /// TargetPort is the port number inside the container.
    pub target_port: u16,
}

/// KubernetesComponent is an inline Kubernetes manifest component.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct KubernetesComponent {
    /// Inlined is the literal YAML manifest. A `uri` reference (fetched externally) is not
    /// supported; Devfiles that only set `uri` are rejected at validation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inlined: Option<String>,
}

impl Devfile {
    /// Parse reads and validates a Devfile document from its raw YAML text.
    pub fn parse(yaml: &str) -> Result<Self> {
        let devfile: Devfile = serde_yaml::from_str(yaml)?;
        devfile.validate()?;
        Ok(devfile)
    }

    /// Validate checks structural invariants the rest of the crate assumes hold: component
    /// names are unique, every component has exactly one of `container`/`kubernetes` set, and
    /// commands reference components that exist.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for c in &self.components {
            if !seen.insert(c.name.as_str()) {
                return Err(Error::Validate(format!("duplicate component name {:?}", c.name)));
            }
            match (&c.container, &c.kubernetes) {
                (Some(_), None) | (None, Some(_)) => {}
                (Some(_), Some(_)) => {
                    return Err(Error::Validate(format!(
                        "component {:?} sets both container and kubernetes",
                        c.name
                    )));
                }
                (None, None) => {
                    return Err(Error::Validate(format!(
                        "component {:?} sets neither container nor kubernetes",
                        c.name
                    )));
                }
            }
            if let Some(k) = &c.kubernetes {
                if k.inlined.is_none() {
                    return Err(Error::Validate(format!(
                        "kubernetes component {:?} has no inlined manifest (uri sources are unsupported)",
                        c.name
                    )));
                }
            }
        }
        let names: HashSet<&str> = self.components.iter().map(|c| c.name.as_str()).collect();
        for cmd in &self.commands {
            if let Some(target) = cmd.target_component() {
                if !names.contains(target) {
                    return Err(Error::Validate(format!(
                        "command {:?} references unknown component {:?}",
                        cmd.id, target
                    )));
                }
            }
        }
        for id in &self.events.pre_start {
            if !self.commands.iter().any(|c| &c.id == id) {
                return Err(Error::Validate(format!(
                    "preStart references unknown command {id:?}"
                )));
            }
        }
        Ok(())
    }

    /// Containers iterates over the container components, in declaration order.
    pub fn containers(&self) -> impl Iterator<Item = (&str, &ContainerComponent)> {
        self.components
            .iter()
            .filter_map(|c| c.container.as_ref().map(|cc| (c.name.as_str(), cc)))
    }

    /// InitContainerNames returns the names of container components referenced by an Apply
    /// command listed in `events.preStart`.
    pub fn init_container_names(&self) -> HashSet<&str> {
        let by_id: HashMap<&str, &Command> =
            self.commands.iter().map(|c| (c.id.as_str(), c)).collect();
        self.events
            .pre_start
            .iter()
            .filter_map(|id| by_id.get(id.as_str()))
            .filter_map(|cmd| cmd.apply.as_ref())
            .map(|apply| apply.component.as_str())
            .filter(|name| self.containers().any(|(n, _)| n == *name))
            .collect()
    }

    /// KubernetesComponentsToPush returns the inline Kubernetes components whose name is NOT
    /// referenced by any Exec or Apply command — components referenced by commands are
    /// considered managed by command execution, not by pre-creation.
    pub fn kubernetes_components_to_push(&self) -> Vec<&Component> {
        let mut by_name: HashMap<&str, &Component> = self
            .components
            .iter()
            .filter(|c| c.kubernetes.is_some())
            .map(|c| (c.name.as_str(), c))
            .collect();
        for cmd in &self.commands {
            if let Some(target) = cmd.target_component() {
                by_name.remove(target);
            }
        }
        let mut out: Vec<&Component> = by_name.into_values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// CommandsByKind returns every command whose group is the requested kind, in declaration
    /// order.
    pub fn commands_by_kind(&self, kind: CommandGroupKind) -> Vec<&Command> {
        self.commands
            .iter()
            .filter(|c| c.group().map(|g| g.kind) == Some(kind))
            .collect()
    }

    /// DefaultCommand resolves the single command to run for a command-group kind.
    ///
    /// Zero commands of the kind fails with [`Error::NoCommandFound`]. Exactly one command is
    /// returned even if it is not marked default. More than one requires exactly one to be
    /// marked default, else [`Error::NoDefaultCommandFound`] or
    /// [`Error::MoreThanOneDefaultCommand`].
    pub fn default_command(&self, kind: CommandGroupKind) -> Result<&Command> {
        let group_cmds = self.commands_by_kind(kind);
        match group_cmds.len() {
            0 => Err(Error::NoCommandFound(kind)),
            1 => Ok(group_cmds[0]),
            _ => {
                let mut found: Option<&Command> = None;
                for cmd in group_cmds {
                    if cmd.group().is_some_and(|g| g.is_default) {
                        if found.is_some() {
                            return Err(Error::MoreThanOneDefaultCommand(kind));
                        }
                        found = Some(cmd);
                    }
                }
                found.ok_or(Error::NoDefaultCommandFound(kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn parse(yaml: &str) -> Devfile {
        Devfile::parse(yaml).expect("devfile parses")
    }

    #[test]
    fn parses_single_container() {
        let d = parse(indoc! {r#"
            schemaVersion: 2.2.0
            metadata:
              name: my-go-app
            components:
              - name: runtime
                container:
                  image: golang:1.21
                  memoryLimit: 512Mi
                  mountSources: true
        "#});
        let (name, c) = d.containers().next().expect("one container");
        assert_eq!(name, "runtime");
        assert_eq!(c.memory_limit.as_deref(), Some("512Mi"));
    }

    #[test]
    fn rejects_duplicate_component_names() {
        let err = Devfile::parse(indoc! {r#"
            schemaVersion: 2.2.0
            components:
              - name: runtime
                container:
                  image: golang:1.21
              - name: runtime
                container:
                  image: golang:1.21
        "#})
        .unwrap_err();
        assert!(matches!(err, Error::Validate(_)));
    }

    #[test]
    fn default_command_law_single_command_wins_regardless_of_default_flag() {
        let d = parse(indoc! {r#"
            schemaVersion: 2.2.0
            components:
              - name: runtime
                container:
                  image: golang:1.21
            commands:
              - id: build
                exec:
                  component: runtime
                  commandLine: go build ./...
                  group:
                    kind: build
                    isDefault: false
        "#});
        let cmd = d.default_command(CommandGroupKind::Build).unwrap();
        assert_eq!(cmd.id, "build");
    }

    #[test]
    fn default_command_law_picks_the_marked_default() {
        let d = parse(indoc! {r#"
            schemaVersion: 2.2.0
            components:
              - name: runtime
                container:
                  image: golang:1.21
            commands:
              - id: build
                exec:
                  component: runtime
                  commandLine: go build ./...
                  group:
                    kind: build
                    isDefault: true
              - id: build-verbose
                exec:
                  component: runtime
                  commandLine: go build -v ./...
                  group:
                    kind: build
                    isDefault: false
        "#});
        let cmd = d.default_command(CommandGroupKind::Build).unwrap();
        assert_eq!(cmd.id, "build");
    }

    #[test]
    fn default_command_law_fails_on_more_than_one_default() {
        let d = parse(indoc! {r#"
            schemaVersion: 2.2.0
            components:
              - name: runtime
                container:
                  image: golang:1.21
            commands:
              - id: build
                exec:
                  component: runtime
                  commandLine: go build ./...
                  group:
                    kind: build
                    isDefault: true
              - id: build-verbose
                exec:
                  component: runtime
                  commandLine: go build -v ./...
                  group:
                    kind: build
                    isDefault: true
        "#});
        let err = d.default_command(CommandGroupKind::Build).unwrap_err();
        assert!(matches!(err, Error::MoreThanOneDefaultCommand(CommandGroupKind::Build)));
    }

    #[test]
    fn default_command_law_fails_on_no_default_among_many() {
        let d = parse(indoc! {r#"
            schemaVersion: 2.2.0
            components:
              - name: runtime
                container:
                  image: golang:1.21
            commands:
              - id: build
                exec:
                  component: runtime
                  commandLine: go build ./...
                  group:
                    kind: build
              - id: build-verbose
                exec:
                  component: runtime
                  commandLine: go build -v ./...
                  group:
                    kind: build
        "#});
        let err = d.default_command(CommandGroupKind::Build).unwrap_err();
        assert!(matches!(err, Error::NoDefaultCommandFound(CommandGroupKind::Build)));
    }

    #[test]
    fn default_command_law_fails_on_zero_commands() {
        let d = parse(indoc! {r#"
            schemaVersion: 2.2.0
            components:
              - name: runtime
                container:
                  image: golang:1.21
        "#});
        let err = d.default_command(CommandGroupKind::Run).unwrap_err();
        assert!(matches!(err, Error::NoCommandFound(CommandGroupKind::Run)));
    }

    #[test]
    fn kubernetes_components_to_push_excludes_command_targets() {
        let d = parse(indoc! {r#"
            schemaVersion: 2.2.0
            components:
              - name: runtime
                container:
                  image: golang:1.21
              - name: db-secret
                kubernetes:
                  inlined: |
                    apiVersion: v1
                    kind: Secret
                    metadata:
                      name: db-secret
              - name: managed-by-apply
                kubernetes:
                  inlined: |
                    apiVersion: batch/v1
                    kind: Job
                    metadata:
                      name: migrate
            commands:
              - id: migrate
                apply:
                  component: managed-by-apply
        "#});
        let names: Vec<&str> = d
            .kubernetes_components_to_push()
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["db-secret"]);
    }
}
