//! Command holds the Devfile command types: Exec and Apply commands, grouped by kind.

use serde::{Deserialize, Serialize};

/// CommandGroupKind is the set of command groups the reconciler resolves defaults for.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CommandGroupKind {
    /// Build commands compile or otherwise prepare the project.
    Build,
    /// Run commands start the long-running application process.
    Run,
    /// Test commands execute the project's test suite.
    Test,
    /// Debug commands start the application under a debugger.
    Debug,
}

/// CommandGroup tags a command with a kind and whether it is the kind's default.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandGroup {
    /// Kind is the command group this command belongs to.
    pub kind: CommandGroupKind,
    /// IsDefault marks this command as the default for its kind.
    #[serde(default)]
    pub is_default: bool,
}

/// Command is a single Devfile command: either an Exec command or an Apply command.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Command {
    /// Id identifies the command; referenced by [`crate::Events::pre_start`].
    pub id: String,
    /// Exec holds the command body if this is an exec command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecCommand>,
    /// Apply holds the command body if this is an apply command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyCommand>,
}

/// ExecCommand runs a shell command line inside a running container component.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecCommand {
    /// Component is the name of the container component the command runs in.
    pub component: String,
    /// CommandLine is the shell command line to run.
    pub command_line: String,
    /// WorkingDir overrides the directory the command runs in; defaults to the component's
    /// source mount point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Group tags this command's kind and default-ness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<CommandGroup>,
}

/// ApplyCommand causes a Kubernetes (or container) component to be applied/started.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCommand {
    /// Component is the name of the component this command applies.
    pub component: String,
    /// Group tags this command's kind and default-ness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<CommandGroup>,
}

impl Command {
    /// Group returns the command's group, whichever variant (Exec or Apply) carries it.
    pub fn group(&self) -> Option<&CommandGroup> {
        self.exec
            .as_ref()
            .and_then(|e| e.group.as_ref())
            .or_else(|| self.apply.as_ref().and_then(|a| a.group.as_ref()))
    }

    /// TargetComponent returns the name of the component this command runs against, whichever
    /// variant (Exec or Apply) it is.
    pub fn target_component(&self) -> Option<&str> {
        self.exec
            .as_ref()
            .map(|e| e.component.as_str())
            .or_else(|| self.apply.as_ref().map(|a| a.component.as_str()))
    }
}
