//! Command sets and the per-class command catalog.

use crate::CommandSetError;
use netmig_device::{Device, DEFAULT_CLASS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// One command to run on a device.
///
/// The text is opaque to netmig and sent to the device as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Name, unique within its set. Results are keyed by it.
    pub name: String,

    /// Literal command text.
    pub command: String,

    /// Overrides the runner's per-command timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Command {
    /// A command named after its own text.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            name: text.clone(),
            command: text,
            timeout_secs: None,
        }
    }

    pub fn named(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: text.into(),
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Ordered, validated list of commands.
///
/// Immutable after construction: order is preserved in output and names are
/// unique within the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSet {
    name: String,
    commands: Vec<Command>,
}

impl CommandSet {
    /// Build a set, rejecting empty sets, blank commands, and duplicate names.
    pub fn new(name: impl Into<String>, commands: Vec<Command>) -> Result<Self, CommandSetError> {
        let name = name.into();
        if commands.is_empty() {
            return Err(CommandSetError::Empty(name));
        }

        let mut seen = HashSet::new();
        for command in &commands {
            if command.name.trim().is_empty() || command.command.trim().is_empty() {
                return Err(CommandSetError::BlankCommand { set: name });
            }
            if !seen.insert(command.name.as_str()) {
                return Err(CommandSetError::DuplicateName {
                    set: name.clone(),
                    name: command.name.clone(),
                });
            }
        }

        Ok(Self { name, commands })
    }

    /// Parse a plain-text command list, one command per line.
    ///
    /// Blank lines are skipped. Each command is named after its text.
    pub fn from_text(name: impl Into<String>, text: &str) -> Result<Self, CommandSetError> {
        let commands = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Command::new)
            .collect();
        Self::new(name, commands)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Always false for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }
}

impl<'a> IntoIterator for &'a CommandSet {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// Command sets keyed by device class.
///
/// Devices whose class has no entry fall back to the `default` class.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    sets: BTreeMap<String, Arc<CommandSet>>,
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the set for a class, replacing any previous one.
    pub fn insert(&mut self, class: impl Into<String>, set: CommandSet) {
        self.sets.insert(class.into(), Arc::new(set));
    }

    pub fn with_set(mut self, class: impl Into<String>, set: CommandSet) -> Self {
        self.insert(class, set);
        self
    }

    pub fn get(&self, class: &str) -> Option<&Arc<CommandSet>> {
        self.sets.get(class)
    }

    /// Set that applies to `device`.
    pub fn resolve(&self, device: &Device) -> Option<Arc<CommandSet>> {
        self.sets
            .get(&device.class)
            .or_else(|| self.sets.get(DEFAULT_CLASS))
            .cloned()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
