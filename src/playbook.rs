//! Playbook model.
//!
//! Plays, role references, and blocks as read from YAML. The model is plain
//! data: role contents and `include_tasks` files are filled in by
//! [`crate::project::PlaybookResolver`] before compilation.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::error::{Error, Result};
use crate::inventory::SerialValue;
use crate::vars::{deserialize_vars, value_to_string, Variables};

/// A parsed playbook: an ordered list of plays.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Playbook {
    /// Plays in document order
    pub plays: Vec<Play>,
    /// Path of the playbook inside the project
    pub path: String,
}

impl Playbook {
    /// Parse a playbook document.
    pub fn from_yaml(content: &str, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let plays: Vec<Play> = serde_yaml::from_str(content).map_err(|e| {
            Error::playbook_parse(&path, e.to_string(), Some(Box::new(e)))
        })?;
        let playbook = Self { plays, path };
        playbook.validate()?;
        Ok(playbook)
    }

    /// Check structural rules of every play.
    pub fn validate(&self) -> Result<()> {
        for (index, play) in self.plays.iter().enumerate() {
            let name = play.display_name(index);
            if play.import_playbook.is_some() {
                if play.has_content() {
                    return Err(Error::PlaybookValidation(format!(
                        "play '{}' mixes import_playbook with hosts or tasks",
                        name
                    )));
                }
                continue;
            }
            if play.hosts.is_empty() {
                return Err(Error::PlaybookValidation(format!(
                    "play '{}' has no hosts",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Directory of the playbook inside the project.
    pub fn dir(&self) -> &str {
        Path::new(&self.path)
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("")
    }
}

/// A play.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Play {
    /// Play name
    pub name: String,
    /// Host patterns
    #[serde(deserialize_with = "string_or_list")]
    pub hosts: Vec<String>,
    /// Play tags
    #[serde(deserialize_with = "string_or_list")]
    pub tags: Vec<String>,
    /// Play variables
    #[serde(deserialize_with = "deserialize_vars")]
    pub vars: Variables,
    /// Variable files merged over `vars`
    #[serde(deserialize_with = "string_or_list")]
    pub vars_files: Vec<String>,
    /// Gather facts before the first batch
    pub gather_facts: bool,
    /// Serial batch policy
    #[serde(deserialize_with = "serial_list")]
    pub serial: Vec<SerialValue>,
    /// Run every task on the first host only
    pub run_once: bool,
    /// Blocks before roles
    pub pre_tasks: Vec<Block>,
    /// Roles
    pub roles: Vec<RoleRef>,
    /// Blocks after roles
    pub tasks: Vec<Block>,
    /// Blocks after tasks
    pub post_tasks: Vec<Block>,
    /// Another playbook spliced in place of this play
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_playbook: Option<String>,
}

impl Play {
    /// Name used in messages: the play name, or its position.
    pub fn display_name(&self, index: usize) -> String {
        if self.name.is_empty() {
            format!("play #{}", index + 1)
        } else {
            self.name.clone()
        }
    }

    fn has_content(&self) -> bool {
        !self.hosts.is_empty()
            || !self.pre_tasks.is_empty()
            || !self.roles.is_empty()
            || !self.tasks.is_empty()
            || !self.post_tasks.is_empty()
    }
}

/// Role reference from a play, filled in by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoleRef {
    /// Role name
    pub role: String,
    /// Tags applied to every block of the role
    pub tags: Vec<String>,
    /// Conditions applied to every block of the role
    pub when: Vec<String>,
    /// Reference variables, laid over the role defaults
    pub vars: Variables,
    /// Role tasks
    #[serde(skip)]
    pub blocks: Vec<Block>,
    /// Role defaults
    #[serde(skip)]
    pub defaults: Variables,
    /// Role directory inside the project, once resolved
    #[serde(skip)]
    pub path: Option<String>,
}

impl RoleRef {
    /// A reference by name only.
    pub fn named(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Self::default()
        }
    }
}

impl<'de> Deserialize<'de> for RoleRef {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Full {
            role: String,
            #[serde(default, deserialize_with = "string_or_list")]
            tags: Vec<String>,
            #[serde(default, deserialize_with = "string_or_list")]
            when: Vec<String>,
            #[serde(default, deserialize_with = "deserialize_vars")]
            vars: Variables,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Simple(String),
            Full(Full),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Simple(role) => RoleRef::named(role),
            Raw::Full(full) => RoleRef {
                role: full.role,
                tags: full.tags,
                when: full.when,
                vars: full.vars,
                ..RoleRef::default()
            },
        })
    }
}

/// A task or a group of tasks.
///
/// A block is a leaf when it has no `block` children and no resolved
/// `include_tasks`; its module is one of the remaining keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Block tags
    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Vec<String>,
    /// Conditions, all of which must hold
    #[serde(default, deserialize_with = "string_or_list")]
    pub when: Vec<String>,
    /// Block variables
    #[serde(default, deserialize_with = "deserialize_vars")]
    pub vars: Variables,
    /// Run on the first host of the batch only
    #[serde(default)]
    pub run_once: bool,
    /// Treat failures as ignored, inherited when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_errors: Option<bool>,
    /// Variable receiving the task output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,
    /// Items to run the module for
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_items: Option<Value>,
    /// Conditions marking a run as failed
    #[serde(default, deserialize_with = "string_or_list")]
    pub failed_when: Vec<String>,
    /// Additional attempts after a failure
    #[serde(default)]
    pub retries: u32,
    /// Task file spliced in as children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_tasks: Option<String>,
    /// Children
    #[serde(default)]
    pub block: Vec<Block>,
    /// Run when a child failed
    #[serde(default)]
    pub rescue: Vec<Block>,
    /// Run after the children regardless of outcome
    #[serde(default)]
    pub always: Vec<Block>,
    /// Every other key, in document order
    #[serde(flatten)]
    pub module_fields: IndexMap<String, Value>,
    /// Directory of the file this block was loaded from
    #[serde(skip)]
    pub source_dir: Option<String>,
    /// Whether `include_tasks` has been loaded into `block`
    #[serde(skip)]
    pub include_resolved: bool,
}

impl Block {
    /// Whether the block has children to expand.
    pub fn is_composite(&self) -> bool {
        !self.block.is_empty() || self.include_resolved
    }

    /// Name used in messages and task records.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        if let Some(file) = &self.include_tasks {
            return format!("include_tasks {}", file);
        }
        match self.module_fields.keys().next() {
            Some(key) => key.clone(),
            None => "unnamed".to_string(),
        }
    }

    /// Set `source_dir` on this block and every nested block.
    pub fn stamp_source_dir(&mut self, dir: &str) {
        if self.source_dir.is_none() {
            self.source_dir = Some(dir.to_string());
        }
        for child in self
            .block
            .iter_mut()
            .chain(self.rescue.iter_mut())
            .chain(self.always.iter_mut())
        {
            child.stamp_source_dir(dir);
        }
    }
}

/// Parse a task file (a YAML list of blocks).
pub fn parse_blocks(content: &str, path: &str) -> Result<Vec<Block>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let blocks: Option<Vec<Block>> = serde_yaml::from_str(content)
        .map_err(|e| Error::playbook_parse(path, e.to_string(), Some(Box::new(e))))?;
    Ok(blocks.unwrap_or_default())
}

/// Accept a scalar or a list of scalars, stringifying each entry.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Value>),
        One(Value),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None | Some(OneOrMany::One(Value::Null)) => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value_to_string(&value)],
        Some(OneOrMany::Many(values)) => values.iter().map(value_to_string).collect(),
    })
}

/// Accept a single serial value or a list of them.
fn serial_list<'de, D>(deserializer: D) -> std::result::Result<Vec<SerialValue>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<SerialValue>),
        One(SerialValue),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}
