//! Playbook definitions and loading.
//!
//! Playbooks are versioned, ordered sequences of typed steps. Definitions
//! can be authored in YAML and are immutable once a run references them.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A complete playbook definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// Unique identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Playbook name (used in CLI and logs)
    pub name: String,

    /// Definition version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Lifecycle status
    #[serde(default)]
    pub status: PlaybookStatus,

    /// Ordered list of steps
    pub steps: Vec<PlaybookStep>,

    /// When the definition was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl Playbook {
    /// Load a playbook from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read playbook file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a playbook from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse playbook YAML")
    }

    /// Validate the playbook definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Playbook name cannot be empty");
        }

        if self.steps.is_empty() {
            anyhow::bail!("Playbook must have at least one step");
        }

        let mut keys: HashSet<&str> = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.key.is_empty() {
                anyhow::bail!("Step {} has an empty key", i);
            }
            if !keys.insert(step.key.as_str()) {
                anyhow::bail!("Duplicate step key '{}'", step.key);
            }
        }

        // All static and branch targets must resolve to a defined key
        for step in &self.steps {
            if let Some(ref next) = step.next_step_key {
                if !keys.contains(next.as_str()) {
                    anyhow::bail!(
                        "Step '{}' points to non-existent step '{}'",
                        step.key,
                        next
                    );
                }
            }

            if let StepConfig::Branch(ref config) = step.config {
                for condition in &config.conditions {
                    if !keys.contains(condition.next_step_key.as_str()) {
                        anyhow::bail!(
                            "Branch step '{}' routes to non-existent step '{}'",
                            step.key,
                            condition.next_step_key
                        );
                    }
                }
                if let Some(ref default) = config.default_next_step_key {
                    if !keys.contains(default.as_str()) {
                        anyhow::bail!(
                            "Branch step '{}' defaults to non-existent step '{}'",
                            step.key,
                            default
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Get a step by key
    pub fn step_by_key(&self, key: &str) -> Option<&PlaybookStep> {
        self.steps.iter().find(|s| s.key == key)
    }

    /// First step in traversal order (lowest position)
    pub fn entry_step(&self) -> Option<&PlaybookStep> {
        self.steps.iter().min_by_key(|s| s.position)
    }
}

/// Lifecycle status of a playbook definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookStatus {
    /// Still being authored
    Draft,

    /// Runnable
    Active,

    /// Retained for existing runs only
    Deprecated,
}

impl Default for PlaybookStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl PlaybookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        }
    }
}

/// A single step in a playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookStep {
    /// Unique identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Step key (unique within the playbook)
    pub key: String,

    /// Typed per-variant configuration
    #[serde(flatten)]
    pub config: StepConfig,

    /// Position in the default traversal order
    #[serde(default)]
    pub position: u32,

    /// Static successor; absent means the run ends after this step
    /// (branch steps compute their successor from their output instead)
    pub next_step_key: Option<String>,

    /// Request semantic-memory capture of this step's output
    #[serde(default)]
    pub capture_memory: bool,

    /// Importance for captured memory (clamped to [0, 1] at capture time)
    pub importance: Option<f64>,
}

impl PlaybookStep {
    /// Short name of the step's type, for logs and error trails
    pub fn type_name(&self) -> &'static str {
        self.config.type_name()
    }
}

/// Per-type step configuration.
///
/// One payload shape per variant; malformed configs are rejected when the
/// definition is deserialized, not when the step executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    /// LLM-agent call with persona resolution
    Agent(AgentConfig),

    /// Pure data transform over step input or a prior output
    Data(DataConfig),

    /// Conditional routing over a prior output
    Branch(BranchConfig),

    /// External API call descriptor
    Api(ApiConfig),
}

impl StepConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Data(_) => "data",
            Self::Branch(_) => "branch",
            Self::Api(_) => "api",
        }
    }
}

/// Configuration for an agent step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent whose persona shapes the system prompt
    pub agent_id: String,

    /// User-prompt template; `{{input}}` expands to the step input
    pub prompt: String,

    /// Extra system instructions appended after the persona
    pub system: Option<String>,

    /// Model override
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Completion token cap
    pub max_tokens: Option<u32>,
}

/// Configuration for a data step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Key of a prior step whose output is the source; absent means the
    /// step input is the source
    pub source: Option<String>,

    /// The transform to apply
    #[serde(flatten)]
    pub op: DataOp,
}

/// Supported data transforms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DataOp {
    /// Keep only the named fields of an object
    Pluck { fields: Vec<String> },

    /// Rename fields: output key -> source field
    Map { mapping: BTreeMap<String, String> },

    /// Shallow-merge a literal object into the source object
    Merge { with: BTreeMap<String, Value> },

    /// Apply a named built-in transform
    Transform { transform: TransformKind },
}

/// Built-in transforms for `DataOp::Transform`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Serialize the source to a JSON string
    Stringify,

    /// Parse a JSON string source into a value
    Parse,

    /// Object keys as an array of strings
    Keys,

    /// Length of a string, array, or object
    Length,
}

/// Configuration for a branch step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Key of the prior step whose output is evaluated
    pub source: String,

    /// Field of the source output to compare; absent means the whole value
    pub field: Option<String>,

    /// Ordered conditions; the first match wins
    pub conditions: Vec<BranchCondition>,

    /// Fallback route when no condition matches
    pub default_next_step_key: Option<String>,
}

/// A single branch condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCondition {
    /// Comparison operator
    pub operator: BranchOperator,

    /// Expected value (unused by `exists`)
    pub value: Option<Value>,

    /// Step to route to when this condition matches
    pub next_step_key: String,
}

/// Branch comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
}

/// Configuration for an api step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP method
    pub method: String,

    /// Target URL
    pub url: String,

    /// Request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body
    pub body: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PLAYBOOK_YAML: &str = r#"
name: triage
steps:
  - key: classify
    type: agent
    agent_id: analyst
    prompt: "Classify: {{input}}"
    position: 0
    next_step_key: route

  - key: route
    type: branch
    source: classify
    position: 1
    conditions:
      - operator: equals
        value: urgent
        next_step_key: escalate
    default_next_step_key: summarize

  - key: escalate
    type: api
    method: POST
    url: https://hooks.example.com/escalate
    position: 2

  - key: summarize
    type: data
    source: classify
    op: pluck
    fields: [completion]
    position: 3
"#;

    #[test]
    fn test_playbook_parsing() {
        let playbook = Playbook::from_yaml(TEST_PLAYBOOK_YAML).unwrap();

        assert_eq!(playbook.name, "triage");
        assert_eq!(playbook.version, 1);
        assert_eq!(playbook.status, PlaybookStatus::Active);
        assert_eq!(playbook.steps.len(), 4);
        assert_eq!(playbook.steps[0].type_name(), "agent");
        assert_eq!(playbook.steps[1].type_name(), "branch");
    }

    #[test]
    fn test_playbook_validation() {
        let playbook = Playbook::from_yaml(TEST_PLAYBOOK_YAML).unwrap();
        assert!(playbook.validate().is_ok());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let yaml = r#"
name: dupes
steps:
  - key: one
    type: data
    op: transform
    transform: stringify
    position: 0
  - key: one
    type: data
    op: transform
    transform: parse
    position: 1
"#;
        let playbook = Playbook::from_yaml(yaml).unwrap();
        assert!(playbook.validate().is_err());
    }

    #[test]
    fn test_dangling_next_step_rejected() {
        let yaml = r#"
name: dangling
steps:
  - key: only
    type: data
    op: transform
    transform: stringify
    position: 0
    next_step_key: nowhere
"#;
        let playbook = Playbook::from_yaml(yaml).unwrap();
        assert!(playbook.validate().is_err());
    }

    #[test]
    fn test_missing_pluck_fields_rejected_at_parse() {
        // pluck without its fields payload must not deserialize
        let yaml = r#"
name: broken
steps:
  - key: only
    type: data
    op: pluck
    position: 0
"#;
        assert!(Playbook::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_entry_step_is_lowest_position() {
        let playbook = Playbook::from_yaml(TEST_PLAYBOOK_YAML).unwrap();
        assert_eq!(playbook.entry_step().unwrap().key, "classify");
    }
}
