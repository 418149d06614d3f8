//! Definition records produced by the upstream BUSY compiler.
//!
//! The runtime treats these as plain data. Every field that the compiler may leave out has a
//! serde default, so partially filled manifests still load.

use crate::characteristics::Characteristics;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A named, typed input or output, with optional nested fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoSpec {
    /// Field name.
    #[serde(default)]
    pub name: String,
    /// Declared type (free text, e.g. `string`, `object`).
    #[serde(rename = "type", default)]
    pub data_type: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether the value must be present.
    #[serde(default)]
    pub required: bool,
    /// Nested field specs for structured values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<IoSpec>,
}

impl IoSpec {
    /// Creates an entry with just a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Sets the declared type.
    #[must_use]
    pub fn with_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }
}

/// A capability: an interface describing work that can be performed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    /// Unique name within the marketplace.
    #[serde(default)]
    pub name: String,
    /// What the capability does.
    #[serde(default)]
    pub description: String,
    /// Free-text instructions.
    #[serde(default)]
    pub method: String,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: Vec<IoSpec>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<IoSpec>,
    /// Optional version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Optional provider name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CapabilityDefinition {
    /// Creates a capability with a name and description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), ..Self::default() }
    }
}

/// How a responsibility is monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitoringType {
    /// Watched all the time.
    #[default]
    Continuous,
    /// Checked on a schedule.
    Periodic,
    /// Checked when an event fires.
    EventDriven,
}

/// A capability with a monitoring facet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsibilityDefinition {
    /// The underlying capability.
    #[serde(flatten)]
    pub capability: CapabilityDefinition,
    /// Monitoring mode.
    #[serde(default)]
    pub monitoring_type: MonitoringType,
}

impl ResponsibilityDefinition {
    /// Creates a responsibility.
    #[must_use]
    pub fn new(capability: CapabilityDefinition, monitoring_type: MonitoringType) -> Self {
        Self { capability, monitoring_type }
    }
}

/// A resource template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Unique name.
    #[serde(default)]
    pub name: String,
    /// Parent definition whose characteristics are inherited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Own characteristics (override inherited ones).
    #[serde(default)]
    pub characteristics: Characteristics,
}

impl ResourceDefinition {
    /// Creates a resource definition.
    #[must_use]
    pub fn new(name: impl Into<String>, characteristics: Characteristics) -> Self {
        Self { name: name.into(), extends: None, characteristics }
    }

    /// Sets the parent definition.
    #[must_use]
    pub fn extending(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }
}

/// Which kind of priority item satisfied a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityKind {
    /// A named instance.
    Specific,
    /// A characteristics matcher.
    Characteristics,
    /// A last-resort matcher that raises a warning.
    Emergency,
}

/// One entry of a requirement's priority chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriorityItem {
    /// Use this named instance if it is available.
    Specific {
        /// Instance id, or resource definition name.
        specific: String,
    },
    /// Use the first available instance whose characteristics match.
    Characteristics {
        /// Matcher map.
        characteristics: Characteristics,
    },
    /// Like `Characteristics`, but the step records `warning` when it is used.
    Emergency {
        /// Matcher map.
        characteristics: Characteristics,
        /// Warning appended to the step.
        warning: String,
    },
}

impl PriorityItem {
    /// Creates a `specific` item.
    #[must_use]
    pub fn specific(name: impl Into<String>) -> Self {
        Self::Specific { specific: name.into() }
    }

    /// Creates a `characteristics` item.
    #[must_use]
    pub fn characteristics(characteristics: Characteristics) -> Self {
        Self::Characteristics { characteristics }
    }

    /// Creates an `emergency` item.
    #[must_use]
    pub fn emergency(characteristics: Characteristics, warning: impl Into<String>) -> Self {
        Self::Emergency { characteristics, warning: warning.into() }
    }

    /// Returns the kind of this item.
    #[must_use]
    pub fn kind(&self) -> PriorityKind {
        match self {
            Self::Specific { .. } => PriorityKind::Specific,
            Self::Characteristics { .. } => PriorityKind::Characteristics,
            Self::Emergency { .. } => PriorityKind::Emergency,
        }
    }
}

/// A named need within a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Role label within the step (e.g. "chef").
    #[serde(default)]
    pub name: String,
    /// Direct matcher, used when `priority` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characteristics: Option<Characteristics>,
    /// Ordered priority chain.
    #[serde(default)]
    pub priority: Vec<PriorityItem>,
}

impl Requirement {
    /// Creates a requirement with an empty priority chain.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Sets the direct matcher.
    #[must_use]
    pub fn with_characteristics(mut self, characteristics: Characteristics) -> Self {
        self.characteristics = Some(characteristics);
        self
    }

    /// Appends a priority item.
    #[must_use]
    pub fn with_priority(mut self, item: PriorityItem) -> Self {
        self.priority.push(item);
        self
    }

    /// The chain the allocator walks: `priority`, or the direct matcher when it is empty.
    #[must_use]
    pub fn effective_priority(&self) -> Vec<PriorityItem> {
        if !self.priority.is_empty() {
            return self.priority.clone();
        }
        self.characteristics.clone().map(PriorityItem::characteristics).into_iter().collect()
    }
}

/// One step of a playbook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name.
    #[serde(default)]
    pub name: String,
    /// Instructions for the execution strategies.
    #[serde(default)]
    pub method: String,
    /// Resources the step needs.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Declared inputs; names may reference earlier step outputs.
    #[serde(default)]
    pub inputs: Vec<IoSpec>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<IoSpec>,
}

impl StepDefinition {
    /// Creates a step.
    #[must_use]
    pub fn new(name: impl Into<String>, method: impl Into<String>) -> Self {
        Self { name: name.into(), method: method.into(), ..Self::default() }
    }

    /// Adds a requirement.
    #[must_use]
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Adds a declared input.
    #[must_use]
    pub fn with_input(mut self, input: IoSpec) -> Self {
        self.inputs.push(input);
        self
    }

    /// Adds a declared output.
    #[must_use]
    pub fn with_output(mut self, output: IoSpec) -> Self {
        self.outputs.push(output);
        self
    }
}

/// An ordered sequence of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybookDefinition {
    /// Playbook name.
    #[serde(default)]
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: String,
    /// Steps, executed in order.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl PlaybookDefinition {
    /// Creates a playbook.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self { name: name.into(), description: String::new(), steps }
    }
}

/// Bulk definitions handed to `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeDefinitions {
    /// Capabilities to register.
    #[serde(default)]
    pub capabilities: Vec<CapabilityDefinition>,
    /// Responsibilities to register.
    #[serde(default)]
    pub responsibilities: Vec<ResponsibilityDefinition>,
    /// Resource definitions to register.
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    /// Manifest entries that failed to parse, as `section[index]: error`.
    #[serde(skip)]
    pub rejected: Vec<String>,
}

impl RuntimeDefinitions {
    /// Parses a YAML manifest.
    ///
    /// Entries are parsed one by one: a malformed entry is left out and recorded in
    /// [`rejected`](Self::rejected) instead of failing the whole manifest.
    ///
    /// # Errors
    /// Returns `Yaml` if the document itself is not a manifest (not a map, or a section that
    /// is not a list).
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawDefinitions<serde_yaml::Value> = serde_yaml::from_str(content)?;
        Ok(raw.into_definitions())
    }

    /// Parses a JSON manifest, with the same per-entry tolerance as [`Self::from_yaml_str`].
    ///
    /// # Errors
    /// Returns `Json` if the document itself is not a manifest.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawDefinitions<serde_json::Value> = serde_json::from_str(content)?;
        Ok(raw.into_definitions())
    }
}

/// A manifest document whose entries have not been parsed yet.
#[derive(Deserialize)]
struct RawDefinitions<V> {
    #[serde(default)]
    capabilities: Vec<V>,
    #[serde(default)]
    responsibilities: Vec<V>,
    #[serde(default)]
    resources: Vec<V>,
}

/// A format-specific document node that can be turned into a typed entry.
trait ManifestEntry {
    fn parse<T: DeserializeOwned>(self) -> std::result::Result<T, String>;
}

impl ManifestEntry for serde_yaml::Value {
    fn parse<T: DeserializeOwned>(self) -> std::result::Result<T, String> {
        serde_yaml::from_value(self).map_err(|err| err.to_string())
    }
}

impl ManifestEntry for serde_json::Value {
    fn parse<T: DeserializeOwned>(self) -> std::result::Result<T, String> {
        serde_json::from_value(self).map_err(|err| err.to_string())
    }
}

impl<V: ManifestEntry> RawDefinitions<V> {
    fn into_definitions(self) -> RuntimeDefinitions {
        let mut rejected = Vec::new();
        let capabilities = parse_section("capabilities", self.capabilities, &mut rejected);
        let responsibilities = parse_section("responsibilities", self.responsibilities, &mut rejected);
        let resources = parse_section("resources", self.resources, &mut rejected);
        RuntimeDefinitions { capabilities, responsibilities, resources, rejected }
    }
}

fn parse_section<V: ManifestEntry, T: DeserializeOwned>(
    section: &str,
    entries: Vec<V>,
    rejected: &mut Vec<String>,
) -> Vec<T> {
    let mut parsed = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match entry.parse() {
            Ok(value) => parsed.push(value),
            Err(err) => {
                warn!(section = %section, index, error = %err, "Skipping malformed manifest entry");
                rejected.push(format!("{section}[{index}]: {err}"));
            }
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristics::{CharacteristicValue, characteristics};

    #[test]
    fn test_priority_item_tagged_shape() {
        let json = r#"[
            {"type": "specific", "specific": "mario"},
            {"type": "characteristics", "characteristics": {"capabilities": ["prepare-pizza"]}},
            {"type": "emergency", "characteristics": {"role": "manager"}, "warning": "manager is cooking"}
        ]"#;
        let items: Vec<PriorityItem> = serde_json::from_str(json).unwrap();
        assert_eq!(items[0], PriorityItem::specific("mario"));
        assert_eq!(items[1].kind(), PriorityKind::Characteristics);
        match &items[2] {
            PriorityItem::Emergency { warning, characteristics } => {
                assert_eq!(warning, "manager is cooking");
                assert_eq!(characteristics["role"], CharacteristicValue::from("manager"));
            }
            other => panic!("Expected emergency item, got {other:?}"),
        }
    }

    #[test]
    fn test_effective_priority_uses_direct_matcher() {
        let direct = Requirement::new("chef")
            .with_characteristics(characteristics([("capabilities", vec!["prepare-pizza"])]));
        assert_eq!(direct.effective_priority().len(), 1);
        assert_eq!(direct.effective_priority()[0].kind(), PriorityKind::Characteristics);

        let explicit = direct.clone().with_priority(PriorityItem::specific("mario"));
        assert_eq!(explicit.effective_priority(), vec![PriorityItem::specific("mario")]);

        assert!(Requirement::new("nobody").effective_priority().is_empty());
    }

    #[test]
    fn test_empty_capability_deserializes() {
        let cap: CapabilityDefinition =
            serde_json::from_str(r#"{"name": "", "description": "", "method": "", "inputs": [], "outputs": []}"#)
                .unwrap();
        assert!(cap.name.is_empty());
        let bare: CapabilityDefinition = serde_json::from_str("{}").unwrap();
        assert_eq!(bare, CapabilityDefinition::default());
    }

    #[test]
    fn test_responsibility_flattens_capability() {
        let yaml = "name: watch-inventory\ndescription: Keep stock above minimum\nmonitoring_type: event-driven\n";
        let responsibility: ResponsibilityDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(responsibility.capability.name, "watch-inventory");
        assert_eq!(responsibility.monitoring_type, MonitoringType::EventDriven);
    }

    #[test]
    fn test_runtime_definitions_from_yaml() {
        let yaml = r"
capabilities:
  - name: prepare-pizza
    description: Make a pizza
    inputs:
      - name: order
        type: object
        fields:
          - name: toppings
            type: list
resources:
  - name: chef
    characteristics:
      capabilities: [prepare-pizza]
  - name: head_chef
    extends: chef
    characteristics:
      experience_years: 12
";
        let defs = RuntimeDefinitions::from_yaml_str(yaml).unwrap();
        assert_eq!(defs.capabilities.len(), 1);
        assert_eq!(defs.capabilities[0].inputs[0].fields[0].name, "toppings");
        assert_eq!(defs.resources[1].extends.as_deref(), Some("chef"));
        assert!(defs.responsibilities.is_empty());
        assert!(defs.rejected.is_empty());
    }

    #[test]
    fn test_malformed_entry_is_rejected_alone() {
        let yaml = r"
resources:
  - name: chef
    characteristics:
      capabilities: [prepare-pizza]
  - name: [not, a, name]
  - name: oven
    characteristics:
      notes: ~
      temperature: 250
responsibilities:
  - name: watch-oven
    monitoring_type: sometimes
";
        let defs = RuntimeDefinitions::from_yaml_str(yaml).unwrap();
        let names: Vec<&str> = defs.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["chef", "oven"]);
        assert_eq!(
            defs.resources[1].characteristics["notes"],
            CharacteristicValue::Other(serde_json::Value::Null)
        );
        assert!(defs.responsibilities.is_empty());

        assert_eq!(defs.rejected.len(), 2);
        assert!(defs.rejected[0].starts_with("responsibilities[0]:"));
        assert!(defs.rejected[1].starts_with("resources[1]:"));
    }

    #[test]
    fn test_malformed_json_entry_is_rejected_alone() {
        let json = r#"{"capabilities": [{"name": "bake"}, {"name": 7}], "resources": []}"#;
        let defs = RuntimeDefinitions::from_json_str(json).unwrap();
        assert_eq!(defs.capabilities.len(), 1);
        assert_eq!(defs.rejected.len(), 1);
        assert!(defs.rejected[0].starts_with("capabilities[1]:"));

        assert!(RuntimeDefinitions::from_json_str(r#"{"resources": {"chef": {}}}"#).is_err());
    }

    #[test]
    fn test_step_builder() {
        let step = StepDefinition::new("bake", "Bake the pizza")
            .with_requirement(Requirement::new("oven"))
            .with_input(IoSpec::new("dough").with_type("object"))
            .with_output(IoSpec::new("pizza"));
        assert_eq!(step.requirements.len(), 1);
        assert_eq!(step.inputs[0].data_type, "object");
        assert_eq!(step.outputs[0].name, "pizza");
    }
}
