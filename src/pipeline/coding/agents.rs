//! Role and responsibility text for the five pipeline agents.
//!
//! Built-in defaults may be overridden per agent from a JSON file:
//! `{"coder": {"role": "...", "responsibilities": "..."}, ...}`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::CodingError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub role: String,
    pub responsibilities: String,
}

impl AgentDefinition {
    fn new(role: &str, responsibilities: &str) -> Self {
        Self {
            role: role.to_string(),
            responsibilities: responsibilities.to_string(),
        }
    }

    /// System instructions sent with every completion call for this agent.
    pub fn system_instructions(&self) -> String {
        format!(
            "Role: {}\nResponsibilities: {}",
            self.role, self.responsibilities
        )
    }
}

/// Agents absent from an override file keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefinitions {
    pub coder: AgentDefinition,
    pub reviewer: AgentDefinition,
    pub physician: AgentDefinition,
    pub patient: AgentDefinition,
    pub adjustor: AgentDefinition,
}

impl Default for AgentDefinitions {
    fn default() -> Self {
        Self {
            coder: AgentDefinition::new(
                "Certified clinical coder",
                "Read the clinical note and assign every supported ICD-10-CM diagnosis code. \
                 Quote the shortest verbatim passage of the note that justifies each code.",
            ),
            reviewer: AgentDefinition::new(
                "Senior coding auditor",
                "Audit the codes proposed by the coder against the note and the reference \
                 database feedback. Replace invalid or non-billable codes with the most specific \
                 billable code the documentation supports, add missed diagnoses, and explain each \
                 decision.",
            ),
            physician: AgentDefinition::new(
                "Attending physician",
                "Judge whether each assigned code reflects a diagnosis that was actually made, \
                 treated or monitored during this encounter. Recommend include or reject and \
                 give clinical reasoning.",
            ),
            patient: AgentDefinition::new(
                "Patient advocate",
                "Judge each assigned code from the patient's point of view: is it supported by \
                 what happened during the visit, and could it misrepresent the patient's health \
                 record? Recommend include or reject and explain in plain language.",
            ),
            adjustor: AgentDefinition::new(
                "Coding adjudicator",
                "Reconcile the reviewed codes with the physician and patient recommendations and \
                 the reference database feedback. Produce the final list of billable ICD-10-CM \
                 codes with evidence and a short justification for each.",
            ),
        }
    }
}

impl AgentDefinitions {
    /// Read overrides from `path`.
    pub fn load(path: &Path) -> Result<Self, CodingError> {
        let raw = std::fs::read_to_string(path)?;
        let definitions: Self = serde_json::from_str(&raw)
            .map_err(|e| CodingError::AgentDefinitions(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "Agent definitions loaded");
        Ok(definitions)
    }

    /// Overrides from `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, CodingError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
