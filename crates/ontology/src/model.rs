//! Entity types for the Policy/SOP/Section/Step/Clause ontology (§3.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClauseType {
    Requirement,
    Recommendation,
    Prohibition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryCitation {
    pub regulation: String,
    pub jurisdiction: String,
    pub section: String,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    pub id: String,
    pub step_id: String,
    pub text: String,
    pub risk_level: RiskLevel,
    pub jurisdiction: String,
    pub clause_type: ClauseType,
    pub citations: Vec<RegulatoryCitation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub section_id: String,
    pub description: String,
    pub responsible_role: String,
    pub order: u32,
    pub completed: bool,
    pub clause_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub sop_id: String,
    pub name: String,
    pub order: u32,
    pub step_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sop {
    pub id: String,
    pub policy_id: String,
    pub owner_role: String,
    pub name: String,
    pub version: semver::Version,
    pub section_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub title: String,
    pub version: semver::Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sop_ids: Vec<String>,
}

/// A fully materialized, immutable tree for one `(policyId, version)`. Holds
/// every entity that version references; never mutated after [`crate::store::OntologyStore::publish`]
/// hands it back — a structural edit produces a new snapshot instead (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub policy: Policy,
    pub sops: std::collections::HashMap<String, Sop>,
    pub sections: std::collections::HashMap<String, Section>,
    pub steps: std::collections::HashMap<String, Step>,
    pub clauses: std::collections::HashMap<String, Clause>,
}

/// Input shape for [`crate::store::OntologyStore::build`] — the document a
/// caller submits to have ids and orders auto-assigned (§4.4 "Build").
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyInput {
    pub title: String,
    /// Optional explicit seed for content-addressed id derivation. Omitted
    /// inputs get a random id instead (§4.4 "Ids are opaque strings").
    pub seed: Option<String>,
    pub sops: Vec<SopInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SopInput {
    pub owner_role: String,
    pub name: String,
    pub seed: Option<String>,
    pub sections: Vec<SectionInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionInput {
    pub name: String,
    pub seed: Option<String>,
    pub steps: Vec<StepInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepInput {
    pub description: String,
    pub responsible_role: String,
    pub seed: Option<String>,
    pub clauses: Vec<ClauseInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClauseInput {
    pub text: String,
    pub risk_level: RiskLevel,
    pub jurisdiction: String,
    pub clause_type: ClauseType,
    pub seed: Option<String>,
    #[serde(default)]
    pub citations: Vec<RegulatoryCitation>,
}

/// Which node kind [`crate::store::OntologyStore::get`] resolved an id to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OntologyNode {
    Policy(Policy),
    Sop(Sop),
    Section(Section),
    Step(Step),
    Clause(Clause),
}

impl OntologyNode {
    /// Ids of this node's immediate children, in `order` where applicable.
    pub fn child_ids(&self) -> Vec<String> {
        match self {
            OntologyNode::Policy(p) => p.sop_ids.clone(),
            OntologyNode::Sop(s) => s.section_ids.clone(),
            OntologyNode::Section(s) => s.step_ids.clone(),
            OntologyNode::Step(s) => s.clause_ids.clone(),
            OntologyNode::Clause(_) => Vec::new(),
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            OntologyNode::Policy(_) => "policy",
            OntologyNode::Sop(_) => "sop",
            OntologyNode::Section(_) => "section",
            OntologyNode::Step(_) => "step",
            OntologyNode::Clause(_) => "clause",
        }
    }
}
