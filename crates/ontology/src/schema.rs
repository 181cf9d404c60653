//! Structural validation and role-scoped field visibility (C5, §4.5).

use crate::model::OntologyNode;
use occam_core::error::{Error, Result};
use occam_core::types::Role;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub enum FieldConstraint {
    String { min: usize, max: usize },
    Number { min: f64, max: f64 },
    Enum(Vec<&'static str>),
    Semver,
    Timestamp,
    Any,
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub required: bool,
    pub constraint: FieldConstraint,
}

#[derive(Debug, Clone, Default)]
pub struct RoleFieldAccess {
    pub readable: HashSet<&'static str>,
    pub writable: HashSet<&'static str>,
}

#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub fields: HashMap<&'static str, FieldSchema>,
    pub role_access: HashMap<Role, RoleFieldAccess>,
}

impl EntitySchema {
    fn access_for(&self, role: &Role) -> RoleFieldAccess {
        if let Some(access) = self.role_access.get(role) {
            return access.clone();
        }
        if let Role::Custom(_) = role {
            // Unconfigured custom roles get no implicit visibility beyond `id`.
            let mut minimal = RoleFieldAccess::default();
            minimal.readable.insert("id");
            return minimal;
        }
        RoleFieldAccess::default()
    }
}

/// An input document that has passed [`SchemaRegistry::validate`]. Carries no
/// data of its own beyond the validated value — its existence is the "trust
/// this, it already crossed the boundary" marker referenced in §4.5.
pub struct ValidatedDocument(serde_json::Value);

impl ValidatedDocument {
    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Generates and holds the structural schema for each ontology entity type
/// and performs role-scoped field projection.
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert("policy", policy_schema());
        schemas.insert("sop", sop_schema());
        schemas.insert("section", section_schema());
        schemas.insert("step", step_schema());
        schemas.insert("clause", clause_schema());
        Self { schemas }
    }

    fn schema_for(&self, entity_type: &str) -> Result<&EntitySchema> {
        self.schemas
            .get(entity_type)
            .ok_or_else(|| Error::validation(format!("unknown entity type: {}", entity_type)))
    }

    /// Validate a candidate document against the entity type's structural
    /// schema: required fields present, types and bounds respected.
    pub fn validate(&self, entity_type: &str, doc: serde_json::Value) -> Result<ValidatedDocument> {
        let schema = self.schema_for(entity_type)?;
        let object = doc
            .as_object()
            .ok_or_else(|| Error::validation(format!("{} document must be a JSON object", entity_type)))?;

        for (field_name, field_schema) in &schema.fields {
            let value = object.get(*field_name);
            match value {
                None => {
                    if field_schema.required {
                        return Err(Error::validation(format!(
                            "{}.{} is required",
                            entity_type, field_name
                        )));
                    }
                }
                Some(value) => validate_constraint(entity_type, field_name, value, &field_schema.constraint)?,
            }
        }

        Ok(ValidatedDocument(doc))
    }

    /// Fails with `PermissionDenied` if `role` may not write `field` on
    /// `entity_type` (§4.5 "writes of non-writable fields fail").
    pub fn check_writable(&self, entity_type: &str, field: &str, role: &Role) -> Result<()> {
        let schema = self.schema_for(entity_type)?;
        let access = schema.access_for(role);
        if access.writable.contains(field) {
            Ok(())
        } else {
            Err(Error::forbidden(format!(
                "role {} may not write {}.{}",
                role, entity_type, field
            )))
        }
    }

    /// Filter a node's serialized fields down to what `role` may read.
    pub fn project(&self, node: &OntologyNode, role: &Role) -> Result<serde_json::Value> {
        let entity_type = node.entity_type();
        let schema = self.schema_for(entity_type)?;
        let access = schema.access_for(role);

        let full = serde_json::to_value(node)
            .map_err(|e| Error::internal(format!("failed to serialize {}: {}", entity_type, e)))?;
        let object = full
            .as_object()
            .ok_or_else(|| Error::internal(format!("{} did not serialize to an object", entity_type)))?;

        let mut projected = serde_json::Map::new();
        for (key, value) in object {
            if access.readable.contains(key.as_str()) || key == "kind" {
                projected.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::Value::Object(projected))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_constraint(
    entity_type: &str,
    field_name: &str,
    value: &serde_json::Value,
    constraint: &FieldConstraint,
) -> Result<()> {
    let fail = |reason: &str| {
        Err(Error::validation(format!(
            "{}.{} {}",
            entity_type, field_name, reason
        )))
    };

    match constraint {
        FieldConstraint::String { min, max } => match value.as_str() {
            Some(s) if s.len() >= *min && s.len() <= *max => Ok(()),
            Some(_) => fail(&format!("must be between {} and {} characters", min, max)),
            None => fail("must be a string"),
        },
        FieldConstraint::Number { min, max } => match value.as_f64() {
            Some(n) if n >= *min && n <= *max => Ok(()),
            Some(_) => fail(&format!("must be between {} and {}", min, max)),
            None => fail("must be a number"),
        },
        FieldConstraint::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => Ok(()),
            _ => fail(&format!("must be one of {:?}", allowed)),
        },
        FieldConstraint::Semver => match value.as_str() {
            Some(s) if semver::Version::parse(s).is_ok() => Ok(()),
            _ => fail("must be a valid semver string"),
        },
        FieldConstraint::Timestamp => match value.as_str() {
            Some(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => Ok(()),
            _ => fail("must be an RFC3339 timestamp"),
        },
        FieldConstraint::Any => Ok(()),
    }
}

fn policy_schema() -> EntitySchema {
    let mut fields = HashMap::new();
    fields.insert("title", FieldSchema { required: true, constraint: FieldConstraint::String { min: 1, max: 255 } });
    fields.insert("version", FieldSchema { required: false, constraint: FieldConstraint::Semver });

    let mut role_access = HashMap::new();
    role_access.insert(Role::Admin, full_access(&["id", "title", "version", "created_at", "updated_at", "sop_ids"], &["title"]));
    role_access.insert(Role::ComplianceOfficer, full_access(&["id", "title", "version", "created_at", "updated_at", "sop_ids"], &["title"]));
    role_access.insert(Role::Auditor, read_only(&["id", "title", "version", "created_at", "updated_at", "sop_ids"]));
    role_access.insert(Role::Operator, read_only(&["id", "title", "version", "sop_ids"]));
    role_access.insert(Role::ServiceAccount, read_only(&["id", "version"]));

    EntitySchema { fields, role_access }
}

fn sop_schema() -> EntitySchema {
    let mut fields = HashMap::new();
    fields.insert("owner_role", FieldSchema { required: true, constraint: FieldConstraint::String { min: 1, max: 100 } });
    fields.insert("name", FieldSchema { required: true, constraint: FieldConstraint::String { min: 1, max: 255 } });

    let mut role_access = HashMap::new();
    role_access.insert(Role::Admin, full_access(&["id", "policy_id", "owner_role", "name", "version", "section_ids"], &["name", "owner_role"]));
    role_access.insert(Role::ComplianceOfficer, full_access(&["id", "policy_id", "owner_role", "name", "version", "section_ids"], &["name"]));
    role_access.insert(Role::Auditor, read_only(&["id", "policy_id", "owner_role", "name", "version", "section_ids"]));
    role_access.insert(Role::Operator, read_only(&["id", "policy_id", "name", "section_ids"]));
    role_access.insert(Role::ServiceAccount, read_only(&["id"]));

    EntitySchema { fields, role_access }
}

fn section_schema() -> EntitySchema {
    let mut fields = HashMap::new();
    fields.insert("name", FieldSchema { required: true, constraint: FieldConstraint::String { min: 1, max: 255 } });
    fields.insert("order", FieldSchema { required: true, constraint: FieldConstraint::Number { min: 0.0, max: 100_000.0 } });

    let mut role_access = HashMap::new();
    role_access.insert(Role::Admin, full_access(&["id", "sop_id", "name", "order", "step_ids"], &["name", "order"]));
    role_access.insert(Role::ComplianceOfficer, full_access(&["id", "sop_id", "name", "order", "step_ids"], &["name"]));
    role_access.insert(Role::Auditor, read_only(&["id", "sop_id", "name", "order", "step_ids"]));
    role_access.insert(Role::Operator, read_only(&["id", "sop_id", "name", "order", "step_ids"]));
    role_access.insert(Role::ServiceAccount, read_only(&["id"]));

    EntitySchema { fields, role_access }
}

fn step_schema() -> EntitySchema {
    let mut fields = HashMap::new();
    fields.insert("description", FieldSchema { required: true, constraint: FieldConstraint::String { min: 1, max: 2000 } });
    fields.insert("responsible_role", FieldSchema { required: true, constraint: FieldConstraint::String { min: 1, max: 100 } });
    fields.insert("order", FieldSchema { required: true, constraint: FieldConstraint::Number { min: 0.0, max: 100_000.0 } });
    fields.insert("completed", FieldSchema { required: false, constraint: FieldConstraint::Any });

    let mut role_access = HashMap::new();
    role_access.insert(Role::Admin, full_access(&["id", "section_id", "description", "responsible_role", "order", "completed", "clause_ids"], &["description", "completed"]));
    role_access.insert(Role::ComplianceOfficer, full_access(&["id", "section_id", "description", "responsible_role", "order", "completed", "clause_ids"], &["completed"]));
    role_access.insert(Role::Auditor, read_only(&["id", "section_id", "description", "responsible_role", "order", "completed", "clause_ids"]));
    // Operators execute steps, so `completed` is the one field they may flip.
    role_access.insert(Role::Operator, RoleFieldAccess {
        readable: ["id", "section_id", "description", "responsible_role", "order", "completed", "clause_ids"].into_iter().collect(),
        writable: ["completed"].into_iter().collect(),
    });
    role_access.insert(Role::ServiceAccount, read_only(&["id", "completed"]));

    EntitySchema { fields, role_access }
}

fn clause_schema() -> EntitySchema {
    let mut fields = HashMap::new();
    fields.insert("text", FieldSchema { required: true, constraint: FieldConstraint::String { min: 1, max: 5000 } });
    fields.insert("risk_level", FieldSchema { required: true, constraint: FieldConstraint::Enum(vec!["low", "medium", "high"]) });
    fields.insert("jurisdiction", FieldSchema { required: true, constraint: FieldConstraint::String { min: 2, max: 100 } });
    fields.insert("clause_type", FieldSchema { required: true, constraint: FieldConstraint::Enum(vec!["requirement", "recommendation", "prohibition"]) });

    let mut role_access = HashMap::new();
    let all = ["id", "step_id", "text", "risk_level", "jurisdiction", "clause_type", "citations"];
    role_access.insert(Role::Admin, full_access(&all, &["text", "risk_level"]));
    role_access.insert(Role::ComplianceOfficer, full_access(&all, &["text", "risk_level"]));
    role_access.insert(Role::Auditor, read_only(&all));
    role_access.insert(Role::Operator, read_only(&["id", "step_id", "text", "risk_level", "jurisdiction", "clause_type"]));
    role_access.insert(Role::ServiceAccount, read_only(&["id", "risk_level"]));

    EntitySchema { fields, role_access }
}

fn full_access(readable: &[&'static str], writable: &[&'static str]) -> RoleFieldAccess {
    RoleFieldAccess {
        readable: readable.iter().copied().collect(),
        writable: writable.iter().copied().collect(),
    }
}

fn read_only(readable: &[&'static str]) -> RoleFieldAccess {
    RoleFieldAccess {
        readable: readable.iter().copied().collect(),
        writable: HashSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_required_field() {
        let registry = SchemaRegistry::new();
        let doc = serde_json::json!({ "version": "1.0.0" });
        assert!(registry.validate("policy", doc).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_clause() {
        let registry = SchemaRegistry::new();
        let doc = serde_json::json!({
            "text": "Must retain for 7 years",
            "risk_level": "high",
            "jurisdiction": "US",
            "clause_type": "requirement",
        });
        assert!(registry.validate("clause", doc).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_enum_value() {
        let registry = SchemaRegistry::new();
        let doc = serde_json::json!({
            "text": "x",
            "risk_level": "extreme",
            "jurisdiction": "US",
            "clause_type": "requirement",
        });
        assert!(registry.validate("clause", doc).is_err());
    }

    #[test]
    fn auditor_cannot_write_step_completion() {
        let registry = SchemaRegistry::new();
        assert!(registry.check_writable("step", "completed", &Role::Auditor).is_err());
        assert!(registry.check_writable("step", "completed", &Role::Operator).is_ok());
    }

    #[test]
    fn custom_role_without_configured_access_sees_only_id() {
        let registry = SchemaRegistry::new();
        let node = OntologyNode::Clause(crate::model::Clause {
            id: "c1".to_string(),
            step_id: "s1".to_string(),
            text: "secret clause".to_string(),
            risk_level: crate::model::RiskLevel::Low,
            jurisdiction: "US".to_string(),
            clause_type: crate::model::ClauseType::Requirement,
            citations: vec![],
        });
        let projected = registry.project(&node, &Role::Custom("vendor".to_string())).unwrap();
        assert_eq!(projected.as_object().unwrap().len(), 2); // id + kind tag
        assert!(projected.get("text").is_none());
    }
}
