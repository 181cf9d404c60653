use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roles the governance engine and ontology's role-scoped projection check
/// against. `Custom` covers deployment-specific roles without an enum change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    ComplianceOfficer,
    Auditor,
    Operator,
    ServiceAccount,
    Custom(String),
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Custom(name) => write!(f, "custom:{}", name),
            other => {
                let json = serde_json::to_value(other).unwrap_or(serde_json::Value::Null);
                write!(f, "{}", json.as_str().unwrap_or("unknown"))
            }
        }
    }
}

/// Identity and trace carried alongside a request into the kernel's
/// components — the minimal shape the external interfaces (§6) need to
/// attribute an action to an actor and stitch it into the audit chain and
/// a trace. Deliberately has no session/JWT machinery: the kernel is a single
/// organization's internal control plane, not a multi-tenant auth provider,
/// so it accepts identity as already established by the caller.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub actor_id: String,
    pub roles: Vec<Role>,
    pub trace_id: String,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            roles: Vec::new(),
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// `true` if this actor holds at least one of `required`. An empty
    /// `required` list means the operation has no role restriction.
    pub fn has_any_role(&self, required: &[Role]) -> bool {
        required.is_empty() || required.iter().any(|r| self.has_role(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_operation_allows_any_actor() {
        let actor = ActorContext::new("svc-account");
        assert!(actor.has_any_role(&[]));
    }

    #[test]
    fn role_check_matches_held_role() {
        let actor = ActorContext::new("alice").with_roles(vec![Role::Auditor]);
        assert!(actor.has_any_role(&[Role::Auditor, Role::Admin]));
        assert!(!actor.has_any_role(&[Role::Admin]));
    }
}
