//! Hierarchical, versioned Policy/SOP/Section/Step/Clause store (C4, §4.4).

use crate::model::*;
use dashmap::DashMap;
use occam_core::error::{Error, Result};
use occam_core::types::Role;
use occam_core::utils::content_id;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct PolicyEntry {
    /// Keyed by published semver; publication of a new version only ever
    /// inserts, never mutates an existing entry (§8 "Ontology immutability").
    versions: RwLock<BTreeMap<semver::Version, Arc<PolicySnapshot>>>,
}

/// Arena-by-id store for the ontology forest. Per §9's "cyclic references"
/// redesign flag, entities hold child/parent ids rather than pointers;
/// traversal resolves ids through this store instead of following references
/// directly.
pub struct OntologyStore {
    policies: DashMap<String, Arc<PolicyEntry>>,
    /// Maps a node id to the most recently published `(policyId, version)`
    /// that contains it, so `get`/`project` don't require the caller to know
    /// which version an id belongs to.
    index: DashMap<String, (String, semver::Version)>,
}

impl OntologyStore {
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
            index: DashMap::new(),
        }
    }

    /// Build a fully validated tree with auto-assigned ids and dense orders.
    /// Touches no store state — on any structural violation the returned
    /// `Err` leaves the store exactly as it was (§4.4 "Build" atomicity).
    pub fn build(&self, policy_id: Option<String>, input: PolicyInput) -> Result<PolicySnapshot> {
        if input.title.trim().is_empty() {
            return Err(Error::validation("policy title must not be empty"));
        }
        if input.sops.is_empty() {
            return Err(Error::validation("policy must declare at least one SOP"));
        }

        let policy_id = policy_id.unwrap_or_else(|| {
            derive_id("policy", input.seed.as_deref(), &serde_json::json!({ "title": input.title }))
        });

        let mut sops = HashMap::new();
        let mut sections = HashMap::new();
        let mut steps = HashMap::new();
        let mut clauses = HashMap::new();
        let mut sop_ids = Vec::with_capacity(input.sops.len());

        for sop_input in input.sops {
            let sop_id = derive_id(
                &policy_id,
                sop_input.seed.as_deref(),
                &serde_json::json!({ "name": sop_input.name }),
            );
            let mut section_ids = Vec::with_capacity(sop_input.sections.len());

            for (section_order, section_input) in sop_input.sections.into_iter().enumerate() {
                let section_id = derive_id(
                    &sop_id,
                    section_input.seed.as_deref(),
                    &serde_json::json!({ "name": section_input.name }),
                );
                let mut step_ids = Vec::with_capacity(section_input.steps.len());

                for (step_order, step_input) in section_input.steps.into_iter().enumerate() {
                    let step_id = derive_id(
                        &section_id,
                        step_input.seed.as_deref(),
                        &serde_json::json!({ "description": step_input.description }),
                    );
                    let mut clause_ids = Vec::with_capacity(step_input.clauses.len());

                    for clause_input in step_input.clauses {
                        let clause_id = derive_id(
                            &step_id,
                            clause_input.seed.as_deref(),
                            &serde_json::json!({ "text": clause_input.text }),
                        );
                        clauses.insert(
                            clause_id.clone(),
                            Clause {
                                id: clause_id.clone(),
                                step_id: step_id.clone(),
                                text: clause_input.text,
                                risk_level: clause_input.risk_level,
                                jurisdiction: clause_input.jurisdiction,
                                clause_type: clause_input.clause_type,
                                citations: clause_input.citations,
                            },
                        );
                        clause_ids.push(clause_id);
                    }

                    steps.insert(
                        step_id.clone(),
                        Step {
                            id: step_id.clone(),
                            section_id: section_id.clone(),
                            description: step_input.description,
                            responsible_role: step_input.responsible_role,
                            order: step_order as u32,
                            completed: false,
                            clause_ids,
                        },
                    );
                    step_ids.push(step_id);
                }

                sections.insert(
                    section_id.clone(),
                    Section {
                        id: section_id.clone(),
                        sop_id: sop_id.clone(),
                        name: section_input.name,
                        order: section_order as u32,
                        step_ids,
                    },
                );
                section_ids.push(section_id);
            }

            sops.insert(
                sop_id.clone(),
                Sop {
                    id: sop_id.clone(),
                    policy_id: policy_id.clone(),
                    owner_role: sop_input.owner_role,
                    name: sop_input.name,
                    version: semver::Version::new(0, 0, 0),
                    section_ids,
                },
            );
            sop_ids.push(sop_id);
        }

        let now = chrono::Utc::now();
        Ok(PolicySnapshot {
            policy: Policy {
                id: policy_id,
                title: input.title,
                version: semver::Version::new(0, 0, 0),
                created_at: now,
                updated_at: now,
                sop_ids,
            },
            sops,
            sections,
            steps,
            clauses,
        })
    }

    /// Assign a new semver and make the snapshot queryable. Structural
    /// mutation of an already-published `(policyId, version)` is impossible
    /// through this API: callers always go through `build` to get a fresh
    /// snapshot, and `publish` never overwrites an existing version entry.
    pub async fn publish(
        &self,
        mut snapshot: PolicySnapshot,
        explicit_version: Option<semver::Version>,
    ) -> Result<semver::Version> {
        let policy_id = snapshot.policy.id.clone();
        let entry = self
            .policies
            .entry(policy_id.clone())
            .or_insert_with(|| {
                Arc::new(PolicyEntry {
                    versions: RwLock::new(BTreeMap::new()),
                })
            })
            .clone();

        let mut versions = entry.versions.write().await;

        let version = match explicit_version {
            Some(v) => {
                if versions.contains_key(&v) {
                    return Err(Error::conflict(format!(
                        "policy {} version {} already published",
                        policy_id, v
                    )));
                }
                if let Some((last, _)) = versions.iter().next_back() {
                    if v <= *last {
                        return Err(Error::conflict(format!(
                            "policy {} version {} is not newer than current {}",
                            policy_id, v, last
                        )));
                    }
                }
                v
            }
            None => match versions.iter().next_back() {
                Some((last, _)) => semver::Version::new(last.major, last.minor + 1, 0),
                None => semver::Version::new(1, 0, 0),
            },
        };

        snapshot.policy.version = version.clone();
        snapshot.policy.updated_at = chrono::Utc::now();
        for sop in snapshot.sops.values_mut() {
            sop.version = version.clone();
        }

        let snapshot = Arc::new(snapshot);

        self.index.insert(
            snapshot.policy.id.clone(),
            (policy_id.clone(), version.clone()),
        );
        for id in snapshot.sops.keys() {
            self.index.insert(id.clone(), (policy_id.clone(), version.clone()));
        }
        for id in snapshot.sections.keys() {
            self.index.insert(id.clone(), (policy_id.clone(), version.clone()));
        }
        for id in snapshot.steps.keys() {
            self.index.insert(id.clone(), (policy_id.clone(), version.clone()));
        }
        for id in snapshot.clauses.keys() {
            self.index.insert(id.clone(), (policy_id.clone(), version.clone()));
        }

        versions.insert(version.clone(), snapshot);
        Ok(version)
    }

    /// The full, immutable snapshot for one published `(policyId, version)`.
    /// Prior versions remain retrievable here even after a later one is
    /// published (§4.4 "the prior version remains queryable").
    pub async fn get_version(
        &self,
        policy_id: &str,
        version: &semver::Version,
    ) -> Option<Arc<PolicySnapshot>> {
        let entry = self.policies.get(policy_id)?;
        let versions = entry.versions.read().await;
        versions.get(version).cloned()
    }

    async fn resolve(&self, id: &str) -> Result<(OntologyNode, Arc<PolicySnapshot>)> {
        let (policy_id, version) = self
            .index
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found(format!("ontology entity {} not found", id)))?;
        let snapshot = self
            .get_version(&policy_id, &version)
            .await
            .ok_or_else(|| Error::not_found(format!("ontology entity {} not found", id)))?;

        let node = if snapshot.policy.id == id {
            OntologyNode::Policy(snapshot.policy.clone())
        } else if let Some(sop) = snapshot.sops.get(id) {
            OntologyNode::Sop(sop.clone())
        } else if let Some(section) = snapshot.sections.get(id) {
            OntologyNode::Section(section.clone())
        } else if let Some(step) = snapshot.steps.get(id) {
            OntologyNode::Step(step.clone())
        } else if let Some(clause) = snapshot.clauses.get(id) {
            OntologyNode::Clause(clause.clone())
        } else {
            return Err(Error::not_found(format!("ontology entity {} not found", id)));
        };

        Ok((node, snapshot))
    }

    pub async fn get(&self, id: &str) -> Result<OntologyNode> {
        self.resolve(id).await.map(|(node, _)| node)
    }

    /// Children resolved within the same snapshot as the parent, so a
    /// concurrent publish of a newer version can never mix nodes from two
    /// versions in one traversal.
    pub async fn children_of(&self, id: &str) -> Result<Vec<OntologyNode>> {
        let (node, snapshot) = self.resolve(id).await?;
        node.child_ids()
            .into_iter()
            .map(|child_id| {
                if let Some(sop) = snapshot.sops.get(&child_id) {
                    Ok(OntologyNode::Sop(sop.clone()))
                } else if let Some(section) = snapshot.sections.get(&child_id) {
                    Ok(OntologyNode::Section(section.clone()))
                } else if let Some(step) = snapshot.steps.get(&child_id) {
                    Ok(OntologyNode::Step(step.clone()))
                } else if let Some(clause) = snapshot.clauses.get(&child_id) {
                    Ok(OntologyNode::Clause(clause.clone()))
                } else {
                    Err(Error::internal(format!(
                        "dangling child reference {} from {}",
                        child_id, id
                    )))
                }
            })
            .collect()
    }

    /// Role-scoped projection (§4.4, §4.5): resolves the node then filters
    /// its fields through [`crate::schema::SchemaRegistry`].
    pub async fn project(
        &self,
        id: &str,
        role: &Role,
        schemas: &crate::schema::SchemaRegistry,
    ) -> Result<serde_json::Value> {
        let node = self.get(id).await?;
        schemas.project(&node, role)
    }
}

impl Default for OntologyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_id(parent_id: &str, seed: Option<&str>, content: &serde_json::Value) -> String {
    match seed {
        Some(seed) => content_id(content, &format!("{}:{}", parent_id, seed)),
        None => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> PolicyInput {
        PolicyInput {
            title: "Data Retention Policy".to_string(),
            seed: Some("retention".to_string()),
            sops: vec![SopInput {
                owner_role: "compliance-officer".to_string(),
                name: "Record Keeping SOP".to_string(),
                seed: Some("record-keeping".to_string()),
                sections: vec![SectionInput {
                    name: "Retention Windows".to_string(),
                    seed: Some("windows".to_string()),
                    steps: vec![StepInput {
                        description: "Classify record type".to_string(),
                        responsible_role: "operator".to_string(),
                        seed: Some("classify".to_string()),
                        clauses: vec![ClauseInput {
                            text: "Financial records must be retained 7 years".to_string(),
                            risk_level: RiskLevel::High,
                            jurisdiction: "US".to_string(),
                            clause_type: ClauseType::Requirement,
                            seed: Some("7-year".to_string()),
                            citations: vec![],
                        }],
                    }],
                }],
            }],
        }
    }

    #[test]
    fn build_assigns_dense_orders_and_stable_ids() {
        let store = OntologyStore::new();
        let a = store.build(None, sample_input()).unwrap();
        let b = store.build(None, sample_input()).unwrap();
        assert_eq!(a.policy.id, b.policy.id, "same seed must yield same id");
        let section = a.sections.values().next().unwrap();
        assert_eq!(section.order, 0);
    }

    #[test]
    fn build_rejects_policy_with_no_sops() {
        let store = OntologyStore::new();
        let mut input = sample_input();
        input.sops.clear();
        assert!(store.build(None, input).is_err());
    }

    #[tokio::test]
    async fn publish_assigns_monotonic_versions_and_keeps_prior_queryable() {
        let store = OntologyStore::new();
        let snapshot_v1 = store.build(None, sample_input()).unwrap();
        let policy_id = snapshot_v1.policy.id.clone();
        let v1 = store.publish(snapshot_v1, None).await.unwrap();
        assert_eq!(v1, semver::Version::new(1, 0, 0));

        let snapshot_v2 = store.build(Some(policy_id.clone()), sample_input()).unwrap();
        let v2 = store.publish(snapshot_v2, None).await.unwrap();
        assert_eq!(v2, semver::Version::new(1, 1, 0));

        let v1_snapshot = store.get_version(&policy_id, &v1).await.unwrap();
        assert_eq!(v1_snapshot.policy.version, v1);
    }

    #[tokio::test]
    async fn republishing_same_version_is_a_conflict() {
        let store = OntologyStore::new();
        let snapshot = store.build(None, sample_input()).unwrap();
        let policy_id = snapshot.policy.id.clone();
        let version = semver::Version::new(2, 0, 0);
        store
            .publish(
                store.build(Some(policy_id.clone()), sample_input()).unwrap(),
                Some(version.clone()),
            )
            .await
            .unwrap();
        let result = store
            .publish(
                store.build(Some(policy_id), sample_input()).unwrap(),
                Some(version),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn children_of_resolves_within_published_snapshot() {
        let store = OntologyStore::new();
        let snapshot = store.build(None, sample_input()).unwrap();
        let policy_id = snapshot.policy.id.clone();
        store.publish(snapshot, None).await.unwrap();
        let children = store.children_of(&policy_id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert!(matches!(children[0], OntologyNode::Sop(_)));
    }
}
