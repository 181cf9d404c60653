//! Verified entity data and registration lifecycle queries (C6, §4.6).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    None,
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "type")]
    pub reg_type: String,
    pub jurisdiction: String,
    pub status: RegistrationStatus,
    pub issue_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub kind: String,
    pub kyc_status: KycStatus,
    pub registrations: Vec<Registration>,
}

/// Cached, verified read source over `Entity` records. Per §4.6, a durable
/// store fronts this cache in production; the core contract is just these
/// read operations plus atomic `upsert_entity`/`upsert_rules`.
pub struct FactBox {
    entities: DashMap<String, Entity>,
    /// Jurisdiction-scoped default required registration types, settable via
    /// `upsert_rules` so callers don't have to repeat the list on every
    /// `has_required_registrations` call.
    rules: RwLock<HashMap<String, Vec<String>>>,
}

impl FactBox {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            rules: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert_entity(&self, entity: Entity) {
        self.entities.insert(entity.entity_id.clone(), entity);
    }

    pub async fn upsert_rules(&self, jurisdiction: impl Into<String>, required_types: Vec<String>) {
        self.rules.write().await.insert(jurisdiction.into(), required_types);
    }

    pub fn get_entity(&self, id: &str) -> Option<Entity> {
        self.entities.get(id).map(|e| e.value().clone())
    }

    pub fn verify_kyc(&self, id: &str) -> bool {
        self.entities
            .get(id)
            .map(|e| e.kyc_status == KycStatus::Verified)
            .unwrap_or(false)
    }

    /// True iff every type in `required_types` appears among the entity's
    /// `Active` registrations for `jurisdiction`. An empty `required_types`
    /// falls back to the rule set installed via `upsert_rules`.
    pub async fn has_required_registrations(
        &self,
        id: &str,
        jurisdiction: &str,
        required_types: &[String],
    ) -> bool {
        let Some(entity) = self.entities.get(id) else {
            return false;
        };

        let required: Vec<String> = if required_types.is_empty() {
            self.rules
                .read()
                .await
                .get(jurisdiction)
                .cloned()
                .unwrap_or_default()
        } else {
            required_types.to_vec()
        };

        required.iter().all(|required_type| {
            entity.registrations.iter().any(|reg| {
                reg.status == RegistrationStatus::Active
                    && reg.jurisdiction == jurisdiction
                    && &reg.reg_type == required_type
            })
        })
    }

    /// Registrations expiring within `[now, now + daysAhead]` that have not
    /// already lapsed.
    pub fn get_expiring_registrations(&self, days_ahead: i64) -> Vec<(String, Registration)> {
        let now = Utc::now();
        let horizon = now + chrono::Duration::days(days_ahead);
        let mut out = Vec::new();
        for entry in self.entities.iter() {
            for reg in &entry.value().registrations {
                if let Some(expiration) = reg.expiration_date {
                    if expiration >= now && expiration <= horizon {
                        out.push((entry.key().clone(), reg.clone()));
                    }
                }
            }
        }
        out
    }

    /// Registrations past expiration but still marked `Active` — a data
    /// quality signal the caller should act on.
    pub fn get_expired_registrations(&self) -> Vec<(String, Registration)> {
        let now = Utc::now();
        let mut out = Vec::new();
        for entry in self.entities.iter() {
            for reg in &entry.value().registrations {
                if reg.status == RegistrationStatus::Active {
                    if let Some(expiration) = reg.expiration_date {
                        if expiration < now {
                            out.push((entry.key().clone(), reg.clone()));
                        }
                    }
                }
            }
        }
        out
    }
}

impl Default for FactBox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_with_registrations(id: &str, regs: Vec<Registration>) -> Entity {
        Entity {
            entity_id: id.to_string(),
            kind: "business".to_string(),
            kyc_status: KycStatus::Verified,
            registrations: regs,
        }
    }

    #[tokio::test]
    async fn has_required_registrations_checks_active_status_and_jurisdiction() {
        let factbox = FactBox::new();
        factbox.upsert_entity(entity_with_registrations(
            "e1",
            vec![Registration {
                reg_type: "business-license".to_string(),
                jurisdiction: "US".to_string(),
                status: RegistrationStatus::Active,
                issue_date: Utc::now(),
                expiration_date: None,
            }],
        ));

        assert!(
            factbox
                .has_required_registrations("e1", "US", &["business-license".to_string()])
                .await
        );
        assert!(
            !factbox
                .has_required_registrations("e1", "US", &["tax-id".to_string()])
                .await
        );
    }

    #[test]
    fn get_expiring_registrations_respects_horizon() {
        let factbox = FactBox::new();
        let now = Utc::now();
        factbox.upsert_entity(entity_with_registrations(
            "e1",
            vec![
                Registration {
                    reg_type: "permit".to_string(),
                    jurisdiction: "US".to_string(),
                    status: RegistrationStatus::Active,
                    issue_date: now,
                    expiration_date: Some(now + chrono::Duration::days(10)),
                },
                Registration {
                    reg_type: "permit".to_string(),
                    jurisdiction: "US".to_string(),
                    status: RegistrationStatus::Active,
                    issue_date: now,
                    expiration_date: Some(now + chrono::Duration::days(40)),
                },
            ],
        ));

        let expiring = factbox.get_expiring_registrations(30);
        assert_eq!(expiring.len(), 1);
    }

    #[test]
    fn get_expired_registrations_only_flags_still_active_ones() {
        let factbox = FactBox::new();
        let now = Utc::now();
        factbox.upsert_entity(entity_with_registrations(
            "e1",
            vec![
                Registration {
                    reg_type: "permit".to_string(),
                    jurisdiction: "US".to_string(),
                    status: RegistrationStatus::Active,
                    issue_date: now - chrono::Duration::days(400),
                    expiration_date: Some(now - chrono::Duration::days(1)),
                },
                Registration {
                    reg_type: "permit".to_string(),
                    jurisdiction: "US".to_string(),
                    status: RegistrationStatus::Inactive,
                    issue_date: now - chrono::Duration::days(400),
                    expiration_date: Some(now - chrono::Duration::days(1)),
                },
            ],
        ));

        let expired = factbox.get_expired_registrations();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].1.status, RegistrationStatus::Active);
    }
}
