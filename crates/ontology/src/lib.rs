//! Ontology Store (C4) and Schema & Validation (C5): the hierarchical,
//! versioned Policy/SOP/Section/Step/Clause forest and the structural/RBAC
//! validation layer every external input to the forest passes through.

pub mod model;
pub mod schema;
pub mod store;

pub use model::{
    Clause, ClauseInput, ClauseType, OntologyNode, Policy, PolicyInput, PolicySnapshot,
    RegulatoryCitation, RiskLevel, Section, SectionInput, Sop, SopInput, Step, StepInput,
};
pub use schema::{EntitySchema, FieldConstraint, FieldSchema, RoleFieldAccess, SchemaRegistry, ValidatedDocument};
pub use store::OntologyStore;
