//! # Network security policy compiler
//!
//! Compiles platform-neutral network-security intents ("group A may reach
//! group B on service S") into Terraform configuration for AWS, GCP, Azure,
//! Palo Alto Networks, Fortinet and Illumio.
//!
//! ## Layout
//! - [`model`]: hosts, groups, services and policies as YAML documents
//! - [`registry`]: the loaded object store and recursive group resolution
//! - [`adapter`] and [`platforms`]: per-platform translation
//! - [`engine`]: validation, resolution and generation per (policy, platform, scope)
//! - [`guardrails`] and [`impact`]: review gating and change-impact analysis

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod engine;
pub mod error;
pub mod guardrails;
pub mod hcl;
pub mod impact;
pub mod model;
pub mod platforms;
pub mod registry;

// Re-export main types
pub use adapter::{AdapterConfig, PlatformAdapter};
pub use engine::{
    AdapterEngine, BatchOutput, EngineOptions, GenerationFailure, GenerationResults,
    PolicyOutput, WorkspaceManifest, deployment_unit,
};
pub use error::{ObjectKind, PolicyError, Result};
pub use guardrails::{Decision, GuardrailEngine, GuardrailReport, GuardrailRules};
pub use impact::{ChangeAnalysis, RepoLayout, analyze_changes};
pub use model::{
    Action, Endpoint, Group, Host, Platform, Policy, ResolvedGroup, ResolvedMembers,
    ResolvedPolicy, ResolvedService, Service, ServiceRef,
};
pub use registry::Registry;

/// Document `apiVersion` accepted by the loader
pub use model::API_VERSION;
