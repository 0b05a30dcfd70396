//! Projection of check results into the documents each audience sees.
//!
//! The generic view is safe for everyone and omits the failure reason. Team
//! and admin views add `message` and `details`; they differ only in the
//! index they are written to.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::check::CheckResult;
use crate::models::CheckMetadata;

/// Who a projection is written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Generic,
    Team,
    Admin,
}

/// A serialized result document and the index it belongs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub audience: Audience,
    pub index: String,
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct GenericDoc<'a> {
    #[serde(flatten)]
    metadata: &'a CheckMetadata,
    #[serde(rename = "@timestamp")]
    timestamp: String,
    passed: bool,
    passed_int: u8,
    epoch: i64,
}

#[derive(Serialize)]
struct FullDoc<'a> {
    #[serde(flatten)]
    generic: GenericDoc<'a>,
    message: &'a str,
    details: &'a BTreeMap<String, String>,
}

impl<'a> GenericDoc<'a> {
    fn new(result: &'a CheckResult) -> Self {
        Self {
            metadata: &result.metadata,
            timestamp: result.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            passed: result.passed,
            passed_int: u8::from(result.passed),
            epoch: result.timestamp.timestamp(),
        }
    }
}

fn index_name(prefix: &str, timestamp: DateTime<Utc>) -> String {
    format!("results-{}-{}", prefix.to_lowercase(), timestamp.format("%Y.%m.%d"))
}

/// The view shared with every audience
pub fn generic(result: &CheckResult) -> Result<Projection, serde_json::Error> {
    Ok(Projection {
        audience: Audience::Generic,
        index: index_name("all", result.timestamp),
        body: serde_json::to_vec(&GenericDoc::new(result))?,
    })
}

fn full(result: &CheckResult) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&FullDoc {
        generic: GenericDoc::new(result),
        message: &result.message,
        details: &result.details,
    })
}

/// The view for the team that owns the check
pub fn team(result: &CheckResult) -> Result<Projection, serde_json::Error> {
    Ok(Projection {
        audience: Audience::Team,
        index: index_name(&result.metadata.group, result.timestamp),
        body: full(result)?,
    })
}

pub fn admin(result: &CheckResult) -> Result<Projection, serde_json::Error> {
    Ok(Projection {
        audience: Audience::Admin,
        index: index_name("admin", result.timestamp),
        body: full(result)?,
    })
}

/// All three projections: generic, team, admin
pub fn project(result: &CheckResult) -> Result<[Projection; 3], serde_json::Error> {
    Ok([generic(result)?, team(result)?, admin(result)?])
}
