//! External system integrations referenced by jobs

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationKind {
    Jenkins,
    Database,
    Nacos,
    Apollo,
    Jira,
    Guanceyun,
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntegrationKind::Jenkins => "jenkins",
            IntegrationKind::Database => "database",
            IntegrationKind::Nacos => "nacos",
            IntegrationKind::Apollo => "apollo",
            IntegrationKind::Jira => "jira",
            IntegrationKind::Guanceyun => "guanceyun",
        };
        f.write_str(s)
    }
}

/// Connection details for one external system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    pub kind: IntegrationKind,
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
    /// Human-facing console, used for links in job results
    #[serde(default)]
    pub console_address: String,
    /// Database flavour for `database` integrations
    #[serde(default)]
    pub db_type: String,
}
