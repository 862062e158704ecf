//! Explicit tenant/actor context threaded through every engine call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Dashboard audience level, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleLevel {
    Citizen,
    Employee,
    Coordinator,
    Manager,
    Executive,
    Superadmin,
}

impl RoleLevel {
    pub const ALL: [RoleLevel; 6] = [
        RoleLevel::Citizen,
        RoleLevel::Employee,
        RoleLevel::Coordinator,
        RoleLevel::Manager,
        RoleLevel::Executive,
        RoleLevel::Superadmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleLevel::Citizen => "citizen",
            RoleLevel::Employee => "employee",
            RoleLevel::Coordinator => "coordinator",
            RoleLevel::Manager => "manager",
            RoleLevel::Executive => "executive",
            RoleLevel::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "citizen" => Ok(RoleLevel::Citizen),
            "employee" => Ok(RoleLevel::Employee),
            "coordinator" => Ok(RoleLevel::Coordinator),
            "manager" => Ok(RoleLevel::Manager),
            "executive" => Ok(RoleLevel::Executive),
            "superadmin" | "super_admin" => Ok(RoleLevel::Superadmin),
            other => Err(EngineError::NoTemplate(other.to_string())),
        }
    }
}

/// Who is calling and on behalf of which municipality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub actor_id: String,
    pub role: RoleLevel,
    pub department: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>, actor_id: impl Into<String>, role: RoleLevel) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            role,
            department: None,
        }
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn is_superadmin(&self) -> bool {
        self.role == RoleLevel::Superadmin
    }

    /// Superadmins may look across tenants; everyone else only at their own.
    pub fn can_access(&self, tenant_id: &str) -> bool {
        self.is_superadmin() || self.tenant_id == tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_role_level_parsing() {
        assert_eq!("Manager".parse::<RoleLevel>().unwrap(), RoleLevel::Manager);
        assert_eq!("super_admin".parse::<RoleLevel>().unwrap(), RoleLevel::Superadmin);
        assert_matches!("mayor".parse::<RoleLevel>(), Err(EngineError::NoTemplate(r)) if r == "mayor");
    }

    #[test]
    fn test_tenant_access() {
        let ctx = TenantContext::new("city-a", "u1", RoleLevel::Manager);
        assert!(ctx.can_access("city-a"));
        assert!(!ctx.can_access("city-b"));

        let admin = TenantContext::new("platform", "root", RoleLevel::Superadmin);
        assert!(admin.can_access("city-b"));
    }
}
