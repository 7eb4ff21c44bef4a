//! Authenticated actors and institutional roles.
//!
//! The core never authenticates anyone. Callers hand it an [`Actor`] that was
//! already resolved from a verified session.

use serde::{Deserialize, Serialize};
use std::fmt;

use bursar_shared::types::{DepartmentId, UserId};

/// Institutional role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Department staff; submits expenditures.
    Department,
    /// Head of a department; verifies its expenditures.
    Hod,
    /// Accounts office; approves expenditures.
    Office,
    /// Vice principal; oversight approver.
    VicePrincipal,
    /// Principal; oversight approver.
    Principal,
    /// System administrator.
    Admin,
}

impl Role {
    /// Parse a role from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "department" => Some(Self::Department),
            "hod" => Some(Self::Hod),
            "office" => Some(Self::Office),
            "vice_principal" => Some(Self::VicePrincipal),
            "principal" => Some(Self::Principal),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Returns the string representation of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Department => "department",
            Self::Hod => "hod",
            Self::Office => "office",
            Self::VicePrincipal => "vice_principal",
            Self::Principal => "principal",
            Self::Admin => "admin",
        }
    }

    /// Roles allowed to create and revise allocations.
    #[must_use]
    pub fn can_manage_allocations(&self) -> bool {
        matches!(
            self,
            Self::Office | Self::VicePrincipal | Self::Principal | Self::Admin
        )
    }

    /// Oversight roles may reject an expenditure at any step.
    #[must_use]
    pub fn is_oversight(&self) -> bool {
        matches!(self, Self::VicePrincipal | Self::Principal)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role tag of a single step in an approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    /// Department head verification.
    Hod,
    /// Accounts office approval.
    Office,
    /// Vice principal approval.
    VicePrincipal,
    /// Principal approval.
    Principal,
}

impl ApproverRole {
    /// The user role that may act on this step.
    #[must_use]
    pub const fn role(self) -> Role {
        match self {
            Self::Hod => Role::Hod,
            Self::Office => Role::Office,
            Self::VicePrincipal => Role::VicePrincipal,
            Self::Principal => Role::Principal,
        }
    }

    /// Returns the string representation of the step role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.role().as_str()
    }

    /// Parse a step role from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match Role::parse(s)? {
            Role::Hod => Some(Self::Hod),
            Role::Office => Some(Self::Office),
            Role::VicePrincipal => Some(Self::VicePrincipal),
            Role::Principal => Some(Self::Principal),
            Role::Department | Role::Admin => None,
        }
    }
}

impl fmt::Display for ApproverRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated user acting on the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// The user's ID.
    pub user_id: UserId,
    /// The user's role.
    pub role: Role,
    /// Department the user belongs to, if any.
    pub department_id: Option<DepartmentId>,
}

impl Actor {
    /// Creates an actor without a department.
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            department_id: None,
        }
    }

    /// Assigns the actor to a department.
    #[must_use]
    pub const fn in_department(mut self, department_id: DepartmentId) -> Self {
        self.department_id = Some(department_id);
        self
    }

    /// Returns true if this actor may act on the given workflow step.
    #[must_use]
    pub fn holds(&self, step: ApproverRole) -> bool {
        self.role == step.role()
    }

    /// Identity recorded as the holder of locks taken on this actor's behalf.
    #[must_use]
    pub fn lock_holder(&self) -> String {
        self.user_id.to_string()
    }
}
