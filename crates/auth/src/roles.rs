use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Staff role carried in tokens. The mapping from roles to permissions lives
/// with the policy layer, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const ACCOUNTANT: Role = Role(Cow::Borrowed("accountant"));
    pub const CASHIER: Role = Role(Cow::Borrowed("cashier"));
    pub const PHARMACIST: Role = Role(Cow::Borrowed("pharmacist"));
    pub const DOCTOR: Role = Role(Cow::Borrowed("doctor"));
    pub const NURSE: Role = Role(Cow::Borrowed("nurse"));

    /// Roles a user account may be registered with.
    pub const STAFF: [Role; 6] = [
        Role::ADMIN,
        Role::ACCOUNTANT,
        Role::CASHIER,
        Role::PHARMACIST,
        Role::DOCTOR,
        Role::NURSE,
    ];

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_staff_role(&self) -> bool {
        Role::STAFF.iter().any(|r| r == self)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
