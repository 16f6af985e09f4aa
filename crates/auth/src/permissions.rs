use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission name such as `payments.apply`. `*` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));
    pub const INVOICES_CREATE: Permission = Permission(Cow::Borrowed("invoices.create"));
    pub const INVOICES_READ: Permission = Permission(Cow::Borrowed("invoices.read"));
    pub const PAYMENTS_APPLY: Permission = Permission(Cow::Borrowed("payments.apply"));
    pub const PAYMENTS_RECORD_FAILURE: Permission =
        Permission(Cow::Borrowed("payments.record_failure"));
    pub const PAYMENTS_READ: Permission = Permission(Cow::Borrowed("payments.read"));
    pub const USERS_MANAGE: Permission = Permission(Cow::Borrowed("users.manage"));
    pub const AUDIT_READ: Permission = Permission(Cow::Borrowed("audit.read"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
