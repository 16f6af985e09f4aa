//! Staff user accounts.
//!
//! A user belongs to exactly one tenant and holds exactly one staff role.
//! Emails are unique and compared case-insensitively; login only takes an
//! email and a password, so the email also identifies the tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hims_core::{TenantId, UserId};

use crate::password::{self, PasswordError};
use crate::Role;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid user: {0}")]
    Invalid(String),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Registration input, before hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub tenant_id: TenantId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub department: Option<String>,
    pub password: String,
}

/// Stored account. `password_hash` never leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Changes to an existing account. `None` leaves a field as it is; an empty
/// `department` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<Role>,
    pub department: Option<String>,
    pub password: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self == &UserUpdate::default()
    }
}

fn checked_email(raw: &str) -> Result<String, UserError> {
    let email = normalize_email(raw);
    if !looks_like_email(&email) {
        return Err(UserError::Invalid(format!("'{raw}' is not an email address")));
    }
    Ok(email)
}

fn checked_name(raw: &str) -> Result<String, UserError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(UserError::Invalid("name is required".to_string()));
    }
    Ok(name.to_string())
}

fn checked_role(role: Role) -> Result<Role, UserError> {
    if !role.is_staff_role() {
        return Err(UserError::Invalid(format!("unknown role '{role}'")));
    }
    Ok(role)
}

fn non_blank(value: String) -> Option<String> {
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

impl UserAccount {
    /// Validate `new` and hash its password with `bcrypt_cost`.
    pub fn register(new: NewUser, bcrypt_cost: u32, now: DateTime<Utc>) -> Result<Self, UserError> {
        let email = checked_email(&new.email)?;
        let name = checked_name(&new.name)?;
        let role = checked_role(new.role)?;
        let password_hash = password::hash_password(&new.password, bcrypt_cost)?;

        Ok(Self {
            user_id: UserId::new(),
            tenant_id: new.tenant_id,
            email,
            name,
            role,
            department: new.department.and_then(non_blank),
            password_hash,
            created_at: now,
        })
    }

    /// The account with `update` applied. Identity, tenant and creation time
    /// never change; a new password is hashed with `bcrypt_cost`.
    pub fn updated(&self, update: UserUpdate, bcrypt_cost: u32) -> Result<Self, UserError> {
        let mut next = self.clone();
        if let Some(email) = update.email {
            next.email = checked_email(&email)?;
        }
        if let Some(name) = update.name {
            next.name = checked_name(&name)?;
        }
        if let Some(role) = update.role {
            next.role = checked_role(role)?;
        }
        if let Some(department) = update.department {
            next.department = non_blank(department);
        }
        if let Some(plain) = update.password {
            next.password_hash = password::hash_password(&plain, bcrypt_cost)?;
        }
        Ok(next)
    }

    /// Wrong password and corrupt hash both read as "no".
    pub fn check_password(&self, plain: &str) -> bool {
        match password::verify_password(plain, &self.password_hash) {
            Ok(ok) => ok,
            Err(err) => {
                tracing::warn!(user_id = %self.user_id, error = %err, "stored password hash unreadable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            tenant_id: TenantId::new(),
            email: email.to_string(),
            name: "  Liza Soberano ".to_string(),
            role,
            department: Some("Billing".to_string()),
            password: "s3cret-pass".to_string(),
        }
    }

    #[test]
    fn register_normalizes_and_hashes() {
        let user = UserAccount::register(new_user(" Liza@Hospital.PH ", Role::CASHIER), 4, Utc::now())
            .unwrap();
        assert_eq!(user.email, "liza@hospital.ph");
        assert_eq!(user.name, "Liza Soberano");
        assert_ne!(user.password_hash, "s3cret-pass");
        assert!(user.check_password("s3cret-pass"));
        assert!(!user.check_password("nope-nope"));
    }

    #[test]
    fn register_rejects_unknown_role_and_bad_email() {
        assert!(matches!(
            UserAccount::register(new_user("a@b.ph", Role::new("janitor")), 4, Utc::now()),
            Err(UserError::Invalid(_))
        ));
        assert!(matches!(
            UserAccount::register(new_user("not-an-email", Role::NURSE), 4, Utc::now()),
            Err(UserError::Invalid(_))
        ));
    }

    #[test]
    fn update_changes_only_what_it_names() {
        let user = UserAccount::register(new_user("nurse@hospital.ph", Role::NURSE), 4, Utc::now())
            .unwrap();
        let moved = user
            .updated(
                UserUpdate {
                    role: Some(Role::CASHIER),
                    department: Some("  ".to_string()),
                    ..Default::default()
                },
                4,
            )
            .unwrap();
        assert_eq!(moved.user_id, user.user_id);
        assert_eq!(moved.email, user.email);
        assert_eq!(moved.role, Role::CASHIER);
        assert_eq!(moved.department, None);
        assert_eq!(moved.password_hash, user.password_hash);
    }

    #[test]
    fn update_rehashes_a_new_password_and_validates_fields() {
        let user = UserAccount::register(new_user("acct@hospital.ph", Role::ACCOUNTANT), 4, Utc::now())
            .unwrap();
        let rekeyed = user
            .updated(
                UserUpdate {
                    password: Some("brand-new-pass".to_string()),
                    ..Default::default()
                },
                4,
            )
            .unwrap();
        assert!(rekeyed.check_password("brand-new-pass"));
        assert!(!rekeyed.check_password("s3cret-pass"));

        let bad_email = UserUpdate {
            email: Some("nowhere".to_string()),
            ..Default::default()
        };
        assert!(matches!(user.updated(bad_email, 4), Err(UserError::Invalid(_))));
        let short = UserUpdate {
            password: Some("short".to_string()),
            ..Default::default()
        };
        assert!(matches!(user.updated(short, 4), Err(UserError::Password(PasswordError::TooShort))));
        assert!(UserUpdate::default().is_empty());
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let user = UserAccount::register(new_user("doc@hospital.ph", Role::DOCTOR), 4, Utc::now())
            .unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "doctor");
    }
}
