//! Staff user directory.
//!
//! Accounts live in a tenant-partitioned store; a separate email index maps a
//! normalized email to its owner so login can find the account without being
//! told the tenant.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use hims_auth::{NewUser, UserAccount, UserError, UserUpdate, password, user::normalize_email};
use hims_core::{TenantId, UserId};

use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Error)]
pub enum UserDirectoryError {
    #[error("a user with email '{0}' already exists")]
    DuplicateEmail(String),

    #[error("user not found")]
    NotFound,

    /// Unknown email and wrong password look the same to the caller.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Invalid(#[from] UserError),
}

#[derive(Debug)]
pub struct UserDirectory {
    bcrypt_cost: u32,
    accounts: InMemoryTenantStore<UserId, UserAccount>,
    by_email: RwLock<HashMap<String, (TenantId, UserId)>>,
    /// Verified against when a login names no known account, so a miss
    /// costs the same bcrypt work as a wrong password.
    decoy_hash: OnceLock<Option<String>>,
}

impl UserDirectory {
    pub fn new(bcrypt_cost: u32) -> Self {
        Self {
            bcrypt_cost,
            accounts: InMemoryTenantStore::new(),
            by_email: RwLock::new(HashMap::new()),
            decoy_hash: OnceLock::new(),
        }
    }

    pub fn register(&self, new: NewUser, now: DateTime<Utc>) -> Result<UserAccount, UserDirectoryError> {
        let email = normalize_email(&new.email);
        if self.lookup(&email).is_some() {
            return Err(UserDirectoryError::DuplicateEmail(email));
        }

        // Hash outside the index lock; bcrypt is slow on purpose.
        let account = UserAccount::register(new, self.bcrypt_cost, now)?;

        let mut index = self.by_email.write().unwrap_or_else(|p| p.into_inner());
        if index.contains_key(&account.email) {
            return Err(UserDirectoryError::DuplicateEmail(account.email));
        }
        index.insert(account.email.clone(), (account.tenant_id, account.user_id));
        self.accounts
            .upsert(account.tenant_id, account.user_id, account.clone());
        drop(index);

        tracing::info!(
            tenant_id = %account.tenant_id,
            user_id = %account.user_id,
            role = %account.role,
            "user registered"
        );
        Ok(account)
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Result<UserAccount, UserDirectoryError> {
        let account = self
            .lookup(&normalize_email(email))
            .and_then(|(tenant_id, user_id)| self.accounts.get(tenant_id, &user_id));

        let verified = match account {
            Some(account) => account.check_password(password).then_some(account),
            None => {
                self.verify_decoy(password);
                None
            }
        };
        verified.ok_or_else(|| {
            tracing::info!("login rejected");
            UserDirectoryError::InvalidCredentials
        })
    }

    /// Apply `update` to one account. A changed email moves the index entry
    /// and must not belong to anyone else; a new password is re-hashed.
    pub fn update(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        update: UserUpdate,
    ) -> Result<UserAccount, UserDirectoryError> {
        let current = self
            .accounts
            .get(tenant_id, &user_id)
            .ok_or(UserDirectoryError::NotFound)?;
        if let Some(email) = update.email.as_deref().map(normalize_email) {
            if self.lookup(&email).is_some_and(|(_, owner)| owner != user_id) {
                return Err(UserDirectoryError::DuplicateEmail(email));
            }
        }

        // Hash outside the index lock, as in `register`.
        let password_changed = update.password.is_some();
        let next = current.updated(update, self.bcrypt_cost)?;

        let mut index = self.by_email.write().unwrap_or_else(|p| p.into_inner());
        // The account may have been changed or removed while we hashed.
        let current = self
            .accounts
            .get(tenant_id, &user_id)
            .ok_or(UserDirectoryError::NotFound)?;
        if let Some(&(_, owner)) = index.get(&next.email) {
            if owner != user_id {
                return Err(UserDirectoryError::DuplicateEmail(next.email));
            }
        }
        index.remove(&current.email);
        index.insert(next.email.clone(), (tenant_id, user_id));
        self.accounts.upsert(tenant_id, user_id, next.clone());
        drop(index);

        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            role = %next.role,
            email_changed = next.email != current.email,
            password_changed,
            "user updated"
        );
        Ok(next)
    }

    /// Oldest account first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<UserAccount> {
        let mut users = self.accounts.list(tenant_id);
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.email.cmp(&b.email)));
        users
    }

    pub fn get(&self, tenant_id: TenantId, user_id: UserId) -> Option<UserAccount> {
        self.accounts.get(tenant_id, &user_id)
    }

    pub fn delete(&self, tenant_id: TenantId, user_id: UserId) -> Result<UserAccount, UserDirectoryError> {
        let mut index = self.by_email.write().unwrap_or_else(|p| p.into_inner());
        let account = self
            .accounts
            .remove(tenant_id, &user_id)
            .ok_or(UserDirectoryError::NotFound)?;
        index.remove(&account.email);
        tracing::info!(tenant_id = %tenant_id, user_id = %user_id, "user deleted");
        Ok(account)
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.read().map(|i| i.is_empty()).unwrap_or(true)
    }

    fn verify_decoy(&self, plain: &str) {
        let decoy = self
            .decoy_hash
            .get_or_init(|| password::hash_password("decoy-password", self.bcrypt_cost).ok());
        if let Some(hash) = decoy {
            let _ = password::verify_password(plain, hash);
        }
    }

    fn lookup(&self, email: &str) -> Option<(TenantId, UserId)> {
        self.by_email
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(email)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use hims_auth::Role;

    use super::*;

    fn new_user(tenant_id: TenantId, email: &str, role: Role) -> NewUser {
        NewUser {
            tenant_id,
            email: email.to_string(),
            name: "Maria Clara".to_string(),
            role,
            department: None,
            password: "correct-horse".to_string(),
        }
    }

    #[test]
    fn login_finds_the_account_by_email_alone() {
        let dir = UserDirectory::new(4);
        let tenant = TenantId::new();
        let created = dir
            .register(new_user(tenant, "Cashier@Hospital.ph", Role::CASHIER), Utc::now())
            .unwrap();

        let found = dir.authenticate(" cashier@hospital.ph ", "correct-horse").unwrap();
        assert_eq!(found.user_id, created.user_id);
        assert_eq!(found.tenant_id, tenant);
    }

    #[test]
    fn unknown_email_and_wrong_password_are_indistinguishable() {
        let dir = UserDirectory::new(4);
        dir.register(new_user(TenantId::new(), "nurse@hospital.ph", Role::NURSE), Utc::now())
            .unwrap();

        let wrong = dir.authenticate("nurse@hospital.ph", "wrong-horse").unwrap_err();
        let unknown = dir.authenticate("ghost@hospital.ph", "correct-horse").unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[test]
    fn duplicate_email_is_rejected_across_tenants() {
        let dir = UserDirectory::new(4);
        dir.register(new_user(TenantId::new(), "doc@hospital.ph", Role::DOCTOR), Utc::now())
            .unwrap();
        let err = dir
            .register(new_user(TenantId::new(), "DOC@hospital.ph", Role::DOCTOR), Utc::now())
            .unwrap_err();
        assert!(matches!(err, UserDirectoryError::DuplicateEmail(_)));
    }

    #[test]
    fn unknown_email_still_pays_for_a_password_check() {
        let dir = UserDirectory::new(4);
        assert!(dir.decoy_hash.get().is_none());
        let err = dir.authenticate("ghost@hospital.ph", "whatever-pass").unwrap_err();
        assert!(matches!(err, UserDirectoryError::InvalidCredentials));
        assert!(dir.decoy_hash.get().is_some_and(|h| h.is_some()));
    }

    #[test]
    fn update_moves_the_email_index_and_rehashes() {
        let dir = UserDirectory::new(4);
        let tenant = TenantId::new();
        let user = dir
            .register(new_user(tenant, "old@hospital.ph", Role::NURSE), Utc::now())
            .unwrap();

        let updated = dir
            .update(
                tenant,
                user.user_id,
                UserUpdate {
                    email: Some("New@Hospital.ph".to_string()),
                    role: Some(Role::CASHIER),
                    password: Some("another-horse".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.email, "new@hospital.ph");
        assert_eq!(updated.role, Role::CASHIER);
        assert_eq!(updated.created_at, user.created_at);

        assert!(dir.authenticate("old@hospital.ph", "another-horse").is_err());
        assert!(dir.authenticate("new@hospital.ph", "correct-horse").is_err());
        let found = dir.authenticate("new@hospital.ph", "another-horse").unwrap();
        assert_eq!(found.user_id, user.user_id);

        // The old address is free again.
        dir.register(new_user(tenant, "old@hospital.ph", Role::NURSE), Utc::now())
            .unwrap();
    }

    #[test]
    fn update_rejects_taken_email_and_foreign_tenant() {
        let dir = UserDirectory::new(4);
        let tenant = TenantId::new();
        let first = dir
            .register(new_user(tenant, "a@hospital.ph", Role::DOCTOR), Utc::now())
            .unwrap();
        dir.register(new_user(TenantId::new(), "b@hospital.ph", Role::DOCTOR), Utc::now())
            .unwrap();

        let taken = UserUpdate {
            email: Some("B@hospital.ph".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            dir.update(tenant, first.user_id, taken),
            Err(UserDirectoryError::DuplicateEmail(_))
        ));
        assert!(matches!(
            dir.update(TenantId::new(), first.user_id, UserUpdate::default()),
            Err(UserDirectoryError::NotFound)
        ));

        // Keeping one's own email is not a clash.
        let same = UserUpdate {
            email: Some("a@hospital.ph".to_string()),
            name: Some("Jose Rizal".to_string()),
            ..Default::default()
        };
        assert_eq!(dir.update(tenant, first.user_id, same).unwrap().name, "Jose Rizal");
    }

    #[test]
    fn delete_frees_the_email_and_hides_other_tenants() {
        let dir = UserDirectory::new(4);
        let tenant = TenantId::new();
        let user = dir
            .register(new_user(tenant, "acct@hospital.ph", Role::ACCOUNTANT), Utc::now())
            .unwrap();

        assert!(matches!(
            dir.delete(TenantId::new(), user.user_id),
            Err(UserDirectoryError::NotFound)
        ));
        dir.delete(tenant, user.user_id).unwrap();
        assert!(dir.get(tenant, user.user_id).is_none());
        assert!(dir.is_empty());
        dir.register(new_user(tenant, "acct@hospital.ph", Role::ACCOUNTANT), Utc::now())
            .unwrap();
    }
}
