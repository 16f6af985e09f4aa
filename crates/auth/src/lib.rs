//! `hims-auth`: staff authentication and authorization.
//!
//! Claims, roles and permissions are plain data; [`jwt`] signs and verifies
//! them, [`password`] hashes staff credentials and [`authorize`] makes the
//! permission decision. Nothing here knows about HTTP or storage.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod user;

pub use authorize::{AuthzError, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtIssuer, Hs256JwtValidator, JwtError, JwtValidator};
pub use password::{PasswordError, hash_password, verify_password};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
pub use user::{NewUser, UserAccount, UserError, UserUpdate};
