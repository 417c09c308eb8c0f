use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Profile, Role, Transition};

/// Profile records the progression job reads and writes.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Approved students and scholars with a known semester.
    async fn fetch_progression_candidates(&self) -> anyhow::Result<Vec<Profile>>;

    async fn apply_transition(&self, id: Uuid, transition: &Transition) -> anyhow::Result<()>;
}

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> anyhow::Result<Option<Uuid>>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn has_role(&self, user_id: Uuid, role: Role) -> anyhow::Result<bool>;
}
