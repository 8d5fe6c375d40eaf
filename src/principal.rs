//! Principals, roles and the static role → permission mapping.
//!
//! Roles are a closed enum and every role maps to a fixed permission set known
//! at compile time; there is no runtime permission merging. `Admin` implicitly
//! holds the full permission universe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use utoipa::ToSchema;
use uuid::Uuid;

/// Roles of the repair platform. Customers book repairs, technicians work
/// them, admins run the shop.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Technician,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Customer => "customer",
            Self::Technician => "technician",
            Self::Admin => "admin",
        };
        write!(f, "{name}")
    }
}

/// `resource:action` permission pairs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    BookingCreate,
    BookingRead,
    BookingUpdate,
    BookingCancel,
    DeviceRead,
    QuoteRead,
    QuoteCreate,
    RepairRead,
    RepairUpdate,
    UserRead,
    UserManage,
    ReportRead,
    SessionRevoke,
    SecurityRead,
    SecurityManage,
}

impl Permission {
    /// All permissions; the admin universe.
    pub const ALL: &'static [Self] = &[
        Self::BookingCreate,
        Self::BookingRead,
        Self::BookingUpdate,
        Self::BookingCancel,
        Self::DeviceRead,
        Self::QuoteRead,
        Self::QuoteCreate,
        Self::RepairRead,
        Self::RepairUpdate,
        Self::UserRead,
        Self::UserManage,
        Self::ReportRead,
        Self::SessionRevoke,
        Self::SecurityRead,
        Self::SecurityManage,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookingCreate => "booking:create",
            Self::BookingRead => "booking:read",
            Self::BookingUpdate => "booking:update",
            Self::BookingCancel => "booking:cancel",
            Self::DeviceRead => "device:read",
            Self::QuoteRead => "quote:read",
            Self::QuoteCreate => "quote:create",
            Self::RepairRead => "repair:read",
            Self::RepairUpdate => "repair:update",
            Self::UserRead => "user:read",
            Self::UserManage => "user:manage",
            Self::ReportRead => "report:read",
            Self::SessionRevoke => "session:revoke",
            Self::SecurityRead => "security:read",
            Self::SecurityManage => "security:manage",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Role {
    /// Static permission set for the role.
    #[must_use]
    pub const fn permissions(self) -> &'static [Permission] {
        match self {
            Self::Customer => &[
                Permission::BookingCreate,
                Permission::BookingRead,
                Permission::BookingCancel,
                Permission::DeviceRead,
                Permission::QuoteRead,
            ],
            Self::Technician => &[
                Permission::BookingRead,
                Permission::BookingUpdate,
                Permission::DeviceRead,
                Permission::QuoteRead,
                Permission::QuoteCreate,
                Permission::RepairRead,
                Permission::RepairUpdate,
            ],
            Self::Admin => Permission::ALL,
        }
    }

    #[must_use]
    pub fn has_permission(self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// Identity snapshot read by the control plane. Role/active/verified flags are
/// mutated by administrative collaborators elsewhere; this crate only reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub is_verified: bool,
}

/// A principal plus its stored credential digest, as handed out by the
/// directory during login.
#[derive(Clone, Debug)]
pub struct PrincipalRecord {
    pub principal: Principal,
    pub password_digest: String,
}

/// Directory collaborator backing the relational user store. The control
/// plane never writes identity data; it reads records at login and caches
/// snapshots with a short TTL.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<PrincipalRecord>>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Principal>>;

    /// Lazy rehash hook: persist an upgraded digest after a successful login.
    async fn update_password_digest(&self, id: Uuid, digest: &str) -> anyhow::Result<()>;
}

/// Map-backed directory for tests and single-node demos.
#[derive(Default)]
pub struct InMemoryDirectory {
    records: RwLock<HashMap<Uuid, PrincipalRecord>>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: PrincipalRecord) {
        self.records
            .write()
            .await
            .insert(record.principal.id, record);
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) {
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.principal.is_active = is_active;
        }
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryDirectory {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<PrincipalRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|record| record.principal.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Principal>> {
        let records = self.records.read().await;
        Ok(records.get(&id).map(|record| record.principal.clone()))
    }

    async fn update_password_digest(&self, id: Uuid, digest: &str) -> anyhow::Result<()> {
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.password_digest = digest.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_holds_every_permission() {
        for permission in Permission::ALL {
            assert!(Role::Admin.has_permission(*permission));
        }
    }

    #[test]
    fn customer_cannot_manage_security() {
        assert!(Role::Customer.has_permission(Permission::BookingCreate));
        assert!(!Role::Customer.has_permission(Permission::SecurityManage));
        assert!(!Role::Customer.has_permission(Permission::RepairUpdate));
    }

    #[test]
    fn technician_set_is_static_and_disjoint_from_admin_only() {
        assert!(Role::Technician.has_permission(Permission::RepairUpdate));
        assert!(!Role::Technician.has_permission(Permission::UserManage));
        assert!(!Role::Technician.has_permission(Permission::BookingCreate));
    }

    #[test]
    fn permission_strings_are_resource_action_pairs() {
        for permission in Permission::ALL {
            let rendered = permission.to_string();
            assert_eq!(rendered.split(':').count(), 2, "bad pair: {rendered}");
        }
    }

    #[tokio::test]
    async fn directory_finds_by_email_and_id() -> anyhow::Result<()> {
        let directory = InMemoryDirectory::new();
        let id = Uuid::new_v4();
        directory
            .insert(PrincipalRecord {
                principal: Principal {
                    id,
                    email: "alice@example.com".to_string(),
                    role: Role::Customer,
                    is_active: true,
                    is_verified: true,
                },
                password_digest: "digest".to_string(),
            })
            .await;

        let by_email = directory.find_by_email("alice@example.com").await?;
        assert!(by_email.is_some());
        let by_id = directory.find_by_id(id).await?;
        assert_eq!(by_id.map(|principal| principal.email).as_deref(), Some("alice@example.com"));
        Ok(())
    }
}
