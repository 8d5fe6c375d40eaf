//! Request/response types for the auth and security endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::principal::{Permission, Role};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub principal_id: String,
    pub session_id: String,
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokeAllResponse {
    pub revoked: usize,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UnblockRequest {
    pub ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_round_trips() -> anyhow::Result<()> {
        let request = LoginRequest {
            email: "alice@example.com".to_string(),
            password: "Sup3r-Secret!".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let decoded: LoginRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.email, "alice@example.com");
        Ok(())
    }

    #[test]
    fn session_response_serializes_role_snake_case() -> anyhow::Result<()> {
        let response = SessionResponse {
            principal_id: "id".to_string(),
            session_id: "sid".to_string(),
            role: Role::Technician,
            permissions: vec![Permission::RepairUpdate],
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["role"], "technician");
        assert_eq!(value["permissions"][0], "repair_update");
        Ok(())
    }
}
