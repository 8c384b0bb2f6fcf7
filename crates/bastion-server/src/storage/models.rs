//! Data models for registry storage.

use bastion_core::validate::{validate_identifier, validate_public_key};
use bastion_core::ValidationError;
use serde::{Deserialize, Serialize};

/// A registered machine. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Machine {
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub port: u16,
    pub local_user: String,
    pub public_key: String,
    pub created_at: i64,
    pub last_seen: Option<i64>,
}

/// Registration input that has passed validation.
///
/// The only way to build one is [`NewMachine::validate`], so storage never
/// sees unchecked input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMachine {
    name: String,
    owner: String,
    local_user: String,
    public_key: String,
}

impl NewMachine {
    pub fn validate(
        name: &str,
        owner: &str,
        local_user: &str,
        public_key: &str,
    ) -> Result<Self, ValidationError> {
        validate_identifier("machine name", name)?;
        validate_identifier("owner", owner)?;
        validate_identifier("local_user", local_user)?;
        let public_key = validate_public_key(public_key)?;

        Ok(Self {
            name: name.to_string(),
            owner: owner.to_string(),
            local_user: local_user.to_string(),
            public_key: public_key.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}
