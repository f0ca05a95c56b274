use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{BookingError, BookingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    User,
    Admin,
    PaymentProvider,
}

impl FromStr for CallerRole {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "user" => Ok(CallerRole::User),
            "admin" => Ok(CallerRole::Admin),
            "payment_provider" => Ok(CallerRole::PaymentProvider),
            other => Err(BookingError::invalid_argument(format!("Unknown caller role '{}'", other))),
        }
    }
}

/// Identity already verified by the gateway in front of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: CallerRole,
}

impl Caller {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: CallerRole::User,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: CallerRole::Admin,
        }
    }

    pub fn payment_provider(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: CallerRole::PaymentProvider,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == CallerRole::Admin
    }

    pub fn can_settle_payments(&self) -> bool {
        matches!(self.role, CallerRole::Admin | CallerRole::PaymentProvider)
    }
}

pub fn require_caller(caller: Option<&Caller>) -> BookingResult<&Caller> {
    match caller {
        Some(caller) if !caller.id.trim().is_empty() => Ok(caller),
        _ => Err(BookingError::unauthenticated(
            "The function must be called while authenticated.",
        )),
    }
}
