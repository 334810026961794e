//! The account records producers work from. Loading them is the caller's
//! business; producers only read them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A subscription plan. Prices are held in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: u64,
    pub name: String,
    pub amount_cents: u64,
}

impl Plan {
    /// The price as shown to users, e.g. `$10.00`.
    pub fn amount_for_display(&self) -> String {
        format!("${}.{:02}", self.amount_cents / 100, self.amount_cents % 100)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn amounts_display_with_two_decimals() {
        let plan = |amount_cents| Plan {
            id: 1,
            name: "Bronze".to_string(),
            amount_cents,
        };
        assert_eq!(plan(1000).amount_for_display(), "$10.00");
        assert_eq!(plan(1999).amount_for_display(), "$19.99");
        assert_eq!(plan(5).amount_for_display(), "$0.05");
    }

    #[test]
    fn full_name_joins_parts() {
        let user = User {
            id: 42,
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        };
        assert_eq!(user.full_name(), "Ada Lovelace");
    }
}
