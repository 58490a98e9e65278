//! Secret references: opaque UUIDs standing in for redacted values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reference to a redacted sensitive value held in the secrets store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    /// The opaque identifier embedded in payloads in place of the value.
    pub uuid: String,
    /// Name of the detection pattern that matched.
    pub pattern: String,
    /// When the secret was first captured.
    pub created_at: DateTime<Utc>,
}

impl SecretReference {
    /// The token form embedded in redacted payloads.
    pub fn token(&self) -> String {
        format!("{{{{SECRET:{}:{}}}}}", self.uuid, self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let r = SecretReference {
            uuid: "u-1".into(),
            pattern: "api_key".into(),
            created_at: Utc::now(),
        };
        assert_eq!(r.token(), "{{SECRET:u-1:api_key}}");
    }
}
