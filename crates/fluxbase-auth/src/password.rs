//! Password hashing and policy.

use fluxbase_core::Error;

/// bcrypt hashing with a configured cost plus the minimum-length policy.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    cost: u32,
    min_length: usize,
}

impl PasswordPolicy {
    pub fn new(cost: u32, min_length: usize) -> Self {
        PasswordPolicy { cost, min_length }
    }

    /// Reject passwords the policy forbids before hashing anything.
    pub fn check_strength(&self, password: &str) -> Result<(), Error> {
        if password.chars().count() < self.min_length {
            return Err(Error::BadRequest(format!(
                "password must be at least {} characters",
                self.min_length
            )));
        }
        Ok(())
    }

    pub fn hash(&self, password: &str) -> Result<String, Error> {
        self.check_strength(password)?;
        bcrypt::hash(password, self.cost).map_err(Error::internal)
    }

    /// Constant-work verification; a missing hash (OAuth-only or
    /// anonymous user) never matches.
    pub fn verify(&self, password: &str, hash: Option<&str>) -> Result<bool, Error> {
        match hash {
            Some(hash) => bcrypt::verify(password, hash).map_err(Error::internal),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimum cost keeps the test fast; production cost comes from config.
    fn policy() -> PasswordPolicy {
        PasswordPolicy::new(4, 12)
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let policy = policy();
        let hash = policy.hash("SecurePass12345").unwrap();
        assert!(policy.verify("SecurePass12345", Some(&hash)).unwrap());
        assert!(!policy.verify("WrongPass12345", Some(&hash)).unwrap());
    }

    #[test]
    fn short_passwords_are_rejected() {
        let err = policy().hash("short").unwrap_err();
        assert!(err.to_string().contains("at least 12"));
    }

    #[test]
    fn passwordless_users_never_verify() {
        assert!(!policy().verify("anything-at-all", None).unwrap());
    }
}
