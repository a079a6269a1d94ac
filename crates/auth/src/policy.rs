use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;

lazy_static! {
    // WHATWG "valid e-mail address"
    static ref EMAIL_FORMAT: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+\\/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    )
    .unwrap();
}

/// Which registration checks run.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub check_password: bool,
    pub check_email_format: bool,
    pub check_email_mx: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            check_password: true,
            check_email_format: true,
            check_email_mx: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_upper: bool,
    pub require_lower: bool,
    pub require_digit: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_PASSWORD_LENGTH,
            require_upper: true,
            require_lower: true,
            require_digit: true,
        }
    }
}

impl PasswordPolicy {
    /// Every rule the password breaks, in a fixed order. Empty when it passes.
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut violations = Vec::new();

        if password.chars().count() < self.min_length {
            violations.push(format!(
                "Password length must be at least {} characters",
                self.min_length
            ));
        }
        if self.require_lower && !password.chars().any(|c| c.is_ascii_lowercase()) {
            violations.push("Password must contain a lowercase letter".to_string());
        }
        if self.require_upper && !password.chars().any(|c| c.is_ascii_uppercase()) {
            violations.push("Password must contain an uppercase letter".to_string());
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("Password must contain a digit".to_string());
        }

        violations
    }
}

pub fn is_valid_email_format(email: &str) -> bool {
    EMAIL_FORMAT.is_match(email)
}
