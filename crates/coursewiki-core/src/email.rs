//! Email address rules for account identity.
//!
//! - Length: at most 254 characters
//! - Exactly one `@`, non-empty local part, dotted domain, no whitespace
//! - Uniqueness: case-insensitive (handled by storing a normalized `email_lower`)

pub const EMAIL_MAX_LEN: usize = 254;
pub const NICKNAME_MAX_LEN: usize = 64;

pub fn normalize_email(email: &str) -> String {
	email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
	let e = email.trim();
	if e.is_empty() || e.len() > EMAIL_MAX_LEN {
		return false;
	}
	if e.chars().any(char::is_whitespace) {
		return false;
	}

	let Some((local, domain)) = e.split_once('@') else {
		return false;
	};
	if local.is_empty() || domain.contains('@') {
		return false;
	}

	// Domain needs at least one dot with labels on both sides.
	domain.split('.').count() >= 2 && domain.split('.').all(|label| !label.is_empty())
}

pub fn validate_email(email: &str) -> Result<(), &'static str> {
	if is_valid_email(email) {
		Ok(())
	} else {
		Err("Email address is invalid")
	}
}

pub fn validate_nickname(nickname: &str) -> Result<(), &'static str> {
	let n = nickname.trim();
	if n.is_empty() {
		return Err("Nickname is required");
	}
	if n.chars().count() > NICKNAME_MAX_LEN {
		return Err("Nickname must be at most 64 characters");
	}
	Ok(())
}
