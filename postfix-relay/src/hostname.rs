use std::fmt::Display;

use pest::Parser;
use pest_derive::*;

use thiserror::Error;

#[derive(Parser)]
#[grammar = "hostname_grammar.pest"]
struct GrammarParser;

const MAX_NAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// A fully-qualified domain name as constrained by RFC 1034 and RFC 2181.
#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct Hostname(String);

impl Hostname {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for Hostname {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for Hostname {
	type Err = ParseHostnameError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() > MAX_NAME_LENGTH {
			return Err(ParseHostnameError::TooLong);
		}

		// Hyphens may appear inside a label, but never doubled.
		if s.contains("--") {
			return Err(ParseHostnameError::InvalidName);
		}

		if s.split('.').any(|label| label.len() > MAX_LABEL_LENGTH) {
			return Err(ParseHostnameError::TooLong);
		}

		if GrammarParser::parse(Rule::validate_fqdn, s).is_ok() {
			Ok(Self(s.into()))
		} else {
			Err(ParseHostnameError::InvalidName)
		}
	}
}

#[derive(Error, Debug)]
pub enum ParseHostnameError {
	#[error("name or label exceeds the RFC length limit")]
	TooLong,
	#[error("invalid fully-qualified domain name")]
	InvalidName,
}

#[cfg(test)]
mod test {
	use std::str::FromStr;

	use super::*;

	fn valid_names() -> Vec<String> {
		vec![
			String::from("example.com"),
			String::from("mail.example.com"),
			String::from("smtp-relay.example.com"),
			String::from("a.b.c.d.example.com"),
			String::from("x0.example.com"),
			String::from("mail.0example"), // only non-final labels refuse a leading digit
		]
	}

	fn invalid_names() -> Vec<String> {
		vec![
			String::from(""),
			String::from("localhost"),     // not fully qualified
			String::from(".example.com"),  // leading dot
			String::from("example.com."),  // trailing dot
			String::from("-mail.example.com"),
			String::from("mail-.example.com"),
			String::from("ex--ample.com"),
			String::from("0mail.example.com"), // non-final labels start with a letter
			String::from("mail..example.com"),
			String::from("mail.example.com/24"),
			format!("{}.example.com", "a".repeat(64)), // label too long
		]
	}

	#[test]
	fn parses_valid_names() {
		for name in valid_names() {
			assert!(
				Hostname::from_str(&name).is_ok(),
				"expected {} to be a valid hostname",
				name
			);
		}
	}

	#[test]
	fn rejects_invalid_names() {
		for name in invalid_names() {
			assert!(
				Hostname::from_str(&name).is_err(),
				"expected {} to be an invalid hostname",
				name
			);
		}
	}

	#[test]
	fn digit_start_allowed_on_final_label_only() {
		assert!(Hostname::from_str("mail.0example").is_ok());
		assert!(Hostname::from_str("0mail.example.com").is_err());
	}

	#[test]
	fn rejects_names_over_253_octets() {
		let name = format!("{}.com", "a.".repeat(130));
		assert!(Hostname::from_str(&name).is_err());
	}

	#[test]
	fn displays_as_parsed() {
		let name = Hostname::from_str("mail.example.com").unwrap();
		assert_eq!(name.to_string(), "mail.example.com");
	}
}
