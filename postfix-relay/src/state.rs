use std::{
	collections::{BTreeMap, HashMap},
	fmt::Display,
	net::IpAddr,
	str::FromStr,
};

use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

use crate::hostname::Hostname;

/// The raw charm configuration: option names mapped to their unparsed
/// values. Options that hold lists or maps carry a JSON document.
pub type ConfigMap = HashMap<String, String>;

const DEFAULT_CONNECTION_LIMIT: u32 = 100;

/// Returned when the charm configuration is found to be invalid. The
/// message names the offending option; it is meant for the log, not for
/// the unit status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {msg}")]
pub struct ConfigurationError {
	pub msg: String,
}

impl ConfigurationError {
	pub fn new<S: Into<String>>(msg: S) -> Self {
		Self { msg: msg.into() }
	}
}

/// Raised by the option-enum `FromStr` impls for values outside the
/// allowed set.
#[derive(Error, Debug)]
#[error("unknown value {0:?}")]
pub struct UnknownValueError(String);

/// Valid right-hand sides in a Postfix access(5) table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum AccessMapValue {
	#[serde(rename = "OK")]
	Ok,
	#[serde(rename = "REJECT")]
	Reject,
	#[serde(rename = "restricted")]
	Restricted,
}

impl AccessMapValue {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Ok => "OK",
			Self::Reject => "REJECT",
			Self::Restricted => "restricted",
		}
	}
}

/// Postfix lookup table types this charm renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupTableType {
	Hash,
	Regexp,
	Cidr,
}

impl LookupTableType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Hash => "hash",
			Self::Regexp => "regexp",
			Self::Cidr => "cidr",
		}
	}
}

impl FromStr for LookupTableType {
	type Err = UnknownValueError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"hash" => Ok(Self::Hash),
			"regexp" => Ok(Self::Regexp),
			"cidr" => Ok(Self::Cidr),
			other => Err(UnknownValueError(other.into())),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsSecurityLevel {
	None,
	May,
	Encrypt,
}

impl TlsSecurityLevel {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::None => "none",
			Self::May => "may",
			Self::Encrypt => "encrypt",
		}
	}
}

impl FromStr for TlsSecurityLevel {
	type Err = UnknownValueError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"none" => Ok(Self::None),
			"may" => Ok(Self::May),
			"encrypt" => Ok(Self::Encrypt),
			other => Err(UnknownValueError(other.into())),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsCipherGrade {
	High,
	Medium,
	Null,
	Low,
	Export,
}

impl TlsCipherGrade {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::High => "HIGH",
			Self::Medium => "MEDIUM",
			Self::Null => "NULL",
			Self::Low => "LOW",
			Self::Export => "EXPORT",
		}
	}
}

impl FromStr for TlsCipherGrade {
	type Err = UnknownValueError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"HIGH" => Ok(Self::High),
			"MEDIUM" => Ok(Self::Medium),
			"NULL" => Ok(Self::Null),
			"LOW" => Ok(Self::Low),
			"EXPORT" => Ok(Self::Export),
			other => Err(UnknownValueError(other.into())),
		}
	}
}

/// An IP address, optionally with a CIDR prefix. Used for the SPF skip
/// list and relay access sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpNetwork {
	pub addr: IpAddr,
	pub prefix: Option<u8>,
}

impl Display for IpNetwork {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.prefix {
			Some(prefix) => write!(f, "{}/{}", self.addr, prefix),
			None => write!(f, "{}", self.addr),
		}
	}
}

impl FromStr for IpNetwork {
	type Err = ParseNetworkError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (addr, prefix) = match s.split_once('/') {
			Some((addr, prefix)) => (addr, Some(prefix)),
			None => (s, None),
		};

		let addr: IpAddr = addr.parse()?;
		let prefix = prefix
			.map(|p| {
				let max = if addr.is_ipv4() { 32 } else { 128 };
				match p.parse::<u8>() {
					Ok(p) if p <= max => Ok(p),
					_ => Err(ParseNetworkError::InvalidPrefix),
				}
			})
			.transpose()?;

		Ok(Self { addr, prefix })
	}
}

#[derive(Error, Debug)]
pub enum ParseNetworkError {
	#[error("failed to parse address")]
	AddrParseError(#[from] std::net::AddrParseError),
	#[error("prefix length out of range")]
	InvalidPrefix,
}

/// A single `name:password-hash` entry for the Dovecot users file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtpAuthUser {
	pub username: String,
	pub password_hash: String,
}

impl FromStr for SmtpAuthUser {
	type Err = ParseAuthUserError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.split_once(':') {
			Some((username, password_hash))
				if !username.is_empty() && !password_hash.is_empty() =>
			{
				Ok(Self {
					username: username.into(),
					password_hash: password_hash.into(),
				})
			}
			_ => Err(ParseAuthUserError),
		}
	}
}

#[derive(Error, Debug)]
#[error("expected name:password-hash")]
pub struct ParseAuthUserError;

/// The validated charm state, built once per event from the raw
/// configuration. If construction succeeds, every field needed for
/// parameter derivation is present and well formed.
#[derive(Clone, Debug, PartialEq)]
pub struct State {
	pub admin_email: Option<String>,
	pub additional_smtpd_recipient_restrictions: Vec<String>,
	pub allowed_relay_networks: Vec<String>,
	pub append_x_envelope_to: bool,
	pub connection_limit: u32,
	pub domain: Option<Hostname>,
	pub enable_rate_limits: bool,
	pub enable_reject_unknown_sender_domain: bool,
	pub enable_smtp_auth: bool,
	pub enable_spf: bool,
	pub header_checks: Vec<String>,
	pub relay_access_sources: Vec<String>,
	pub relay_domains: Vec<String>,
	pub relay_host: Option<String>,
	pub relay_recipient_maps: BTreeMap<String, String>,
	pub restrict_recipients: BTreeMap<String, AccessMapValue>,
	pub restrict_senders: BTreeMap<String, AccessMapValue>,
	pub restrict_sender_access: Vec<String>,
	pub sender_login_maps: BTreeMap<String, String>,
	pub smtp_auth_users: Vec<SmtpAuthUser>,
	pub smtp_header_checks: Vec<String>,
	pub spf_skip_addresses: Vec<IpNetwork>,
	pub tls_ciphers: Option<TlsCipherGrade>,
	pub tls_exclude_ciphers: Vec<String>,
	pub tls_policy_maps: BTreeMap<String, String>,
	pub tls_protocols: Vec<String>,
	pub tls_security_level: Option<TlsSecurityLevel>,
	pub transport_maps: BTreeMap<String, String>,
	pub virtual_alias_domains: Vec<String>,
	pub virtual_alias_maps: BTreeMap<String, String>,
	pub virtual_alias_maps_type: LookupTableType,
}

impl State {
	/// Build the validated state from the raw configuration. Pure; the
	/// only failure mode is a [`ConfigurationError`] describing the bad
	/// option.
	pub fn from_config(config: &ConfigMap) -> Result<Self, ConfigurationError> {
		Ok(Self {
			admin_email: raw(config, "admin_email").map(String::from),
			additional_smtpd_recipient_restrictions: parse_json(
				config,
				"additional_smtpd_recipient_restrictions",
			)?,
			allowed_relay_networks: parse_json(config, "allowed_relay_networks")?,
			append_x_envelope_to: parse_bool(config, "append_x_envelope_to", false)?,
			connection_limit: parse_connection_limit(config)?,
			domain: parse_scalar::<Hostname>(config, "domain")?,
			enable_rate_limits: parse_bool(config, "enable_rate_limits", false)?,
			enable_reject_unknown_sender_domain: parse_bool(
				config,
				"enable_reject_unknown_sender_domain",
				true,
			)?,
			enable_smtp_auth: parse_bool(config, "enable_smtp_auth", true)?,
			enable_spf: parse_bool(config, "enable_spf", false)?,
			header_checks: parse_json(config, "header_checks")?,
			relay_access_sources: parse_json(config, "relay_access_sources")?,
			relay_domains: nonempty_entries(config, "relay_domains")?,
			relay_host: raw(config, "relay_host").map(String::from),
			relay_recipient_maps: parse_json(config, "relay_recipient_maps")?,
			restrict_recipients: parse_json(config, "restrict_recipients")?,
			restrict_senders: parse_json(config, "restrict_senders")?,
			restrict_sender_access: nonempty_entries(config, "restrict_sender_access")?,
			sender_login_maps: parse_json(config, "sender_login_maps")?,
			smtp_auth_users: parse_entries(config, "smtp_auth_users")?,
			smtp_header_checks: parse_json(config, "smtp_header_checks")?,
			spf_skip_addresses: parse_entries(config, "spf_skip_addresses")?,
			tls_ciphers: parse_scalar(config, "tls_ciphers")?,
			tls_exclude_ciphers: parse_json(config, "tls_exclude_ciphers")?,
			tls_policy_maps: parse_json(config, "tls_policy_maps")?,
			tls_protocols: parse_json(config, "tls_protocols")?,
			tls_security_level: parse_scalar(config, "tls_security_level")?,
			transport_maps: parse_json(config, "transport_maps")?,
			virtual_alias_domains: nonempty_entries(config, "virtual_alias_domains")?,
			virtual_alias_maps: parse_json(config, "virtual_alias_maps")?,
			virtual_alias_maps_type: parse_scalar(config, "virtual_alias_maps_type")?
				.unwrap_or(LookupTableType::Hash),
		})
	}
}

/// An unset or empty option is treated as absent, the way juju reports
/// unset string options.
fn raw<'c>(config: &'c ConfigMap, key: &str) -> Option<&'c str> {
	config
		.get(key)
		.map(String::as_str)
		.filter(|value| !value.is_empty())
}

fn parse_bool(config: &ConfigMap, key: &str, default: bool) -> Result<bool, ConfigurationError> {
	match raw(config, key) {
		None => Ok(default),
		Some("true") => Ok(true),
		Some("false") => Ok(false),
		Some(other) => Err(ConfigurationError::new(format!(
			"{key}: expected true or false, got {other:?}"
		))),
	}
}

/// Parse a JSON-document option into its collection type. Absent options
/// become the empty collection.
fn parse_json<T>(config: &ConfigMap, key: &str) -> Result<T, ConfigurationError>
where
	T: DeserializeOwned + Default,
{
	match raw(config, key) {
		None => Ok(T::default()),
		Some(doc) => serde_json::from_str(doc)
			.map_err(|err| ConfigurationError::new(format!("{key}: {err}"))),
	}
}

fn parse_scalar<T>(config: &ConfigMap, key: &str) -> Result<Option<T>, ConfigurationError>
where
	T: FromStr,
	T::Err: Display,
{
	raw(config, key)
		.map(|value| {
			value
				.parse()
				.map_err(|err| ConfigurationError::new(format!("{key}: {err}")))
		})
		.transpose()
}

/// A JSON list option whose entries must each parse to `T`.
fn parse_entries<T>(config: &ConfigMap, key: &str) -> Result<Vec<T>, ConfigurationError>
where
	T: FromStr,
	T::Err: Display,
{
	parse_json::<Vec<String>>(config, key)?
		.iter()
		.map(|entry| {
			entry
				.parse()
				.map_err(|err| ConfigurationError::new(format!("{key}: {entry}: {err}")))
		})
		.collect()
}

fn nonempty_entries(config: &ConfigMap, key: &str) -> Result<Vec<String>, ConfigurationError> {
	let entries = parse_json::<Vec<String>>(config, key)?;
	if entries.iter().any(String::is_empty) {
		return Err(ConfigurationError::new(format!(
			"{key}: entries must not be empty"
		)));
	}
	Ok(entries)
}

fn parse_connection_limit(config: &ConfigMap) -> Result<u32, ConfigurationError> {
	match raw(config, "connection_limit") {
		None => Ok(DEFAULT_CONNECTION_LIMIT),
		Some(value) => value.parse().map_err(|err| {
			ConfigurationError::new(format!("connection_limit: {err}"))
		}),
	}
}
