use std::{
	collections::BTreeMap,
	fmt::Write,
	path::{Path, PathBuf},
};

use crate::{
	state::{AccessMapValue, IpNetwork, LookupTableType, State, TlsCipherGrade, TlsSecurityLevel},
	tls::TlsConfigPaths,
};

/// First line of every file this charm writes.
pub const MANAGED_HEADER: &str =
	"# This file is managed by the postfix-relay charm. Local changes will be overwritten.";

/// The smtpd_relay_restrictions snippet for the current state.
pub fn smtpd_relay_restrictions(state: &State) -> Vec<String> {
	let mut restrictions = vec!["permit_mynetworks".to_string()];

	if !state.relay_access_sources.is_empty() {
		restrictions.push("check_client_access cidr:/etc/postfix/relay_access".into());
	}

	if state.enable_smtp_auth {
		if !state.sender_login_maps.is_empty() {
			restrictions.push("reject_known_sender_login_mismatch".into());
		}
		if !state.restrict_senders.is_empty() {
			restrictions.push("reject_sender_login_mismatch".into());
		}
		restrictions.push("permit_sasl_authenticated".into());
	}

	restrictions.push("defer_unauth_destination".into());

	restrictions
}

/// The smtpd_sender_restrictions snippet for the current state.
pub fn smtpd_sender_restrictions(state: &State) -> Vec<String> {
	let mut restrictions = Vec::new();

	if state.enable_reject_unknown_sender_domain {
		restrictions.push("reject_unknown_sender_domain".into());
	}
	restrictions.push("check_sender_access hash:/etc/postfix/access".into());
	if !state.restrict_sender_access.is_empty() {
		restrictions.push("reject".into());
	}

	restrictions
}

/// The smtpd_recipient_restrictions snippet for the current state.
pub fn smtpd_recipient_restrictions(state: &State) -> Vec<String> {
	let mut restrictions = Vec::new();

	if state.append_x_envelope_to {
		restrictions
			.push("check_recipient_access regexp:/etc/postfix/append_envelope_to_header".into());
	}

	if !state.restrict_senders.is_empty() {
		restrictions.push("check_sender_access hash:/etc/postfix/restricted_senders".into());
	}
	restrictions.extend(
		state
			.additional_smtpd_recipient_restrictions
			.iter()
			.cloned(),
	);

	if state.enable_spf {
		restrictions.push("check_policy_service unix:private/policyd-spf".into());
	}

	restrictions
}

/// The derived Postfix configuration parameters, consumed once by the
/// main.cf and master.cf renderers.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigParams {
	pub fqdn: String,
	pub hostname: String,
	pub connection_limit: u32,
	pub enable_rate_limits: bool,
	pub enable_sender_login_map: bool,
	pub enable_smtp_auth: bool,
	pub enable_spf: bool,
	pub enable_tls_policy_map: bool,
	pub header_checks: bool,
	pub mynetworks: String,
	pub relay_host: Option<String>,
	pub relay_domains: String,
	pub relay_recipient_maps: bool,
	pub restrict_recipients: bool,
	pub smtp_header_checks: bool,
	pub smtpd_recipient_restrictions: String,
	pub smtpd_relay_restrictions: String,
	pub smtpd_sender_restrictions: String,
	pub tls_ciphers: Option<TlsCipherGrade>,
	pub tls_exclude_ciphers: String,
	pub tls_protocols: String,
	pub tls_security_level: Option<TlsSecurityLevel>,
	pub transport_maps: bool,
	pub virtual_alias_domains: String,
	pub virtual_alias_maps: bool,
	pub virtual_alias_maps_type: LookupTableType,
	pub tls: TlsConfigPaths,
}

/// Derive the rendering parameters from the validated state. Called
/// exactly once per successful reconcile.
pub fn config_params(
	state: &State,
	tls: &TlsConfigPaths,
	fqdn: &str,
	hostname: &str,
) -> ConfigParams {
	ConfigParams {
		fqdn: fqdn.into(),
		hostname: hostname.into(),
		connection_limit: state.connection_limit,
		enable_rate_limits: state.enable_rate_limits,
		enable_sender_login_map: !state.sender_login_maps.is_empty(),
		enable_smtp_auth: state.enable_smtp_auth,
		enable_spf: state.enable_spf,
		enable_tls_policy_map: !state.tls_policy_maps.is_empty(),
		header_checks: !state.header_checks.is_empty(),
		mynetworks: state.allowed_relay_networks.join(","),
		relay_host: state.relay_host.clone(),
		relay_domains: state.relay_domains.join(" "),
		relay_recipient_maps: !state.relay_recipient_maps.is_empty(),
		restrict_recipients: !state.restrict_recipients.is_empty(),
		smtp_header_checks: !state.smtp_header_checks.is_empty(),
		smtpd_recipient_restrictions: smtpd_recipient_restrictions(state).join(", "),
		smtpd_relay_restrictions: smtpd_relay_restrictions(state).join(", "),
		smtpd_sender_restrictions: smtpd_sender_restrictions(state).join(", "),
		tls_ciphers: state.tls_ciphers,
		tls_exclude_ciphers: state.tls_exclude_ciphers.join(", "),
		tls_protocols: state.tls_protocols.join(" "),
		tls_security_level: state.tls_security_level,
		transport_maps: !state.transport_maps.is_empty(),
		virtual_alias_domains: state.virtual_alias_domains.join(" "),
		virtual_alias_maps: !state.virtual_alias_maps.is_empty(),
		virtual_alias_maps_type: state.virtual_alias_maps_type,
		tls: tls.clone(),
	}
}

/// Render /etc/postfix/main.cf. Line order is fixed so repeat renders of
/// the same state are byte-identical.
pub fn render_main_cf(p: &ConfigParams) -> String {
	let mut out = String::new();

	writeln!(out, "{MANAGED_HEADER}").unwrap();
	writeln!(out).unwrap();
	writeln!(out, "smtpd_banner = $myhostname ESMTP").unwrap();
	writeln!(out, "biff = no").unwrap();
	writeln!(out, "append_dot_mydomain = no").unwrap();
	writeln!(out).unwrap();
	writeln!(out, "myhostname = {}", p.fqdn).unwrap();
	writeln!(out, "myorigin = {}", p.fqdn).unwrap();
	writeln!(out, "mydestination = {}, {}, localhost", p.hostname, p.fqdn).unwrap();
	writeln!(out, "alias_maps = hash:/etc/aliases").unwrap();
	writeln!(out, "alias_database = hash:/etc/aliases").unwrap();
	if !p.mynetworks.is_empty() {
		writeln!(out, "mynetworks = {}", p.mynetworks).unwrap();
	}
	if let Some(relay_host) = &p.relay_host {
		writeln!(out, "relayhost = {relay_host}").unwrap();
	}
	writeln!(out, "relay_domains = {}", p.relay_domains).unwrap();
	writeln!(out).unwrap();
	writeln!(out, "smtpd_helo_required = yes").unwrap();
	writeln!(out, "disable_vrfy_command = yes").unwrap();
	writeln!(
		out,
		"smtpd_client_connection_count_limit = {}",
		p.connection_limit
	)
	.unwrap();
	if p.enable_rate_limits {
		writeln!(out, "anvil_rate_time_unit = 60s").unwrap();
		writeln!(out, "smtpd_client_connection_rate_limit = 100").unwrap();
		writeln!(out, "smtpd_client_message_rate_limit = 1000").unwrap();
	}
	writeln!(out).unwrap();
	writeln!(
		out,
		"smtpd_relay_restrictions = {}",
		p.smtpd_relay_restrictions
	)
	.unwrap();
	writeln!(
		out,
		"smtpd_sender_restrictions = {}",
		p.smtpd_sender_restrictions
	)
	.unwrap();

	let mut recipient_restrictions = Vec::new();
	if p.restrict_recipients {
		recipient_restrictions
			.push("check_recipient_access hash:/etc/postfix/restricted_recipients".to_string());
	}
	if !p.smtpd_recipient_restrictions.is_empty() {
		recipient_restrictions.push(p.smtpd_recipient_restrictions.clone());
	}
	if !recipient_restrictions.is_empty() {
		writeln!(
			out,
			"smtpd_recipient_restrictions = {}",
			recipient_restrictions.join(", ")
		)
		.unwrap();
	}

	writeln!(out).unwrap();
	if p.header_checks {
		writeln!(out, "header_checks = regexp:/etc/postfix/header_checks").unwrap();
	}
	if p.smtp_header_checks {
		writeln!(
			out,
			"smtp_header_checks = regexp:/etc/postfix/smtp_header_checks"
		)
		.unwrap();
	}
	if p.relay_recipient_maps {
		writeln!(
			out,
			"relay_recipient_maps = hash:/etc/postfix/relay_recipient"
		)
		.unwrap();
	}
	if p.transport_maps {
		writeln!(out, "transport_maps = hash:/etc/postfix/transport").unwrap();
	}
	if !p.virtual_alias_domains.is_empty() {
		writeln!(out, "virtual_alias_domains = {}", p.virtual_alias_domains).unwrap();
	}
	if p.virtual_alias_maps {
		writeln!(
			out,
			"virtual_alias_maps = {}:/etc/postfix/virtual_alias",
			p.virtual_alias_maps_type.as_str()
		)
		.unwrap();
	}
	if p.enable_sender_login_map {
		writeln!(
			out,
			"smtpd_sender_login_maps = hash:/etc/postfix/sender_login"
		)
		.unwrap();
	}
	if p.enable_tls_policy_map {
		writeln!(out, "smtp_tls_policy_maps = hash:/etc/postfix/tls_policy").unwrap();
	}

	writeln!(out).unwrap();
	writeln!(out, "smtpd_use_tls = yes").unwrap();
	if let Some(cert_key) = &p.tls.tls_cert_key {
		writeln!(out, "smtpd_tls_chain_files = {}", cert_key.display()).unwrap();
	} else {
		writeln!(out, "smtpd_tls_cert_file = {}", p.tls.tls_cert.display()).unwrap();
		writeln!(out, "smtpd_tls_key_file = {}", p.tls.tls_key.display()).unwrap();
	}
	writeln!(
		out,
		"smtpd_tls_dh1024_param_file = {}",
		p.tls.tls_dh_params.display()
	)
	.unwrap();
	writeln!(out, "smtpd_tls_security_level = may").unwrap();
	writeln!(
		out,
		"smtpd_tls_session_cache_database = btree:${{data_directory}}/smtpd_scache"
	)
	.unwrap();
	writeln!(
		out,
		"smtp_tls_session_cache_database = btree:${{data_directory}}/smtp_scache"
	)
	.unwrap();
	if let Some(level) = p.tls_security_level {
		writeln!(out, "smtp_tls_security_level = {}", level.as_str()).unwrap();
	}
	if let Some(grade) = p.tls_ciphers {
		writeln!(out, "smtpd_tls_ciphers = {}", grade.as_str()).unwrap();
	}
	if !p.tls_exclude_ciphers.is_empty() {
		writeln!(out, "smtpd_tls_exclude_ciphers = {}", p.tls_exclude_ciphers).unwrap();
	}
	if !p.tls_protocols.is_empty() {
		writeln!(out, "smtpd_tls_protocols = {}", p.tls_protocols).unwrap();
	}

	if p.enable_smtp_auth {
		writeln!(out).unwrap();
		writeln!(out, "smtpd_sasl_type = dovecot").unwrap();
		writeln!(out, "smtpd_sasl_path = private/auth").unwrap();
		writeln!(out, "smtpd_sasl_auth_enable = yes").unwrap();
		writeln!(out, "smtpd_sasl_security_options = noanonymous").unwrap();
		writeln!(out, "smtpd_sasl_local_domain = $myhostname").unwrap();
		writeln!(out, "broken_sasl_auth_clients = yes").unwrap();
	}

	out
}

// The stock services every Postfix installation runs. Rendered verbatim
// after the conditional entries.
const MASTER_CF_BASE_SERVICES: &str = "\
pickup     unix  n       -       y       60      1       pickup
cleanup    unix  n       -       y       -       0       cleanup
qmgr       unix  n       -       n       300     1       qmgr
tlsmgr     unix  -       -       y       1000?   1       tlsmgr
rewrite    unix  -       -       y       -       -       trivial-rewrite
bounce     unix  -       -       y       -       0       bounce
defer      unix  -       -       y       -       0       bounce
trace      unix  -       -       y       -       0       bounce
verify     unix  -       -       y       -       1       verify
flush      unix  n       -       y       1000?   0       flush
proxymap   unix  -       -       n       -       -       proxymap
proxywrite unix  -       -       n       -       1       proxymap
smtp       unix  -       -       y       -       -       smtp
relay      unix  -       -       y       -       -       smtp
showq      unix  n       -       y       -       -       showq
error      unix  -       -       y       -       -       error
retry      unix  -       -       y       -       -       error
discard    unix  -       -       y       -       -       discard
local      unix  -       n       n       -       -       local
virtual    unix  -       n       n       -       -       virtual
lmtp       unix  -       -       y       -       -       lmtp
anvil      unix  -       -       y       -       1       anvil
scache     unix  -       -       y       -       1       scache
postlog    unix-dgram n  -       n       -       1       postlogd
";

/// Render /etc/postfix/master.cf.
pub fn render_master_cf(p: &ConfigParams) -> String {
	let mut out = String::new();

	writeln!(out, "{MANAGED_HEADER}").unwrap();
	writeln!(out).unwrap();
	writeln!(
		out,
		"# service type  private unpriv  chroot  wakeup  maxproc command + args"
	)
	.unwrap();
	writeln!(out, "smtp       inet  n       -       y       -       -       smtpd").unwrap();

	if p.enable_smtp_auth {
		writeln!(out, "submission inet  n       -       y       -       -       smtpd").unwrap();
		writeln!(out, "  -o syslog_name=postfix/submission").unwrap();
		writeln!(out, "  -o smtpd_tls_security_level=encrypt").unwrap();
		writeln!(out, "  -o smtpd_sasl_auth_enable=yes").unwrap();
		writeln!(
			out,
			"  -o smtpd_relay_restrictions=permit_sasl_authenticated,reject"
		)
		.unwrap();
	}

	out.push_str(MASTER_CF_BASE_SERVICES);

	if p.enable_spf {
		writeln!(out, "policyd-spf unix -       n       n       -       0       spawn").unwrap();
		writeln!(out, "  user=policyd-spf argv=/usr/bin/policyd-spf").unwrap();
	}

	out
}

/// A Postfix lookup table and the content of its source file.
#[derive(Clone, Debug, PartialEq)]
pub struct PostfixMap {
	pub table_type: LookupTableType,
	pub path: PathBuf,
	pub content: String,
}

impl PostfixMap {
	/// The lookup table source string, as referenced from main.cf.
	pub fn source(&self) -> String {
		format!("{}:{}", self.table_type.as_str(), self.path.display())
	}
}

/// Build every lookup table the charm maintains under `conf_dir`. All
/// tables are written on every reconcile, so stale entries cannot linger.
pub fn build_maps(conf_dir: &Path, state: &State) -> Vec<PostfixMap> {
	let map = |table_type: LookupTableType, name: &str, body: String| PostfixMap {
		table_type,
		path: conf_dir.join(name),
		content: format!("{MANAGED_HEADER}\n{body}\n"),
	};

	vec![
		map(
			LookupTableType::Regexp,
			"append_envelope_to_header",
			"/^(.*)$/ PREPEND X-Envelope-To: $1".into(),
		),
		map(
			LookupTableType::Regexp,
			"header_checks",
			state.header_checks.join(";"),
		),
		map(
			LookupTableType::Cidr,
			"relay_access",
			state.relay_access_sources.join("\n"),
		),
		map(
			LookupTableType::Hash,
			"relay_recipient",
			join_pairs(&state.relay_recipient_maps),
		),
		map(
			LookupTableType::Hash,
			"restricted_recipients",
			join_access_pairs(&state.restrict_recipients),
		),
		map(
			LookupTableType::Hash,
			"restricted_senders",
			join_access_pairs(&state.restrict_senders),
		),
		map(
			LookupTableType::Hash,
			"access",
			state
				.restrict_sender_access
				.iter()
				.map(|domain| format!("{domain:<35} OK\n"))
				.collect(),
		),
		map(
			LookupTableType::Hash,
			"sender_login",
			join_pairs(&state.sender_login_maps),
		),
		map(
			LookupTableType::Regexp,
			"smtp_header_checks",
			state.smtp_header_checks.join(";"),
		),
		map(
			LookupTableType::Hash,
			"tls_policy",
			join_pairs(&state.tls_policy_maps),
		),
		map(
			LookupTableType::Hash,
			"transport",
			join_pairs(&state.transport_maps),
		),
		map(
			state.virtual_alias_maps_type,
			"virtual_alias",
			join_pairs(&state.virtual_alias_maps),
		),
	]
}

fn join_pairs(map: &BTreeMap<String, String>) -> String {
	map.iter()
		.map(|(key, value)| format!("{key} {value}"))
		.collect::<Vec<_>>()
		.join("\n")
}

fn join_access_pairs(map: &BTreeMap<String, AccessMapValue>) -> String {
	map.iter()
		.map(|(key, value)| format!("{key} {}", value.as_str()))
		.collect::<Vec<_>>()
		.join("\n")
}

/// Reconcile /etc/aliases: keep everything except the root alias, make
/// sure the devnull alias exists, and point root at the admin address when
/// one is configured.
pub fn merge_aliases(existing: &str, admin_email: Option<&str>) -> String {
	let mut add_devnull = true;
	let mut aliases = Vec::new();

	for line in existing.lines() {
		if add_devnull && line.starts_with("devnull:") {
			add_devnull = false;
		}
		if !line.starts_with("root:") {
			aliases.push(format!("{line}\n"));
		}
	}

	if add_devnull {
		aliases.push("devnull:       /dev/null\n".into());
	}
	if let Some(email) = admin_email {
		aliases.push(format!("root:          {email}\n"));
	}

	aliases.concat()
}

/// Render the policyd-spf configuration file.
pub fn policyd_spf_config(skip_addresses: &[IpNetwork]) -> String {
	let joined = skip_addresses
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join(",");

	let mut out = String::new();
	writeln!(out, "{MANAGED_HEADER}").unwrap();
	writeln!(out).unwrap();
	writeln!(out, "debugLevel = 1").unwrap();
	writeln!(out, "HELO_reject = False").unwrap();
	writeln!(out, "Mail_From_reject = False").unwrap();
	writeln!(out, "skip_addresses = {joined}").unwrap();

	out
}
