use std::{
	env,
	path::{Path, PathBuf},
};

use confindent::Confindent;
use getopts::Options;

use postfix_relay::state::ConfigMap;

/// Every option the charm understands. Used to pull values out of the
/// configuration file; anything else in there is ignored.
const OPTION_NAMES: &[&str] = &[
	"admin_email",
	"additional_smtpd_recipient_restrictions",
	"allowed_relay_networks",
	"append_x_envelope_to",
	"connection_limit",
	"domain",
	"enable_rate_limits",
	"enable_reject_unknown_sender_domain",
	"enable_smtp_auth",
	"enable_spf",
	"header_checks",
	"relay_access_sources",
	"relay_domains",
	"relay_host",
	"relay_recipient_maps",
	"restrict_recipients",
	"restrict_senders",
	"restrict_sender_access",
	"sender_login_maps",
	"smtp_auth_users",
	"smtp_header_checks",
	"spf_skip_addresses",
	"tls_ciphers",
	"tls_exclude_ciphers",
	"tls_policy_maps",
	"tls_protocols",
	"tls_security_level",
	"transport_maps",
	"virtual_alias_domains",
	"virtual_alias_maps",
	"virtual_alias_maps_type",
];

pub struct BinConfig {
	pub unit_name: String,
	pub config_path: PathBuf,
}

#[allow(clippy::or_fun_call)]
impl BinConfig {
	fn print_usage<S: AsRef<str>>(prgm: S, opts: &Options) {
		let brief = format!("Usage: {} [options]", prgm.as_ref());
		println!("{}", opts.usage(&brief));
	}

	pub fn get() -> Option<Self> {
		let args: Vec<String> = env::args().collect();

		let mut opts = Options::new();
		opts.optflag("h", "help", "Print this help message");
		opts.optopt(
			"c",
			"config",
			"An alternate location to read the charm configuration from\nDefault: /etc/postfix-relay/charm.conf",
			"PATH",
		);
		opts.optopt(
			"u",
			"unit",
			"The unit name used to derive the relay FQDN\nDefault: $JUJU_UNIT_NAME, then the hostname",
			"NAME",
		);

		let matches = match opts.parse(&args[1..]) {
			Ok(m) => m,
			Err(_e) => return None,
		};

		if matches.opt_present("help") {
			Self::print_usage(&args[0], &opts);
			return None;
		}

		let config_path = matches
			.opt_str("config")
			.unwrap_or("/etc/postfix-relay/charm.conf".into());
		let unit_name = matches
			.opt_str("unit")
			.or(env::var("JUJU_UNIT_NAME").ok())
			.unwrap_or_else(|| {
				gethostname::gethostname().to_string_lossy().into_owned()
			});

		Some(Self {
			unit_name,
			config_path: config_path.into(),
		})
	}
}

/// Read the charm configuration file into the raw option map. Keys are
/// CamelCase in the file and snake_case in the map, the same mapping
/// saild-style configs use for CLI keys.
pub fn load_config_map(path: &Path) -> Option<ConfigMap> {
	let config = match Confindent::from_file(path) {
		Ok(c) => c,
		Err(err) => {
			eprintln!("failed to parse conf file: {}", err);
			return None;
		}
	};

	let mut map = ConfigMap::new();
	for name in OPTION_NAMES {
		let conf_key: String = name
			.split('_')
			.map(|word| {
				let mut c = word.chars();
				match c.next() {
					None => String::new(),
					Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
				}
			})
			.collect();

		if let Some(value) = config.child_value(conf_key) {
			map.insert(name.to_string(), value.into());
		}
	}

	Some(map)
}
