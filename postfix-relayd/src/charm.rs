use std::{
	fmt::Display,
	io,
	path::{Path, PathBuf},
};

use gethostname::gethostname;
use tracing::{error, info};

use postfix_relay::{
	dovecot,
	hostname::Hostname,
	postfix::{self, ConfigParams},
	state::{ConfigMap, State},
	tls::{self, TlsConfigPaths},
};

const MAIN_CF: &str = "main.cf";
const MASTER_CF: &str = "master.cf";

// Operators key automation off this exact wording; the validation detail
// goes to the log instead.
const BLOCKED_MESSAGE: &str = "Invalid config";

/// The externally visible outcome of a reconcile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitStatus {
	Active,
	Blocked(String),
}

impl Display for UnitStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Active => write!(f, "active"),
			Self::Blocked(reason) => write!(f, "blocked: {reason}"),
		}
	}
}

/// Filesystem access the charm needs on the host it manages. Injected so
/// the reconcile logic can be exercised without touching the system.
pub trait Host {
	fn write_file(&mut self, path: &Path, contents: &str) -> io::Result<()>;
	fn write_file_with_mode(&mut self, path: &Path, contents: &str, mode: u32) -> io::Result<()>;
	fn read_file(&self, path: &Path) -> io::Result<Option<String>>;
}

/// Where the rendered files land on the host.
#[derive(Clone, Debug)]
pub struct Paths {
	pub postfix_conf_dir: PathBuf,
	pub aliases: PathBuf,
	pub policyd_spf_conf: PathBuf,
	pub tls_dh_params: PathBuf,
	pub dovecot_conf: PathBuf,
	pub dovecot_users: PathBuf,
	pub ssl_dir: PathBuf,
}

impl Default for Paths {
	fn default() -> Self {
		Self {
			postfix_conf_dir: "/etc/postfix".into(),
			aliases: "/etc/aliases".into(),
			policyd_spf_conf: "/etc/postfix-policyd-spf-python/policyd-spf.conf".into(),
			tls_dh_params: "/etc/ssl/private/dhparams.pem".into(),
			dovecot_conf: "/etc/dovecot/dovecot.conf".into(),
			dovecot_users: "/etc/dovecot/users".into(),
			ssl_dir: "/etc/postfix/ssl".into(),
		}
	}
}

/// The relay configurator. Each configuration-changed event runs one
/// [`reconcile`](Self::reconcile): validate, derive, write, report.
pub struct Charm<H, F = fn(&State, &TlsConfigPaths, &str, &str) -> ConfigParams> {
	unit_name: String,
	host: H,
	paths: Paths,
	derive_params: F,
}

impl<H: Host> Charm<H> {
	pub fn new<S: Into<String>>(unit_name: S, host: H) -> Self {
		Self {
			unit_name: unit_name.into(),
			host,
			paths: Paths::default(),
			derive_params: postfix::config_params,
		}
	}
}

impl<H, F> Charm<H, F>
where
	H: Host,
	F: Fn(&State, &TlsConfigPaths, &str, &str) -> ConfigParams,
{
	/// Swap the parameter derivation function; tests use this to observe
	/// the derivation without patching anything global.
	pub fn with_derive_params<G>(self, derive_params: G) -> Charm<H, G>
	where
		G: Fn(&State, &TlsConfigPaths, &str, &str) -> ConfigParams,
	{
		Charm {
			unit_name: self.unit_name,
			host: self.host,
			paths: self.paths,
			derive_params,
		}
	}

	#[cfg(test)]
	fn host(&self) -> &H {
		&self.host
	}

	/// Handle a configuration-changed event. Invalid configuration is the
	/// only recovered failure; it becomes a Blocked status with a fixed
	/// message. I/O errors from the host are fatal to the invocation and
	/// propagate to the caller.
	pub fn reconcile(&mut self, config: &ConfigMap) -> io::Result<UnitStatus> {
		info!("reconciling configuration");

		let state = match State::from_config(config) {
			Ok(state) => state,
			Err(err) => {
				error!("error validating the charm configuration: {err}");
				return Ok(UnitStatus::Blocked(BLOCKED_MESSAGE.into()));
			}
		};

		self.configure_auth(&state)?;
		self.configure_relay(&state)?;
		self.configure_policyd_spf(&state)?;

		Ok(UnitStatus::Active)
	}

	/// Ensure SMTP authentication is configured or disabled via Dovecot.
	fn configure_auth(&mut self, state: &State) -> io::Result<()> {
		info!("setting up authentication (dovecot)");

		let contents =
			dovecot::config_file_content(&self.paths.dovecot_users, state.enable_smtp_auth);
		self.host.write_file(&self.paths.dovecot_conf, &contents)?;

		if !state.smtp_auth_users.is_empty() {
			let contents = dovecot::users_file_content(&state.smtp_auth_users);
			self.host
				.write_file_with_mode(&self.paths.dovecot_users, &contents, 0o640)?;
		}

		Ok(())
	}

	fn generate_fqdn(&self, domain: &Hostname) -> String {
		format!("{}.{}", self.unit_name.replace('/', "-"), domain)
	}

	/// Generate and apply the Postfix configuration.
	fn configure_relay(&mut self, state: &State) -> io::Result<()> {
		info!("setting up postfix relay");

		let tls_paths = tls::config_paths(&self.paths.ssl_dir, &self.paths.tls_dh_params);
		let hostname = gethostname().to_string_lossy().into_owned();
		let fqdn = match &state.domain {
			Some(domain) => self.generate_fqdn(domain),
			None => hostname.clone(),
		};

		let params = (self.derive_params)(state, &tls_paths, &fqdn, &hostname);

		let conf_dir = self.paths.postfix_conf_dir.clone();
		self.host
			.write_file(&conf_dir.join(MAIN_CF), &postfix::render_main_cf(&params))?;
		self.host
			.write_file(&conf_dir.join(MASTER_CF), &postfix::render_master_cf(&params))?;

		info!("applying postfix maps");
		for map in postfix::build_maps(&conf_dir, state) {
			self.host.write_file(&map.path, &map.content)?;
		}

		info!("updating aliases");
		let existing = self.host.read_file(&self.paths.aliases)?.unwrap_or_default();
		let merged = postfix::merge_aliases(&existing, state.admin_email.as_deref());
		self.host.write_file(&self.paths.aliases, &merged)?;

		Ok(())
	}

	/// Configure the Postfix SPF policy server (policyd-spf).
	fn configure_policyd_spf(&mut self, state: &State) -> io::Result<()> {
		if !state.enable_spf {
			info!("postfix policy server for SPF checking (policyd-spf) disabled");
			return Ok(());
		}

		info!("setting up postfix policy server for SPF checking (policyd-spf)");
		let contents = postfix::policyd_spf_config(&state.spf_skip_addresses);
		self.host.write_file(&self.paths.policyd_spf_conf, &contents)
	}
}

#[cfg(test)]
mod test {
	use std::{
		cell::{Cell, RefCell},
		collections::BTreeMap,
	};

	use super::*;
	use postfix_relay::postfix::MANAGED_HEADER;

	#[derive(Default)]
	struct FakeHost {
		files: BTreeMap<PathBuf, String>,
		modes: BTreeMap<PathBuf, u32>,
	}

	impl Host for FakeHost {
		fn write_file(&mut self, path: &Path, contents: &str) -> io::Result<()> {
			self.files.insert(path.into(), contents.into());
			Ok(())
		}

		fn write_file_with_mode(
			&mut self,
			path: &Path,
			contents: &str,
			mode: u32,
		) -> io::Result<()> {
			self.modes.insert(path.into(), mode);
			self.write_file(path, contents)
		}

		fn read_file(&self, path: &Path) -> io::Result<Option<String>> {
			Ok(self.files.get(path).cloned())
		}
	}

	struct FailingHost;

	impl Host for FailingHost {
		fn write_file(&mut self, _: &Path, _: &str) -> io::Result<()> {
			Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
		}

		fn write_file_with_mode(&mut self, path: &Path, contents: &str, _: u32) -> io::Result<()> {
			self.write_file(path, contents)
		}

		fn read_file(&self, _: &Path) -> io::Result<Option<String>> {
			Ok(None)
		}
	}

	fn config(pairs: &[(&str, &str)]) -> ConfigMap {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[test]
	fn blocked_on_invalid_config() {
		let derivations = Cell::new(0u32);
		let mut charm = Charm::new("postfix-relay/0", FakeHost::default()).with_derive_params(
			|state: &State, tls: &TlsConfigPaths, fqdn: &str, hostname: &str| {
				derivations.set(derivations.get() + 1);
				postfix::config_params(state, tls, fqdn, hostname)
			},
		);

		let status = charm
			.reconcile(&config(&[("virtual_alias_maps_type", "btree")]))
			.unwrap();

		assert_eq!(status, UnitStatus::Blocked("Invalid config".into()));
		assert_eq!(derivations.get(), 0);
		assert!(charm.host().files.is_empty());
	}

	#[test]
	fn active_on_default_config() {
		let derivations = Cell::new(0u32);
		let mut charm = Charm::new("postfix-relay/0", FakeHost::default()).with_derive_params(
			|state: &State, tls: &TlsConfigPaths, fqdn: &str, hostname: &str| {
				derivations.set(derivations.get() + 1);
				postfix::config_params(state, tls, fqdn, hostname)
			},
		);

		let status = charm.reconcile(&ConfigMap::new()).unwrap();

		assert_eq!(status, UnitStatus::Active);
		assert_eq!(derivations.get(), 1);

		let files = &charm.host().files;
		let main_cf = &files[Path::new("/etc/postfix/main.cf")];
		assert!(main_cf.starts_with(MANAGED_HEADER));
		assert!(files.contains_key(Path::new("/etc/postfix/master.cf")));
		assert!(files.contains_key(Path::new("/etc/dovecot/dovecot.conf")));
		assert!(files[Path::new("/etc/aliases")].contains("devnull:"));
	}

	#[test]
	fn derives_fqdn_from_unit_name_and_domain() {
		let seen_fqdn = RefCell::new(None);
		let mut charm = Charm::new("postfix-relay/0", FakeHost::default()).with_derive_params(
			|state: &State, tls: &TlsConfigPaths, fqdn: &str, hostname: &str| {
				*seen_fqdn.borrow_mut() = Some(fqdn.to_string());
				postfix::config_params(state, tls, fqdn, hostname)
			},
		);

		charm
			.reconcile(&config(&[("domain", "example.com")]))
			.unwrap();

		assert_eq!(
			seen_fqdn.borrow().as_deref(),
			Some("postfix-relay-0.example.com")
		);
	}

	#[test]
	fn reconcile_is_idempotent() {
		let mut charm = Charm::new("postfix-relay/0", FakeHost::default());
		let input = config(&[("relay_host", "smtp.example.com")]);

		let first_status = charm.reconcile(&input).unwrap();
		let first_files = charm.host().files.clone();

		let second_status = charm.reconcile(&input).unwrap();

		assert_eq!(first_status, UnitStatus::Active);
		assert_eq!(second_status, UnitStatus::Active);
		assert_eq!(charm.host().files, first_files);
	}

	#[test]
	fn recovers_after_invalid_config() {
		let mut charm = Charm::new("postfix-relay/0", FakeHost::default());

		let blocked = charm
			.reconcile(&config(&[("enable_spf", "maybe")]))
			.unwrap();
		assert_eq!(blocked, UnitStatus::Blocked("Invalid config".into()));

		let recovered = charm.reconcile(&config(&[("enable_spf", "true")])).unwrap();
		assert_eq!(recovered, UnitStatus::Active);
	}

	#[test]
	fn auth_users_written_with_restricted_mode() {
		let mut charm = Charm::new("postfix-relay/0", FakeHost::default());

		charm
			.reconcile(&config(&[(
				"smtp_auth_users",
				r#"["alice:{CRYPT}$6$abcdef"]"#,
			)]))
			.unwrap();

		let host = charm.host();
		assert!(host.files[Path::new("/etc/dovecot/users")].contains("alice:"));
		assert_eq!(host.modes[Path::new("/etc/dovecot/users")], 0o640);
	}

	#[test]
	fn spf_config_only_written_when_enabled() {
		let mut charm = Charm::new("postfix-relay/0", FakeHost::default());
		charm.reconcile(&ConfigMap::new()).unwrap();
		assert!(!charm
			.host()
			.files
			.contains_key(Path::new("/etc/postfix-policyd-spf-python/policyd-spf.conf")));

		let mut charm = Charm::new("postfix-relay/0", FakeHost::default());
		charm
			.reconcile(&config(&[
				("enable_spf", "true"),
				("spf_skip_addresses", r#"["127.0.0.1"]"#),
			]))
			.unwrap();
		let spf = &charm.host().files
			[Path::new("/etc/postfix-policyd-spf-python/policyd-spf.conf")];
		assert!(spf.contains("skip_addresses = 127.0.0.1"));
	}

	#[test]
	fn write_failures_are_fatal() {
		let mut charm = Charm::new("postfix-relay/0", FailingHost);

		let err = charm.reconcile(&ConfigMap::new()).unwrap_err();

		assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
	}
}
