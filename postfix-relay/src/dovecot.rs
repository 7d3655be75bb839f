use std::fmt::Write;
use std::path::Path;

use crate::postfix::MANAGED_HEADER;
use crate::state::SmtpAuthUser;

/// Render `/etc/dovecot/dovecot.conf`. Dovecot only exists here to serve
/// SASL auth to Postfix over its private socket; when auth is disabled the
/// listener is left out entirely.
pub fn config_file_content(users_path: &Path, enable_smtp_auth: bool) -> String {
	let mut out = String::new();

	writeln!(out, "{MANAGED_HEADER}").unwrap();
	writeln!(out).unwrap();
	writeln!(out, "protocols = \"\"").unwrap();

	if enable_smtp_auth {
		writeln!(out).unwrap();
		writeln!(out, "auth_mechanisms = plain login").unwrap();
		writeln!(out).unwrap();
		writeln!(out, "passdb {{").unwrap();
		writeln!(out, "  driver = passwd-file").unwrap();
		writeln!(out, "  args = {}", users_path.display()).unwrap();
		writeln!(out, "}}").unwrap();
		writeln!(out).unwrap();
		writeln!(out, "service auth {{").unwrap();
		writeln!(out, "  unix_listener /var/spool/postfix/private/auth {{").unwrap();
		writeln!(out, "    mode = 0660").unwrap();
		writeln!(out, "    user = postfix").unwrap();
		writeln!(out, "    group = postfix").unwrap();
		writeln!(out, "  }}").unwrap();
		writeln!(out, "}}").unwrap();
	} else {
		writeln!(out).unwrap();
		writeln!(out, "# SMTP authentication is disabled").unwrap();
	}

	out
}

/// Render the Dovecot passwd-file with one `name:password-hash` line per
/// configured user.
pub fn users_file_content(users: &[SmtpAuthUser]) -> String {
	let mut out = String::new();

	writeln!(out, "{MANAGED_HEADER}").unwrap();
	for user in users {
		writeln!(out, "{}:{}", user.username, user.password_hash).unwrap();
	}

	out
}
