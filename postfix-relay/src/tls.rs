use std::path::{Path, PathBuf};

use tracing::debug;

const OPERATOR_CERT: &str = "fullchain.pem";
const OPERATOR_KEY: &str = "privkey.pem";
const OPERATOR_CERT_KEY: &str = "cert_key.pem";

const SNAKEOIL_CERT: &str = "/etc/ssl/certs/ssl-cert-snakeoil.pem";
const SNAKEOIL_KEY: &str = "/etc/ssl/private/ssl-cert-snakeoil.key";

/// Filesystem locations of the TLS material referenced from the rendered
/// Postfix configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsConfigPaths {
	pub tls_dh_params: PathBuf,
	pub tls_cert: PathBuf,
	pub tls_key: PathBuf,
	/// Combined certificate and key file, when the operator supplied one.
	pub tls_cert_key: Option<PathBuf>,
}

/// Pick the TLS material to reference: certificates the operator dropped
/// into `ssl_dir` when they exist, the distribution snakeoil pair
/// otherwise.
pub fn config_paths(ssl_dir: &Path, dh_params: &Path) -> TlsConfigPaths {
	let cert = ssl_dir.join(OPERATOR_CERT);
	let key = ssl_dir.join(OPERATOR_KEY);
	let cert_key = ssl_dir.join(OPERATOR_CERT_KEY);

	if cert.is_file() && key.is_file() {
		debug!("using operator certificates from {}", ssl_dir.display());
		TlsConfigPaths {
			tls_dh_params: dh_params.into(),
			tls_cert: cert,
			tls_key: key,
			tls_cert_key: cert_key.is_file().then_some(cert_key),
		}
	} else {
		debug!("no operator certificates, using snakeoil");
		TlsConfigPaths {
			tls_dh_params: dh_params.into(),
			tls_cert: SNAKEOIL_CERT.into(),
			tls_key: SNAKEOIL_KEY.into(),
			tls_cert_key: None,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn falls_back_to_snakeoil() {
		let dir = tempfile::tempdir().unwrap();

		let paths = config_paths(dir.path(), Path::new("/etc/ssl/private/dhparams.pem"));

		assert_eq!(paths.tls_cert, PathBuf::from(SNAKEOIL_CERT));
		assert_eq!(paths.tls_key, PathBuf::from(SNAKEOIL_KEY));
		assert_eq!(paths.tls_cert_key, None);
		assert_eq!(
			paths.tls_dh_params,
			PathBuf::from("/etc/ssl/private/dhparams.pem")
		);
	}

	#[test]
	fn prefers_operator_certificates() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(OPERATOR_CERT), "cert").unwrap();
		std::fs::write(dir.path().join(OPERATOR_KEY), "key").unwrap();

		let paths = config_paths(dir.path(), Path::new("/etc/ssl/private/dhparams.pem"));

		assert_eq!(paths.tls_cert, dir.path().join(OPERATOR_CERT));
		assert_eq!(paths.tls_key, dir.path().join(OPERATOR_KEY));
		assert_eq!(paths.tls_cert_key, None);
	}

	#[test]
	fn picks_up_combined_cert_key() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(OPERATOR_CERT), "cert").unwrap();
		std::fs::write(dir.path().join(OPERATOR_KEY), "key").unwrap();
		std::fs::write(dir.path().join(OPERATOR_CERT_KEY), "both").unwrap();

		let paths = config_paths(dir.path(), Path::new("/etc/ssl/private/dhparams.pem"));

		assert_eq!(
			paths.tls_cert_key,
			Some(dir.path().join(OPERATOR_CERT_KEY))
		);
	}

	#[test]
	fn requires_both_operator_files() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(OPERATOR_CERT), "cert").unwrap();

		let paths = config_paths(dir.path(), Path::new("/etc/ssl/private/dhparams.pem"));

		assert_eq!(paths.tls_cert, PathBuf::from(SNAKEOIL_CERT));
	}
}
