use std::{fs, io, os::unix::fs::PermissionsExt, path::Path};

use crate::charm::Host;

/// [`Host`] backed by the real filesystem.
pub struct LiveHost;

impl Host for LiveHost {
	fn write_file(&mut self, path: &Path, contents: &str) -> io::Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(path, contents)
	}

	fn write_file_with_mode(&mut self, path: &Path, contents: &str, mode: u32) -> io::Result<()> {
		self.write_file(path, contents)?;
		fs::set_permissions(path, fs::Permissions::from_mode(mode))
	}

	fn read_file(&self, path: &Path) -> io::Result<Option<String>> {
		match fs::read_to_string(path) {
			Ok(contents) => Ok(Some(contents)),
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn writes_and_reads_back() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("etc/postfix/main.cf");
		let mut host = LiveHost;

		host.write_file(&path, "myhostname = mail.example.com\n")
			.unwrap();

		assert_eq!(
			host.read_file(&path).unwrap().as_deref(),
			Some("myhostname = mail.example.com\n")
		);
	}

	#[test]
	fn applies_requested_mode() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("users");
		let mut host = LiveHost;

		host.write_file_with_mode(&path, "alice:hash\n", 0o640).unwrap();

		let mode = fs::metadata(&path).unwrap().permissions().mode();
		assert_eq!(mode & 0o777, 0o640);
	}

	#[test]
	fn missing_file_reads_as_none() {
		let dir = tempfile::tempdir().unwrap();
		let host = LiveHost;

		assert!(host
			.read_file(&dir.path().join("absent"))
			.unwrap()
			.is_none());
	}
}
