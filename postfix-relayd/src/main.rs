mod binconfig;
mod charm;
mod host;

use binconfig::BinConfig;
use charm::{Charm, UnitStatus};
use host::LiveHost;

use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "postfix_relayd=info".into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let binconf = match BinConfig::get() {
		Some(conf) => conf,
		None => return,
	};

	let config = match binconfig::load_config_map(&binconf.config_path) {
		Some(config) => config,
		None => std::process::exit(2),
	};

	let mut charm = Charm::new(binconf.unit_name, LiveHost);
	match charm.reconcile(&config) {
		Ok(status) => {
			println!("{status}");
			if let UnitStatus::Blocked(_) = status {
				std::process::exit(1);
			}
		}
		Err(err) => {
			error!("failed to apply configuration: {err}");
			std::process::exit(2);
		}
	}
}
