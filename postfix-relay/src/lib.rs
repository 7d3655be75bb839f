//! Configuration logic for the Postfix relay configurator charm.
//!
//! Everything in this crate is side-effect free: raw charm configuration
//! comes in, validated state and rendered file content come out. The
//! `postfix-relayd` binary owns the host filesystem and the status report.

pub mod dovecot;
pub mod hostname;
pub mod postfix;
pub mod state;
pub mod tls;
