//! Optional observability helpers for plugin entry points.
//!
//! # Feature Flags
//!
//! - Enable `tracing` (default) to emit structured spans named `escrow_buddy.operation` with the
//!   `operation` (entry point) and `mechanism` (selector) fields, plus diagnostic events for
//!   rejected handles, refused transitions, failing checks, and host callback failures.
//! - Enable `metrics` to increment the `escrow_buddy_operation_total` counter for every
//!   attempt/success/failure, labeled by `operation` + `outcome`.
//!
//! The plugin never installs a subscriber or recorder; the host process owns both.

/// Emits a diagnostic event through `tracing` when the feature is enabled.
macro_rules! obs_event {
	($level:ident, $($arg:tt)+) => {{
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!(target: "escrow_buddy", $($arg)+);
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = format_args!($($arg)+);
		}
	}};
}

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Entry points exposed through the dispatch table (plus the creation symbol).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
	/// `AuthorizationPluginCreate`.
	PluginCreate,
	/// `PluginDestroy`.
	PluginDestroy,
	/// `MechanismCreate`.
	MechanismCreate,
	/// `MechanismInvoke`.
	MechanismInvoke,
	/// `MechanismDeactivate`.
	MechanismDeactivate,
	/// `MechanismDestroy`.
	MechanismDestroy,
}
impl Operation {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Operation::PluginCreate => "plugin_create",
			Operation::PluginDestroy => "plugin_destroy",
			Operation::MechanismCreate => "mechanism_create",
			Operation::MechanismInvoke => "mechanism_invoke",
			Operation::MechanismDeactivate => "mechanism_deactivate",
			Operation::MechanismDestroy => "mechanism_destroy",
		}
	}
}
impl Display for Operation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each entry point call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to a plugin entry point.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure reported back to the host as a non-success status.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
		}
	}

	/// Classifies an entry point result.
	pub fn of<T>(result: &Result<T>) -> Self {
		if result.is_ok() { Outcome::Success } else { Outcome::Failure }
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
