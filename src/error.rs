//! Plugin-level error types and their mapping onto the host's status codes.

// self
use crate::{_prelude::*, handle::RecordKind, obs::Operation};

/// Plugin-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical plugin error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Mechanism identifier could not be parsed or is not served by this plugin.
	#[error(transparent)]
	Identifier(#[from] crate::mechanism::MechanismIdError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] crate::config::ConfigError),
	/// A host callback failed or is missing from the callback table.
	#[error(transparent)]
	Host(#[from] crate::host::HostError),
	/// The lifecycle state machine refused a transition.
	///
	/// Not produced through handles: destroyed mechanisms fail registry validation first.
	#[error(transparent)]
	Lifecycle(#[from] crate::mechanism::LifecycleError),

	/// Handle failed validation and was never dereferenced past its tag.
	#[error("Handle is not a live {expected} record.")]
	InvalidHandle {
		/// Record kind the entry point expected.
		expected: RecordKind,
	},
	/// A required pointer argument was null.
	#[error("Argument `{argument}` is null.")]
	NullArgument {
		/// Argument name as it appears in the host header.
		argument: &'static str,
	},
	/// The allocator could not satisfy a record or registry allocation.
	#[error("Allocation failed.")]
	Allocation,
	/// Plugin teardown was requested while mechanisms still reference it.
	#[error("Plugin still has {live} live mechanism(s).")]
	LiveMechanisms {
		/// Number of mechanisms that have not been destroyed yet.
		live: usize,
	},
	/// A panic was caught before it could unwind into the host.
	#[error("Entry point {operation} panicked.")]
	Panicked {
		/// Entry point that panicked.
		operation: Operation,
	},
}
impl Error {
	/// Returns the status class reported to the host for this error.
	pub fn status(&self) -> Status {
		match self {
			Self::InvalidHandle { .. } | Self::NullArgument { .. } => Status::InvalidPointer,
			Self::Allocation => Status::MemoryFull,
			_ => Status::Internal,
		}
	}
}

/// Status codes returned by every entry point of the dispatch table.
///
/// The numeric values are the host's `OSStatus` codes; no other payload crosses the ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
	/// `errAuthorizationSuccess`.
	Success = 0,
	/// `memFullErr`.
	MemoryFull = -108,
	/// `errAuthorizationInvalidPointer`.
	InvalidPointer = -60004,
	/// `errAuthorizationInternal`.
	Internal = -60008,
}
impl Status {
	/// Returns the raw `OSStatus` value.
	pub const fn code(self) -> i32 {
		self as i32
	}

	/// Returns true for [`Status::Success`].
	pub const fn is_success(self) -> bool {
		matches!(self, Self::Success)
	}
}
impl<T> From<&Result<T>> for Status {
	fn from(result: &Result<T>) -> Self {
		match result {
			Ok(_) => Self::Success,
			Err(e) => e.status(),
		}
	}
}
impl From<Status> for i32 {
	fn from(status: Status) -> Self {
		status.code()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		host::HostError,
		mechanism::{LifecycleError, MechanismIdError, MechanismState},
	};

	#[test]
	fn errors_map_onto_the_four_status_classes() {
		assert_eq!(
			Error::InvalidHandle { expected: RecordKind::Mechanism }.status(),
			Status::InvalidPointer
		);
		assert_eq!(Error::NullArgument { argument: "outPlugin" }.status(), Status::InvalidPointer);
		assert_eq!(Error::Allocation.status(), Status::MemoryFull);
		assert_eq!(Error::LiveMechanisms { live: 2 }.status(), Status::Internal);
		assert_eq!(Error::from(MechanismIdError::Empty).status(), Status::Internal);
		assert_eq!(
			Error::from(HostError::Status { callback: "SetResult", status: -1 }).status(),
			Status::Internal
		);

		let refused = LifecycleError {
			operation: Operation::MechanismInvoke,
			state: MechanismState::Destroyed,
		};

		assert_eq!(Error::from(refused).status(), Status::Internal);
	}

	#[test]
	fn status_codes_match_host_constants() {
		assert_eq!(Status::Success.code(), 0);
		assert_eq!(Status::MemoryFull.code(), -108);
		assert_eq!(Status::InvalidPointer.code(), -60004);
		assert_eq!(Status::Internal.code(), -60008);
		assert!(Status::from(&Ok::<_, Error>(())).is_success());
		assert_eq!(Status::from(&Err::<(), _>(Error::Allocation)), Status::MemoryFull);
	}

	#[test]
	fn invalid_handle_message_names_the_record_kind() {
		let err = Error::InvalidHandle { expected: RecordKind::Plugin };

		assert_eq!(err.to_string(), "Handle is not a live plugin record.");
	}
}
