//! Host callback contract: the functions a mechanism may call back into the authorization engine.
//!
//! The plugin never returns a verdict from an entry point. It reports it through
//! [`HostCallbacks::set_result`] and acknowledges every deactivation request through
//! [`HostCallbacks::did_deactivate`]. The C callback table is adapted onto this trait by
//! [`crate::abi::FfiHost`]; tests drive the same trait with a recording host.

// std
use std::{ffi::c_void, ops::BitOr};
// self
use crate::_prelude::*;

/// Context key under which the engine stores the user name being authenticated.
pub const USERNAME_KEY: &str = "username";
/// Context key under which the engine stores the password being authenticated.
pub const PASSWORD_KEY: &str = "password";

/// Opaque reference to the host's per-evaluation engine context.
///
/// The plugin never dereferences it; it is only passed back to the host on every callback.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EngineRef(*mut c_void);
impl EngineRef {
	/// Wraps the raw engine pointer handed to `MechanismCreate`.
	pub const fn from_raw(raw: *mut c_void) -> Self {
		Self(raw)
	}

	/// Returns the raw engine pointer for host callbacks.
	pub const fn as_ptr(self) -> *mut c_void {
		self.0
	}
}
impl Debug for EngineRef {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "EngineRef({:p})", self.0)
	}
}
// SAFETY: the engine reference is an opaque token owned by the host; the plugin only copies it
// back into host callbacks and never reads through it.
unsafe impl Send for EngineRef {}
// SAFETY: see the `Send` impl above.
unsafe impl Sync for EngineRef {}

/// Verdict reported through [`HostCallbacks::set_result`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum AuthorizationResult {
	/// `kAuthorizationResultAllow`.
	Allow = 0,
	/// `kAuthorizationResultDeny`.
	Deny = 1,
	/// `kAuthorizationResultUndefined`.
	Undefined = 2,
	/// `kAuthorizationResultUserCanceled`.
	UserCanceled = 3,
}
impl AuthorizationResult {
	/// Returns the raw value passed to `SetResult`.
	pub const fn raw(self) -> u32 {
		self as u32
	}

	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AuthorizationResult::Allow => "allow",
			AuthorizationResult::Deny => "deny",
			AuthorizationResult::Undefined => "undefined",
			AuthorizationResult::UserCanceled => "user_canceled",
		}
	}
}
impl Display for AuthorizationResult {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Flags attached to context items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ContextFlags(u32);
impl ContextFlags {
	/// No flags.
	pub const NONE: Self = Self(0);
	/// `kAuthorizationContextFlagExtractable`.
	pub const EXTRACTABLE: Self = Self(1 << 0);
	/// `kAuthorizationContextFlagVolatile`.
	pub const VOLATILE: Self = Self(1 << 1);
	/// `kAuthorizationContextFlagSticky`.
	pub const STICKY: Self = Self(1 << 2);

	/// Wraps raw flag bits received from the host.
	pub const fn from_bits(bits: u32) -> Self {
		Self(bits)
	}

	/// Returns the raw flag bits.
	pub const fn bits(self) -> u32 {
		self.0
	}

	/// Returns true when every bit of `other` is set.
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}
}
impl BitOr for ContextFlags {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self::Output {
		Self(self.0 | rhs.0)
	}
}

/// Context item copied out of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextValue {
	/// Flags the item was stored with.
	pub flags: ContextFlags,
	/// Raw item bytes.
	pub data: Vec<u8>,
}

/// Security session the evaluation runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub usize);

/// Failures raised while calling back into the host.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum HostError {
	/// The host returned a non-success status.
	#[error("Host callback {callback} returned status {status}.")]
	Status {
		/// Callback name as it appears in the callback table.
		callback: &'static str,
		/// Raw `OSStatus` returned by the host.
		status: i32,
	},
	/// The callback table does not provide the callback.
	#[error("Host callback table does not provide {callback}.")]
	Missing {
		/// Callback name as it appears in the callback table.
		callback: &'static str,
	},
	/// A context or hint key cannot be passed to the host as a C string.
	#[error("Key `{key}` contains an interior NUL byte.")]
	InvalidKey {
		/// Offending key.
		key: String,
	},
}
impl HostError {
	/// Converts a raw host status into a result for `callback`.
	pub fn check(callback: &'static str, status: i32) -> Result<(), Self> {
		if status == 0 { Ok(()) } else { Err(Self::Status { callback, status }) }
	}
}

/// Functions the host exposes to every mechanism of this plugin.
///
/// Implementations are shared read-only by all mechanisms, possibly across host threads, so
/// they must be `Send + Sync` and must not rely on interior mutation for correctness. Only
/// [`set_result`](Self::set_result), [`did_deactivate`](Self::did_deactivate), and
/// [`context_value`](Self::context_value) are required; the remaining accessors default to
/// [`HostError::Missing`].
pub trait HostCallbacks
where
	Self: Send + Sync,
{
	/// Reports the verdict of the mechanism running under `engine`.
	fn set_result(&self, engine: EngineRef, result: AuthorizationResult) -> Result<(), HostError>;

	/// Acknowledges that the mechanism running under `engine` has torn down its UI.
	fn did_deactivate(&self, engine: EngineRef) -> Result<(), HostError>;

	/// Copies a context item out of the engine; `None` when the item is absent.
	fn context_value(
		&self,
		engine: EngineRef,
		key: &str,
	) -> Result<Option<ContextValue>, HostError>;

	/// Asks the host to interrupt the evaluation and re-run the mechanism chain.
	fn request_interrupt(&self, engine: EngineRef) -> Result<(), HostError> {
		let _ = engine;

		Err(HostError::Missing { callback: "RequestInterrupt" })
	}

	/// Stores a context item in the engine.
	fn set_context_value(
		&self,
		engine: EngineRef,
		key: &str,
		flags: ContextFlags,
		value: &[u8],
	) -> Result<(), HostError> {
		let _ = (engine, key, flags, value);

		Err(HostError::Missing { callback: "SetContextValue" })
	}

	/// Copies a hint out of the engine; `None` when the hint is absent.
	fn hint_value(&self, engine: EngineRef, key: &str) -> Result<Option<Vec<u8>>, HostError> {
		let _ = (engine, key);

		Err(HostError::Missing { callback: "GetHintValue" })
	}

	/// Stores a hint in the engine.
	fn set_hint_value(&self, engine: EngineRef, key: &str, value: &[u8]) -> Result<(), HostError> {
		let _ = (engine, key, value);

		Err(HostError::Missing { callback: "SetHintValue" })
	}

	/// Returns the arguments configured for the current right.
	fn arguments(&self, engine: EngineRef) -> Result<Vec<Vec<u8>>, HostError> {
		let _ = engine;

		Err(HostError::Missing { callback: "GetArguments" })
	}

	/// Returns the security session the evaluation runs in.
	fn session_id(&self, engine: EngineRef) -> Result<SessionId, HostError> {
		let _ = engine;

		Err(HostError::Missing { callback: "GetSessionId" })
	}
}
impl<T> HostCallbacks for Arc<T>
where
	T: ?Sized + HostCallbacks,
{
	fn set_result(&self, engine: EngineRef, result: AuthorizationResult) -> Result<(), HostError> {
		(**self).set_result(engine, result)
	}

	fn did_deactivate(&self, engine: EngineRef) -> Result<(), HostError> {
		(**self).did_deactivate(engine)
	}

	fn context_value(
		&self,
		engine: EngineRef,
		key: &str,
	) -> Result<Option<ContextValue>, HostError> {
		(**self).context_value(engine, key)
	}

	fn request_interrupt(&self, engine: EngineRef) -> Result<(), HostError> {
		(**self).request_interrupt(engine)
	}

	fn set_context_value(
		&self,
		engine: EngineRef,
		key: &str,
		flags: ContextFlags,
		value: &[u8],
	) -> Result<(), HostError> {
		(**self).set_context_value(engine, key, flags, value)
	}

	fn hint_value(&self, engine: EngineRef, key: &str) -> Result<Option<Vec<u8>>, HostError> {
		(**self).hint_value(engine, key)
	}

	fn set_hint_value(&self, engine: EngineRef, key: &str, value: &[u8]) -> Result<(), HostError> {
		(**self).set_hint_value(engine, key, value)
	}

	fn arguments(&self, engine: EngineRef) -> Result<Vec<Vec<u8>>, HostError> {
		(**self).arguments(engine)
	}

	fn session_id(&self, engine: EngineRef) -> Result<SessionId, HostError> {
		(**self).session_id(engine)
	}
}
