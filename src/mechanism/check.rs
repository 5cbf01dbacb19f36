//! Checks run by a mechanism on invoke, and the host context they can read.

// self
use crate::{
	_prelude::*,
	host::{
		AuthorizationResult, ContextFlags, ContextValue, EngineRef, HostCallbacks, HostError,
		PASSWORD_KEY, SessionId, USERNAME_KEY,
	},
	mechanism::{MechanismId, Secret},
};

/// Failures raised by a [`MechanismCheck`].
///
/// Whatever the failure, the mechanism still reports exactly one verdict to the host.
#[derive(Debug, ThisError)]
pub enum CheckError {
	/// A host accessor failed.
	#[error(transparent)]
	Host(#[from] HostError),
	/// A context item the check depends on is absent.
	#[error("Context item `{key}` is missing.")]
	MissingContext {
		/// Context key that was looked up.
		key: &'static str,
	},
	/// The check ran and failed for a check-specific reason.
	#[error("Check failed: {message}.")]
	Failed {
		/// Human-readable failure summary.
		message: String,
	},
}

/// Behavior selected by the mechanism name of a [`MechanismId`].
///
/// Checks return the verdict to report and never call `SetResult` themselves. The mechanism
/// reports on their behalf so every invocation reports exactly once.
pub trait MechanismCheck<H>
where
	Self: Send + Sync,
	H: HostCallbacks,
{
	/// Stable label used in logs.
	fn name(&self) -> &'static str;

	/// Runs the check for one invocation.
	fn check(&self, ctx: &InvocationContext<'_, H>) -> Result<AuthorizationResult, CheckError>;
}

/// Built-in check that unconditionally allows the login.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowLogin;
impl<H> MechanismCheck<H> for AllowLogin
where
	H: HostCallbacks,
{
	fn name(&self) -> &'static str {
		"allow_login"
	}

	fn check(&self, ctx: &InvocationContext<'_, H>) -> Result<AuthorizationResult, CheckError> {
		obs_event!(debug, "Allowing login for mechanism {}.", ctx.mechanism());

		Ok(AuthorizationResult::Allow)
	}
}

/// Read/write view of the engine state available to a check during one invocation.
pub struct InvocationContext<'a, H> {
	callbacks: &'a H,
	engine: EngineRef,
	mechanism: &'a MechanismId,
}
impl<'a, H> InvocationContext<'a, H>
where
	H: HostCallbacks,
{
	pub(crate) fn new(callbacks: &'a H, engine: EngineRef, mechanism: &'a MechanismId) -> Self {
		Self { callbacks, engine, mechanism }
	}

	/// Identifier of the mechanism being invoked.
	pub fn mechanism(&self) -> &MechanismId {
		self.mechanism
	}

	/// Engine reference of the running evaluation.
	pub fn engine(&self) -> EngineRef {
		self.engine
	}

	/// Copies a context item out of the engine.
	pub fn context_value(&self, key: &str) -> Result<Option<ContextValue>, HostError> {
		self.callbacks.context_value(self.engine, key)
	}

	/// Stores a context item for later mechanisms of the same evaluation.
	pub fn set_context_value(
		&self,
		key: &str,
		flags: ContextFlags,
		value: &[u8],
	) -> Result<(), HostError> {
		self.callbacks.set_context_value(self.engine, key, flags, value)
	}

	/// Copies a hint out of the engine.
	pub fn hint_value(&self, key: &str) -> Result<Option<Vec<u8>>, HostError> {
		self.callbacks.hint_value(self.engine, key)
	}

	/// Stores a hint for later mechanisms of the same evaluation.
	pub fn set_hint_value(&self, key: &str, value: &[u8]) -> Result<(), HostError> {
		self.callbacks.set_hint_value(self.engine, key, value)
	}

	/// Returns the arguments configured for the current right.
	pub fn arguments(&self) -> Result<Vec<Vec<u8>>, HostError> {
		self.callbacks.arguments(self.engine)
	}

	/// Returns the security session of the evaluation.
	pub fn session_id(&self) -> Result<SessionId, HostError> {
		self.callbacks.session_id(self.engine)
	}

	/// Asks the host to interrupt the evaluation and re-run the mechanism chain.
	pub fn request_interrupt(&self) -> Result<(), HostError> {
		self.callbacks.request_interrupt(self.engine)
	}

	/// User name entered for this evaluation.
	///
	/// Missing, empty, non-UTF-8, and unreadable items all read as `None`; host failures are
	/// logged rather than propagated.
	pub fn username(&self) -> Option<String> {
		self.text_item(USERNAME_KEY)
	}

	/// Password entered for this evaluation, with the same rules as [`username`](Self::username).
	pub fn password(&self) -> Option<Secret> {
		self.text_item(PASSWORD_KEY).map(Secret::new)
	}

	fn text_item(&self, key: &'static str) -> Option<String> {
		let value = match self.context_value(key) {
			Ok(value) => value?,
			Err(e) => {
				obs_event!(warn, "Reading context item {key} failed: {e}");

				return None;
			},
		};

		decode_text(value.data)
	}
}
impl<H> Debug for InvocationContext<'_, H> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InvocationContext")
			.field("engine", &self.engine)
			.field("mechanism", self.mechanism)
			.finish()
	}
}

fn decode_text(data: Vec<u8>) -> Option<String> {
	if data.is_empty() {
		return None;
	}

	let text = String::from_utf8(data).ok()?;

	Some(text.replace('\0', ""))
}
