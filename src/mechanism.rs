//! Mechanism records and their lifecycle state machine.
//!
//! A [`Mechanism`] is one configured authentication step the host instantiated from the plugin.
//! It moves through `Created -> {Invoked, Deactivated}* -> Destroyed`; every invoke reports
//! exactly one verdict and every deactivation request is acknowledged exactly once.

pub mod check;
pub mod id;
pub mod secret;

pub use check::*;
pub use id::*;
pub use secret::*;

// std
use std::{
	panic::{self, AssertUnwindSafe},
	sync::atomic::Ordering,
};
// self
use crate::{
	_prelude::*,
	handle::{Record, RecordKind},
	host::{AuthorizationResult, EngineRef, HostCallbacks},
	obs::Operation,
	plugin::PluginShared,
};

/// Lifecycle states of a mechanism.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismState {
	/// Created by `MechanismCreate`, not yet invoked.
	Created,
	/// Invoked; the verdict has been reported.
	Invoked,
	/// Deactivated; the deactivation has been acknowledged.
	Deactivated,
	/// Destroyed; terminal.
	Destroyed,
}
impl MechanismState {
	/// Returns the state reached by applying `operation`, or the refusal.
	///
	/// Invoke and deactivate are accepted from every live state so the host can interleave them
	/// freely; nothing is accepted once the mechanism is destroyed.
	///
	/// [`Mechanism::destroy`] consumes the mechanism, so no handle ever reaches one in the
	/// `Destroyed` state. Calls through a destroyed handle are rejected by the live-record
	/// registry in [`crate::handle`] with [`Error::InvalidHandle`]; the refusal here only
	/// applies to callers that drive the table directly.
	pub fn transition(self, operation: Operation) -> Result<Self, LifecycleError> {
		let next = match (self, operation) {
			(Self::Destroyed, _) => None,
			(_, Operation::MechanismInvoke) => Some(Self::Invoked),
			(_, Operation::MechanismDeactivate) => Some(Self::Deactivated),
			(_, Operation::MechanismDestroy) => Some(Self::Destroyed),
			_ => None,
		};

		next.ok_or(LifecycleError { operation, state: self })
	}

	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			MechanismState::Created => "created",
			MechanismState::Invoked => "invoked",
			MechanismState::Deactivated => "deactivated",
			MechanismState::Destroyed => "destroyed",
		}
	}
}
impl Display for MechanismState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Transition refused by the mechanism state machine.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Operation {operation} is not allowed in state {state}.")]
pub struct LifecycleError {
	/// Refused operation.
	pub operation: Operation,
	/// State the mechanism was in.
	pub state: MechanismState,
}

/// One instantiated mechanism.
pub struct Mechanism<H>
where
	H: HostCallbacks,
{
	id: MechanismId,
	engine: EngineRef,
	plugin: Arc<PluginShared<H>>,
	check: Arc<dyn MechanismCheck<H>>,
	state: MechanismState,
	invoked: bool,
	created_at: OffsetDateTime,
	last_invoked_at: Option<OffsetDateTime>,
}
impl<H> Mechanism<H>
where
	H: HostCallbacks,
{
	pub(crate) fn new(
		plugin: Arc<PluginShared<H>>,
		engine: EngineRef,
		id: MechanismId,
		check: Arc<dyn MechanismCheck<H>>,
	) -> Self {
		plugin.live_mechanisms.fetch_add(1, Ordering::AcqRel);

		Self {
			id,
			engine,
			plugin,
			check,
			state: MechanismState::Created,
			invoked: false,
			created_at: OffsetDateTime::now_utc(),
			last_invoked_at: None,
		}
	}

	/// Identifier the mechanism was created with.
	pub fn id(&self) -> &MechanismId {
		&self.id
	}

	/// Engine reference passed to every callback of this mechanism.
	pub fn engine(&self) -> EngineRef {
		self.engine
	}

	/// Current lifecycle state.
	pub fn state(&self) -> MechanismState {
		self.state
	}

	/// Whether a verdict has been reported since the last activation.
	pub fn has_reported(&self) -> bool {
		self.invoked
	}

	/// Instant the mechanism was created.
	pub fn created_at(&self) -> OffsetDateTime {
		self.created_at
	}

	/// Instant of the most recent invoke, if any.
	pub fn last_invoked_at(&self) -> Option<OffsetDateTime> {
		self.last_invoked_at
	}

	/// Runs the selected check and reports its verdict through `SetResult` before returning.
	///
	/// A failing or panicking check is reported as the configured failure verdict, so the host
	/// always receives exactly one result per call.
	pub fn invoke(&mut self) -> Result<AuthorizationResult> {
		let next = self.state.transition(Operation::MechanismInvoke)?;

		if self.invoked {
			obs_event!(debug, "Mechanism {} invoked again without a deactivation.", self.id);
		}

		let started_at = OffsetDateTime::now_utc();
		let verdict = self.run_check();

		self.state = next;
		self.invoked = true;
		self.last_invoked_at = Some(started_at);
		self.plugin.callbacks.set_result(self.engine, verdict)?;

		obs_event!(
			debug,
			"Mechanism {} reported {} after {:?}.",
			self.id,
			verdict,
			OffsetDateTime::now_utc() - started_at
		);

		Ok(verdict)
	}

	/// Acknowledges a deactivation request through `DidDeactivate`.
	///
	/// This mechanism owns no UI, so the acknowledgement is sent immediately whether or not the
	/// mechanism was invoked.
	pub fn deactivate(&mut self) -> Result<()> {
		let next = self.state.transition(Operation::MechanismDeactivate)?;

		self.state = next;
		self.invoked = false;
		self.plugin.callbacks.did_deactivate(self.engine)?;

		Ok(())
	}

	/// Tears the mechanism down and returns the terminal state.
	pub fn destroy(mut self) -> Result<MechanismState> {
		self.state = self.state.transition(Operation::MechanismDestroy)?;

		obs_event!(debug, "Mechanism {} destroyed (reported: {}).", self.id, self.invoked);

		Ok(self.state)
	}

	fn run_check(&self) -> AuthorizationResult {
		let ctx = InvocationContext::new(&self.plugin.callbacks, self.engine, &self.id);
		let failure_verdict = self.plugin.config.failure_verdict;

		match panic::catch_unwind(AssertUnwindSafe(|| self.check.check(&ctx))) {
			Ok(Ok(verdict)) => verdict,
			Ok(Err(e)) => {
				obs_event!(warn, "Check {} of {} failed: {e}", self.check.name(), self.id);

				failure_verdict
			},
			Err(_) => {
				obs_event!(warn, "Check {} of {} panicked.", self.check.name(), self.id);

				failure_verdict
			},
		}
	}
}
impl<H> Record for Mechanism<H>
where
	H: HostCallbacks,
{
	const KIND: RecordKind = RecordKind::Mechanism;
}
impl<H> Drop for Mechanism<H>
where
	H: HostCallbacks,
{
	fn drop(&mut self) {
		self.plugin.live_mechanisms.fetch_sub(1, Ordering::AcqRel);
	}
}
impl<H> Debug for Mechanism<H>
where
	H: HostCallbacks,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Mechanism")
			.field("id", &self.id)
			.field("engine", &self.engine)
			.field("check", &self.check.name())
			.field("state", &self.state)
			.field("invoked", &self.invoked)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{Call, RecordingHost, engine},
		config::PluginConfig,
		plugin::Plugin,
	};

	struct FailingCheck;
	impl MechanismCheck<RecordingHost> for FailingCheck {
		fn name(&self) -> &'static str {
			"failing"
		}

		fn check(
			&self,
			_ctx: &InvocationContext<'_, RecordingHost>,
		) -> Result<AuthorizationResult, CheckError> {
			Err(CheckError::Failed { message: "escrow profile missing".into() })
		}
	}

	struct PanickingCheck;
	impl MechanismCheck<RecordingHost> for PanickingCheck {
		fn name(&self) -> &'static str {
			"panicking"
		}

		fn check(
			&self,
			_ctx: &InvocationContext<'_, RecordingHost>,
		) -> Result<AuthorizationResult, CheckError> {
			panic!("check exploded");
		}
	}

	fn plugin_with(host: RecordingHost) -> Plugin<RecordingHost> {
		let config = PluginConfig::builder("EscrowBuddy")
			.mechanism("fail", Arc::new(FailingCheck))
			.mechanism("panic", Arc::new(PanickingCheck))
			.build()
			.expect("Test plugin configuration should build.");

		Plugin::new(host, config)
	}

	#[test]
	fn transition_table_accepts_live_states_only() {
		use MechanismState::*;

		for state in [Created, Invoked, Deactivated] {
			assert_eq!(state.transition(Operation::MechanismInvoke), Ok(Invoked));
			assert_eq!(state.transition(Operation::MechanismDeactivate), Ok(Deactivated));
			assert_eq!(state.transition(Operation::MechanismDestroy), Ok(Destroyed));
			assert!(state.transition(Operation::PluginDestroy).is_err());
		}

		assert_eq!(
			Destroyed.transition(Operation::MechanismInvoke),
			Err(LifecycleError { operation: Operation::MechanismInvoke, state: Destroyed })
		);
	}

	#[test]
	fn invoke_reports_exactly_once_per_call() {
		let plugin = plugin_with(RecordingHost::default());
		let mut mechanism = plugin
			.create_mechanism(engine(7), "EscrowBuddy:check")
			.expect("Mechanism creation should succeed.");

		assert_eq!(mechanism.state(), MechanismState::Created);
		assert!(!mechanism.has_reported());
		assert_eq!(
			mechanism.invoke().expect("Invoke should succeed."),
			AuthorizationResult::Allow
		);
		assert_eq!(mechanism.state(), MechanismState::Invoked);
		assert!(mechanism.has_reported());
		assert!(mechanism.last_invoked_at().is_some());
		assert_eq!(
			plugin.callbacks().calls(),
			vec![Call::SetResult(engine(7), AuthorizationResult::Allow)]
		);
	}

	#[test]
	fn failing_and_panicking_checks_still_report_once() {
		let plugin = plugin_with(RecordingHost::default());

		for name in ["fail", "panic"] {
			let mut mechanism = plugin
				.create_mechanism(engine(1), name)
				.expect("Mechanism creation should succeed.");

			assert_eq!(
				mechanism.invoke().expect("Invoke should report the failure verdict."),
				AuthorizationResult::Deny
			);
		}

		assert_eq!(
			plugin.callbacks().results(),
			vec![AuthorizationResult::Deny, AuthorizationResult::Deny]
		);
	}

	#[test]
	fn deactivate_acknowledges_with_or_without_invoke() {
		let plugin = plugin_with(RecordingHost::default());
		let mut mechanism = plugin
			.create_mechanism(engine(2), "Invoke")
			.expect("Mechanism creation should succeed.");

		mechanism.deactivate().expect("Deactivate before invoke should succeed.");

		assert_eq!(mechanism.state(), MechanismState::Deactivated);
		assert_eq!(plugin.callbacks().deactivations(), 1);

		mechanism.invoke().expect("Invoke after deactivate should succeed.");
		mechanism.deactivate().expect("Deactivate after invoke should succeed.");

		assert!(!mechanism.has_reported(), "Deactivation starts a new activation.");
		assert_eq!(plugin.callbacks().deactivations(), 2);
		assert_eq!(plugin.callbacks().results().len(), 1);
	}

	#[test]
	fn host_failure_on_set_result_is_reported_once_and_propagated() {
		let plugin = plugin_with(RecordingHost { fail_set_result: true, ..Default::default() });
		let mut mechanism = plugin
			.create_mechanism(engine(3), "Invoke")
			.expect("Mechanism creation should succeed.");
		let err = mechanism.invoke().expect_err("Host failure should propagate.");

		assert!(matches!(err, Error::Host(_)));
		assert_eq!(mechanism.state(), MechanismState::Invoked);
		assert_eq!(plugin.callbacks().results().len(), 1);
	}

	#[test]
	fn destroy_without_invoke_releases_the_plugin_reference() {
		let plugin = plugin_with(RecordingHost::default());
		let mechanism = plugin
			.create_mechanism(engine(4), "Invoke")
			.expect("Mechanism creation should succeed.");

		assert_eq!(plugin.live_mechanisms(), 1);
		assert_eq!(
			mechanism.destroy().expect("Destroy should succeed."),
			MechanismState::Destroyed
		);
		assert_eq!(plugin.live_mechanisms(), 0);
		assert!(plugin.callbacks().calls().is_empty());
	}
}
