//! The five dispatch-table operations over raw handles, independent of the C calling convention.
//!
//! Every operation validates its handle before anything else, runs inside an
//! [`OperationSpan`], records an attempt plus its outcome, and converts a panic into
//! [`Error::Panicked`]. The C adapter in [`crate::abi`] only converts arguments and maps the
//! result onto a [`Status`](crate::error::Status).

// std
use std::{
	marker::PhantomData,
	panic::{self, AssertUnwindSafe},
};
// self
use crate::{
	_prelude::*,
	config::PluginConfig,
	handle::{self, RawHandle},
	host::{EngineRef, HostCallbacks},
	mechanism::{Mechanism, MechanismIdError},
	obs::{self, Operation, OperationSpan, Outcome},
	plugin::Plugin,
};

/// Operations exposed to the host through the dispatch table.
///
/// All handle arguments are untrusted. Implementations must reject anything that is not a live
/// record of the expected kind with [`Error::InvalidHandle`] before touching it.
pub trait AuthorizationPlugin {
	/// Host callback implementation captured by created plugins.
	type Host: HostCallbacks;

	/// Allocates a plugin record bound to `callbacks`.
	fn plugin_create(callbacks: Self::Host, config: PluginConfig<Self::Host>) -> Result<RawHandle>;

	/// Releases a plugin record.
	///
	/// # Safety
	///
	/// No other call may be using `plugin` concurrently.
	unsafe fn plugin_destroy(plugin: RawHandle) -> Result<()>;

	/// Creates a mechanism record from `plugin` for the identifier `id`.
	///
	/// `id` carries the decoded identifier or the reason it could not be decoded; the plugin
	/// handle is validated first either way.
	///
	/// # Safety
	///
	/// `plugin` must not be destroyed while this call runs.
	unsafe fn mechanism_create(
		plugin: RawHandle,
		engine: EngineRef,
		id: Result<&str, MechanismIdError>,
	) -> Result<RawHandle>;

	/// Runs the mechanism and reports its verdict.
	///
	/// # Safety
	///
	/// The caller must be the only party touching `mechanism` for the duration of the call.
	unsafe fn mechanism_invoke(mechanism: RawHandle) -> Result<()>;

	/// Acknowledges a deactivation request.
	///
	/// # Safety
	///
	/// The caller must be the only party touching `mechanism` for the duration of the call.
	unsafe fn mechanism_deactivate(mechanism: RawHandle) -> Result<()>;

	/// Releases a mechanism record.
	///
	/// # Safety
	///
	/// The caller must be the only party touching `mechanism` for the duration of the call.
	unsafe fn mechanism_destroy(mechanism: RawHandle) -> Result<()>;
}

/// Dispatch over [`Plugin`] and [`Mechanism`] records for the host type `H`.
pub struct Dispatch<H>(PhantomData<fn() -> H>);
impl<H> AuthorizationPlugin for Dispatch<H>
where
	H: HostCallbacks,
{
	type Host = H;

	fn plugin_create(callbacks: H, config: PluginConfig<H>) -> Result<RawHandle> {
		guarded(Operation::PluginCreate, None, || handle::publish(Plugin::new(callbacks, config)))
	}

	unsafe fn plugin_destroy(plugin: RawHandle) -> Result<()> {
		guarded(Operation::PluginDestroy, None, || {
			// SAFETY: forwarded from the caller.
			unsafe { handle::retire_if::<Plugin<H>>(plugin, Plugin::ensure_idle) }?.destroy();

			Ok(())
		})
	}

	unsafe fn mechanism_create(
		plugin: RawHandle,
		engine: EngineRef,
		id: Result<&str, MechanismIdError>,
	) -> Result<RawHandle> {
		let selector = id.as_ref().ok().copied();

		guarded(Operation::MechanismCreate, selector, || {
			// SAFETY: forwarded from the caller.
			let plugin = unsafe { handle::borrow::<Plugin<H>>(plugin) }?;
			let mechanism = plugin.create_mechanism(engine, id?)?;

			handle::publish(mechanism)
		})
	}

	unsafe fn mechanism_invoke(mechanism: RawHandle) -> Result<()> {
		guarded(Operation::MechanismInvoke, None, || {
			// SAFETY: forwarded from the caller.
			unsafe { handle::borrow_mut::<Mechanism<H>>(mechanism) }?.invoke().map(drop)
		})
	}

	unsafe fn mechanism_deactivate(mechanism: RawHandle) -> Result<()> {
		guarded(Operation::MechanismDeactivate, None, || {
			// SAFETY: forwarded from the caller.
			unsafe { handle::borrow_mut::<Mechanism<H>>(mechanism) }?.deactivate()
		})
	}

	unsafe fn mechanism_destroy(mechanism: RawHandle) -> Result<()> {
		guarded(Operation::MechanismDestroy, None, || {
			// SAFETY: forwarded from the caller.
			unsafe { handle::retire::<Mechanism<H>>(mechanism) }?.destroy().map(drop)
		})
	}
}
impl<H> Debug for Dispatch<H> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Dispatch")
	}
}

fn guarded<T>(
	operation: Operation,
	mechanism: Option<&str>,
	f: impl FnOnce() -> Result<T>,
) -> Result<T> {
	let _guard = OperationSpan::new(operation, mechanism).entered();

	obs::record_outcome(operation, Outcome::Attempt);

	let result = panic::catch_unwind(AssertUnwindSafe(f))
		.unwrap_or_else(|_| Err(Error::Panicked { operation }));

	if let Err(e) = &result {
		obs_event!(warn, "Entry point {operation} failed: {e}");
	}

	obs::record_outcome(operation, Outcome::of(&result));

	result
}
