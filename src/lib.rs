//! Authorization plugin mechanism for the macOS authorization engine.
//!
//! Handles fail closed, mechanisms follow an explicit lifecycle state machine, and every host
//! callback is made exactly once behind a C dispatch table.
//!
//! The crate builds as a `cdylib` exporting `AuthorizationPluginCreate`. Everything behind
//! that symbol is ordinary Rust: [`plugin::Plugin`] and [`mechanism::Mechanism`] implement
//! the lifecycle against any [`host::HostCallbacks`] implementation, [`handle`] guards the
//! trust boundary, and [`abi`] adapts the C callback table and dispatch table.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

#[macro_use]
pub mod obs;

pub mod abi;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod host;
pub mod mechanism;
pub mod plugin;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	pub use crate::_prelude::*;

	// std
	use std::collections::HashMap;
	// self
	use crate::host::{
		AuthorizationResult, ContextFlags, ContextValue, EngineRef, HostCallbacks, HostError,
	};

	/// Control callback observed by [`RecordingHost`].
	#[derive(Clone, Debug, PartialEq, Eq)]
	pub enum Call {
		/// `SetResult` with the reported verdict.
		SetResult(EngineRef, AuthorizationResult),
		/// `DidDeactivate`.
		DidDeactivate(EngineRef),
		/// `RequestInterrupt`.
		RequestInterrupt(EngineRef),
	}

	/// Host double that records control callbacks and serves context items from a map.
	#[derive(Debug, Default)]
	pub struct RecordingHost {
		/// Control callbacks in call order.
		pub calls: Mutex<Vec<Call>>,
		/// Context items served by `GetContextValue` and written by `SetContextValue`.
		pub context: Mutex<HashMap<String, ContextValue>>,
		/// Makes `SetResult` fail with `errAuthorizationInternal` after recording the call.
		pub fail_set_result: bool,
	}
	impl RecordingHost {
		/// Seeds an extractable context item.
		pub fn with_context(self, key: &str, data: &[u8]) -> Self {
			self.context.lock().insert(
				key.to_owned(),
				ContextValue { flags: ContextFlags::EXTRACTABLE, data: data.to_vec() },
			);

			self
		}

		/// Snapshot of the recorded control callbacks.
		pub fn calls(&self) -> Vec<Call> {
			self.calls.lock().clone()
		}

		/// Verdicts reported through `SetResult`, in order.
		pub fn results(&self) -> Vec<AuthorizationResult> {
			self.calls()
				.into_iter()
				.filter_map(|call| match call {
					Call::SetResult(_, result) => Some(result),
					_ => None,
				})
				.collect()
		}

		/// Number of `DidDeactivate` calls.
		pub fn deactivations(&self) -> usize {
			self.calls().iter().filter(|call| matches!(call, Call::DidDeactivate(_))).count()
		}
	}
	impl HostCallbacks for RecordingHost {
		fn set_result(
			&self,
			engine: EngineRef,
			result: AuthorizationResult,
		) -> Result<(), HostError> {
			self.calls.lock().push(Call::SetResult(engine, result));

			if self.fail_set_result {
				return Err(HostError::Status { callback: "SetResult", status: -60008 });
			}

			Ok(())
		}

		fn did_deactivate(&self, engine: EngineRef) -> Result<(), HostError> {
			self.calls.lock().push(Call::DidDeactivate(engine));

			Ok(())
		}

		fn context_value(
			&self,
			_engine: EngineRef,
			key: &str,
		) -> Result<Option<ContextValue>, HostError> {
			Ok(self.context.lock().get(key).cloned())
		}

		fn request_interrupt(&self, engine: EngineRef) -> Result<(), HostError> {
			self.calls.lock().push(Call::RequestInterrupt(engine));

			Ok(())
		}

		fn set_context_value(
			&self,
			_engine: EngineRef,
			key: &str,
			flags: ContextFlags,
			value: &[u8],
		) -> Result<(), HostError> {
			self.context
				.lock()
				.insert(key.to_owned(), ContextValue { flags, data: value.to_vec() });

			Ok(())
		}
	}

	/// Engine reference with a recognizable address that is never dereferenced.
	pub fn engine(addr: usize) -> EngineRef {
		EngineRef::from_raw(std::ptr::without_provenance_mut(addr))
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashSet},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::Mutex;
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;

	pub use crate::error::{Error, Result};
}

#[cfg(test)] use color_eyre as _;
