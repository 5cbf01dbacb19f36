// std
use std::{
	ffi::{CString, c_void},
	ptr::{self, NonNull},
	slice,
};
// self
use crate::{
	_prelude::*,
	abi::{AuthorizationCallbacks, AuthorizationValue, AuthorizationValueVector},
	host::{
		AuthorizationResult, ContextFlags, ContextValue, EngineRef, HostCallbacks, HostError,
		SessionId,
	},
};

/// [`HostCallbacks`] over the C callback table received by `AuthorizationPluginCreate`.
///
/// Values handed out by the host are copied before the call returns; nothing borrowed from the
/// host outlives a callback.
pub struct FfiHost {
	table: NonNull<AuthorizationCallbacks>,
}
impl FfiHost {
	/// Wraps the host's callback table; `None` when the pointer is null.
	///
	/// # Safety
	///
	/// A non-null `table` must point at a callback table that stays valid and unmodified for
	/// the lifetime of the returned value.
	pub unsafe fn new(table: *const AuthorizationCallbacks) -> Option<Self> {
		NonNull::new(table.cast_mut()).map(|table| Self { table })
	}

	/// Version reported by the host's callback table.
	pub fn version(&self) -> u32 {
		self.table().version
	}

	fn table(&self) -> &AuthorizationCallbacks {
		// SAFETY: guaranteed valid for our lifetime by the contract of `new`.
		unsafe { self.table.as_ref() }
	}
}
impl HostCallbacks for FfiHost {
	fn set_result(&self, engine: EngineRef, result: AuthorizationResult) -> Result<(), HostError> {
		let f = self.table().set_result.ok_or(HostError::Missing { callback: "SetResult" })?;

		// SAFETY: host callback invoked with the engine the host handed to this mechanism.
		HostError::check("SetResult", unsafe { f(engine.as_ptr(), result.raw()) })
	}

	fn did_deactivate(&self, engine: EngineRef) -> Result<(), HostError> {
		let f =
			self.table().did_deactivate.ok_or(HostError::Missing { callback: "DidDeactivate" })?;

		// SAFETY: see `set_result`.
		HostError::check("DidDeactivate", unsafe { f(engine.as_ptr()) })
	}

	fn context_value(
		&self,
		engine: EngineRef,
		key: &str,
	) -> Result<Option<ContextValue>, HostError> {
		let f = self
			.table()
			.get_context_value
			.ok_or(HostError::Missing { callback: "GetContextValue" })?;
		let key = c_key(key)?;
		let mut flags = 0;
		let mut value = ptr::null();

		// SAFETY: see `set_result`; both out pointers reference locals.
		HostError::check("GetContextValue", unsafe {
			f(engine.as_ptr(), key.as_ptr(), &mut flags, &mut value)
		})?;

		// SAFETY: on success the host returns null or a value valid until the next callback.
		let data = unsafe { copy_value(value) };

		Ok(data.map(|data| ContextValue { flags: ContextFlags::from_bits(flags), data }))
	}

	fn request_interrupt(&self, engine: EngineRef) -> Result<(), HostError> {
		let f = self
			.table()
			.request_interrupt
			.ok_or(HostError::Missing { callback: "RequestInterrupt" })?;

		// SAFETY: see `set_result`.
		HostError::check("RequestInterrupt", unsafe { f(engine.as_ptr()) })
	}

	fn set_context_value(
		&self,
		engine: EngineRef,
		key: &str,
		flags: ContextFlags,
		value: &[u8],
	) -> Result<(), HostError> {
		let f = self
			.table()
			.set_context_value
			.ok_or(HostError::Missing { callback: "SetContextValue" })?;
		let key = c_key(key)?;
		let value = borrowed_value(value);

		// SAFETY: see `set_result`; the host copies `value` before returning.
		HostError::check("SetContextValue", unsafe {
			f(engine.as_ptr(), key.as_ptr(), flags.bits(), &value)
		})
	}

	fn hint_value(&self, engine: EngineRef, key: &str) -> Result<Option<Vec<u8>>, HostError> {
		let f =
			self.table().get_hint_value.ok_or(HostError::Missing { callback: "GetHintValue" })?;
		let key = c_key(key)?;
		let mut value = ptr::null();

		// SAFETY: see `context_value`.
		HostError::check("GetHintValue", unsafe {
			f(engine.as_ptr(), key.as_ptr(), &mut value)
		})?;

		// SAFETY: see `context_value`.
		Ok(unsafe { copy_value(value) })
	}

	fn set_hint_value(&self, engine: EngineRef, key: &str, value: &[u8]) -> Result<(), HostError> {
		let f =
			self.table().set_hint_value.ok_or(HostError::Missing { callback: "SetHintValue" })?;
		let key = c_key(key)?;
		let value = borrowed_value(value);

		// SAFETY: see `set_context_value`.
		HostError::check("SetHintValue", unsafe { f(engine.as_ptr(), key.as_ptr(), &value) })
	}

	fn arguments(&self, engine: EngineRef) -> Result<Vec<Vec<u8>>, HostError> {
		let f = self.table().get_arguments.ok_or(HostError::Missing { callback: "GetArguments" })?;
		let mut vector: *const AuthorizationValueVector = ptr::null();

		// SAFETY: see `set_result`; the out pointer references a local.
		HostError::check("GetArguments", unsafe { f(engine.as_ptr(), &mut vector) })?;

		// SAFETY: on success the host returns null or a vector valid until the next callback.
		let Some(vector) = (unsafe { vector.as_ref() }) else {
			return Ok(Vec::new());
		};

		if vector.values.is_null() || vector.count == 0 {
			return Ok(Vec::new());
		}

		// SAFETY: the host guarantees `count` initialized values at `values`.
		let values = unsafe { slice::from_raw_parts(vector.values, vector.count as usize) };

		// SAFETY: every element is a host-owned value, see above.
		Ok(values.iter().map(|value| unsafe { copy_value(value) }.unwrap_or_default()).collect())
	}

	fn session_id(&self, engine: EngineRef) -> Result<SessionId, HostError> {
		let f =
			self.table().get_session_id.ok_or(HostError::Missing { callback: "GetSessionId" })?;
		let mut session = ptr::null_mut::<c_void>();

		// SAFETY: see `arguments`.
		HostError::check("GetSessionId", unsafe { f(engine.as_ptr(), &mut session) })?;

		Ok(SessionId(session as usize))
	}
}
impl Debug for FfiHost {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FfiHost")
			.field("table", &self.table)
			.field("version", &self.version())
			.finish()
	}
}
// SAFETY: the callback table is immutable for the plugin's lifetime and the host allows its
// callbacks to be called from any thread running one of this plugin's mechanisms.
unsafe impl Send for FfiHost {}
// SAFETY: see the `Send` impl above.
unsafe impl Sync for FfiHost {}

fn c_key(key: &str) -> Result<CString, HostError> {
	CString::new(key).map_err(|_| HostError::InvalidKey { key: key.to_owned() })
}

fn borrowed_value(value: &[u8]) -> AuthorizationValue {
	AuthorizationValue { length: value.len(), data: value.as_ptr().cast_mut().cast() }
}

/// Copies the bytes behind a host value; `None` when the value itself is null.
///
/// # Safety
///
/// A non-null `value` must point at an [`AuthorizationValue`] whose buffer holds `length`
/// readable bytes.
unsafe fn copy_value(value: *const AuthorizationValue) -> Option<Vec<u8>> {
	// SAFETY: forwarded from the caller.
	let value = unsafe { value.as_ref() }?;

	if value.data.is_null() || value.length == 0 {
		return Some(Vec::new());
	}

	// SAFETY: forwarded from the caller.
	Some(unsafe { slice::from_raw_parts(value.data.cast::<u8>(), value.length) }.to_vec())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::abi::OsStatus;

	unsafe extern "C" fn ok(_engine: *mut c_void) -> OsStatus {
		0
	}

	unsafe extern "C" fn reject(_engine: *mut c_void, _result: u32) -> OsStatus {
		-60008
	}

	unsafe extern "C" fn username(
		_engine: *mut c_void,
		key: *const std::ffi::c_char,
		out_flags: *mut u32,
		out_value: *mut *const AuthorizationValue,
	) -> OsStatus {
		struct Shared(AuthorizationValue);
		unsafe impl Sync for Shared {}

		static DATA: &[u8] = b"ada\0";
		static VALUE: Shared =
			Shared(AuthorizationValue { length: 4, data: DATA.as_ptr().cast_mut().cast() });

		if unsafe { std::ffi::CStr::from_ptr(key) } != c"username" {
			return -60008;
		}

		unsafe {
			out_flags.write(ContextFlags::EXTRACTABLE.bits());
			out_value.write(&VALUE.0);
		}

		0
	}

	fn table() -> AuthorizationCallbacks {
		AuthorizationCallbacks {
			version: 1,
			set_result: Some(reject),
			request_interrupt: None,
			did_deactivate: Some(ok),
			get_context_value: Some(username),
			set_context_value: None,
			get_hint_value: None,
			set_hint_value: None,
			get_arguments: None,
			get_session_id: None,
		}
	}

	#[test]
	fn callbacks_map_statuses_and_gaps() {
		let table = table();
		let host = unsafe { FfiHost::new(&table) }.expect("Callback table should be non-null.");
		let engine = EngineRef::from_raw(ptr::null_mut());

		assert_eq!(host.version(), 1);
		assert_eq!(host.did_deactivate(engine), Ok(()));
		assert_eq!(
			host.set_result(engine, AuthorizationResult::Allow),
			Err(HostError::Status { callback: "SetResult", status: -60008 })
		);
		assert_eq!(
			host.request_interrupt(engine),
			Err(HostError::Missing { callback: "RequestInterrupt" })
		);
		assert!(unsafe { FfiHost::new(ptr::null()) }.is_none());
	}

	#[test]
	fn context_values_are_copied_with_flags() {
		let table = table();
		let host = unsafe { FfiHost::new(&table) }.expect("Callback table should be non-null.");
		let engine = EngineRef::from_raw(ptr::null_mut());

		assert_eq!(
			host.context_value(engine, "username"),
			Ok(Some(ContextValue { flags: ContextFlags::EXTRACTABLE, data: b"ada\0".to_vec() }))
		);
		assert_eq!(
			host.context_value(engine, "password"),
			Err(HostError::Status { callback: "GetContextValue", status: -60008 })
		);
		assert_eq!(
			host.context_value(engine, "user\0name"),
			Err(HostError::InvalidKey { key: "user\0name".into() })
		);
	}

	#[test]
	fn null_values_copy_as_absent() {
		assert_eq!(unsafe { copy_value(ptr::null()) }, None);

		let empty = AuthorizationValue { length: 0, data: ptr::null_mut() };

		assert_eq!(unsafe { copy_value(&empty) }, Some(Vec::new()));
	}
}
