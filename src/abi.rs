//! C-compatible surface: the callback and dispatch tables and the exported creation symbol.
//!
//! Layouts follow `Security/AuthorizationPlugin.h`. Only the version-1 prefix of the callback
//! table is read. Every trampoline converts its arguments, forwards to [`Dispatch`], and
//! returns the [`Status`] of the result; nothing else crosses the boundary.

mod ffi_host;

pub use ffi_host::*;

// std
use std::ffi::{CStr, c_char, c_void};
// self
use crate::{
	_prelude::*,
	config::PluginConfig,
	dispatch::{AuthorizationPlugin, Dispatch},
	error::Status,
	handle::RawHandle,
	host::EngineRef,
	mechanism::MechanismIdError,
};

/// Raw `OSStatus` value.
pub type OsStatus = i32;
/// Version written into [`AuthorizationPluginInterface::version`].
pub const PLUGIN_INTERFACE_VERSION: u32 = 0;

/// `AuthorizationValue`: a length-prefixed byte buffer owned by whoever produced it.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct AuthorizationValue {
	/// Number of bytes at `data`.
	pub length: usize,
	/// Start of the buffer; may be null when `length` is zero.
	pub data: *mut c_void,
}

/// `AuthorizationValueVector`: a counted array of [`AuthorizationValue`]s.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct AuthorizationValueVector {
	/// Number of values at `values`.
	pub count: u32,
	/// Start of the array.
	pub values: *mut AuthorizationValue,
}

/// `SetResult`.
pub type SetResultFn = unsafe extern "C" fn(engine: *mut c_void, result: u32) -> OsStatus;
/// `RequestInterrupt` and `DidDeactivate`.
pub type EngineFn = unsafe extern "C" fn(engine: *mut c_void) -> OsStatus;
/// `GetContextValue`.
pub type GetContextValueFn = unsafe extern "C" fn(
	engine: *mut c_void,
	key: *const c_char,
	out_flags: *mut u32,
	out_value: *mut *const AuthorizationValue,
) -> OsStatus;
/// `SetContextValue`.
pub type SetContextValueFn = unsafe extern "C" fn(
	engine: *mut c_void,
	key: *const c_char,
	flags: u32,
	value: *const AuthorizationValue,
) -> OsStatus;
/// `GetHintValue`.
pub type GetHintValueFn = unsafe extern "C" fn(
	engine: *mut c_void,
	key: *const c_char,
	out_value: *mut *const AuthorizationValue,
) -> OsStatus;
/// `SetHintValue`.
pub type SetHintValueFn = unsafe extern "C" fn(
	engine: *mut c_void,
	key: *const c_char,
	value: *const AuthorizationValue,
) -> OsStatus;
/// `GetArguments`.
pub type GetArgumentsFn = unsafe extern "C" fn(
	engine: *mut c_void,
	out_arguments: *mut *const AuthorizationValueVector,
) -> OsStatus;
/// `GetSessionId`.
pub type GetSessionIdFn =
	unsafe extern "C" fn(engine: *mut c_void, out_session: *mut *mut c_void) -> OsStatus;

/// Version-1 prefix of `AuthorizationCallbacks`.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct AuthorizationCallbacks {
	/// Table version supplied by the host.
	pub version: u32,
	/// `SetResult`.
	pub set_result: Option<SetResultFn>,
	/// `RequestInterrupt`.
	pub request_interrupt: Option<EngineFn>,
	/// `DidDeactivate`.
	pub did_deactivate: Option<EngineFn>,
	/// `GetContextValue`.
	pub get_context_value: Option<GetContextValueFn>,
	/// `SetContextValue`.
	pub set_context_value: Option<SetContextValueFn>,
	/// `GetHintValue`.
	pub get_hint_value: Option<GetHintValueFn>,
	/// `SetHintValue`.
	pub set_hint_value: Option<SetHintValueFn>,
	/// `GetArguments`.
	pub get_arguments: Option<GetArgumentsFn>,
	/// `GetSessionId`.
	pub get_session_id: Option<GetSessionIdFn>,
}

/// `AuthorizationPluginInterface`: the dispatch table handed back to the host.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct AuthorizationPluginInterface {
	/// Always [`PLUGIN_INTERFACE_VERSION`].
	pub version: u32,
	/// `PluginDestroy`.
	pub plugin_destroy: unsafe extern "C" fn(plugin: RawHandle) -> OsStatus,
	/// `MechanismCreate`.
	pub mechanism_create: unsafe extern "C" fn(
		plugin: RawHandle,
		engine: *mut c_void,
		mechanism_id: *const c_char,
		out_mechanism: *mut RawHandle,
	) -> OsStatus,
	/// `MechanismInvoke`.
	pub mechanism_invoke: unsafe extern "C" fn(mechanism: RawHandle) -> OsStatus,
	/// `MechanismDeactivate`.
	pub mechanism_deactivate: unsafe extern "C" fn(mechanism: RawHandle) -> OsStatus,
	/// `MechanismDestroy`.
	pub mechanism_destroy: unsafe extern "C" fn(mechanism: RawHandle) -> OsStatus,
}

type FfiDispatch = Dispatch<FfiHost>;

/// Dispatch table returned by every successful [`AuthorizationPluginCreate`].
pub static INTERFACE: AuthorizationPluginInterface = AuthorizationPluginInterface {
	version: PLUGIN_INTERFACE_VERSION,
	plugin_destroy,
	mechanism_create,
	mechanism_invoke,
	mechanism_deactivate,
	mechanism_destroy,
};

/// Entry point the host resolves after loading the bundle.
///
/// On success `*out_plugin` receives the plugin handle and `*out_interface` the address of
/// [`INTERFACE`]; on failure neither is written.
///
/// # Safety
///
/// `callbacks` must stay valid for the lifetime of the plugin. The out pointers must be
/// writable when non-null.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn AuthorizationPluginCreate(
	callbacks: *const AuthorizationCallbacks,
	out_plugin: *mut RawHandle,
	out_interface: *mut *const AuthorizationPluginInterface,
) -> OsStatus {
	// SAFETY: forwarded from the caller.
	let result = unsafe { plugin_create(callbacks, out_plugin, out_interface) };

	Status::from(&result).code()
}

unsafe fn plugin_create(
	callbacks: *const AuthorizationCallbacks,
	out_plugin: *mut RawHandle,
	out_interface: *mut *const AuthorizationPluginInterface,
) -> Result<()> {
	if out_plugin.is_null() {
		return Err(Error::NullArgument { argument: "outPlugin" });
	}
	if out_interface.is_null() {
		return Err(Error::NullArgument { argument: "outPluginInterface" });
	}

	// SAFETY: forwarded from the caller.
	let host = unsafe { FfiHost::new(callbacks) }
		.ok_or(Error::NullArgument { argument: "callbacks" })?;
	let plugin = FfiDispatch::plugin_create(host, PluginConfig::default())?;

	// SAFETY: both out pointers were checked for null and are writable per the contract.
	unsafe {
		out_plugin.write(plugin);
		out_interface.write(&INTERFACE);
	}

	Ok(())
}

unsafe extern "C" fn plugin_destroy(plugin: RawHandle) -> OsStatus {
	// SAFETY: the host serializes calls on one plugin.
	Status::from(&unsafe { FfiDispatch::plugin_destroy(plugin) }).code()
}

unsafe extern "C" fn mechanism_create(
	plugin: RawHandle,
	engine: *mut c_void,
	mechanism_id: *const c_char,
	out_mechanism: *mut RawHandle,
) -> OsStatus {
	let result = if out_mechanism.is_null() {
		Err(Error::NullArgument { argument: "outMechanism" })
	} else {
		// SAFETY: a non-null identifier is a NUL-terminated string owned by the host.
		let id = unsafe { decode_mechanism_id(mechanism_id) };

		// SAFETY: the host keeps the plugin alive while it creates mechanisms from it.
		unsafe { FfiDispatch::mechanism_create(plugin, EngineRef::from_raw(engine), id) }
			// SAFETY: checked for null above.
			.map(|mechanism| unsafe { out_mechanism.write(mechanism) })
	};

	Status::from(&result).code()
}

unsafe extern "C" fn mechanism_invoke(mechanism: RawHandle) -> OsStatus {
	// SAFETY: one mechanism is only ever touched by one host thread at a time.
	Status::from(&unsafe { FfiDispatch::mechanism_invoke(mechanism) }).code()
}

unsafe extern "C" fn mechanism_deactivate(mechanism: RawHandle) -> OsStatus {
	// SAFETY: one mechanism is only ever touched by one host thread at a time.
	Status::from(&unsafe { FfiDispatch::mechanism_deactivate(mechanism) }).code()
}

unsafe extern "C" fn mechanism_destroy(mechanism: RawHandle) -> OsStatus {
	// SAFETY: one mechanism is only ever touched by one host thread at a time.
	Status::from(&unsafe { FfiDispatch::mechanism_destroy(mechanism) }).code()
}

unsafe fn decode_mechanism_id<'a>(raw: *const c_char) -> Result<&'a str, MechanismIdError> {
	if raw.is_null() {
		return Err(MechanismIdError::Missing);
	}

	// SAFETY: non-null and NUL-terminated per the caller.
	unsafe { CStr::from_ptr(raw) }.to_str().map_err(|_| MechanismIdError::NotUtf8)
}

#[cfg(test)]
mod tests {
	// std
	use std::ptr;
	// self
	use super::*;

	#[test]
	fn interface_table_is_fixed() {
		assert_eq!(INTERFACE.version, PLUGIN_INTERFACE_VERSION);
		assert_eq!(
			std::mem::offset_of!(AuthorizationPluginInterface, plugin_destroy),
			std::mem::size_of::<usize>()
		);
		assert_eq!(
			std::mem::offset_of!(AuthorizationCallbacks, get_session_id),
			9 * std::mem::size_of::<usize>()
		);
	}

	#[test]
	fn mechanism_ids_decode_or_explain() {
		assert_eq!(
			unsafe { decode_mechanism_id(c"EscrowBuddy:Invoke,privileged".as_ptr()) },
			Ok("EscrowBuddy:Invoke,privileged")
		);
		assert_eq!(unsafe { decode_mechanism_id(ptr::null()) }, Err(MechanismIdError::Missing));

		let invalid = [0xff_u8, 0xfe, 0];

		assert_eq!(
			unsafe { decode_mechanism_id(invalid.as_ptr().cast()) },
			Err(MechanismIdError::NotUtf8)
		);
	}

	#[test]
	fn create_rejects_null_arguments_without_writing() {
		let callbacks = AuthorizationCallbacks {
			version: 1,
			set_result: None,
			request_interrupt: None,
			did_deactivate: None,
			get_context_value: None,
			set_context_value: None,
			get_hint_value: None,
			set_hint_value: None,
			get_arguments: None,
			get_session_id: None,
		};
		let mut plugin = ptr::null_mut();
		let mut interface = ptr::null();

		unsafe {
			assert_eq!(
				AuthorizationPluginCreate(ptr::null(), &mut plugin, &mut interface),
				Status::InvalidPointer.code()
			);
			assert_eq!(
				AuthorizationPluginCreate(&callbacks, ptr::null_mut(), &mut interface),
				Status::InvalidPointer.code()
			);
			assert_eq!(
				AuthorizationPluginCreate(&callbacks, &mut plugin, ptr::null_mut()),
				Status::InvalidPointer.code()
			);
		}

		assert!(plugin.is_null());
		assert!(interface.is_null());
	}

	#[test]
	fn trampolines_reject_null_handles() {
		let mut mechanism = ptr::null_mut();

		unsafe {
			assert_eq!(plugin_destroy(ptr::null_mut()), Status::InvalidPointer.code());
			assert_eq!(
				mechanism_create(
					ptr::null_mut(),
					ptr::null_mut(),
					c"EscrowBuddy:Invoke".as_ptr(),
					&mut mechanism
				),
				Status::InvalidPointer.code()
			);
			assert_eq!(mechanism_invoke(ptr::null_mut()), Status::InvalidPointer.code());
			assert_eq!(mechanism_deactivate(ptr::null_mut()), Status::InvalidPointer.code());
			assert_eq!(mechanism_destroy(ptr::null_mut()), Status::InvalidPointer.code());
		}

		assert!(mechanism.is_null());
	}
}
