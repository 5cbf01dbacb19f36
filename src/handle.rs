//! Tagged records and the validation discipline applied to every handle the host hands back.
//!
//! A handle is the address of a [`Tagged`] record: a four-character [`Magic`] sentinel at offset
//! zero followed by the Rust value. Before anything behind a handle is touched, the address must
//! be present in the process-wide registry of live records and its sentinel must decode to the
//! expected [`RecordKind`]. Both checks run on every call; nothing is cached between calls.

// std
use std::{
	alloc::{self, Layout},
	ffi::c_void,
	ptr::NonNull,
	sync::LazyLock,
};
// self
use crate::_prelude::*;

/// Opaque handle exchanged with the host.
pub type RawHandle = *mut c_void;

static LIVE_RECORDS: LazyLock<Mutex<HashSet<usize>>> =
	LazyLock::new(|| Mutex::new(HashSet::new()));

/// Four-character sentinel stored at offset zero of every record.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Magic(u32);
impl Magic {
	/// Sentinel of a live plugin record (`'PlgN'`).
	pub const PLUGIN: Self = Self::fourcc(*b"PlgN");
	/// Sentinel of a live mechanism record (`'Mchn'`).
	pub const MECHANISM: Self = Self::fourcc(*b"Mchn");
	/// Sentinel written over a record right before it is freed (`'Dead'`).
	pub const RETIRED: Self = Self::fourcc(*b"Dead");

	/// Packs a four-character code the way `OSType` literals are laid out.
	pub const fn fourcc(code: [u8; 4]) -> Self {
		Self(u32::from_be_bytes(code))
	}

	/// Returns the raw sentinel value.
	pub const fn raw(self) -> u32 {
		self.0
	}

	/// Decodes the sentinel; anything but a live record kind fails closed.
	pub fn kind(self) -> Option<RecordKind> {
		match self {
			Self::PLUGIN => Some(RecordKind::Plugin),
			Self::MECHANISM => Some(RecordKind::Mechanism),
			_ => None,
		}
	}
}
impl Debug for Magic {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let bytes = self.0.to_be_bytes();

		if bytes.iter().all(u8::is_ascii_graphic) {
			write!(f, "Magic('{}')", String::from_utf8_lossy(&bytes))
		} else {
			write!(f, "Magic({:#010x})", self.0)
		}
	}
}

/// Record kinds that may sit behind a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
	/// Per-plugin record returned by `AuthorizationPluginCreate`.
	Plugin,
	/// Per-mechanism record returned by `MechanismCreate`.
	Mechanism,
}
impl RecordKind {
	/// Sentinel identifying this record kind.
	pub const fn magic(self) -> Magic {
		match self {
			RecordKind::Plugin => Magic::PLUGIN,
			RecordKind::Mechanism => Magic::MECHANISM,
		}
	}

	/// Returns a stable label suitable for messages.
	pub const fn as_str(self) -> &'static str {
		match self {
			RecordKind::Plugin => "plugin",
			RecordKind::Mechanism => "mechanism",
		}
	}
}
impl Display for RecordKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Values that can be published to the host behind a tagged handle.
pub trait Record {
	/// Record kind written into the sentinel.
	const KIND: RecordKind;
}

/// In-memory layout of every record handed to the host.
#[repr(C)]
pub struct Tagged<T> {
	#[allow(dead_code)]
	magic: Magic,
	value: T,
}

/// Moves `value` into a freshly allocated tagged record and registers its address.
///
/// Allocation failures surface as [`Error::Allocation`] and leave nothing allocated or
/// registered behind.
pub fn publish<T>(value: T) -> Result<RawHandle>
where
	T: Record,
{
	let mut live = LIVE_RECORDS.lock();

	live.try_reserve(1).map_err(|_| Error::Allocation)?;

	let record = try_alloc(Tagged { magic: T::KIND.magic(), value })?;
	let raw = record.as_ptr().cast::<c_void>();

	live.insert(raw as usize);

	Ok(raw)
}

/// Returns a shared reference to the record value behind `raw`.
///
/// # Safety
///
/// The returned reference must not outlive the record, and no exclusive reference to the same
/// record may exist while it is alive.
pub unsafe fn borrow<'a, T>(raw: RawHandle) -> Result<&'a T>
where
	T: Record,
{
	let record = checked::<T>(&LIVE_RECORDS.lock(), raw)?;

	// SAFETY: `checked` proved the address is a live record of kind `T::KIND`.
	Ok(unsafe { &(*record.as_ptr()).value })
}

/// Returns an exclusive reference to the record value behind `raw`.
///
/// # Safety
///
/// The returned reference must not outlive the record, and the caller must be the only party
/// touching the record for its lifetime.
pub unsafe fn borrow_mut<'a, T>(raw: RawHandle) -> Result<&'a mut T>
where
	T: Record,
{
	let record = checked::<T>(&LIVE_RECORDS.lock(), raw)?;

	// SAFETY: `checked` proved the address is a live record of kind `T::KIND`.
	Ok(unsafe { &mut (*record.as_ptr()).value })
}

/// Unregisters the record behind `raw`, poisons its sentinel, frees it, and returns the value.
///
/// # Safety
///
/// No reference obtained through [`borrow`] or [`borrow_mut`] may still be alive.
pub unsafe fn retire<T>(raw: RawHandle) -> Result<T>
where
	T: Record,
{
	// SAFETY: forwarded from the caller.
	unsafe { retire_if(raw, |_| Ok(())) }
}

/// Like [`retire`], but only after `ready` accepts the record.
///
/// `ready` runs while the registry lock is held, so validation, the check, and the removal are
/// one step. A refusal is returned unchanged and leaves the record registered and intact.
///
/// # Safety
///
/// Same as [`retire`].
pub unsafe fn retire_if<T>(raw: RawHandle, ready: impl FnOnce(&T) -> Result<()>) -> Result<T>
where
	T: Record,
{
	let mut live = LIVE_RECORDS.lock();
	let record = checked::<T>(&live, raw)?;

	// SAFETY: `checked` proved the address is a live record of kind `T::KIND`.
	ready(unsafe { &(*record.as_ptr()).value })?;

	live.remove(&(raw as usize));

	// SAFETY: the record is live, correctly typed, and was allocated by `try_alloc` with the
	// global allocator and `Layout::new::<Tagged<T>>()`.
	let boxed = unsafe {
		record.as_ptr().cast::<Magic>().write(Magic::RETIRED);

		Box::from_raw(record.as_ptr())
	};

	Ok(boxed.value)
}

/// Returns true while `raw` is registered as a live record of any kind.
pub fn is_live(raw: RawHandle) -> bool {
	LIVE_RECORDS.lock().contains(&(raw as usize))
}

fn checked<T>(live: &HashSet<usize>, raw: RawHandle) -> Result<NonNull<Tagged<T>>>
where
	T: Record,
{
	let invalid = Error::InvalidHandle { expected: T::KIND };
	let Some(record) = NonNull::new(raw) else {
		obs_event!(warn, "Rejected null {} handle.", T::KIND);

		return Err(invalid);
	};

	if !live.contains(&(raw as usize)) {
		obs_event!(warn, "Rejected unknown {} handle {:p}.", T::KIND, raw);

		return Err(invalid);
	}

	// SAFETY: registered addresses point at a live `Tagged<_>` whose first field is the sentinel.
	let magic = unsafe { record.cast::<Magic>().as_ptr().read() };

	if magic.kind() != Some(T::KIND) {
		obs_event!(warn, "Rejected {} handle {:p} carrying {:?}.", T::KIND, raw, magic);

		return Err(invalid);
	}

	Ok(record.cast())
}

fn try_alloc<T>(value: T) -> Result<NonNull<T>> {
	let layout = Layout::new::<T>();

	debug_assert!(layout.size() > 0, "Tagged records always carry a sentinel.");

	// SAFETY: the layout has a non-zero size.
	let raw = unsafe { alloc::alloc(layout) }.cast::<T>();
	let record = NonNull::new(raw).ok_or(Error::Allocation)?;

	// SAFETY: freshly allocated with the layout of `T`.
	unsafe { record.as_ptr().write(value) };

	Ok(record)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[derive(Debug, PartialEq)]
	struct Sample(u64);
	impl Record for Sample {
		const KIND: RecordKind = RecordKind::Mechanism;
	}

	struct OtherSample;
	impl Record for OtherSample {
		const KIND: RecordKind = RecordKind::Plugin;
	}

	#[test]
	fn magic_decodes_only_live_kinds() {
		assert_eq!(Magic::PLUGIN.kind(), Some(RecordKind::Plugin));
		assert_eq!(Magic::MECHANISM.kind(), Some(RecordKind::Mechanism));
		assert_eq!(Magic::RETIRED.kind(), None);
		assert_eq!(Magic::fourcc(*b"Mchm").kind(), None);
		assert_eq!(Magic::PLUGIN.raw(), 0x506c_674e);
		assert_eq!(format!("{:?}", Magic::MECHANISM), "Magic('Mchn')");
		assert_eq!(format!("{:?}", Magic(1)), "Magic(0x00000001)");
	}

	#[test]
	fn published_records_validate_and_retire() {
		let raw = publish(Sample(7)).expect("Publishing a sample record should succeed.");

		assert!(is_live(raw));
		assert_eq!(
			unsafe { borrow::<Sample>(raw) }.expect("Live sample should validate."),
			&Sample(7)
		);

		unsafe { borrow_mut::<Sample>(raw) }.expect("Live sample should validate mutably.").0 = 9;

		let value = unsafe { retire::<Sample>(raw) }.expect("Live sample should retire.");

		assert_eq!(value, Sample(9));
		assert!(!is_live(raw));
		assert!(matches!(
			unsafe { borrow::<Sample>(raw) },
			Err(Error::InvalidHandle { expected: RecordKind::Mechanism })
		));
	}

	#[test]
	fn null_and_foreign_handles_fail_closed() {
		let mut foreign = 0_u64;
		let foreign = (&mut foreign as *mut u64).cast::<c_void>();

		assert!(unsafe { borrow::<Sample>(std::ptr::null_mut()) }.is_err());
		assert!(unsafe { borrow::<Sample>(foreign) }.is_err());
		assert!(unsafe { retire::<Sample>(foreign) }.is_err());
	}

	#[test]
	fn kind_mismatch_and_corrupted_tag_fail_closed() {
		let raw = publish(Sample(1)).expect("Publishing a sample record should succeed.");

		assert!(matches!(
			unsafe { borrow::<OtherSample>(raw) },
			Err(Error::InvalidHandle { expected: RecordKind::Plugin })
		));

		unsafe { raw.cast::<u32>().write(0xdead_beef) };

		assert!(unsafe { borrow::<Sample>(raw) }.is_err());
		assert!(unsafe { retire::<Sample>(raw) }.is_err());
		assert!(is_live(raw), "A rejected retire must leave the record registered.");

		unsafe { raw.cast::<Magic>().write(Magic::MECHANISM) };
		unsafe { retire::<Sample>(raw) }.expect("Restored sample should retire.");
	}

	#[test]
	fn refused_retire_leaves_the_record_usable() {
		let raw = publish(Sample(3)).expect("Publishing a sample record should succeed.");
		let refused = unsafe {
			retire_if::<Sample>(raw, |sample| Err(Error::LiveMechanisms { live: sample.0 as usize }))
		};

		assert!(matches!(refused, Err(Error::LiveMechanisms { live: 3 })));
		assert!(is_live(raw), "A refused retire must leave the record registered.");
		assert_eq!(unsafe { borrow::<Sample>(raw) }.expect("Record should stay valid."), &Sample(3));

		let value = unsafe { retire_if::<Sample>(raw, |_| Ok(())) }
			.expect("Accepted retire should succeed.");

		assert_eq!(value, Sample(3));
		assert!(!is_live(raw));
	}
}
