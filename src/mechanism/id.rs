//! Mechanism identifiers of the form `plugin:mechanism[,privileged]`.

// std
use std::ops::Deref;
// self
use crate::_prelude::*;

const IDENTIFIER_MAX_LEN: usize = 128;
const PRIVILEGED_SUFFIX: &str = "privileged";

/// Error returned when a mechanism identifier is malformed or not served by the plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum MechanismIdError {
	/// The host passed no identifier at all.
	#[error("Mechanism identifier is missing.")]
	Missing,
	/// The identifier is not valid UTF-8.
	#[error("Mechanism identifier is not valid UTF-8.")]
	NotUtf8,
	/// The identifier was empty.
	#[error("Mechanism identifier cannot be empty.")]
	Empty,
	/// The identifier contains whitespace or control characters.
	#[error("Mechanism identifier contains whitespace.")]
	ContainsWhitespace,
	/// The identifier exceeded the allowed character count.
	#[error("Mechanism identifier exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted character count.
		max: usize,
	},
	/// One of the `plugin`/`mechanism` components is empty.
	#[error("The {component} component of the mechanism identifier is empty.")]
	EmptyComponent {
		/// Component that was empty.
		component: &'static str,
	},
	/// The mechanism component contains a reserved separator.
	#[error("Mechanism name contains the reserved separator `{separator}`.")]
	ReservedSeparator {
		/// Separator found inside the mechanism name.
		separator: char,
	},
	/// A suffix other than `privileged` follows the mechanism name.
	#[error("Unsupported mechanism suffix `{suffix}`.")]
	UnknownSuffix {
		/// Suffix as written in the identifier.
		suffix: String,
	},
	/// The identifier names a different plugin bundle.
	#[error("Mechanism identifier targets bundle `{found}` instead of `{expected}`.")]
	ForeignBundle {
		/// Bundle served by this plugin.
		expected: String,
		/// Bundle named by the identifier.
		found: String,
	},
	/// The plugin does not serve the requested mechanism.
	#[error("Mechanism `{mechanism}` is not provided by this plugin.")]
	Unknown {
		/// Requested mechanism name.
		mechanism: String,
	},
}

/// Parsed mechanism identifier.
///
/// Accepts the full `plugin:mechanism[,privileged]` form as written in the authorization
/// database as well as the bare `mechanism[,privileged]` form. The mechanism name selects the
/// behavior of the instantiated mechanism. The `privileged` flag was already consumed by the host
/// when it chose the process class to load the plugin into; it is kept only so the identifier
/// can be echoed back verbatim and is never interpreted here.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MechanismId {
	plugin: Option<String>,
	mechanism: String,
	privileged: bool,
}
impl MechanismId {
	/// Parses and validates an identifier.
	pub fn new(value: impl AsRef<str>) -> Result<Self, MechanismIdError> {
		let view = value.as_ref();

		validate_view(view)?;

		let (plugin, rest) = match view.split_once(':') {
			Some((plugin, rest)) => (Some(plugin), rest),
			None => (None, view),
		};
		let (mechanism, suffix) = match rest.split_once(',') {
			Some((mechanism, suffix)) => (mechanism, Some(suffix)),
			None => (rest, None),
		};

		if plugin.is_some_and(str::is_empty) {
			return Err(MechanismIdError::EmptyComponent { component: "plugin" });
		}
		if mechanism.is_empty() {
			return Err(MechanismIdError::EmptyComponent { component: "mechanism" });
		}
		if mechanism.contains(':') {
			return Err(MechanismIdError::ReservedSeparator { separator: ':' });
		}

		let privileged = match suffix {
			None => false,
			Some(PRIVILEGED_SUFFIX) => true,
			Some(other) => return Err(MechanismIdError::UnknownSuffix { suffix: other.to_owned() }),
		};

		Ok(Self { plugin: plugin.map(str::to_owned), mechanism: mechanism.to_owned(), privileged })
	}

	/// Bundle name written before the colon, when present.
	pub fn plugin(&self) -> Option<&str> {
		self.plugin.as_deref()
	}

	/// Mechanism name used to select the mechanism's behavior.
	pub fn mechanism(&self) -> &str {
		&self.mechanism
	}

	/// Whether the identifier carried the host-consumed `privileged` suffix.
	pub fn privileged(&self) -> bool {
		self.privileged
	}
}
impl Deref for MechanismId {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.mechanism
	}
}
impl From<MechanismId> for String {
	fn from(value: MechanismId) -> Self {
		value.to_string()
	}
}
impl TryFrom<String> for MechanismId {
	type Error = MechanismIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl Debug for MechanismId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "MechanismId({self})")
	}
}
impl Display for MechanismId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		if let Some(plugin) = &self.plugin {
			write!(f, "{plugin}:")?;
		}

		f.write_str(&self.mechanism)?;

		if self.privileged {
			write!(f, ",{PRIVILEGED_SUFFIX}")?;
		}

		Ok(())
	}
}
impl FromStr for MechanismId {
	type Err = MechanismIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

fn validate_view(view: &str) -> Result<(), MechanismIdError> {
	if view.is_empty() {
		return Err(MechanismIdError::Empty);
	}
	if view.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return Err(MechanismIdError::ContainsWhitespace);
	}
	if view.chars().count() > IDENTIFIER_MAX_LEN {
		return Err(MechanismIdError::TooLong { max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn full_and_bare_forms_parse() {
		let full = MechanismId::new("EscrowBuddy:Invoke,privileged")
			.expect("Full identifier should parse.");

		assert_eq!(full.plugin(), Some("EscrowBuddy"));
		assert_eq!(full.mechanism(), "Invoke");
		assert!(full.privileged());
		assert_eq!(full.to_string(), "EscrowBuddy:Invoke,privileged");

		let bare = MechanismId::new("check").expect("Bare identifier should parse.");

		assert_eq!(bare.plugin(), None);
		assert_eq!(&*bare, "check");
		assert!(!bare.privileged());
	}

	#[test]
	fn malformed_identifiers_are_rejected() {
		assert_eq!(MechanismId::new(""), Err(MechanismIdError::Empty));
		assert_eq!(MechanismId::new("Escrow Buddy:check"), Err(MechanismIdError::ContainsWhitespace));
		assert_eq!(
			MechanismId::new(":check"),
			Err(MechanismIdError::EmptyComponent { component: "plugin" })
		);
		assert_eq!(
			MechanismId::new("EscrowBuddy:"),
			Err(MechanismIdError::EmptyComponent { component: "mechanism" })
		);
		assert_eq!(
			MechanismId::new("EscrowBuddy:,privileged"),
			Err(MechanismIdError::EmptyComponent { component: "mechanism" })
		);
		assert_eq!(
			MechanismId::new("a:b:c"),
			Err(MechanismIdError::ReservedSeparator { separator: ':' })
		);
		assert_eq!(
			MechanismId::new("EscrowBuddy:check,gui"),
			Err(MechanismIdError::UnknownSuffix { suffix: "gui".into() })
		);
		assert_eq!(
			MechanismId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)),
			Err(MechanismIdError::TooLong { max: IDENTIFIER_MAX_LEN })
		);

		MechanismId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let id: MechanismId = serde_json::from_str("\"EscrowBuddy:check\"")
			.expect("Identifier should deserialize successfully.");

		assert_eq!(id.mechanism(), "check");
		assert_eq!(
			serde_json::to_string(&id).expect("Identifier should serialize."),
			"\"EscrowBuddy:check\""
		);
		assert!(serde_json::from_str::<MechanismId>("\"EscrowBuddy:check,gui\"").is_err());
		assert_eq!(format!("{id:?}"), "MechanismId(EscrowBuddy:check)");
	}
}
