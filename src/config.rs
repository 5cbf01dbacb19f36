//! Plugin configuration: which mechanisms the bundle serves and how it treats the rest.

// self
use crate::{
	_prelude::*,
	host::{AuthorizationResult, HostCallbacks},
	mechanism::{AllowLogin, MechanismCheck, MechanismId, MechanismIdError},
};

/// Bundle name served by the default configuration.
pub const DEFAULT_BUNDLE: &str = "EscrowBuddy";
/// Mechanism name registered by the default configuration.
pub const DEFAULT_MECHANISM: &str = "Invoke";

/// Errors raised while building or parsing a configuration.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// The bundle name is not a valid `plugin` component.
	#[error("Bundle name `{bundle}` is invalid.")]
	InvalidBundle {
		/// Offending bundle name.
		bundle: String,
	},
	/// A registered mechanism name is not a valid `mechanism` component.
	#[error("Mechanism name `{name}` is invalid.")]
	InvalidMechanism {
		/// Offending mechanism name.
		name: String,
		/// Underlying identifier failure.
		#[source]
		source: MechanismIdError,
	},
	/// Failures would be reported as successes.
	#[error("The failure verdict must not allow the login.")]
	PermissiveFailureVerdict,
	/// Settings JSON could not be parsed.
	#[error("Plugin settings are malformed at `{path}`.")]
	Parse {
		/// Path of the offending field.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: serde_json::Error,
	},
}

/// What to do with mechanism names that have no registered check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownMechanism {
	/// Run the fallback check.
	#[default]
	Fallback,
	/// Refuse to create the mechanism.
	Reject,
}

/// Serializable subset of [`PluginConfig`]; checks themselves are registered in code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginSettings {
	/// Bundle name expected in the `plugin` component of identifiers.
	pub bundle: String,
	/// Policy for mechanism names without a registered check.
	#[serde(default)]
	pub unknown_mechanism: UnknownMechanism,
	/// Reject identifiers whose `plugin` component names another bundle.
	#[serde(default = "default_strict_bundle")]
	pub strict_bundle: bool,
	/// Verdict reported when a check fails or panics.
	#[serde(default = "default_failure_verdict")]
	pub failure_verdict: AuthorizationResult,
}
impl PluginSettings {
	/// Parses settings from JSON, naming the offending field on failure.
	pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(json);

		serde_path_to_error::deserialize(de).map_err(|e| ConfigError::Parse {
			path: e.path().to_string(),
			source: e.into_inner(),
		})
	}
}
impl Default for PluginSettings {
	fn default() -> Self {
		Self {
			bundle: DEFAULT_BUNDLE.into(),
			unknown_mechanism: UnknownMechanism::default(),
			strict_bundle: default_strict_bundle(),
			failure_verdict: default_failure_verdict(),
		}
	}
}

/// Resolved plugin configuration shared read-only by every mechanism.
pub struct PluginConfig<H>
where
	H: HostCallbacks,
{
	/// Bundle name expected in the `plugin` component of identifiers.
	pub bundle: String,
	/// Checks keyed by mechanism name.
	pub checks: BTreeMap<String, Arc<dyn MechanismCheck<H>>>,
	/// Check run for unregistered names under [`UnknownMechanism::Fallback`].
	pub fallback: Arc<dyn MechanismCheck<H>>,
	/// Policy for mechanism names without a registered check.
	pub unknown_mechanism: UnknownMechanism,
	/// Reject identifiers whose `plugin` component names another bundle.
	pub strict_bundle: bool,
	/// Verdict reported when a check fails or panics.
	pub failure_verdict: AuthorizationResult,
}
impl<H> PluginConfig<H>
where
	H: HostCallbacks,
{
	/// Creates a builder for the provided bundle name.
	pub fn builder(bundle: impl Into<String>) -> PluginConfigBuilder<H> {
		PluginConfigBuilder::new(PluginSettings { bundle: bundle.into(), ..Default::default() })
	}

	/// Creates a builder seeded from parsed settings.
	pub fn from_settings(settings: PluginSettings) -> PluginConfigBuilder<H> {
		PluginConfigBuilder::new(settings)
	}

	/// Selects the check for `id`, enforcing the bundle and unknown-mechanism policies.
	pub fn resolve(&self, id: &MechanismId) -> Result<Arc<dyn MechanismCheck<H>>, MechanismIdError> {
		if let Some(found) = id.plugin()
			&& self.strict_bundle
			&& found != self.bundle
		{
			return Err(MechanismIdError::ForeignBundle {
				expected: self.bundle.clone(),
				found: found.to_owned(),
			});
		}
		if let Some(check) = self.checks.get(id.mechanism()) {
			return Ok(check.clone());
		}

		match self.unknown_mechanism {
			UnknownMechanism::Fallback => Ok(self.fallback.clone()),
			UnknownMechanism::Reject =>
				Err(MechanismIdError::Unknown { mechanism: id.mechanism().to_owned() }),
		}
	}
}
impl<H> Default for PluginConfig<H>
where
	H: HostCallbacks,
{
	fn default() -> Self {
		Self {
			bundle: DEFAULT_BUNDLE.into(),
			checks: BTreeMap::from_iter([(
				DEFAULT_MECHANISM.to_owned(),
				Arc::new(AllowLogin) as Arc<dyn MechanismCheck<H>>,
			)]),
			fallback: Arc::new(AllowLogin),
			unknown_mechanism: UnknownMechanism::Fallback,
			strict_bundle: default_strict_bundle(),
			failure_verdict: default_failure_verdict(),
		}
	}
}
impl<H> Debug for PluginConfig<H>
where
	H: HostCallbacks,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PluginConfig")
			.field("bundle", &self.bundle)
			.field("checks", &self.checks.iter().map(|(k, v)| (k, v.name())).collect::<Vec<_>>())
			.field("fallback", &self.fallback.name())
			.field("unknown_mechanism", &self.unknown_mechanism)
			.field("strict_bundle", &self.strict_bundle)
			.field("failure_verdict", &self.failure_verdict)
			.finish()
	}
}

/// Builder for [`PluginConfig`] values.
pub struct PluginConfigBuilder<H>
where
	H: HostCallbacks,
{
	settings: PluginSettings,
	checks: Vec<(String, Arc<dyn MechanismCheck<H>>)>,
	fallback: Option<Arc<dyn MechanismCheck<H>>>,
}
impl<H> PluginConfigBuilder<H>
where
	H: HostCallbacks,
{
	fn new(settings: PluginSettings) -> Self {
		Self { settings, checks: Vec::new(), fallback: None }
	}

	/// Registers `check` for the mechanism `name`, replacing any earlier registration.
	pub fn mechanism(mut self, name: impl Into<String>, check: Arc<dyn MechanismCheck<H>>) -> Self {
		self.checks.push((name.into(), check));

		self
	}

	/// Sets the check run for unregistered mechanism names (defaults to [`AllowLogin`]).
	pub fn fallback(mut self, check: Arc<dyn MechanismCheck<H>>) -> Self {
		self.fallback = Some(check);

		self
	}

	/// Sets the unknown-mechanism policy.
	pub fn unknown_mechanism(mut self, policy: UnknownMechanism) -> Self {
		self.settings.unknown_mechanism = policy;

		self
	}

	/// Enables or disables bundle-name enforcement.
	pub fn strict_bundle(mut self, strict: bool) -> Self {
		self.settings.strict_bundle = strict;

		self
	}

	/// Sets the verdict reported when a check fails.
	pub fn failure_verdict(mut self, verdict: AuthorizationResult) -> Self {
		self.settings.failure_verdict = verdict;

		self
	}

	/// Validates the collected settings and builds the configuration.
	pub fn build(self) -> Result<PluginConfig<H>, ConfigError> {
		let Self { settings, checks, fallback } = self;

		match MechanismId::new(&settings.bundle) {
			Ok(id) if id.plugin().is_none() && !id.privileged() => (),
			_ => return Err(ConfigError::InvalidBundle { bundle: settings.bundle }),
		}
		if settings.failure_verdict == AuthorizationResult::Allow {
			return Err(ConfigError::PermissiveFailureVerdict);
		}

		let mut registered = BTreeMap::new();

		for (name, check) in checks {
			match MechanismId::new(&name) {
				Ok(id) if id.plugin().is_none() && !id.privileged() => (),
				Ok(_) => {
					return Err(ConfigError::InvalidMechanism {
						source: MechanismIdError::ReservedSeparator { separator: ',' },
						name,
					});
				},
				Err(source) => return Err(ConfigError::InvalidMechanism { name, source }),
			}

			registered.insert(name, check);
		}

		Ok(PluginConfig {
			bundle: settings.bundle,
			checks: registered,
			fallback: fallback.unwrap_or_else(|| Arc::new(AllowLogin)),
			unknown_mechanism: settings.unknown_mechanism,
			strict_bundle: settings.strict_bundle,
			failure_verdict: settings.failure_verdict,
		})
	}
}
impl<H> Debug for PluginConfigBuilder<H>
where
	H: HostCallbacks,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PluginConfigBuilder")
			.field("settings", &self.settings)
			.field("checks", &self.checks.iter().map(|(k, _)| k).collect::<Vec<_>>())
			.finish()
	}
}

fn default_strict_bundle() -> bool {
	true
}

fn default_failure_verdict() -> AuthorizationResult {
	AuthorizationResult::Deny
}
