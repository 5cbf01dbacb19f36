//! Plugin records: one per `AuthorizationPluginCreate`, shared by every mechanism it creates.

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// self
use crate::{
	_prelude::*,
	config::PluginConfig,
	handle::{Record, RecordKind},
	host::{EngineRef, HostCallbacks},
	mechanism::{Mechanism, MechanismId},
};

/// State every mechanism of a plugin reads through its shared reference.
pub(crate) struct PluginShared<H>
where
	H: HostCallbacks,
{
	pub(crate) callbacks: H,
	pub(crate) config: PluginConfig<H>,
	pub(crate) live_mechanisms: AtomicUsize,
	created_at: OffsetDateTime,
}

/// Loaded plugin instance holding the host callback table.
pub struct Plugin<H>
where
	H: HostCallbacks,
{
	shared: Arc<PluginShared<H>>,
}
impl<H> Plugin<H>
where
	H: HostCallbacks,
{
	/// Creates a plugin bound to `callbacks`.
	pub fn new(callbacks: H, config: PluginConfig<H>) -> Self {
		obs_event!(info, "Plugin created for bundle {}.", config.bundle);

		Self {
			shared: Arc::new(PluginShared {
				callbacks,
				config,
				live_mechanisms: AtomicUsize::new(0),
				created_at: OffsetDateTime::now_utc(),
			}),
		}
	}

	/// Host callback table captured at creation.
	pub fn callbacks(&self) -> &H {
		&self.shared.callbacks
	}

	/// Configuration the plugin was created with.
	pub fn config(&self) -> &PluginConfig<H> {
		&self.shared.config
	}

	/// Instant the plugin was created.
	pub fn created_at(&self) -> OffsetDateTime {
		self.shared.created_at
	}

	/// Number of mechanisms created from this plugin and not yet destroyed.
	pub fn live_mechanisms(&self) -> usize {
		self.shared.live_mechanisms.load(Ordering::Acquire)
	}

	/// Parses `id`, selects its check, and creates a mechanism bound to `engine`.
	///
	/// The mechanism starts in the created state; no host callback is made.
	pub fn create_mechanism(&self, engine: EngineRef, id: &str) -> Result<Mechanism<H>> {
		let id = MechanismId::new(id)?;
		let check = self.shared.config.resolve(&id)?;

		obs_event!(debug, "Creating mechanism {id} with check {}.", check.name());

		Ok(Mechanism::new(self.shared.clone(), engine, id, check))
	}

	/// Fails with [`Error::LiveMechanisms`] while any mechanism is still alive.
	pub fn ensure_idle(&self) -> Result<()> {
		match self.live_mechanisms() {
			0 => Ok(()),
			live => Err(Error::LiveMechanisms { live }),
		}
	}

	/// Tears the plugin down.
	///
	/// Callers refuse the teardown with [`Plugin::ensure_idle`] first; the dispatch layer does so
	/// while the record is still registered. Mechanisms that outlive the plugin keep the shared
	/// state alive.
	pub fn destroy(self) {
		obs_event!(
			info,
			"Plugin for bundle {} destroyed after {:?}.",
			self.shared.config.bundle,
			OffsetDateTime::now_utc() - self.shared.created_at
		);
	}
}
impl<H> Record for Plugin<H>
where
	H: HostCallbacks,
{
	const KIND: RecordKind = RecordKind::Plugin;
}
impl<H> Debug for Plugin<H>
where
	H: HostCallbacks,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Plugin")
			.field("config", &self.shared.config)
			.field("live_mechanisms", &self.live_mechanisms())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{RecordingHost, engine},
		config::UnknownMechanism,
		mechanism::{AllowLogin, MechanismIdError},
	};

	#[test]
	fn create_mechanism_parses_and_resolves() {
		let plugin = Plugin::new(RecordingHost::default(), PluginConfig::default());
		let mechanism = plugin
			.create_mechanism(engine(5), "EscrowBuddy:Invoke,privileged")
			.expect("Served identifier should create a mechanism.");

		assert_eq!(mechanism.id().plugin(), Some("EscrowBuddy"));
		assert_eq!(mechanism.id().mechanism(), "Invoke");
		assert!(mechanism.id().privileged());
		assert_eq!(mechanism.engine(), engine(5));
		assert!(plugin.callbacks().calls().is_empty(), "Creation must not call the host.");
	}

	#[test]
	fn rejected_identifiers_create_nothing() {
		let config = PluginConfig::builder("EscrowBuddy")
			.mechanism("Invoke", Arc::new(AllowLogin))
			.unknown_mechanism(UnknownMechanism::Reject)
			.build()
			.expect("Rejecting configuration should build.");
		let plugin = Plugin::new(RecordingHost::default(), config);

		for id in ["", "EscrowBuddy:", "Other:Invoke", "EscrowBuddy:check", "Invoke,admin"] {
			assert!(
				matches!(plugin.create_mechanism(engine(1), id), Err(Error::Identifier(_))),
				"{id:?} should be rejected."
			);
		}

		assert!(matches!(
			plugin.create_mechanism(engine(1), "EscrowBuddy:check"),
			Err(Error::Identifier(MechanismIdError::Unknown { .. }))
		));
		assert_eq!(plugin.live_mechanisms(), 0);
	}

	#[test]
	fn destroy_is_refused_while_mechanisms_live() {
		let plugin = Plugin::new(RecordingHost::default(), PluginConfig::default());
		let first = plugin.create_mechanism(engine(1), "Invoke").expect("First mechanism.");
		let second = plugin.create_mechanism(engine(2), "Invoke").expect("Second mechanism.");

		assert!(matches!(plugin.ensure_idle(), Err(Error::LiveMechanisms { live: 2 })));

		first.destroy().expect("First destroy should succeed.");
		drop(second);

		plugin.ensure_idle().expect("Plugin should be idle once mechanisms are gone.");
		plugin.destroy();
	}
}
