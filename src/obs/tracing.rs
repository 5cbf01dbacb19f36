// self
use crate::{_prelude::*, obs::Operation};

/// A span builder used by plugin entry points.
#[derive(Clone, Debug)]
pub struct OperationSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OperationSpan {
	/// Creates a new span tagged with the entry point and, once known, the mechanism selector.
	pub fn new(operation: Operation, mechanism: Option<&str>) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"escrow_buddy.operation",
				operation = operation.as_str(),
				mechanism = mechanism.unwrap_or("-")
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (operation, mechanism);

			Self {}
		}
	}

	/// Enters the span for the duration of the entry point.
	pub fn entered(self) -> OperationSpanGuard {
		#[cfg(feature = "tracing")]
		{
			OperationSpanGuard { guard: self.span.entered() }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = self;

			OperationSpanGuard {}
		}
	}
}

/// RAII guard returned by [`OperationSpan::entered`].
pub struct OperationSpanGuard {
	#[cfg(feature = "tracing")]
	#[allow(dead_code)]
	guard: tracing::span::EnteredSpan,
}
impl Debug for OperationSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("OperationSpanGuard(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn operation_span_enters_without_subscriber() {
		let _guard = OperationSpan::new(Operation::MechanismInvoke, Some("check")).entered();

		obs_event!(debug, "event inside span for {}", Operation::MechanismInvoke);
	}

	#[test]
	fn operation_span_debug_is_opaque() {
		let guard = OperationSpan::new(Operation::PluginCreate, None).entered();

		assert_eq!(format!("{guard:?}"), "OperationSpanGuard(..)");
	}
}
