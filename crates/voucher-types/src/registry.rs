//! Registry trait for self-registering implementations.
//!
//! Each pluggable backend (ledger, account) exposes a `Registry` type that
//! names the key it is configured under and hands out its factory.

/// Base trait for implementation registries.
///
/// The registry ties a configuration key to the factory that builds the
/// backend, so the service binary can assemble a name-to-factory map without
/// knowing the concrete types.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation.
	///
	/// Matches the key under `implementations`, for example:
	/// - "sqlite" for `ledger.implementations.sqlite`
	/// - "memory" for `ledger.implementations.memory`
	/// - "local" for `account.implementations.local`
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
