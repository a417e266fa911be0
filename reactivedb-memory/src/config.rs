//! Tunables for [`crate::MemoryProvider`], in the idiom of the host
//! codebase's adapter `Config` structs (broadcast capacity, idle timeout).

/// Configuration for the in-memory provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
	/// Reserved for a future broadcast-channel-backed transport; the
	/// in-process provider delivers directly and does not currently use
	/// this, but it is threaded through so a networked provider built on
	/// top of the same listener model can reuse the config surface.
	pub broadcast_capacity: usize,
}

impl Default for ProviderConfig {
	fn default() -> Self {
		Self { broadcast_capacity: 256 }
	}
}

// vim: ts=4
