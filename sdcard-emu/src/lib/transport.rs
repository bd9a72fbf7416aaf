mod transport_interface;
mod transport_mmio;

pub use transport_interface::*;
pub use transport_mmio::*;

// In-memory queue for testing the dispatcher.
#[cfg(test)]
mod transport_mock;
#[cfg(test)]
pub use transport_mock::MockTransport;
