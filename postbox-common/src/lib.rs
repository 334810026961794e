pub mod logging;

pub use tracing;

/// Control signals broadcast to the long-lived workers.
///
/// `Shutdown` asks the dispatcher to stop accepting queue entries and drain
/// what it already holds. `Finalised` follows once draining is confirmed and
/// tells the error sink to close its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
