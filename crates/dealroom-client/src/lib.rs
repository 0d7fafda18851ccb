// Deal-room engine: thread synchronisation, optimistic messaging, the
// contract registry, co-signing and sale-request polling.

pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod pipeline;
pub mod poller;
pub mod registry;
pub mod room;
pub mod signing;
pub mod state;
pub mod sync;
pub mod threads;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use error::{ClientError, Result, ValidationError};
pub use events::{EventBus, RoomEvent};
pub use message::VisibleMessage;
pub use pipeline::MessagePipeline;
pub use poller::{sale_action, SaleAction, SaleRequestPoller};
pub use registry::{DocumentRegistry, Slot, SlotContent, SlotId};
pub use room::DealRoom;
pub use signing::SigningSession;
pub use state::ThreadView;
pub use sync::{SyncOutcome, ThreadSynchronizer};
pub use threads::{ThreadIndex, ThreadSummary};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// directives.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("dealroom_client=debug,dealroom_net=info,dealroom_media=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
