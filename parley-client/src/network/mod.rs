//! Network transports for the agent session

mod live;

pub use live::{DEFAULT_ENDPOINT, LiveTransport};
