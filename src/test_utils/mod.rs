//! In-memory test doubles and stream assertions.

mod chain;
pub mod macros;

pub use chain::{MockChain, MockConnector, MockLink, MockSubmitter, added_at, log_at, tx_hash_at};
