use alloy::{dyn_abi::DynSolValue, primitives::B256, sol_types::SolEvent};
use thiserror::Error;

use crate::{RawLogEntry, contract::ISampleCounter};

/// A log turned into an event name and its arguments, in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedLog {
    pub name: String,
    pub args: Vec<DynSolValue>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopic,

    #[error("unknown event signature {0}")]
    UnknownEvent(B256),

    #[error("ABI decoding failed: {0}")]
    Abi(String),
}

/// Turns raw logs into named events. Called once per newly observed position.
pub trait LogDecoder: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the log does not match any known event.
    fn decode(&self, entry: &RawLogEntry) -> Result<DecodedLog, DecodeError>;
}

impl<F> LogDecoder for F
where
    F: Fn(&RawLogEntry) -> Result<DecodedLog, DecodeError> + Send + Sync + 'static,
{
    fn decode(&self, entry: &RawLogEntry) -> Result<DecodedLog, DecodeError> {
        self(entry)
    }
}

/// Decoder for the `Added` and `Subtracted` events of [`ISampleCounter`].
#[derive(Copy, Clone, Debug, Default)]
pub struct SampleCounterDecoder;

impl LogDecoder for SampleCounterDecoder {
    fn decode(&self, entry: &RawLogEntry) -> Result<DecodedLog, DecodeError> {
        let log = entry.log();
        let signature = *log.inner.data.topics().first().ok_or(DecodeError::MissingTopic)?;

        let (name, amount, total) = if signature == ISampleCounter::Added::SIGNATURE_HASH {
            let event = log
                .log_decode::<ISampleCounter::Added>()
                .map_err(|e| DecodeError::Abi(e.to_string()))?
                .inner
                .data;
            ("Added", event.amount, event.total)
        } else if signature == ISampleCounter::Subtracted::SIGNATURE_HASH {
            let event = log
                .log_decode::<ISampleCounter::Subtracted>()
                .map_err(|e| DecodeError::Abi(e.to_string()))?
                .inner
                .data;
            ("Subtracted", event.amount, event.total)
        } else {
            return Err(DecodeError::UnknownEvent(signature));
        };

        Ok(DecodedLog {
            name: name.to_owned(),
            args: vec![DynSolValue::Uint(amount, 256), DynSolValue::Uint(total, 256)],
        })
    }
}
