//! Demultiplexers routing agent responses back to their registrants.
//!
//! The builder registers a decoder per `Post`, a reader per notification
//! id and a callback per fence while the payload is assembled; `build()`
//! packages them into the three handlers here, which the session then
//! feeds from the wire.

use crate::error::{ReplayError, SessionError};

use std::collections::HashMap;

use tracing::warn;

/// Notification id carrying replay issues reported by the agent.
pub const ISSUES_NOTIFICATION_ID: u32 = 0;

/// Notification id carrying replay progress records.
pub const REPLAY_PROGRESS_NOTIFICATION_ID: u32 = 1;

/// First notification id handed out to user readers.
pub const FIRST_USER_NOTIFICATION_ID: u32 = 2;

/// Consumes one post-back: `Ok` with the piece bytes, or `Err` when the
/// command reverted, the payload was exported, or the pass died.
pub type PostbackDecoder = Box<dyn FnMut(Result<&[u8], &ReplayError>) + Send>;

/// Consumes the records of one notification stream.
pub type NotificationReader = Box<dyn FnMut(Result<&[u8], &ReplayError>) + Send>;

/// Invoked every time the agent reaches the registered fence.
pub type FenceCallback = Box<dyn FnMut(Result<(), &ReplayError>) + Send>;

pub(crate) struct Postback {
    pub(crate) size: u32,
    pub(crate) decoder: PostbackDecoder,
}

/// Routes post-back pieces to decoders in registration order.
pub struct PostbackHandler {
    decoders: Vec<Postback>,
    poisoned: bool,
}

impl PostbackHandler {
    pub(crate) fn new(decoders: Vec<Postback>) -> Self {
        Self {
            decoders,
            poisoned: false,
        }
    }

    /// Number of registered decoders.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Whether no decoders were registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Dispatch one piece to the decoder at `index`.
    ///
    /// A size mismatch is surfaced to that decoder alone, but poisons
    /// the stream: every later piece is answered with
    /// [`SessionError::PoisonedPostbacks`] instead of data.
    pub fn dispatch(&mut self, index: usize, data: &[u8]) -> Result<(), SessionError> {
        if index >= self.decoders.len() {
            return Err(SessionError::UnknownDecoder(index));
        }
        if self.poisoned {
            let err = ReplayError::Session(SessionError::PoisonedPostbacks);
            (self.decoders[index].decoder)(Err(&err));
            return Ok(());
        }
        let expected = self.decoders[index].size as u64;
        if data.len() as u64 != expected {
            self.poisoned = true;
            let err = ReplayError::Session(SessionError::PostbackSizeMismatch {
                index,
                expected,
                actual: data.len() as u64,
            });
            (self.decoders[index].decoder)(Err(&err));
            return Ok(());
        }
        (self.decoders[index].decoder)(Ok(data));
        Ok(())
    }

    /// Feed `err` to every decoder; used on transport failure and on
    /// export.
    pub fn fail_all(&mut self, err: &ReplayError) {
        for p in &mut self.decoders {
            (p.decoder)(Err(err));
        }
        self.decoders.clear();
    }
}

/// Routes notification records to readers by id.
pub struct NotificationHandler {
    readers: HashMap<u32, NotificationReader>,
}

impl NotificationHandler {
    pub(crate) fn new(readers: HashMap<u32, NotificationReader>) -> Self {
        Self { readers }
    }

    /// Dispatch one record. Unknown ids are logged and dropped.
    pub fn dispatch(&mut self, id: u32, data: &[u8]) {
        match self.readers.get_mut(&id) {
            Some(reader) => reader(Ok(data)),
            None => warn!(id, "dropping notification with no registered reader"),
        }
    }

    /// Feed `err` to every reader.
    pub fn fail_all(&mut self, err: &ReplayError) {
        for reader in self.readers.values_mut() {
            reader(Err(err));
        }
        self.readers.clear();
    }
}

/// Routes fence-ready signals to callbacks by fence id.
pub struct FenceHandler {
    fences: HashMap<u32, FenceCallback>,
}

impl FenceHandler {
    pub(crate) fn new(fences: HashMap<u32, FenceCallback>) -> Self {
        Self { fences }
    }

    /// Dispatch one fence-ready signal. Unknown ids are logged and
    /// dropped.
    pub fn dispatch(&mut self, id: u32) {
        match self.fences.get_mut(&id) {
            Some(cb) => cb(Ok(())),
            None => warn!(id, "dropping fence-ready with no registered callback"),
        }
    }

    /// Feed `err` to every callback.
    pub fn fail_all(&mut self, err: &ReplayError) {
        for cb in self.fences.values_mut() {
            cb(Err(err));
        }
        self.fences.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    fn recording_decoder(log: Arc<Mutex<Vec<Result<Vec<u8>, String>>>>) -> PostbackDecoder {
        Box::new(move |r| {
            log.lock().unwrap().push(match r {
                Ok(b) => Ok(b.to_vec()),
                Err(e) => Err(e.to_string()),
            });
        })
    }

    #[test]
    fn size_mismatch_poisons_later_decoders() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut h = PostbackHandler::new(vec![
            Postback {
                size: 4,
                decoder: recording_decoder(log.clone()),
            },
            Postback {
                size: 2,
                decoder: recording_decoder(log.clone()),
            },
        ]);
        h.dispatch(0, &[1, 2, 3]).unwrap();
        h.dispatch(1, &[1, 2]).unwrap();
        let log = log.lock().unwrap();
        assert!(log[0].as_ref().unwrap_err().contains("3 bytes"));
        assert!(log[1].as_ref().unwrap_err().contains("poisoned"));
    }

    #[test]
    fn matching_sizes_deliver_data() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut h = PostbackHandler::new(vec![Postback {
            size: 2,
            decoder: recording_decoder(log.clone()),
        }]);
        h.dispatch(0, &[7, 8]).unwrap();
        assert_eq!(log.lock().unwrap()[0], Ok(vec![7, 8]));
    }

    #[test]
    fn unknown_decoder_index_is_an_error() {
        let mut h = PostbackHandler::new(Vec::new());
        assert!(matches!(
            h.dispatch(0, &[]),
            Err(SessionError::UnknownDecoder(0))
        ));
    }
}
