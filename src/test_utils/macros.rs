/// Asserts that the next stream item is an event at the given position and evaluates to it.
///
/// The position can be a [`Position`](crate::Position) or a `(block, tx, log)` tuple. Waits at
/// most 5 seconds unless `timeout = N` is given.
///
/// # Examples
///
/// ```no_run
/// # use event_ingestor::assert_next_event;
/// # async fn example(mut stream: tokio_stream::wrappers::ReceiverStream<event_ingestor::IngestorResult>) {
/// let event = assert_next_event!(stream, (100, 0, 0));
/// assert_eq!(event.name, "Added");
/// # }
/// ```
#[macro_export]
macro_rules! assert_next_event {
    ($stream: expr, $position: expr) => {
        $crate::assert_next_event!($stream, $position, timeout = 5)
    };
    ($stream: expr, $position: expr, timeout = $secs: expr) => {{
        let expected: $crate::Position = ::std::convert::Into::into($position);
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for event at {expected}"));
        match message {
            std::option::Option::Some(std::result::Result::Ok($crate::Message::Event(event))) => {
                assert_eq!(event.position, expected, "Expected event at {expected}, got {event:?}");
                event
            }
            std::option::Option::Some(std::result::Result::Ok(other)) => {
                panic!("Expected event at {expected}, got {other:?}")
            }
            std::option::Option::Some(std::result::Result::Err(e)) => {
                panic!("Expected event at {expected}, got Err({e:?})")
            }
            std::option::Option::None => {
                panic!("Expected event at {expected}, but channel was closed")
            }
        }
    }};
}

/// Asserts that the next stream item is the given [`Notification`](crate::Notification).
#[macro_export]
macro_rules! assert_next_notification {
    ($stream: expr, $notification: expr) => {
        $crate::assert_next_notification!($stream, $notification, timeout = 5)
    };
    ($stream: expr, $notification: expr, timeout = $secs: expr) => {
        let expected: $crate::Notification = $notification;
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"));
        match message {
            std::option::Option::Some(std::result::Result::Ok(msg)) => {
                assert_eq!(msg, expected, "Expected {expected:?}, got {msg:?}");
            }
            std::option::Option::Some(std::result::Result::Err(e)) => {
                panic!("Expected {expected:?}, got Err({e:?})");
            }
            std::option::Option::None => {
                panic!("Expected {expected:?}, but channel was closed");
            }
        }
    };
}

/// Asserts that the next stream item is an error of the same kind as the given one.
#[macro_export]
macro_rules! assert_next_error {
    ($stream: expr, $expected_err: expr) => {
        $crate::assert_next_error!($stream, $expected_err, timeout = 5)
    };
    ($stream: expr, $expected_err: expr, timeout = $secs: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        let expected: $crate::IngestError = $expected_err;
        match message {
            std::option::Option::Some(msg) => {
                assert_eq!(msg, expected, "Expected error {expected:?}, got {msg:?}");
            }
            std::option::Option::None => {
                panic!("Expected error {expected:?}, but channel was closed");
            }
        }
    };
}

#[macro_export]
macro_rules! assert_closed {
    ($stream: expr) => {
        $crate::assert_closed!($stream, timeout = 5)
    };
    ($stream: expr, timeout = $secs: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        assert!(message.is_none(), "Expected closed stream, got {message:?}")
    };
}

/// Asserts that nothing is buffered on a `ReceiverStream` and hands the stream back.
#[macro_export]
macro_rules! assert_empty {
    ($stream: expr) => {{
        let inner = $stream.into_inner();
        assert!(inner.is_empty(), "Stream should have no pending messages");
        tokio_stream::wrappers::ReceiverStream::new(inner)
    }};
}
