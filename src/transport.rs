//! Transport abstraction for relay clients.
//!
//! The [`Transport`] trait is a bidirectional channel of JSON text messages
//! between a client and the relay. Framing is the implementation's business:
//! [`WebSocketTransport`](crate::transports::WebSocketTransport) maps one
//! message to one text frame.
//!
//! Connection setup is not part of the trait. Construct a connected transport
//! first, then pass it to `RelayClient::start`.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use watch_party_relay::error::RelayError;
//! use watch_party_relay::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RelayError> {
//!         // Send the JSON text message
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RelayError>> {
//!         // Receive the next JSON text message; None once closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RelayError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::RelayError;

/// A bidirectional text message transport to the relay.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message
/// and each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the client loop polls it
/// inside `tokio::select!`, and a cancelled call must not lose a message.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), RelayError>;

    /// Receive the next JSON text message from the relay.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the relay closed the connection cleanly
    async fn recv(&mut self) -> Option<Result<String, RelayError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Resources are released
    /// either way.
    async fn close(&mut self) -> Result<(), RelayError>;
}
