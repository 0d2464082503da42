//! Blocking client for the newline-delimited JSON protocol.
//!
//! Useful for hosts that forward requests from another process, for
//! connection checks, and for exercising a running broker in tests.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// Errors reported by [`BrokerClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The address did not resolve.
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        /// Address as given.
        addr: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// No resolved address accepted the connection.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address as given.
        addr: String,
        /// Error from the last attempt.
        #[source]
        source: io::Error,
    },
    /// Reading or writing the socket failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// The broker closed the connection before answering.
    #[error("connection closed by broker")]
    Closed,
    /// The broker answered with something that is not JSON.
    #[error("invalid response from broker: {0}")]
    Decode(#[from] serde_json::Error),
    /// The broker answered with `{"error": ...}`.
    #[error("broker error: {message}")]
    Remote {
        /// Error text sent by the broker.
        message: String,
    },
}

/// One connection to a broker. Requests are answered strictly in order.
#[derive(Debug)]
pub struct BrokerClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl BrokerClient {
    /// Connects with `timeout` applied to the connect and to every read and
    /// write.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Resolve`] or [`ClientError::Connect`].
    pub fn connect(addr: impl ToSocketAddrs + ToString, timeout: Duration) -> Result<Self, ClientError> {
        let label = addr.to_string();
        let addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|source| ClientError::Resolve {
                addr: label.clone(),
                source,
            })?
            .collect();

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        for candidate in addrs {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => return Self::from_stream(stream, timeout),
                Err(error) => {
                    debug!(target: CLIENT_TARGET, addr = %candidate, %error, "connect attempt failed");
                    last_error = error;
                }
            }
        }
        Err(ClientError::Connect {
            addr: label,
            source: last_error,
        })
    }

    fn from_stream(stream: TcpStream, timeout: Duration) -> Result<Self, ClientError> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            writer: stream,
            reader,
        })
    }

    /// Changes the read and write timeout, e.g. before a long command.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the socket rejects the setting.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), ClientError> {
        self.writer.set_read_timeout(Some(timeout))?;
        self.writer.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    /// Sends one request and returns the decoded response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] when the broker reports an error, or a
    /// transport or decoding error.
    pub fn send(&mut self, request: &Value) -> Result<Value, ClientError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.send_raw(&line)?;
        let response = self.read_response()?;
        match response.get("error") {
            Some(error) => Err(ClientError::Remote {
                message: error
                    .as_str()
                    .map_or_else(|| error.to_string(), str::to_owned),
            }),
            None => Ok(response),
        }
    }

    /// Writes bytes as-is, without framing. Pair with
    /// [`BrokerClient::read_response`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] on write failure.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Reads and decodes the next response line, including error responses.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] at end of stream, or a transport or
    /// decoding error.
    pub fn read_response(&mut self) -> Result<Value, ClientError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Returns whether a broker accepts connections at `addr` within `timeout`.
pub fn probe(addr: SocketAddr, timeout: Duration) -> bool {
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(_) => true,
        Err(error) => {
            debug!(target: CLIENT_TARGET, %addr, %error, "probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use serde_json::json;

    use super::*;

    /// Answers each received line with the next canned response and hangs
    /// up once they run out.
    fn canned_server(responses: &'static [&'static str]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("test server address");
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept client");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut writer = stream;
            let mut pending = responses.iter();
            let mut line = String::new();
            while reader.read_line(&mut line).expect("read request") > 0 {
                line.clear();
                let Some(response) = pending.next() else {
                    return;
                };
                writer
                    .write_all(format!("{response}\n").as_bytes())
                    .expect("write response");
            }
        });
        addr
    }

    #[test]
    fn send_returns_success_and_surfaces_remote_errors() {
        let addr = canned_server(&[r#"{"value":"hi"}"#, r#"{"error":"Unknown command: x"}"#]);
        let mut client = BrokerClient::connect(addr, Duration::from_secs(2)).expect("connect");

        let response = client
            .send(&json!({"command": "echo", "value": "hi"}))
            .expect("echo succeeds");
        assert_eq!(response, json!({"value": "hi"}));

        let error = client
            .send(&json!({"command": "x"}))
            .expect_err("remote error");
        assert!(matches!(error, ClientError::Remote { ref message } if message == "Unknown command: x"));
    }

    #[test]
    fn closed_connection_is_reported() {
        let addr = canned_server(&[]);
        let mut client = BrokerClient::connect(addr, Duration::from_secs(2)).expect("connect");
        client.send_raw(b"{\"command\":\"echo\"}\n").expect("write");
        assert!(matches!(client.read_response(), Err(ClientError::Closed)));
    }

    #[test]
    fn probe_detects_listeners() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe target");
        let addr = listener.local_addr().expect("probe address");
        assert!(probe(addr, Duration::from_secs(1)));
        drop(listener);
        assert!(!probe(addr, Duration::from_millis(200)));
    }
}
