//! Per-connection session loop.
//!
//! A session reads raw chunks, frames them into lines, and answers each line
//! with exactly one response before reading further, so responses on one
//! connection always come back in request order.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::queue::{CallError, CommandQueue};
use crate::transport::{ConnectionHandler, RunningFlag};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::framing::LineBuffer;
use super::request::Command;
use super::response::ResponseWriter;
use super::table::HandlerTable;

const READ_CHUNK: usize = 4096;

/// How long a blocked read waits before the session re-checks the listener's
/// running flag.
const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Per-session limits and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Default wait bound for owner-thread results; `None` waits forever.
    pub await_timeout: Option<Duration>,
    /// Largest partial line a session buffers.
    pub max_request_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            await_timeout: Some(Duration::from_millis(
                tether_config::DEFAULT_AWAIT_TIMEOUT_MS,
            )),
            max_request_bytes: tether_config::DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

/// Connection handler that serves newline-delimited JSON commands.
pub struct DispatchConnectionHandler<S> {
    table: HandlerTable<S>,
    queue: Arc<CommandQueue<S>>,
    options: SessionOptions,
}

impl<S> DispatchConnectionHandler<S> {
    /// Creates a handler that routes through `table` and runs work on the
    /// owner thread via `queue`.
    pub fn new(table: HandlerTable<S>, queue: Arc<CommandQueue<S>>, options: SessionOptions) -> Self {
        Self {
            table,
            queue,
            options,
        }
    }

    /// Options applied to every session.
    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Decodes, routes, and executes one request line.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] to report to the client.
    pub fn dispatch(&self, line: &[u8]) -> Result<Value, DispatchError> {
        let command = Command::parse(line)?;
        let entry = self.table.resolve(command.name())?;
        let timeout = entry.await_timeout().or(self.options.await_timeout);
        debug!(target: DISPATCH_TARGET, command = command.name(), "dispatching command");

        let call = panic::catch_unwind(AssertUnwindSafe(|| entry.handler().prepare(command)))
            .map_err(|_| {
                DispatchError::from(CallError::Panicked {
                    message: String::from("handler panicked while preparing the command"),
                })
            })??;
        Ok(self.queue.call(call, timeout)?)
    }

    /// Serves one stream until the peer closes it, a transport error occurs,
    /// or `running` is cleared while the session is idle.
    pub fn serve<T>(&self, stream: T, running: RunningFlag)
    where
        T: Read + Write,
    {
        ClientSession {
            handler: self,
            stream,
            running,
            lines: LineBuffer::default(),
        }
        .run();
    }
}

impl<S: 'static> ConnectionHandler for DispatchConnectionHandler<S> {
    fn handle(&self, stream: TcpStream, running: RunningFlag) {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| String::from("unknown"));
        if let Err(error) = stream.set_read_timeout(Some(SESSION_POLL_INTERVAL)) {
            warn!(target: DISPATCH_TARGET, %peer, %error, "failed to set session read timeout");
        }
        self.serve(&stream, running);
        debug!(target: DISPATCH_TARGET, %peer, "session closed");
    }
}

struct ClientSession<'a, S, T> {
    handler: &'a DispatchConnectionHandler<S>,
    stream: T,
    running: RunningFlag,
    lines: LineBuffer,
}

impl<S, T> ClientSession<'_, S, T>
where
    T: Read + Write,
{
    fn run(mut self) {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            while let Some(line) = self.lines.next_line() {
                if !self.within_limit(line.len()) || !self.respond(&line) {
                    return;
                }
            }

            if !self.within_limit(self.lines.pending_len()) {
                return;
            }

            if !self.running.is_set() {
                debug!(target: DISPATCH_TARGET, "listener stopped; ending idle session");
                return;
            }

            match read_with_retry(&mut self.stream, &mut chunk) {
                Ok(0) => {
                    if let Some(rest) = self.lines.take_remainder()
                        && self.within_limit(rest.len())
                    {
                        self.respond(&rest);
                    }
                    debug!(target: DISPATCH_TARGET, "peer closed connection");
                    return;
                }
                Ok(read) => self.lines.extend(chunk.get(..read).unwrap_or_default()),
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(error) => {
                    debug!(target: DISPATCH_TARGET, %error, "session read failed");
                    return;
                }
            }
        }
    }

    /// Rejects a line, complete or partial, longer than the configured bound.
    /// Returns `false` after answering with the error.
    fn within_limit(&mut self, size: usize) -> bool {
        let max_size = self.handler.options.max_request_bytes;
        if size <= max_size {
            return true;
        }
        let error = DispatchError::request_too_large(size, max_size);
        warn!(target: DISPATCH_TARGET, %error, "closing session");
        self.report(&error);
        false
    }

    /// Answers one line. Returns `false` once the session must end.
    fn respond(&mut self, line: &[u8]) -> bool {
        if line.trim_ascii().is_empty() {
            return true;
        }
        match self.handler.dispatch(line) {
            Ok(value) => {
                let mut writer = ResponseWriter::new(&mut self.stream);
                match writer.write_value(value) {
                    Ok(()) => true,
                    Err(error) => {
                        debug!(target: DISPATCH_TARGET, %error, "failed to write response");
                        false
                    }
                }
            }
            Err(error) => {
                debug!(target: DISPATCH_TARGET, %error, "request failed");
                self.report(&error)
            }
        }
    }

    fn report(&mut self, error: &DispatchError) -> bool {
        let mut writer = ResponseWriter::new(&mut self.stream);
        if let Err(write_error) = writer.write_error(error) {
            debug!(target: DISPATCH_TARGET, error = %write_error, "failed to write error response");
            return false;
        }
        !error.is_fatal()
    }
}

fn read_with_retry<T: Read>(stream: &mut T, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};

    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::queue::{NoopWaker, OwnerThreadPump, owner_call};

    /// In-memory stream that replays scripted reads and records writes.
    struct ScriptedStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
    }

    impl ScriptedStream {
        fn with_reads(chunks: &[&[u8]]) -> Self {
            Self {
                reads: chunks.iter().map(|chunk| Ok(chunk.to_vec())).collect(),
                written: Vec::new(),
            }
        }

        fn responses(&self) -> Vec<Value> {
            String::from_utf8(self.written.clone())
                .expect("utf8 output")
                .lines()
                .map(|line| serde_json::from_str(line).expect("response is json"))
                .collect()
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(chunk)) => {
                    let len = chunk.len().min(buf.len());
                    buf[..len].copy_from_slice(&chunk[..len]);
                    Ok(len)
                }
                Some(Err(error)) => Err(error),
                None => Ok(0),
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Pumps a counter on a background owner thread until dropped.
    struct Owner {
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<i64>>,
    }

    impl Owner {
        fn spawn(queue: Arc<CommandQueue<i64>>) -> Self {
            let stop = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            let thread = thread::spawn(move || {
                let pump = OwnerThreadPump::new(queue);
                let mut counter = 0;
                while !flag.load(Ordering::SeqCst) {
                    pump.pump(&mut counter);
                    thread::sleep(Duration::from_millis(1));
                }
                counter
            });
            Self {
                stop,
                thread: Some(thread),
            }
        }

        fn finish(mut self) -> i64 {
            self.stop.store(true, Ordering::SeqCst);
            self.thread
                .take()
                .expect("owner thread")
                .join()
                .expect("join owner")
        }
    }

    impl Drop for Owner {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    fn table() -> HandlerTable<i64> {
        HandlerTable::new()
            .with("echo", |command: Command| {
                let value = command.field("value").cloned().unwrap_or(Value::Null);
                Ok(owner_call(move |_: &mut i64| Ok(json!({ "value": value }))))
            })
            .with("increment", |_command: Command| {
                Ok(owner_call(|counter: &mut i64| {
                    *counter += 1;
                    Ok(json!(*counter))
                }))
            })
            .with("fail", |_command: Command| {
                Ok(owner_call(|_: &mut i64| Err(CallError::failed("owner refused"))))
            })
            .with("explode", |_command: Command| {
                Ok(owner_call(|_: &mut i64| panic!("kaboom")))
            })
    }

    struct Harness {
        handler: DispatchConnectionHandler<i64>,
        owner: Owner,
    }

    #[fixture]
    fn harness() -> Harness {
        let queue = Arc::new(CommandQueue::new(Arc::new(NoopWaker)));
        let owner = Owner::spawn(Arc::clone(&queue));
        let options = SessionOptions {
            await_timeout: Some(Duration::from_secs(5)),
            max_request_bytes: 64,
        };
        Harness {
            handler: DispatchConnectionHandler::new(table(), queue, options),
            owner,
        }
    }

    fn run(harness: &Harness, stream: &mut ScriptedStream) {
        harness.handler.serve(stream, RunningFlag::raised());
    }

    #[rstest]
    fn echo_round_trip(harness: Harness) {
        let mut stream = ScriptedStream::with_reads(&[b"{\"command\":\"echo\",\"value\":\"hi\"}\n"]);
        run(&harness, &mut stream);
        assert_eq!(stream.responses(), [json!({"value": "hi"})]);
    }

    #[rstest]
    fn line_split_across_reads_gets_one_response(harness: Harness) {
        let mut stream = ScriptedStream::with_reads(&[b"{\"command\":\"e", b"cho\"}\n"]);
        run(&harness, &mut stream);
        assert_eq!(stream.responses(), [json!({"value": null})]);
    }

    #[rstest]
    fn several_lines_in_one_read_answer_in_order(harness: Harness) {
        let mut stream = ScriptedStream::with_reads(&[
            b"{\"command\":\"increment\"}\n{\"command\":\"increment\"}\n{\"command\":\"incr",
            b"ement\"}\n",
        ]);
        run(&harness, &mut stream);
        assert_eq!(
            stream.responses(),
            [json!({"result": 1}), json!({"result": 2}), json!({"result": 3})]
        );
        assert_eq!(harness.owner.finish(), 3);
    }

    #[rstest]
    fn malformed_line_does_not_end_the_session(harness: Harness) {
        let mut stream = ScriptedStream::with_reads(&[
            b"this is not json\n",
            b"{\"command\":\"echo\",\"value\":1}\n",
        ]);
        run(&harness, &mut stream);
        assert_eq!(
            stream.responses(),
            [json!({"error": "Invalid JSON"}), json!({"value": 1})]
        );
    }

    #[rstest]
    #[case(b"{\"command\":\"warp\"}\n".as_slice(), "Unknown command: warp")]
    #[case(b"{\"command\":\"fail\"}\n".as_slice(), "owner refused")]
    #[case(b"{\"value\":1}\n".as_slice(), "Invalid command: missing command field")]
    fn failures_become_error_responses(
        harness: Harness,
        #[case] request: &[u8],
        #[case] expected: &str,
    ) {
        let mut stream =
            ScriptedStream::with_reads(&[request, b"{\"command\":\"echo\",\"value\":2}\n"]);
        run(&harness, &mut stream);
        assert_eq!(
            stream.responses(),
            [json!({"error": expected}), json!({"value": 2})]
        );
    }

    #[rstest]
    fn owner_panic_is_reported_and_session_continues(harness: Harness) {
        let mut stream = ScriptedStream::with_reads(&[
            b"{\"command\":\"explode\"}\n",
            b"{\"command\":\"increment\"}\n",
        ]);
        run(&harness, &mut stream);
        let responses = stream.responses();
        assert_eq!(responses.len(), 2);
        let message = responses[0]["error"].as_str().expect("error text");
        assert!(message.contains("kaboom"), "got {message}");
        assert_eq!(responses[1], json!({"result": 1}));
    }

    #[rstest]
    fn blank_lines_and_crlf_are_tolerated(harness: Harness) {
        let mut stream =
            ScriptedStream::with_reads(&[b"\n  \r\n{\"command\":\"echo\",\"value\":3}\r\n"]);
        run(&harness, &mut stream);
        assert_eq!(stream.responses(), [json!({"value": 3})]);
    }

    #[rstest]
    fn trailing_line_without_newline_is_served_at_eof(harness: Harness) {
        let mut stream = ScriptedStream::with_reads(&[b"{\"command\":\"echo\",\"value\":4}"]);
        run(&harness, &mut stream);
        assert_eq!(stream.responses(), [json!({"value": 4})]);
    }

    #[rstest]
    fn oversized_request_closes_the_session(harness: Harness) {
        let oversized = vec![b'x'; 100];
        let mut stream = ScriptedStream::with_reads(&[
            oversized.as_slice(),
            b"\n{\"command\":\"echo\",\"value\":5}\n",
        ]);
        run(&harness, &mut stream);
        let responses = stream.responses();
        assert_eq!(responses.len(), 1);
        let message = responses[0]["error"].as_str().expect("error text");
        assert!(message.starts_with("Request too large"), "got {message}");
    }

    #[rstest]
    fn oversized_line_arriving_whole_is_rejected(harness: Harness) {
        let request = format!(
            "{}\n{}\n",
            json!({"command": "echo", "value": "x".repeat(200)}),
            json!({"command": "echo", "value": 9})
        );
        let mut stream = ScriptedStream::with_reads(&[request.as_bytes()]);
        run(&harness, &mut stream);
        let responses = stream.responses();
        assert_eq!(responses.len(), 1, "session closes after the rejection");
        let message = responses[0]["error"].as_str().expect("error text");
        assert!(message.starts_with("Request too large"), "got {message}");
    }

    #[rstest]
    fn oversized_tail_at_eof_is_rejected(harness: Harness) {
        let request = json!({"command": "echo", "value": "y".repeat(200)}).to_string();
        let mut stream = ScriptedStream::with_reads(&[request.as_bytes()]);
        run(&harness, &mut stream);
        let responses = stream.responses();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].get("value").is_none(), "oversized tail was served");
    }

    #[rstest]
    fn read_errors_end_the_session_quietly(harness: Harness) {
        let mut stream = ScriptedStream {
            reads: VecDeque::from([
                Ok(b"{\"command\":\"echo\",\"value\":6}\n".to_vec()),
                Err(io::Error::from(io::ErrorKind::ConnectionReset)),
                Ok(b"{\"command\":\"echo\",\"value\":7}\n".to_vec()),
            ]),
            written: Vec::new(),
        };
        run(&harness, &mut stream);
        assert_eq!(stream.responses(), [json!({"value": 6})]);
    }

    #[rstest]
    fn timed_out_reads_keep_the_partial_line(harness: Harness) {
        let mut stream = ScriptedStream {
            reads: VecDeque::from([
                Ok(b"{\"command\":\"ec".to_vec()),
                Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Ok(b"ho\",\"value\":8}\n".to_vec()),
            ]),
            written: Vec::new(),
        };
        run(&harness, &mut stream);
        assert_eq!(stream.responses(), [json!({"value": 8})]);
    }

    #[rstest]
    fn cleared_running_flag_ends_an_idle_session(harness: Harness) {
        let running = RunningFlag::raised();
        running.clear();
        let mut stream = ScriptedStream::with_reads(&[b"{\"command\":\"echo\"}\n"]);
        harness.handler.serve(&mut stream, running);
        assert!(stream.written.is_empty());
    }

    #[test]
    fn unpumped_calls_time_out() {
        let queue = Arc::new(CommandQueue::new(Arc::new(NoopWaker)));
        let options = SessionOptions {
            await_timeout: Some(Duration::from_millis(20)),
            ..SessionOptions::default()
        };
        let handler = DispatchConnectionHandler::new(table(), queue, options);
        let error = handler
            .dispatch(br#"{"command":"increment"}"#)
            .expect_err("nobody pumps");
        assert!(matches!(
            error,
            DispatchError::Execution(CallError::TimedOut { .. })
        ));
    }
}
