//! ICY stream connection
//!
//! Opens a TCP connection to an Icecast/Shoutcast server, asks for
//! interleaved metadata and runs an [`IcySession`] on a background thread,
//! reporting every decoded title to the caller.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, trace, warn};

use crate::config::network::{
    CONNECT_TIMEOUT_SECS, DEFAULT_PORT, READ_CHUNK_SIZE, READ_TIMEOUT_SECS, USER_AGENT,
};
use crate::config::protocol::META_REQUEST_HEADER;
use crate::error::{IcyError, Result};
use crate::stream::metadata::StreamMetadata;
use crate::stream::session::{CallbackResult, IcySession, SessionState, SharedSessionState};

/// Line terminator used in the outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    #[default]
    Crlf,
    /// Bare `\n`, accepted by most Icecast and Shoutcast servers
    Lf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Crlf => "\r\n",
            LineEnding::Lf => "\n",
        }
    }
}

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// `None` waits as long as the OS allows
    pub connect_timeout: Option<Duration>,
    /// Idle read timeout; `None` blocks indefinitely
    pub read_timeout: Option<Duration>,
    pub line_ending: LineEnding,
    /// Extra `User-Agent` request line; not sent when `None`
    pub user_agent: Option<String>,
    pub read_chunk_size: usize,
    /// Skip titles equal to the previously delivered one
    pub dedupe_titles: bool,
}

impl StreamOptions {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            connect_timeout: Some(Duration::from_secs(CONNECT_TIMEOUT_SECS)),
            read_timeout: Some(Duration::from_secs(READ_TIMEOUT_SECS)),
            line_ending: LineEnding::default(),
            user_agent: None,
            read_chunk_size: READ_CHUNK_SIZE,
            dedupe_titles: false,
        }
    }

    /// Build options from an `http://host[:port]/path[?query]` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url).map_err(|e| IcyError::InvalidUrl(format!("{url}: {e}")))?;

        if parsed.scheme() != "http" && parsed.scheme() != "icy" {
            return Err(IcyError::InvalidUrl(format!(
                "{url}: unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| IcyError::InvalidUrl(format!("{url}: missing host")))?;
        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self::new(host, port, path))
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    /// Send a `User-Agent` line; `None` selects the crate's default agent.
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = Some(user_agent.unwrap_or(USER_AGENT).to_string());
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_dedupe_titles(mut self, dedupe: bool) -> Self {
        self.dedupe_titles = dedupe;
        self
    }

    /// Request bytes sent right after connecting.
    ///
    /// Fails when the path contains whitespace or control characters, or the
    /// user agent contains control characters; either would break the
    /// request framing.
    pub fn request(&self) -> Result<Vec<u8>> {
        let eol = self.line_ending.as_str();
        let path = if self.path.is_empty() { "/" } else { &self.path };
        if path.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IcyError::InvalidUrl(format!("invalid request path {path:?}")));
        }

        let mut request = format!("GET {path} HTTP/1.0{eol}{META_REQUEST_HEADER}:1{eol}");
        if let Some(agent) = &self.user_agent {
            if agent.chars().any(char::is_control) {
                return Err(IcyError::InvalidHeader {
                    name: "User-Agent".to_string(),
                    value: agent.clone(),
                });
            }
            request.push_str(&format!("User-Agent:{agent}{eol}"));
        }
        request.push_str(eol);
        Ok(request.into_bytes())
    }
}

/// A running ICY stream.
///
/// Titles are reported on a background thread named `icy-session`. The
/// session ends on [`close`](Self::close), on drop, or on the first fatal
/// error; it is never restarted.
pub struct IcyStream {
    socket: TcpStream,
    stop_flag: Arc<AtomicBool>,
    state: SharedSessionState,
    handle: Option<JoinHandle<Result<()>>>,
}

impl IcyStream {
    /// Connect, send the request and start streaming.
    ///
    /// `on_track_change` is called with each title decoded from a non-empty
    /// metadata frame. Returning an error from it ends the session.
    pub fn open<F>(options: StreamOptions, on_track_change: F) -> Result<Self>
    where
        F: FnMut(&str) -> CallbackResult + Send + 'static,
    {
        let request = options.request()?;
        let mut socket = connect(&options)?;
        trace!(host = %options.host, port = options.port, "Socket connected");

        socket.set_read_timeout(options.read_timeout)?;
        socket.write_all(&request)?;
        socket.flush()?;
        debug!(path = %options.path, "Metadata request sent");

        let reader = socket.try_clone()?;
        let session = IcySession::with_chunk_size(reader, options.read_chunk_size)
            .with_dedupe_titles(options.dedupe_titles);
        let state = session.shared_state();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let handle = thread::Builder::new()
            .name("icy-session".to_string())
            .spawn(move || run_session(session, &stop_clone, on_track_change))
            .map_err(IcyError::Spawn)?;

        Ok(Self {
            socket,
            stop_flag,
            state,
            handle: Some(handle),
        })
    }

    /// Open a stream that publishes parsed titles on a channel.
    ///
    /// The channel disconnects when the session ends.
    pub fn open_channel(options: StreamOptions) -> Result<(Self, Receiver<StreamMetadata>)> {
        let (metadata_tx, metadata_rx) = crossbeam_channel::unbounded::<StreamMetadata>();

        let stream = Self::open(options, move |title| {
            metadata_tx
                .send(StreamMetadata::from_icy_title(title))
                .map_err(|_| "metadata receiver dropped".into())
        })?;

        Ok((stream, metadata_rx))
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// True once the background session has ended
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the session ends on its own and return its outcome.
    pub fn wait(mut self) -> Result<()> {
        self.join()
    }

    /// Tear down the connection and wait for the session thread to exit.
    ///
    /// Once this returns the callback will not be invoked again. A fatal
    /// error that ended the session before the close request is returned.
    pub fn close(mut self) -> Result<()> {
        self.request_stop();
        self.join()
    }

    fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        trace!("Closing socket");
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            // Already disconnected by the peer
            trace!(error = %e, "Socket shutdown failed");
        }
    }

    fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(IcyError::Callback("session thread panicked".into()))),
            None => Ok(()),
        }
    }
}

impl Drop for IcyStream {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
        }
    }
}

fn connect(options: &StreamOptions) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (options.host.as_str(), options.port)
        .to_socket_addrs()?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let attempt = match options.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                debug!(%addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(IcyError::Connection(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address found for {}", options.host),
        )
    })))
}

fn run_session<F>(
    mut session: IcySession<TcpStream>,
    stop_flag: &AtomicBool,
    on_track_change: F,
) -> Result<()>
where
    F: FnMut(&str) -> CallbackResult,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| session.run(stop_flag, on_track_change)))
        .unwrap_or_else(|_| Err(IcyError::Callback("track change callback panicked".into())));
    session.close();

    match result {
        // Errors caused by our own shutdown are a normal close
        Err(_) if stop_flag.load(Ordering::SeqCst) => Ok(()),
        Err(e) => {
            warn!(error = %e, "ICY session ended");
            Err(e)
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::time::Instant;

    use rstest::rstest;

    use super::*;
    use crate::stream::metadata::encode_title_frame;

    // --- StreamOptions ---

    #[test]
    fn request_uses_crlf_by_default() {
        let options = StreamOptions::new("radio.example", 8000, "/live");
        assert_eq!(
            options.request().unwrap(),
            b"GET /live HTTP/1.0\r\nIcy-MetaData:1\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn request_with_bare_newlines() {
        let options =
            StreamOptions::new("radio.example", 8000, "/live").with_line_ending(LineEnding::Lf);
        assert_eq!(
            options.request().unwrap(),
            b"GET /live HTTP/1.0\nIcy-MetaData:1\n\n".to_vec()
        );
    }

    #[test]
    fn request_with_user_agent() {
        let options = StreamOptions::new("radio.example", 80, "").with_user_agent(Some("Test/1.0"));
        assert_eq!(
            options.request().unwrap(),
            b"GET / HTTP/1.0\r\nIcy-MetaData:1\r\nUser-Agent:Test/1.0\r\n\r\n".to_vec()
        );

        let default_agent = StreamOptions::new("radio.example", 80, "/").with_user_agent(None);
        assert_eq!(default_agent.user_agent.as_deref(), Some(USER_AGENT));
    }

    #[rstest]
    #[case::crlf_injection("/live\r\nX-Injected: 1")]
    #[case::bare_newline("/live\nX-Injected: 1")]
    #[case::space("/live HTTP/1.1")]
    #[case::nul("/live\0")]
    fn request_rejects_unsafe_path(#[case] path: &str) {
        let options = StreamOptions::new("radio.example", 80, path);
        assert!(matches!(options.request(), Err(IcyError::InvalidUrl(_))));
    }

    #[test]
    fn request_rejects_control_characters_in_user_agent() {
        let options =
            StreamOptions::new("radio.example", 80, "/").with_user_agent(Some("Test\r\nX-Injected: 1"));
        assert!(matches!(
            options.request(),
            Err(IcyError::InvalidHeader { name, .. }) if name == "User-Agent"
        ));
    }

    #[test]
    fn unsafe_path_fails_before_connecting() {
        // Nothing listens here; the request is rejected before any connect attempt
        let options = StreamOptions::new("127.0.0.1", 9, "/a\r\nb")
            .with_connect_timeout(Some(Duration::from_millis(100)));
        assert!(matches!(
            IcyStream::open(options, |_| Ok(())),
            Err(IcyError::InvalidUrl(_))
        ));
    }

    #[rstest]
    #[case::full("http://radio.example:8000/live", "radio.example", 8000, "/live")]
    #[case::default_port("http://radio.example/stream.mp3", "radio.example", 80, "/stream.mp3")]
    #[case::root("http://radio.example", "radio.example", 80, "/")]
    #[case::query("http://radio.example:8080/;?type=http", "radio.example", 8080, "/;?type=http")]
    #[case::icy_scheme("icy://10.0.0.5:8000/", "10.0.0.5", 8000, "/")]
    fn options_from_url(
        #[case] url: &str,
        #[case] host: &str,
        #[case] port: u16,
        #[case] path: &str,
    ) {
        let options = StreamOptions::from_url(url).unwrap();
        assert_eq!(options.host, host);
        assert_eq!(options.port, port);
        assert_eq!(options.path, path);
    }

    #[rstest]
    #[case::not_a_url("not a url")]
    #[case::https("https://radio.example/live")]
    #[case::ftp("ftp://radio.example/live")]
    fn options_from_bad_url(#[case] url: &str) {
        assert!(matches!(StreamOptions::from_url(url), Err(IcyError::InvalidUrl(_))));
    }

    #[test]
    fn options_defaults() {
        let options = StreamOptions::new("h", 1, "/");
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(CONNECT_TIMEOUT_SECS)));
        assert_eq!(options.read_timeout, Some(Duration::from_secs(READ_TIMEOUT_SECS)));
        assert_eq!(options.line_ending, LineEnding::Crlf);
        assert!(!options.dedupe_titles);

        let options = options
            .with_connect_timeout(None)
            .with_read_timeout(None)
            .with_read_chunk_size(512)
            .with_dedupe_titles(true);
        assert_eq!(options.connect_timeout, None);
        assert_eq!(options.read_timeout, None);
        assert_eq!(options.read_chunk_size, 512);
        assert!(options.dedupe_titles);
    }

    // --- IcyStream against a local server ---

    /// Serve one connection: capture the request, then write `response`.
    /// When `hold_open` is set the socket stays open until the client closes.
    fn serve_once(response: Vec<u8>, hold_open: bool) -> (StreamOptions, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut byte = [0u8; 1];
            while !request.ends_with(b"\r\n\r\n") {
                match socket.read(&mut byte) {
                    Ok(1) => request.push(byte[0]),
                    _ => break,
                }
            }
            let _ = socket.write_all(&response);
            if hold_open {
                let mut sink = [0u8; 64];
                while matches!(socket.read(&mut sink), Ok(n) if n > 0) {}
            }
            request
        });

        (StreamOptions::new("127.0.0.1", port, "/stream"), handle)
    }

    fn icy_response(metaint: usize, titles: &[&str]) -> Vec<u8> {
        let mut out = format!("ICY 200 OK\r\nicy-name: Local\r\nicy-metaint: {metaint}\r\n\r\n")
            .into_bytes();
        for title in titles {
            out.extend(vec![0x55; metaint]);
            out.extend(encode_title_frame(title).unwrap());
        }
        out.extend(vec![0x55; metaint + 1 + 255 * 16]);
        out
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn delivers_titles_and_closes_cleanly() {
        let (options, server) = serve_once(icy_response(64, &["A - 1", "B - 2"]), true);
        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = titles.clone();

        let stream = IcyStream::open(options, move |t| {
            sink.lock().unwrap().push(t.to_string());
            Ok(())
        })
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || titles.lock().unwrap().len() == 2));
        assert_eq!(stream.state(), SessionState::Streaming);
        assert!(!stream.is_finished());

        stream.close().unwrap();
        assert_eq!(*titles.lock().unwrap(), vec!["A - 1", "B - 2"]);

        let request = server.join().unwrap();
        assert_eq!(request, b"GET /stream HTTP/1.0\r\nIcy-MetaData:1\r\n\r\n".to_vec());
    }

    #[test]
    fn no_callbacks_after_close() {
        let (options, _server) = serve_once(icy_response(64, &["Only"]), true);
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();

        let stream = IcyStream::open(options, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || *calls.lock().unwrap() == 1));
        stream.close().unwrap();
        let after_close = *calls.lock().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*calls.lock().unwrap(), after_close);
    }

    #[test]
    fn header_error_surfaces_from_wait() {
        let response = b"HTTP/1.0 200 OK\r\nicy-name: Broken\r\n\r\n".to_vec();
        let (options, _server) = serve_once(response, true);

        let stream = IcyStream::open(options, |_| Ok(())).unwrap();
        assert!(matches!(stream.wait(), Err(IcyError::MissingHeader(_))));
    }

    #[test]
    fn fatal_error_is_reported_by_close() {
        let response = b"HTTP/1.0 200 OK\r\nicy-metaint: 8\r\nicy-metaint: 8\r\n\r\n".to_vec();
        let (options, _server) = serve_once(response, true);

        let stream = IcyStream::open(options, |_| Ok(())).unwrap();
        assert!(wait_until(Duration::from_secs(5), || stream.is_finished()));
        assert_eq!(stream.state(), SessionState::Closed);
        assert!(matches!(stream.close(), Err(IcyError::DuplicateHeader(_))));
    }

    #[test]
    fn callback_panic_is_reported() {
        let (options, _server) = serve_once(icy_response(16, &["Boom"]), true);
        let stream = IcyStream::open(options, |_| panic!("listener exploded")).unwrap();
        assert!(wait_until(Duration::from_secs(5), || stream.is_finished()));
        assert_eq!(stream.state(), SessionState::Closed);
        assert!(matches!(stream.wait(), Err(IcyError::Callback(_))));
    }

    #[test]
    fn channel_receives_parsed_metadata() {
        let (options, _server) = serve_once(icy_response(32, &["Artist - Song"]), true);
        let (stream, rx) = IcyStream::open_channel(options).unwrap();

        let metadata = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(metadata.artist.as_deref(), Some("Artist"));
        assert_eq!(metadata.title.as_deref(), Some("Song"));
        assert_eq!(metadata.raw, "Artist - Song");

        stream.close().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn connect_failure_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let options = StreamOptions::new("127.0.0.1", port, "/")
            .with_connect_timeout(Some(Duration::from_secs(1)));
        assert!(matches!(
            IcyStream::open(options, |_| Ok(())),
            Err(IcyError::Connection(_))
        ));
    }

    #[test]
    fn idle_read_timeout_ends_session() {
        let (options, _server) = serve_once(b"HTTP/1.0 200 OK\r\n".to_vec(), true);
        let options = options.with_read_timeout(Some(Duration::from_millis(100)));

        let stream = IcyStream::open(options, |_| Ok(())).unwrap();
        let err = stream.wait().unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err:?}");
    }

    #[test]
    fn drop_stops_session() {
        let (options, server) = serve_once(icy_response(16, &[]), true);
        let stream = IcyStream::open(options, |_| Ok(())).unwrap();
        drop(stream);
        // Server's read loop ends once the client side is shut down
        assert!(server.join().is_ok());
    }
}
