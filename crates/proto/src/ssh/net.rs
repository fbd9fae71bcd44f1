//! Readiness multiplexer backed by tokio.
//!
//! The session engine never waits on its own in non-blocking mode; the
//! caller collects [`Session::wants`](crate::ssh::Session::wants) and
//! [`ForwardingMux::interests`](crate::ssh::forwarding::ForwardingMux::interests)
//! and waits on a [`Multiplexer`]. [`TokioMultiplexer`] implements that
//! contract for TCP sockets using tokio's reactor, both from synchronous
//! code ([`Multiplexer`]) and from inside a runtime ([`AsyncMultiplexer`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::TcpStream;
//! use std::time::Duration;
//! use tether_platform::{Direction, Multiplexer};
//! use tether_proto::ssh::net::TokioMultiplexer;
//!
//! # fn run() -> tether_platform::TetherResult<()> {
//! let socket = TcpStream::connect("server:22")?;
//! let mut mux = TokioMultiplexer::new()?;
//! let source = mux.register(&socket)?;
//! let ready = mux.wait(&[(source, Direction::Readable)], Some(Duration::from_secs(1)))?;
//! # Ok(())
//! # }
//! ```

use futures::future::{select_all, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::time::Duration;
use tether_platform::{AsyncMultiplexer, Direction, Multiplexer, TetherError, TetherResult};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, trace};

/// Token of a socket registered with a [`TokioMultiplexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(usize);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Waits for readiness of registered TCP sockets.
pub struct TokioMultiplexer {
    runtime: Option<Runtime>,
    handle: Handle,
    sources: HashMap<SourceId, TcpStream>,
    next: usize,
}

impl TokioMultiplexer {
    /// Creates a multiplexer with its own current-thread runtime.
    pub fn new() -> TetherResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
            sources: HashMap::new(),
            next: 0,
        })
    }

    /// Creates a multiplexer on an existing runtime.
    ///
    /// Synchronous [`Multiplexer::wait`] needs a multi-thread runtime here
    /// and must not be called from async code; use [`AsyncMultiplexer`]
    /// inside the runtime instead.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
            sources: HashMap::new(),
            next: 0,
        }
    }

    /// Registers a socket.
    ///
    /// The multiplexer keeps its own descriptor for the socket and switches
    /// it to non-blocking mode, which also affects `socket` itself.
    pub fn register(&mut self, socket: &std::net::TcpStream) -> TetherResult<SourceId> {
        let clone = socket.try_clone()?;
        clone.set_nonblocking(true)?;
        let stream = {
            let _guard = self.handle.enter();
            TcpStream::from_std(clone)?
        };
        let id = SourceId(self.next);
        self.next += 1;
        debug!("Registered source {} ({:?})", id, stream.peer_addr().ok());
        self.sources.insert(id, stream);
        Ok(id)
    }

    /// Forgets a socket. Returns false if it was not registered.
    pub fn deregister(&mut self, id: SourceId) -> bool {
        self.sources.remove(&id).is_some()
    }

    /// Number of registered sockets.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no socket is registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl fmt::Debug for TokioMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioMultiplexer")
            .field("owns_runtime", &self.runtime.is_some())
            .field("sources", &self.sources.len())
            .finish()
    }
}

/// Resolves once `stream` is ready in `direction`.
///
/// Readability is probed with `peek` so that stale readiness left behind by
/// reads on the caller's descriptor is cleared rather than reported.
async fn probe(stream: &TcpStream, direction: Direction) -> io::Result<Direction> {
    let mut byte = [0u8; 1];
    match direction {
        Direction::Readable => stream.peek(&mut byte).await.map(|_| Direction::Readable),
        Direction::Writable => stream.writable().await.map(|_| Direction::Writable),
        Direction::Both => {
            tokio::select! {
                read = stream.peek(&mut byte) => read.map(|_| Direction::Readable),
                write = stream.writable() => write.map(|_| Direction::Writable),
            }
        }
    }
}

async fn ready_all(
    sources: &HashMap<SourceId, TcpStream>,
    interests: &[(SourceId, Direction)],
    timeout: Option<Duration>,
) -> TetherResult<Vec<(SourceId, Direction)>> {
    let mut probes = Vec::with_capacity(interests.len());
    for &(id, direction) in interests {
        let stream = sources
            .get(&id)
            .ok_or_else(|| TetherError::InvalidInput(format!("Unknown source {}", id)))?;
        probes.push(Box::pin(async move {
            // Errors surface on the caller's next read or write.
            let ready = probe(stream, direction).await.unwrap_or(direction);
            (id, ready)
        }));
    }

    if probes.is_empty() {
        return match timeout {
            Some(timeout) => {
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
            None => Err(TetherError::InvalidInput(
                "Nothing to wait for and no timeout".to_string(),
            )),
        };
    }

    let first = select_all(probes);
    let (ready, _, rest) = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, first).await {
            Ok(result) => result,
            Err(_) => {
                trace!("Multiplexer wait timed out after {:?}", timeout);
                return Ok(Vec::new());
            }
        },
        None => first.await,
    };

    let mut all = vec![ready];
    all.extend(rest.into_iter().filter_map(|pending| pending.now_or_never()));
    trace!("Multiplexer ready: {:?}", all);
    Ok(all)
}

impl Multiplexer for TokioMultiplexer {
    type Token = SourceId;

    fn wait(
        &mut self,
        interests: &[(SourceId, Direction)],
        timeout: Option<Duration>,
    ) -> TetherResult<Vec<(SourceId, Direction)>> {
        let future = ready_all(&self.sources, interests, timeout);
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            None => self.handle.block_on(future),
        }
    }
}

#[async_trait::async_trait]
impl AsyncMultiplexer for TokioMultiplexer {
    type Token = SourceId;

    async fn ready(
        &self,
        interests: &[(SourceId, Direction)],
        timeout: Option<Duration>,
    ) -> TetherResult<Vec<(SourceId, Direction)>> {
        ready_all(&self.sources, interests, timeout).await
    }
}
