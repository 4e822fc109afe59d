use bytes::{Buf, BytesMut};
use http::Method;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http::parser::{parse_http_request, ParseError, MAX_HEADER_BYTES};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::{stream_upstream, Framing, ResponseWriter};
use crate::server::handler::{Handler, Reply};

/// Cap on pipelined bytes buffered while a request is in flight.
const MAX_PIPELINED_BYTES: usize = MAX_HEADER_BYTES;

pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
    state: ConnectionState,
    handler: Arc<Handler>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(Reply, Framing),
    Closed,
}

/// Outcome of reading from the client
enum Inbound {
    Request(Request),
    Malformed(ParseError),
    Closed,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S, handler: Arc<Handler>) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            handler,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            self.state = match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => match self.read_request().await? {
                    Inbound::Request(req) => ConnectionState::Processing(req),
                    Inbound::Malformed(e) => {
                        debug!("HTTP parse error: {:?}", e);
                        let framing = Framing {
                            keep_alive: false,
                            head_only: false,
                            chunked: false,
                        };
                        ConnectionState::Writing(Reply::Local(Response::bad_request()), framing)
                    }
                    Inbound::Closed => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    let framing = Framing {
                        keep_alive: req.keep_alive(),
                        head_only: req.method == Method::HEAD,
                        chunked: req.is_http11(),
                    };
                    match self.process(req).await {
                        Some(reply) => ConnectionState::Writing(reply, framing),
                        // Client is gone, nobody to answer
                        None => ConnectionState::Closed,
                    }
                }

                ConnectionState::Writing(reply, framing) => {
                    let keep_alive = match reply {
                        Reply::Local(response) => {
                            let mut writer = ResponseWriter::new(&response, framing);
                            writer.write_to_stream(&mut self.stream).await?;
                            framing.keep_alive
                        }
                        Reply::Upstream(response) => {
                            stream_upstream(&mut self.stream, response, framing).await?
                        }
                    };

                    if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<Inbound> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.advance(consumed);
                    return Ok(Inbound::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Ok(Inbound::Malformed(e)),
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;

            if n == 0 {
                // Client closed connection
                return Ok(Inbound::Closed);
            }
        }
    }

    /// Runs the handler while watching the client socket and the deadline.
    ///
    /// A client disconnect or an elapsed deadline cancels the request's
    /// token, which aborts the rate-limit wait or the upstream call. Returns
    /// `None` when the client went away.
    async fn process(&mut self, request: Request) -> Option<Reply> {
        let handler = Arc::clone(&self.handler);
        let cancel = CancellationToken::new();

        let reply = handler.handle(request, &cancel);
        tokio::pin!(reply);
        let deadline = tokio::time::sleep(handler.request_timeout());
        tokio::pin!(deadline);

        let mut client_gone = false;
        loop {
            tokio::select! {
                reply = &mut reply => {
                    return if client_gone { None } else { Some(reply) };
                }
                _ = &mut deadline, if !cancel.is_cancelled() => {
                    debug!("Request deadline elapsed");
                    cancel.cancel();
                }
                read = self.stream.read_buf(&mut self.buffer),
                    if !client_gone && self.buffer.len() < MAX_PIPELINED_BYTES =>
                {
                    // Anything read here is the start of a pipelined request
                    if matches!(read, Ok(0) | Err(_)) {
                        debug!("Client disconnected while request was in flight");
                        client_gone = true;
                        cancel.cancel();
                    }
                }
            }
        }
    }
}
