//! Pipelined socket client over a single keel connection.
//!
//! # Purpose
//! Multiplexes many in-flight requests over one duplex byte stream, keeping
//! strict FIFO correspondence between the request and response streams, and
//! coalescing small writes behind explicit `Flush` messages.
//!
//! # Design notes
//! There are no correlation ids on the wire: the in-flight queue is the sole
//! matching oracle. The sender appends a handle to that queue *before*
//! writing its frame, and the receiver pops the head for every response; any
//! deviation would corrupt all subsequent matches, so a mismatch is fatal.
//! Errors are latched first-writer-wins and the client is terminal once one
//! is latched: there is no reconnect or per-request retry.
//!
//! The client is safe for concurrent callers. The application on the other
//! end of the connection generally is not; callers coordinating block
//! lifecycle against transaction traffic must serialize on their side.
use bytes::{Bytes, BytesMut};
use keel_transport::{dial, Address, ReadHalf, WriteHalf};
use keel_wire::{
    BlockHeader, InfoResult, QueryParams, QueryResult, Request, Response, TxResult, Validator,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::client::flush_timer::FlushTimer;
use crate::client::reqres::ReqRes;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::wire;

const STATE_NEW: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Listener invoked for every matched `(request, response)` pair, including
/// internally injected flushes.
type ResponseListener = Arc<dyn Fn(&Request, &Response) + Send + Sync>;

/// Pipelined client for a keel application connection.
///
/// Cloning is cheap; clones share the connection, the submission queue, and
/// the latched error.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

struct Shared {
    addr: Address,
    must_connect: bool,
    config: ClientConfig,
    // NEW -> RUNNING -> STOPPED, monotonic.
    lifecycle: AtomicU8,
    req_tx: mpsc::Sender<Arc<ReqRes>>,
    // Held here until start() hands it to the sender task.
    req_rx: Mutex<Option<mpsc::Receiver<Arc<ReqRes>>>>,
    quit_tx: watch::Sender<bool>,
    flush_timer: Mutex<Option<FlushTimer>>,
    state: Mutex<State>,
}

struct State {
    err: Option<ClientError>,
    req_sent: VecDeque<Arc<ReqRes>>,
    response_cb: Option<ResponseListener>,
}

impl Client {
    /// Create a client for `addr` (`tcp://host:port` or `unix://path`) in the
    /// not-started state. With `must_connect` set, `start` fails on the first
    /// connect error instead of retrying.
    pub fn new(addr: &str, must_connect: bool) -> Result<Self> {
        Self::with_config(addr, must_connect, ClientConfig::default())
    }

    pub fn with_config(addr: &str, must_connect: bool, config: ClientConfig) -> Result<Self> {
        let parsed: Address = addr.parse().map_err(|err: anyhow::Error| ClientError::Connect {
            addr: addr.to_string(),
            reason: err.to_string(),
        })?;
        let (req_tx, req_rx) = mpsc::channel(config.req_queue_size.max(1));
        let (quit_tx, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                addr: parsed,
                must_connect,
                config,
                lifecycle: AtomicU8::new(STATE_NEW),
                req_tx,
                req_rx: Mutex::new(Some(req_rx)),
                quit_tx,
                flush_timer: Mutex::new(None),
                state: Mutex::new(State {
                    err: None,
                    req_sent: VecDeque::new(),
                    response_cb: None,
                }),
            }),
        })
    }

    /// Connect and spawn the sender and receiver tasks.
    ///
    /// When `must_connect` is false, connect failures are retried every
    /// `connect_retry` until the peer comes up or the client is stopped.
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if let Err(actual) = shared.lifecycle.compare_exchange(
            STATE_NEW,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(if actual == STATE_STOPPED {
                shared.latched_or_stopped()
            } else {
                ClientError::AlreadyStarted
            });
        }
        shared.config.install();

        let stream = loop {
            match dial(&shared.addr).await {
                Ok(stream) => break stream,
                Err(err) => {
                    let reason = format!("{err:#}");
                    if shared.must_connect {
                        let err = ClientError::Connect {
                            addr: shared.addr.to_string(),
                            reason,
                        };
                        shared.stop_for_error(err.clone());
                        return Err(err);
                    }
                    warn!(addr = %shared.addr, error = %reason, "failed to connect, retrying");
                    tokio::time::sleep(shared.config.connect_retry).await;
                    if shared.lifecycle.load(Ordering::Acquire) == STATE_STOPPED {
                        return Err(shared.latched_or_stopped());
                    }
                }
            }
        };
        debug!(addr = %shared.addr, "client connected");

        let (read_half, write_half) = stream.into_split();
        let (timer, flush_fired) = FlushTimer::spawn(shared.config.flush_interval);
        *shared.timer_slot() = Some(timer);
        let Some(req_rx) = shared.req_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
        else {
            return Err(ClientError::AlreadyStarted);
        };

        tokio::spawn(run_sender(
            shared.clone(),
            req_rx,
            flush_fired,
            write_half,
            shared.quit_tx.subscribe(),
        ));
        tokio::spawn(run_receiver(
            shared.clone(),
            read_half,
            shared.quit_tx.subscribe(),
        ));
        Ok(())
    }

    /// Stop the client: close the connection, release every outstanding
    /// handle, and latch a terminal state. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// The latched fatal error, if any. Callers released without a response
    /// should consult this after `wait` returns.
    pub fn error(&self) -> Option<ClientError> {
        self.shared.state().err.clone()
    }

    /// Install a listener observing every matched response.
    ///
    /// The listener also sees internally generated flush responses.
    pub fn set_response_callback<F>(&self, callback: F)
    where
        F: Fn(&Request, &Response) + Send + Sync + 'static,
    {
        self.shared.state().response_cb = Some(Arc::new(callback));
    }

    // ------------------------------------------------------------------
    // Async submission surface: enqueue and return the in-flight handle.

    pub async fn echo_async(&self, message: impl Into<String>) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::Echo {
            message: message.into(),
        })
        .await
    }

    pub async fn flush_async(&self) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::Flush).await
    }

    pub async fn info_async(&self, version: impl Into<String>) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::Info {
            version: version.into(),
        })
        .await
    }

    pub async fn set_option_async(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::SetOption {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    pub async fn deliver_tx_async(&self, tx: Bytes) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::DeliverTx { tx }).await
    }

    pub async fn check_tx_async(&self, tx: Bytes) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::CheckTx { tx }).await
    }

    pub async fn commit_async(&self) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::Commit).await
    }

    pub async fn query_async(&self, query: QueryParams) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::Query(query)).await
    }

    pub async fn init_chain_async(&self, validators: Vec<Validator>) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::InitChain { validators }).await
    }

    pub async fn begin_block_async(&self, hash: Bytes, header: BlockHeader) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::BeginBlock { hash, header }).await
    }

    pub async fn end_block_async(&self, height: u64) -> Result<Arc<ReqRes>> {
        self.queue_request(Request::EndBlock { height }).await
    }

    // ------------------------------------------------------------------
    // Synchronous surface: enqueue, flush the pipeline, return the typed
    // response payload.

    /// Enqueue a `Flush` and wait until it completes, guaranteeing that all
    /// previously submitted requests have been written to the socket.
    pub async fn flush(&self) -> Result<()> {
        let reqres = self.queue_request(Request::Flush).await?;
        reqres.wait().await;
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn echo(&self, message: impl Into<String>) -> Result<String> {
        let reqres = self
            .round_trip(Request::Echo {
                message: message.into(),
            })
            .await?;
        match self.take_response(&reqres)? {
            Response::Echo { message } => Ok(message),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    pub async fn info(&self, version: impl Into<String>) -> Result<InfoResult> {
        let reqres = self
            .round_trip(Request::Info {
                version: version.into(),
            })
            .await?;
        match self.take_response(&reqres)? {
            Response::Info(info) => Ok(info),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    /// Returns the application's log line for the accepted option.
    pub async fn set_option(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<String> {
        let reqres = self
            .round_trip(Request::SetOption {
                key: key.into(),
                value: value.into(),
            })
            .await?;
        match self.take_response(&reqres)? {
            Response::SetOption { log } => Ok(log),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    pub async fn deliver_tx(&self, tx: Bytes) -> Result<TxResult> {
        let reqres = self.round_trip(Request::DeliverTx { tx }).await?;
        match self.take_response(&reqres)? {
            Response::DeliverTx(result) => Ok(result),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    pub async fn check_tx(&self, tx: Bytes) -> Result<TxResult> {
        let reqres = self.round_trip(Request::CheckTx { tx }).await?;
        match self.take_response(&reqres)? {
            Response::CheckTx(result) => Ok(result),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    pub async fn commit(&self) -> Result<TxResult> {
        let reqres = self.round_trip(Request::Commit).await?;
        match self.take_response(&reqres)? {
            Response::Commit(result) => Ok(result),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    pub async fn query(&self, query: QueryParams) -> Result<QueryResult> {
        let reqres = self.round_trip(Request::Query(query)).await?;
        match self.take_response(&reqres)? {
            Response::Query(result) => Ok(result),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    pub async fn init_chain(&self, validators: Vec<Validator>) -> Result<()> {
        let reqres = self.round_trip(Request::InitChain { validators }).await?;
        match self.take_response(&reqres)? {
            Response::InitChain => Ok(()),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    pub async fn begin_block(&self, hash: Bytes, header: BlockHeader) -> Result<()> {
        let reqres = self.round_trip(Request::BeginBlock { hash, header }).await?;
        match self.take_response(&reqres)? {
            Response::BeginBlock => Ok(()),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    pub async fn end_block(&self, height: u64) -> Result<Vec<Validator>> {
        let reqres = self.round_trip(Request::EndBlock { height }).await?;
        match self.take_response(&reqres)? {
            Response::EndBlock { validator_updates } => Ok(validator_updates),
            other => Err(unexpected(&reqres, &other)),
        }
    }

    // ------------------------------------------------------------------

    async fn queue_request(&self, request: Request) -> Result<Arc<ReqRes>> {
        let is_flush = request.is_flush();
        let reqres = Arc::new(ReqRes::new(request));
        // Bounded queue: this blocks when the queue is full (backpressure).
        if self.shared.req_tx.send(reqres.clone()).await.is_err() {
            return Err(self.shared.latched_or_stopped());
        }
        #[cfg(feature = "telemetry")]
        {
            crate::counters::frame_counters()
                .requests_enqueued
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        t_counter!("keel_client_requests_total").increment(1);
        // A stop racing the send above can strand the handle in a queue
        // nobody drains anymore; release is idempotent, so release it here.
        if self.shared.lifecycle.load(Ordering::Acquire) == STATE_STOPPED {
            reqres.release();
        }
        // Maybe auto-flush soon, or cancel a pending auto-flush.
        if let Some(timer) = self.shared.timer_slot().as_ref() {
            if is_flush {
                timer.unset();
            } else {
                timer.set();
            }
        }
        Ok(reqres)
    }

    async fn round_trip(&self, request: Request) -> Result<Arc<ReqRes>> {
        let reqres = self.queue_request(request).await?;
        self.flush().await?;
        Ok(reqres)
    }

    fn take_response(&self, reqres: &ReqRes) -> Result<Response> {
        match reqres.response() {
            Some(response) => Ok(response),
            None => Err(self.shared.latched_or_stopped()),
        }
    }
}

fn unexpected(reqres: &ReqRes, response: &Response) -> ClientError {
    ClientError::Protocol(format!(
        "unexpected {} response to {}",
        response.kind(),
        reqres.request().kind()
    ))
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<FlushTimer>> {
        self.flush_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn latched_or_stopped(&self) -> ClientError {
        self.state().err.clone().unwrap_or(ClientError::Stopped)
    }

    /// Latch `err` (first writer wins) and stop the client.
    fn stop_for_error(&self, err: ClientError) {
        if self.lifecycle.load(Ordering::Acquire) == STATE_STOPPED {
            return;
        }
        {
            let mut state = self.state();
            if state.err.is_none() {
                state.err = Some(err.clone());
            }
        }
        error!(error = %err, "stopping client");
        self.stop();
    }

    fn stop(&self) {
        let prev = self.lifecycle.swap(STATE_STOPPED, Ordering::AcqRel);
        if prev == STATE_STOPPED {
            return;
        }
        // Drained waiters must observe a terminal state from error().
        {
            let mut state = self.state();
            if state.err.is_none() {
                state.err = Some(ClientError::Stopped);
            }
        }
        // Wake both tasks; dropping their halves closes the socket. The
        // sender drains the submission queue on its way out.
        let _ = self.quit_tx.send(true);
        self.timer_slot().take();
        // A client that never started still owns the queue receiver; drain
        // it here so queued handles are released and blocked submitters are
        // unblocked. (After start, the sender task drains on exit.)
        let parked_rx = self
            .req_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut req_rx) = parked_rx {
            req_rx.close();
            while let Ok(reqres) = req_rx.try_recv() {
                reqres.release();
            }
        }
        // Release every in-flight handle so no caller waits forever.
        let drained: Vec<Arc<ReqRes>> = {
            let mut state = self.state();
            state.req_sent.drain(..).collect()
        };
        #[cfg(feature = "telemetry")]
        {
            crate::counters::frame_counters()
                .handles_released
                .fetch_add(drained.len() as u64, std::sync::atomic::Ordering::Relaxed);
        }
        for reqres in drained {
            reqres.release();
        }
        t_gauge!("keel_client_in_flight").set(0.0);
        debug!(addr = %self.addr, "client stopped");
    }

    /// Append to the in-flight queue. Must happen before the frame is
    /// written so the receiver's match table is always consistent.
    fn will_send(&self, reqres: &Arc<ReqRes>) {
        let mut state = self.state();
        state.req_sent.push_back(reqres.clone());
        t_gauge!("keel_client_in_flight").set(state.req_sent.len() as f64);
    }

    fn did_recv_response(&self, response: Response) -> std::result::Result<(), ClientError> {
        let (reqres, listener) = {
            let mut state = self.state();
            let Some(head) = state.req_sent.pop_front() else {
                return Err(ClientError::Protocol(format!(
                    "unexpected {} response with nothing in flight",
                    response.kind()
                )));
            };
            if !keel_wire::matches(head.request(), &response) {
                let err = ClientError::Protocol(format!(
                    "unexpected {} response, expected {}",
                    response.kind(),
                    head.request().kind()
                ));
                // Leave the pipeline intact; the shutdown drain releases it.
                state.req_sent.push_front(head);
                return Err(err);
            }
            t_gauge!("keel_client_in_flight").set(state.req_sent.len() as f64);
            (head, state.response_cb.clone())
        };
        #[cfg(feature = "telemetry")]
        {
            crate::counters::frame_counters()
                .responses_matched
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        // Callbacks run outside the client lock. The receiver is the only
        // caller, so they fire in response-arrival order.
        let callback = reqres.complete(response.clone());
        if let Some(callback) = callback {
            callback(&response);
        }
        if let Some(listener) = listener {
            listener(reqres.request(), &response);
        }
        Ok(())
    }
}

async fn run_sender(
    shared: Arc<Shared>,
    mut req_rx: mpsc::Receiver<Arc<ReqRes>>,
    mut flush_fired: mpsc::Receiver<()>,
    write_half: WriteHalf,
    mut quit: watch::Receiver<bool>,
) {
    let mut writer = BufWriter::new(write_half);
    // A stop racing start() may have signaled quit before this task
    // subscribed; `changed` would never fire for that, so check the value.
    while !*quit.borrow() {
        tokio::select! {
            Some(()) = flush_fired.recv() => {
                // Throttle fired: inject a flush unless the queue is full. A
                // dropped injection is fine; the next submission re-arms.
                let injected = Arc::new(ReqRes::new(Request::Flush));
                match shared.req_tx.try_send(injected) {
                    Ok(()) => {
                        #[cfg(feature = "telemetry")]
                        {
                            crate::counters::frame_counters()
                                .flushes_injected
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                        t_counter!("keel_client_flushes_injected_total").increment(1);
                    }
                    Err(failed) => failed.into_inner().release(),
                }
            }
            _ = quit.changed() => break,
            maybe = req_rx.recv() => {
                let Some(reqres) = maybe else { break };
                shared.will_send(&reqres);
                if let Err(err) = wire::write_request(&mut writer, reqres.request()).await {
                    shared.stop_for_error(err);
                    break;
                }
                // A Flush is the one trigger that pushes buffered frames out.
                if reqres.request().is_flush() {
                    if let Err(err) = writer.flush().await {
                        shared.stop_for_error(ClientError::io(err));
                        break;
                    }
                }
            }
        }
    }
    // Release everything still queued so no submitter waits forever.
    let mut released = 0u64;
    while let Ok(reqres) = req_rx.try_recv() {
        reqres.release();
        released += 1;
    }
    #[cfg(feature = "telemetry")]
    {
        crate::counters::frame_counters()
            .handles_released
            .fetch_add(released, std::sync::atomic::Ordering::Relaxed);
    }
    #[cfg(not(feature = "telemetry"))]
    let _ = released;
    debug!("sender task exited");
}

async fn run_receiver(shared: Arc<Shared>, read_half: ReadHalf, mut quit: watch::Receiver<bool>) {
    let mut reader = BufReader::new(read_half);
    let mut frame_scratch = BytesMut::with_capacity(64 * 1024);
    // Same quit-vs-subscribe race as the sender: check the value first.
    while !*quit.borrow() {
        tokio::select! {
            _ = quit.changed() => break,
            result = wire::read_response(&mut reader, &mut frame_scratch) => match result {
                Ok(Some(Response::Exception { error })) => {
                    shared.stop_for_error(ClientError::RemoteException(error));
                    break;
                }
                Ok(Some(response)) => {
                    if let Err(err) = shared.did_recv_response(response) {
                        shared.stop_for_error(err);
                        break;
                    }
                }
                Ok(None) => {
                    shared.stop_for_error(ClientError::Io(
                        "connection closed by peer".to_string(),
                    ));
                    break;
                }
                Err(err) => {
                    shared.stop_for_error(err);
                    break;
                }
            }
        }
    }
    debug!("receiver task exited");
}
