// Realtime subscription hub: one shared streaming connection, many listeners.
//
// The registry (symbol -> listeners) is the source of truth for what the provider
// should be streaming. A single connection task per generation owns the transport;
// it sends the full registry on every open and dispatches inbound quotes in arrival
// order. Teardown happens when the registry empties, or on `unsubscribe_all`.
//
// Lock discipline: `HubState` sits behind a parking_lot mutex that is never held
// across an await or while listeners run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::market_data::adapters::{FrameSink, FrameStream, StreamConnector, StreamRequest, TransportError};
use crate::market_data::cache::{quote_key, TtlCache};
use crate::market_data::normaliser::{classify, normalise, ProviderPayload};
use crate::market_data::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::market_data::types::{canonical_symbol, Quote};

pub type Listener = Arc<dyn Fn(&Quote) + Send + Sync>;
pub type ListenerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

struct Connection {
    generation: u64,
    // Dropping the sender is the shutdown signal for the connection task.
    commands: mpsc::UnboundedSender<StreamRequest>,
}

struct HubState {
    // BTreeMaps keep subscribe frames and dispatch order deterministic.
    listeners: BTreeMap<String, BTreeMap<ListenerId, Listener>>,
    next_listener: ListenerId,
    next_generation: u64,
    connection: Option<Connection>,
    state: ConnectionState,
    last_updated: AHashMap<String, u64>,
    cache: Option<(Arc<TtlCache<Quote>>, Duration)>,
}

impl HubState {
    fn is_current(&self, generation: u64) -> bool {
        self.connection.as_ref().map(|c| c.generation) == Some(generation)
    }

    fn is_open(&self, generation: u64) -> bool {
        self.is_current(generation) && self.state == ConnectionState::Open
    }
}

struct HubInner<C> {
    connector: C,
    reconnect: ReconnectConfig,
    state: Mutex<HubState>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Multiplexes one streaming connection across every subscriber in the process.
pub struct SubscriptionHub<C: StreamConnector> {
    inner: Arc<HubInner<C>>,
}

impl<C: StreamConnector> Clone for SubscriptionHub<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: StreamConnector> SubscriptionHub<C> {
    pub fn new(connector: C, reconnect: ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let state = HubState {
            listeners: BTreeMap::new(),
            next_listener: 1,
            next_generation: 1,
            connection: None,
            state: ConnectionState::Closed,
            last_updated: AHashMap::new(),
            cache: None,
        };
        Self {
            inner: Arc::new(HubInner { connector, reconnect, state: Mutex::new(state), state_tx }),
        }
    }

    /// Write every dispatched quote into `cache` under `quote_{SYMBOL}`.
    pub fn with_cache(self, cache: Arc<TtlCache<Quote>>, ttl: Duration) -> Self {
        self.inner.state.lock().cache = Some((cache, ttl));
        self
    }

    /// Register `callback` for every symbol in `symbols`. Opens the shared connection
    /// if none exists. Must be called from within a tokio runtime.
    pub fn subscribe<I, S, F>(&self, symbols: I, callback: F) -> Subscription
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&Quote) + Send + Sync + 'static,
    {
        let mut symbols: Vec<String> = symbols
            .into_iter()
            .map(|s| canonical_symbol(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();

        let weak = Arc::downgrade(&self.inner);
        let registry: Weak<dyn ListenerRegistry> = weak;
        if symbols.is_empty() {
            debug!("subscribe called without symbols");
            return Subscription { id: 0, symbols, registry, active: AtomicBool::new(false) };
        }

        let listener: Listener = Arc::new(callback);
        let mut st = self.inner.state.lock();
        let id = st.next_listener;
        st.next_listener += 1;

        let mut added = Vec::new();
        for symbol in &symbols {
            let entry = st.listeners.entry(symbol.clone()).or_default();
            if entry.is_empty() {
                added.push(symbol.clone());
            }
            entry.insert(id, Arc::clone(&listener));
        }
        gauge!("quotehub_hub_subscribed_symbols").set(st.listeners.len() as f64);
        debug!(listener = id, ?symbols, new = added.len(), "listener registered");

        if st.connection.is_none() {
            self.inner.open_connection(&mut st);
        } else if st.state == ConnectionState::Open && !added.is_empty() {
            // While connecting, the open handler sends the full registry instead.
            if let Some(conn) = &st.connection {
                let _ = conn.commands.send(StreamRequest::subscribe(added));
            }
        }

        Subscription { id, symbols, registry, active: AtomicBool::new(true) }
    }

    /// Drop every listener and close the connection.
    pub fn unsubscribe_all(&self) {
        let mut st = self.inner.state.lock();
        let listeners: usize = st.listeners.values().map(|l| l.len()).sum();
        st.listeners.clear();
        st.last_updated.clear();
        gauge!("quotehub_hub_subscribed_symbols").set(0.0);
        info!(listeners, "unsubscribing from all realtime updates");
        self.inner.teardown(&mut st);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    /// Every state transition is published here.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Symbols with at least one listener, sorted.
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.inner.state.lock().listeners.keys().cloned().collect()
    }

    pub fn listener_count(&self, symbol: &str) -> usize {
        let symbol = canonical_symbol(symbol);
        self.inner.state.lock().listeners.get(&symbol).map_or(0, |l| l.len())
    }
}

trait ListenerRegistry: Send + Sync {
    fn remove_listener(&self, id: ListenerId, symbols: &[String]);
}

impl<C: StreamConnector> ListenerRegistry for HubInner<C> {
    fn remove_listener(&self, id: ListenerId, symbols: &[String]) {
        let mut st = self.state.lock();
        let mut emptied = Vec::new();
        for symbol in symbols {
            let Some(listeners) = st.listeners.get_mut(symbol) else { continue };
            listeners.remove(&id);
            if listeners.is_empty() {
                st.listeners.remove(symbol);
                st.last_updated.remove(symbol);
                emptied.push(symbol.clone());
            }
        }
        gauge!("quotehub_hub_subscribed_symbols").set(st.listeners.len() as f64);
        debug!(listener = id, ?emptied, "listener removed");

        if st.listeners.is_empty() {
            self.teardown(&mut st);
        } else if !emptied.is_empty() && st.state == ConnectionState::Open {
            if let Some(conn) = &st.connection {
                let _ = conn.commands.send(StreamRequest::unsubscribe(emptied));
            }
        }
    }
}

impl<C: StreamConnector> HubInner<C> {
    fn set_state(&self, st: &mut HubState, next: ConnectionState) {
        if st.state == next {
            return;
        }
        info!(from = ?st.state, to = ?next, "realtime connection state");
        st.state = next;
        self.state_tx.send_replace(next);
    }

    fn open_connection(self: &Arc<Self>, st: &mut HubState) {
        let generation = st.next_generation;
        st.next_generation += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        st.connection = Some(Connection { generation, commands: tx });
        self.set_state(st, ConnectionState::Connecting);
        tokio::spawn(run_connection(Arc::clone(self), generation, rx));
    }

    fn teardown(&self, st: &mut HubState) {
        if st.connection.take().is_some() {
            self.set_state(st, ConnectionState::Closing);
        } else {
            self.set_state(st, ConnectionState::Closed);
        }
    }

    fn finish_close(&self) {
        let mut st = self.state.lock();
        // A newer connection may already be starting.
        if st.connection.is_none() {
            self.set_state(&mut st, ConnectionState::Closed);
        }
    }

    /// Move to `Open` and return the symbols the provider must stream, or `None` if
    /// this generation has been torn down.
    fn mark_open(&self, generation: u64) -> Option<Vec<String>> {
        let mut st = self.state.lock();
        if !st.is_current(generation) {
            return None;
        }
        self.set_state(&mut st, ConnectionState::Open);
        Some(st.listeners.keys().cloned().collect())
    }

    fn mark_reconnecting(&self, generation: u64) -> bool {
        let mut st = self.state.lock();
        if !st.is_current(generation) {
            return false;
        }
        self.set_state(&mut st, ConnectionState::Connecting);
        true
    }

    fn give_up(&self, generation: u64) {
        let mut st = self.state.lock();
        if !st.is_current(generation) {
            return;
        }
        st.connection = None;
        warn!(
            symbols = st.listeners.len(),
            "realtime connection lost and not reconnecting; next subscribe reopens it"
        );
        self.set_state(&mut st, ConnectionState::Closed);
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "dropping non-JSON frame");
                counter!("quotehub_hub_frames_dropped_total").increment(1);
                return;
            }
        };
        match value {
            Value::Array(items) => items.into_iter().for_each(|v| self.handle_payload(generation, v)),
            other => self.handle_payload(generation, other),
        }
    }

    fn handle_payload(&self, generation: u64, value: Value) {
        let quote = match classify(value) {
            Ok(ProviderPayload::Quote(raw)) => match normalise(&raw) {
                Ok(q) => q,
                Err(e) => {
                    debug!(error = %e, "dropping frame that is not a quote");
                    counter!("quotehub_hub_frames_dropped_total").increment(1);
                    return;
                }
            },
            Ok(ProviderPayload::RateLimited(note)) => {
                warn!(%note, "provider rate limit notice on stream");
                return;
            }
            Ok(ProviderPayload::ProviderError(msg)) => {
                warn!(%msg, "provider error on stream");
                return;
            }
            Err(e) => {
                debug!(error = %e, "dropping malformed frame");
                counter!("quotehub_hub_frames_dropped_total").increment(1);
                return;
            }
        };

        let (listeners, cache) = {
            let mut st = self.state.lock();
            if !st.is_open(generation) {
                return;
            }
            let Some(listeners) = st.listeners.get(&quote.symbol) else {
                debug!(symbol = %quote.symbol, "no listeners, quote dropped");
                counter!("quotehub_hub_frames_dropped_total").increment(1);
                return;
            };
            let listeners: Vec<Listener> = listeners.values().cloned().collect();
            if let Some(prev) = st.last_updated.insert(quote.symbol.clone(), quote.updated_at) {
                if quote.updated_at < prev {
                    warn!(symbol = %quote.symbol, prev, updated_at = quote.updated_at, "quote timestamp went backwards");
                    counter!("quotehub_hub_stale_updates_total").increment(1);
                }
            }
            (listeners, st.cache.clone())
        };

        if let Some((cache, ttl)) = cache {
            cache.set(quote_key(&quote.symbol), quote.clone(), ttl);
        }
        counter!("quotehub_hub_quotes_dispatched_total").increment(listeners.len() as u64);
        for listener in listeners {
            listener(&quote);
        }
    }

    async fn send_request(sink: &mut FrameSink, req: StreamRequest) -> Result<(), TransportError> {
        match req.to_json() {
            Ok(json) => {
                debug!(action = ?req.action, symbols = ?req.symbols, "sending stream request");
                sink.send(json).await
            }
            Err(e) => {
                warn!(error = %e, "could not encode stream request");
                Ok(())
            }
        }
    }

    async fn session(
        &self,
        generation: u64,
        mut sink: FrameSink,
        mut stream: FrameStream,
        commands: &mut mpsc::UnboundedReceiver<StreamRequest>,
    ) -> SessionEnd {
        // Anything queued before this open is superseded by the full resubscribe.
        loop {
            match commands.try_recv() {
                Ok(_) => continue,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }

        let Some(symbols) = self.mark_open(generation) else {
            let _ = sink.close().await;
            return SessionEnd::Shutdown;
        };
        if !symbols.is_empty() {
            if let Err(e) = Self::send_request(&mut sink, StreamRequest::subscribe(symbols)).await {
                return SessionEnd::Lost(e);
            }
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(req) => {
                        let open = self.state.lock().is_open(generation);
                        if !open {
                            continue;
                        }
                        if let Err(e) = Self::send_request(&mut sink, req).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    None => {
                        if let Err(e) = sink.close().await {
                            debug!(error = %e, "error while closing stream");
                        }
                        return SessionEnd::Shutdown;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.handle_frame(generation, &text),
                    Some(Err(e)) => return SessionEnd::Lost(e),
                    None => return SessionEnd::Lost(TransportError::Closed),
                },
            }
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost(TransportError),
}

// Resolves once every command sender is gone, i.e. the generation was torn down.
async fn closed(commands: &mut mpsc::UnboundedReceiver<StreamRequest>) {
    while commands.recv().await.is_some() {}
}

async fn run_connection<C: StreamConnector>(
    inner: Arc<HubInner<C>>,
    generation: u64,
    mut commands: mpsc::UnboundedReceiver<StreamRequest>,
) {
    let mut policy = ReconnectPolicy::new(inner.reconnect.clone());
    loop {
        let connected = tokio::select! {
            res = inner.connector.connect() => res,
            _ = closed(&mut commands) => {
                inner.finish_close();
                return;
            }
        };

        match connected {
            Ok((sink, stream)) => {
                match inner.session(generation, sink, stream, &mut commands).await {
                    SessionEnd::Shutdown => {
                        inner.finish_close();
                        return;
                    }
                    SessionEnd::Lost(e) => {
                        warn!(generation, error = %e, "realtime connection lost");
                        counter!("quotehub_hub_connection_lost_total").increment(1);
                        policy.reset();
                    }
                }
            }
            Err(e) => warn!(generation, error = %e, "realtime connect failed"),
        }

        if !inner.mark_reconnecting(generation) {
            inner.finish_close();
            return;
        }
        let Some(delay) = policy.next_delay() else {
            inner.give_up(generation);
            return;
        };
        info!(generation, attempt = policy.attempt_count(), delay_ms = delay.as_millis() as u64, "reconnecting");
        counter!("quotehub_hub_reconnects_total").increment(1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = closed(&mut commands) => {
                inner.finish_close();
                return;
            }
        }
    }
}

/// Handle for one `subscribe` call. Dropping it does not unsubscribe.
#[must_use = "the callback stays registered until `unsubscribe` is called"]
pub struct Subscription {
    id: ListenerId,
    symbols: Vec<String>,
    registry: Weak<dyn ListenerRegistry>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the callback from every symbol it was registered for. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_listener(self.id, &self.symbols);
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("symbols", &self.symbols)
            .field("active", &self.is_active())
            .finish()
    }
}
