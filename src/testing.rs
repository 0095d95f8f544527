//! In-memory drivers for exercising the device core without hardware.
//!
//! Every fake is a cheap handle around shared state: hand one clone to the
//! services and keep another in the test to script and inspect it.

use crate::clock::ManualClock;
use crate::config::DeviceConfig;
use crate::controller::Services;
use crate::hal::{
    ByteStream, DriverError, FirmwareStore, HeapStats, HttpClient, HttpError, HttpResponse,
    LinkStatus, SystemControl, WifiDriver,
};
use crate::mqtt::{ConnectOptions, InboundMessage, MqttTransport, TransportError};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;

/// Config with credentials and a broker, everything else default.
pub fn connected_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.wifi.ssid = "lab".into();
    config.wifi.password = "secret".into();
    config.mqtt.broker = "broker.local".into();
    config
}

/// One set of fakes plus the clock that drives them.
pub struct Rig {
    pub clock: ManualClock,
    pub wifi: FakeWifi,
    pub transport: FakeTransport,
    pub http: FakeHttp,
    pub flash: FakeFlash,
    pub system: FakeSystem,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            clock: ManualClock::starting_at(0),
            wifi: FakeWifi::new(),
            transport: FakeTransport::new(),
            http: FakeHttp::new(),
            flash: FakeFlash::new(),
            system: FakeSystem::new(),
        }
    }

    pub fn services(&self, config: DeviceConfig) -> Services {
        Services::new(
            config,
            Box::new(self.clock.clone()),
            Box::new(self.wifi.clone()),
            Box::new(self.transport.clone()),
            Box::new(self.http.clone()),
            Box::new(self.flash.clone()),
            Box::new(self.system.clone()),
        )
    }
}

#[derive(Default)]
struct WifiInner {
    status: Option<LinkStatus>,
    connect_on_begin: bool,
    init_calls: usize,
    begin_calls: usize,
}

#[derive(Clone, Default)]
pub struct FakeWifi(Rc<RefCell<WifiInner>>);

impl FakeWifi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: LinkStatus) {
        self.0.borrow_mut().status = Some(status);
    }

    /// Association succeeds as soon as it is requested.
    pub fn connect_on_begin(&self, enabled: bool) {
        self.0.borrow_mut().connect_on_begin = enabled;
    }

    pub fn init_calls(&self) -> usize {
        self.0.borrow().init_calls
    }

    pub fn begin_calls(&self) -> usize {
        self.0.borrow().begin_calls
    }
}

impl WifiDriver for FakeWifi {
    fn init_station(&mut self) -> Result<(), DriverError> {
        self.0.borrow_mut().init_calls += 1;
        Ok(())
    }

    fn begin(&mut self, _ssid: &str, _password: &str) {
        let mut inner = self.0.borrow_mut();
        inner.begin_calls += 1;
        if inner.connect_on_begin {
            inner.status = Some(LinkStatus::Connected);
        }
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().status = Some(LinkStatus::Disconnected);
    }

    fn status(&self) -> LinkStatus {
        self.0.borrow().status.unwrap_or(LinkStatus::Idle)
    }

    fn local_ip(&self) -> Option<IpAddr> {
        (self.status() == LinkStatus::Connected).then_some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
    }

    fn rssi(&self) -> Option<i32> {
        (self.status() == LinkStatus::Connected).then_some(-55)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

#[derive(Default)]
struct TransportInner {
    connected: bool,
    refuse: bool,
    connect_calls: usize,
    last_options: Option<ConnectOptions>,
    reject_subscriptions: bool,
    subscribed: Vec<String>,
    /// `Some(n)`: publishes wait in a bounded outbox until the next poll.
    outbox_capacity: Option<usize>,
    outbox: VecDeque<Published>,
    published: Vec<Published>,
    inbound: VecDeque<InboundMessage>,
}

#[derive(Clone, Default)]
pub struct FakeTransport(Rc<RefCell<TransportInner>>);

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.0.borrow_mut().refuse = refuse;
    }

    pub fn reject_subscriptions(&self, reject: bool) {
        self.0.borrow_mut().reject_subscriptions = reject;
    }

    /// Models a client whose requests only reach the wire while the session
    /// is polled: at most `capacity` publishes wait between two polls.
    pub fn outbox_capacity(&self, capacity: usize) {
        self.0.borrow_mut().outbox_capacity = Some(capacity);
    }

    pub fn drop_link(&self) {
        self.0.borrow_mut().connected = false;
    }

    pub fn push_inbound(&self, topic: &str, payload: &[u8]) {
        self.0.borrow_mut().inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn connect_calls(&self) -> usize {
        self.0.borrow().connect_calls
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.0.borrow().last_options.clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.0.borrow().subscribed.clone()
    }

    pub fn clear_subscribed(&self) {
        self.0.borrow_mut().subscribed.clear();
    }

    pub fn published(&self) -> Vec<Published> {
        self.0.borrow().published.clone()
    }

    /// Messages whose topic ends with `suffix`.
    pub fn published_on(&self, suffix: &str) -> Vec<Published> {
        self.0
            .borrow()
            .published
            .iter()
            .filter(|p| p.topic.ends_with(suffix))
            .cloned()
            .collect()
    }
}

impl MqttTransport for FakeTransport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        let mut inner = self.0.borrow_mut();
        inner.connect_calls += 1;
        inner.last_options = Some(options.clone());
        if inner.refuse {
            return Err(TransportError::Connect("connection refused".into()));
        }
        inner.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.0.borrow().connected
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        let mut inner = self.0.borrow_mut();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if inner.reject_subscriptions {
            return Err(TransportError::Request(format!("subscribe {} rejected", filter)));
        }
        inner.subscribed.push(filter.to_string());
        Ok(())
    }

    fn unsubscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        let mut inner = self.0.borrow_mut();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        inner.subscribed.retain(|f| f != filter);
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retained: bool,
    ) -> Result<(), TransportError> {
        let mut inner = self.0.borrow_mut();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        let message = Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retained,
        };
        let capacity = inner.outbox_capacity;
        match capacity {
            None => inner.published.push(message),
            Some(limit) if inner.outbox.len() >= limit => {
                return Err(TransportError::Request("request queue full".into()));
            }
            Some(_) => inner.outbox.push_back(message),
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        let mut inner = self.0.borrow_mut();
        let flushed: Vec<Published> = inner.outbox.drain(..).collect();
        inner.published.extend(flushed);
        inner.inbound.drain(..).collect()
    }
}

/// Body that yields `data` and then closes, optionally early.
pub struct ScriptedStream {
    data: Vec<u8>,
    position: usize,
    closes_at: usize,
}

impl ScriptedStream {
    pub fn new(data: Vec<u8>, cut_after: Option<usize>) -> Self {
        let closes_at = cut_after.unwrap_or(data.len()).min(data.len());
        Self {
            data,
            position: 0,
            closes_at,
        }
    }
}

impl ByteStream for ScriptedStream {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        let n = buf.len().min(self.closes_at - self.position);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
    content_length: Option<u64>,
    cut_after: Option<usize>,
}

type RecordedRequest = (String, Vec<(String, String)>);

#[derive(Default)]
struct HttpInner {
    routes: HashMap<String, Route>,
    requests: Vec<RecordedRequest>,
}

#[derive(Clone, Default)]
pub struct FakeHttp(Rc<RefCell<HttpInner>>);

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(&self, url: &str, route: Route) {
        self.0.borrow_mut().routes.insert(url.to_string(), route);
    }

    pub fn respond(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        let body = body.into();
        self.route(
            url,
            Route {
                status,
                content_length: Some(body.len() as u64),
                body,
                cut_after: None,
            },
        );
    }

    /// Announces the full length but closes the stream after `cut_after` bytes.
    pub fn respond_truncated(&self, url: &str, body: Vec<u8>, cut_after: usize) {
        self.route(
            url,
            Route {
                status: 200,
                content_length: Some(body.len() as u64),
                body,
                cut_after: Some(cut_after),
            },
        );
    }

    pub fn respond_unsized(&self, url: &str, body: Vec<u8>) {
        self.route(
            url,
            Route {
                status: 200,
                content_length: None,
                body,
                cut_after: None,
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.0.borrow().requests.clone()
    }
}

impl HttpClient for FakeHttp {
    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpError> {
        let mut inner = self.0.borrow_mut();
        inner.requests.push((
            url.to_string(),
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));

        let route = inner
            .routes
            .get(url)
            .cloned()
            .ok_or_else(|| HttpError::Request(format!("connection refused: {}", url)))?;

        Ok(HttpResponse {
            status: route.status,
            content_length: route.content_length,
            body: Box::new(ScriptedStream::new(route.body, route.cut_after)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashCall {
    Begin(usize),
    Write(usize),
    Finalize,
    Abort,
}

#[derive(Default)]
struct FlashInner {
    calls: Vec<FlashCall>,
    data: Vec<u8>,
    write_limit: Option<usize>,
}

#[derive(Clone, Default)]
pub struct FakeFlash(Rc<RefCell<FlashInner>>);

impl FakeFlash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts at most `limit` bytes per write.
    pub fn limit_writes_to(&self, limit: usize) {
        self.0.borrow_mut().write_limit = Some(limit);
    }

    pub fn calls(&self) -> Vec<FlashCall> {
        self.0.borrow().calls.clone()
    }

    pub fn bytes_written(&self) -> usize {
        self.0.borrow().data.len()
    }
}

impl FirmwareStore for FakeFlash {
    fn begin(&mut self, total: usize) -> Result<(), DriverError> {
        let mut inner = self.0.borrow_mut();
        inner.calls.push(FlashCall::Begin(total));
        inner.data.clear();
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let mut inner = self.0.borrow_mut();
        let accepted = inner.write_limit.map_or(data.len(), |limit| data.len().min(limit));
        inner.calls.push(FlashCall::Write(accepted));
        inner.data.extend_from_slice(&data[..accepted]);
        accepted
    }

    fn finalize(&mut self) -> Result<(), DriverError> {
        self.0.borrow_mut().calls.push(FlashCall::Finalize);
        Ok(())
    }

    fn abort(&mut self) {
        self.0.borrow_mut().calls.push(FlashCall::Abort);
    }
}

#[derive(Clone, Default)]
pub struct FakeSystem(Rc<Cell<u32>>);

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> u32 {
        self.0.get()
    }
}

impl SystemControl for FakeSystem {
    fn restart(&mut self) {
        self.0.set(self.0.get() + 1);
    }

    fn heap_stats(&self) -> Option<HeapStats> {
        Some(HeapStats {
            free: 180_000,
            min_free: 150_000,
            max_alloc: 110_000,
        })
    }
}
