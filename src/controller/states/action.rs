use crate::controller::{DeviceState, Services, StateId, Transition};
use crate::mqtt::topic;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

const INBOX_CAPACITY: usize = 8;

/// Request accepted on `<device>/config`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceRequest {
    pub check_update: bool,
    pub restart: bool,
}

type Inbox = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// Normal operation: keeps both links serviced, handles remote requests and
/// hands over to Update when a check is due.
#[derive(Default)]
pub struct ActionState {
    inbox: Inbox,
}

impl ActionState {
    fn ensure_request_subscription(&self, services: &mut Services) {
        if !services.mqtt.is_connected() {
            return;
        }

        let filter = topic::resolve(services.mqtt.device_topic(), topic::CONFIG, false);
        if services.mqtt.is_subscribed(&filter) {
            return;
        }

        let inbox = self.inbox.clone();
        let result = services.mqtt.subscribe(&filter, move |_, payload| {
            let mut queue = inbox.borrow_mut();
            if queue.len() >= INBOX_CAPACITY {
                warn!("Request inbox full, dropping oldest request");
                queue.pop_front();
            }
            queue.push_back(payload.to_vec());
        });

        if let Err(e) = result {
            warn!("Request topic unavailable: {}", e);
        }
    }

    fn handle_requests(&self, services: &mut Services) {
        let pending: Vec<Vec<u8>> = self.inbox.borrow_mut().drain(..).collect();
        for payload in pending {
            let request: DeviceRequest = match serde_json::from_slice(&payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Ignoring malformed request: {}", e);
                    continue;
                }
            };
            debug!("Request received: {:?}", request);

            if request.check_update {
                info!("Update check requested");
                services.update_requested = true;
            }
            if request.restart {
                info!("Restart requested remotely");
                services.system.restart();
            }
        }
    }
}

impl DeviceState for ActionState {
    fn id(&self) -> StateId {
        StateId::Action
    }

    fn enter(&mut self, services: &mut Services) {
        debug!("Entering ActionState");
        self.ensure_request_subscription(services);
    }

    fn update(&mut self, services: &mut Services) -> Option<Transition> {
        let now = services.now();

        if let Err(e) = services.wifi.update(now) {
            return Some(Transition::fault(e.code(), e.to_string()));
        }
        if !services.wifi.is_connected() {
            warn!("Network lost, waiting for reconnect");
            return Some(Transition::To(StateId::Idle));
        }

        if let Err(e) = services.mqtt.update(now) {
            error!("Messaging unavailable: {}", e);
            return Some(Transition::fault(e.code(), e.to_string()));
        }

        self.ensure_request_subscription(services);
        self.handle_requests(services);

        if services.update_check_due(now) {
            return Some(Transition::To(StateId::Update));
        }

        None
    }

    fn exit(&mut self, _services: &mut Services) {
        debug!("Exiting ActionState");
    }
}
