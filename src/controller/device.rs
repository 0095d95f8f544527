use super::states::{ActionState, ErrorState, IdleState, SetupState, UpdateState};
use super::{DeviceState, Services, StateId, Transition};
use crate::clock::{has_elapsed, Millis};
use crate::error::ErrorCode;
use crate::mqtt::reports::StatusReport;
use crate::mqtt::topic;
use crate::ota::version::CURRENT_VERSION;
use tracing::{debug, info, warn};

/// One instance per state, reused across transitions.
#[derive(Default)]
struct StateSet {
    setup: SetupState,
    idle: IdleState,
    action: ActionState,
    error: ErrorState,
    update: UpdateState,
}

impl StateSet {
    fn get_mut(&mut self, id: StateId) -> &mut dyn DeviceState {
        match id {
            StateId::Setup => &mut self.setup,
            StateId::Idle => &mut self.idle,
            StateId::Action => &mut self.action,
            StateId::Error => &mut self.error,
            StateId::Update => &mut self.update,
        }
    }
}

pub struct Device {
    services: Services,
    states: StateSet,
    active: Option<StateId>,
    last_status_update: Millis,
}

impl Device {
    pub fn new(services: Services) -> Self {
        let last_status_update = services.now();
        Self {
            services,
            states: StateSet::default(),
            active: None,
            last_status_update,
        }
    }

    /// Enters the first state of the lifecycle.
    pub fn start(&mut self) {
        self.change_state(StateId::Setup);
    }

    /// Exits the active state, then enters `next`.
    pub fn change_state(&mut self, next: StateId) {
        if let Some(current) = self.active {
            self.states.get_mut(current).exit(&mut self.services);
            info!("State change: {} -> {}", current, next);
        } else {
            info!("Entering initial state {}", next);
        }

        self.active = Some(next);
        self.states.get_mut(next).enter(&mut self.services);
    }

    pub fn tick(&mut self) {
        let Some(id) = self.active else {
            return;
        };

        match self.states.get_mut(id).update(&mut self.services) {
            Some(Transition::To(next)) => self.change_state(next),
            Some(Transition::Fault { code, message }) => self.enter_error(id, code, message),
            None => {}
        }

        let now = self.services.now();
        if has_elapsed(
            now,
            self.last_status_update,
            self.services.config.device.status_update_interval,
        ) {
            self.send_status(now);
            self.last_status_update = now;
        }
    }

    /// Injects a fault from outside the state machine.
    pub fn raise_fault(&mut self, code: ErrorCode, message: impl Into<String>) {
        let source = self.active.unwrap_or(StateId::Setup);
        self.enter_error(source, code, message.into());
    }

    fn enter_error(&mut self, source: StateId, code: ErrorCode, message: String) {
        let now = self.services.now();
        self.states.error.set_error(code, source, message, now);

        if self.active == Some(StateId::Error) {
            // Already in Error: the record was replaced, report it again.
            self.states.error.report(&mut self.services);
        } else {
            self.change_state(StateId::Error);
        }
    }

    fn send_status(&mut self, now: Millis) {
        let state = self.active.map_or("UNKNOWN", StateId::as_str);
        let report = StatusReport {
            status: "online",
            uptime: now,
            rssi: self.services.wifi.rssi(),
            state,
            version: CURRENT_VERSION,
            heap: self.services.system.heap_stats(),
        };

        match serde_json::to_string(&report) {
            Ok(payload) => debug!("Status: {}", payload),
            Err(e) => warn!("Failed to encode status: {}", e),
        }

        if self.services.mqtt.is_connected() {
            if let Err(e) = self.services.mqtt.publish_json(topic::STATUS, &report, true) {
                warn!("Failed to publish status: {}", e);
            }
        }
    }

    pub fn active_state(&self) -> Option<StateId> {
        self.active
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }

    pub fn error_state(&self) -> &ErrorState {
        &self.states.error
    }

    pub fn update_state(&self) -> &UpdateState {
        &self.states.update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::states::UpdatePhase;
    use crate::hal::LinkStatus;
    use crate::testing::{connected_config, FlashCall, Rig};
    use serde_json::json;

    fn run(device: &mut Device, rig: &Rig, ms: u32, step: u32) {
        let mut elapsed = 0;
        while elapsed < ms {
            rig.clock.advance(step);
            device.tick();
            elapsed += step;
        }
    }

    #[test]
    fn tick_without_state_is_a_noop() {
        let rig = Rig::new();
        let mut device = Device::new(rig.services(connected_config()));
        rig.clock.advance(120_000);
        device.tick();
        assert_eq!(device.active_state(), None);
        assert!(rig.transport.published().is_empty());
    }

    #[test]
    fn boots_through_setup_into_action() {
        let rig = Rig::new();
        rig.wifi.connect_on_begin(true);
        let mut device = Device::new(rig.services(connected_config()));
        device.start();
        run(&mut device, &rig, 100, 10);

        assert_eq!(device.active_state(), Some(StateId::Action));
        assert!(rig.transport.subscribed().iter().any(|f| f.ends_with("/config")));
    }

    #[test]
    fn empty_ssid_times_out_into_wifi_connection_failed() {
        let rig = Rig::new();
        let mut config = connected_config();
        config.wifi.ssid.clear();
        let timeout = config.device.setup_timeout;
        let mut device = Device::new(rig.services(config));
        device.start();

        run(&mut device, &rig, timeout - 10, 10);
        assert_eq!(device.active_state(), Some(StateId::Setup));
        assert_eq!(rig.wifi.begin_calls(), 0);

        run(&mut device, &rig, 20, 10);
        assert_eq!(device.active_state(), Some(StateId::Error));
        let fault = device.error_state().fault().unwrap();
        assert_eq!(fault.code, ErrorCode::WifiConnectionFailed);
        assert_eq!(fault.source, StateId::Setup);
    }

    #[test]
    fn heartbeat_is_published_retained_on_interval() {
        let rig = Rig::new();
        rig.wifi.connect_on_begin(true);
        let config = connected_config();
        let interval = config.device.status_update_interval;
        let mut device = Device::new(rig.services(config));
        device.start();

        run(&mut device, &rig, interval, 10);
        let status = rig.transport.published_on("/status");
        assert_eq!(status.len(), 1);
        assert!(status[0].retained);
        let body: serde_json::Value = serde_json::from_slice(&status[0].payload).unwrap();
        assert_eq!(body["status"], json!("online"));
        assert_eq!(body["state"], json!("ACTION"));
    }

    #[test]
    fn raise_fault_while_in_error_overwrites_and_rereports() {
        let rig = Rig::new();
        rig.wifi.connect_on_begin(true);
        let mut device = Device::new(rig.services(connected_config()));
        device.start();
        run(&mut device, &rig, 50, 10);

        device.raise_fault(ErrorCode::MqttPublishFailed, "first");
        run(&mut device, &rig, 2_000, 10);
        device.raise_fault(ErrorCode::SensorReadFailed, "second");

        assert_eq!(device.active_state(), Some(StateId::Error));
        let fault = device.error_state().fault().unwrap();
        assert_eq!(fault.message, "second");
        assert_eq!(fault.recovery_attempts, 0);

        let reports = rig.transport.published_on("/error");
        let last: serde_json::Value =
            serde_json::from_slice(&reports.last().unwrap().payload).unwrap();
        assert_eq!(last["message"], json!("second"));
        assert_eq!(last["error"], json!("SENSOR_READ_FAILED"));
    }

    #[test]
    fn lost_link_drops_action_to_idle() {
        let rig = Rig::new();
        rig.wifi.connect_on_begin(true);
        let mut device = Device::new(rig.services(connected_config()));
        device.start();
        run(&mut device, &rig, 50, 10);
        assert_eq!(device.active_state(), Some(StateId::Action));

        rig.wifi.set_status(LinkStatus::Disconnected);
        run(&mut device, &rig, 20, 10);
        assert_eq!(device.active_state(), Some(StateId::Idle));
    }

    #[test]
    fn interrupted_download_aborts_and_lands_in_error() {
        let rig = Rig::new();
        rig.wifi.connect_on_begin(true);
        let mut config = connected_config();
        config.update.api_url = "https://api.example/releases/latest".into();
        config.update.chunk_size = 128;
        let release = json!({
            "tag_name": "v9.0.0",
            "assets": [{"name": "firmware.bin", "browser_download_url": "https://dl.example/fw"}]
        });
        rig.http
            .respond(&config.update.api_url, 200, release.to_string());
        rig.http
            .respond_truncated("https://dl.example/fw", vec![0xA5; 10_000], 5_000);

        let mut device = Device::new(rig.services(config));
        device.start();

        let mut saw_failed = false;
        for _ in 0..500 {
            rig.clock.advance(10);
            device.tick();
            if device.update_state().phase() == Some(UpdatePhase::Failed) {
                saw_failed = true;
            }
            if device.active_state() == Some(StateId::Error) {
                break;
            }
        }

        assert!(saw_failed);
        assert_eq!(device.active_state(), Some(StateId::Error));
        let fault = device.error_state().fault().unwrap();
        assert_eq!(fault.code, ErrorCode::UpdateFailed);
        assert_eq!(fault.source, StateId::Update);

        let calls = rig.flash.calls();
        assert_eq!(calls.first(), Some(&FlashCall::Begin(10_000)));
        assert!(!calls.contains(&FlashCall::Finalize));
        assert_eq!(calls.last(), Some(&FlashCall::Abort));
        assert_eq!(rig.flash.bytes_written(), 5_000);
        assert_eq!(rig.system.restarts(), 0);
    }

    #[test]
    fn successful_update_finalizes_and_restarts() {
        let rig = Rig::new();
        rig.wifi.connect_on_begin(true);
        let mut config = connected_config();
        config.update.api_url = "https://api.example/releases/latest".into();
        let release = json!({
            "tag_name": "v9.0.0",
            "assets": [{"name": "firmware.bin", "browser_download_url": "https://dl.example/fw"}]
        });
        rig.http
            .respond(&config.update.api_url, 200, release.to_string());
        rig.http.respond("https://dl.example/fw", 200, vec![7u8; 3_000]);

        let mut device = Device::new(rig.services(config));
        device.start();
        run(&mut device, &rig, 1_000, 10);

        assert_eq!(rig.system.restarts(), 1);
        assert!(rig.flash.calls().contains(&FlashCall::Finalize));
        assert_eq!(rig.flash.bytes_written(), 3_000);

        let progress: Vec<serde_json::Value> = rig
            .transport
            .published_on("/update")
            .iter()
            .map(|p| serde_json::from_slice(&p.payload).unwrap())
            .collect();
        assert!(progress.iter().any(|p| p["progress"] == json!(100)));
        assert!(progress.iter().all(|p| p.get("version").is_none()
            || p["version"] == json!("v9.0.0")));
    }

    #[test]
    fn up_to_date_release_returns_to_action() {
        let rig = Rig::new();
        rig.wifi.connect_on_begin(true);
        let mut config = connected_config();
        config.update.api_url = "https://api.example/releases/latest".into();
        let release = json!({
            "tag_name": format!("v{}", CURRENT_VERSION),
            "assets": [{"name": "firmware.bin", "browser_download_url": "https://dl.example/fw"}]
        });
        rig.http
            .respond(&config.update.api_url, 200, release.to_string());

        let mut device = Device::new(rig.services(config));
        device.start();
        run(&mut device, &rig, 200, 10);

        assert_eq!(device.active_state(), Some(StateId::Action));
        assert_eq!(rig.http.requests().len(), 1);
        assert!(rig.flash.calls().is_empty());
    }
}
