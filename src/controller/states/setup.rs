use crate::clock::{has_elapsed, Millis};
use crate::controller::{DeviceState, Services, StateId, Transition};
use crate::error::ErrorCode;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    WifiConnecting,
    MqttConnecting,
    Completed,
    Failed,
}

/// Brings up the link, then the broker session, within `setup_timeout`.
#[derive(Debug)]
pub struct SetupState {
    phase: SetupPhase,
    entered_at: Millis,
}

impl Default for SetupState {
    fn default() -> Self {
        Self {
            phase: SetupPhase::WifiConnecting,
            entered_at: 0,
        }
    }
}

impl SetupState {
    pub fn phase(&self) -> SetupPhase {
        self.phase
    }

    fn fail(&mut self, code: ErrorCode, message: String) -> Option<Transition> {
        error!("Setup failed: {}", message);
        self.phase = SetupPhase::Failed;
        Some(Transition::Fault { code, message })
    }

    fn timed_out(&self, services: &Services, now: Millis) -> bool {
        has_elapsed(now, self.entered_at, services.config.device.setup_timeout)
    }
}

impl DeviceState for SetupState {
    fn id(&self) -> StateId {
        StateId::Setup
    }

    fn enter(&mut self, services: &mut Services) {
        debug!("Entering SetupState");
        let now = services.now();
        self.phase = SetupPhase::WifiConnecting;
        self.entered_at = now;

        match services.wifi.begin() {
            Ok(()) => {
                if let Err(e) = services.wifi.connect(now) {
                    warn!("Connection request failed: {}", e);
                }
            }
            Err(e) => warn!("Connection manager not started: {}", e),
        }
    }

    fn update(&mut self, services: &mut Services) -> Option<Transition> {
        let now = services.now();

        if self.phase == SetupPhase::WifiConnecting {
            if let Err(e) = services.wifi.update(now) {
                return self.fail(e.code(), e.to_string());
            }

            if services.wifi.is_connected() {
                info!("Network up, connecting to broker");
                self.phase = SetupPhase::MqttConnecting;
                if let Err(e) = services.mqtt.begin() {
                    warn!("Messaging manager not started: {}", e);
                }
            } else if self.timed_out(services, now) {
                return self.fail(
                    ErrorCode::WifiConnectionFailed,
                    "Timed out waiting for network connection".to_string(),
                );
            }
        }

        if self.phase == SetupPhase::MqttConnecting {
            if let Err(e) = services.wifi.update(now) {
                return self.fail(e.code(), e.to_string());
            }
            if let Err(e) = services.mqtt.update(now) {
                return self.fail(e.code(), e.to_string());
            }

            if services.mqtt.is_connected() {
                info!("Setup completed");
                self.phase = SetupPhase::Completed;
            } else if self.timed_out(services, now) {
                return self.fail(
                    ErrorCode::MqttConnectionFailed,
                    "Timed out waiting for broker connection".to_string(),
                );
            }
        }

        match self.phase {
            SetupPhase::Completed => Some(Transition::To(StateId::Action)),
            _ => None,
        }
    }

    fn exit(&mut self, _services: &mut Services) {
        debug!("Exiting SetupState");
    }
}
