use crate::clock::{has_elapsed, Millis};
use crate::controller::{DeviceState, Services, StateId, Transition};
use tracing::{debug, info};

/// Degraded-connectivity wait. Lets the managers reconnect on their own and
/// falls back to a fresh Setup if that takes longer than `reconnect_interval`.
#[derive(Debug, Default)]
pub struct IdleState {
    entered_at: Millis,
}

impl DeviceState for IdleState {
    fn id(&self) -> StateId {
        StateId::Idle
    }

    fn enter(&mut self, services: &mut Services) {
        debug!("Entering IdleState");
        self.entered_at = services.now();
    }

    fn update(&mut self, services: &mut Services) -> Option<Transition> {
        let now = services.now();

        if let Err(e) = services.wifi.update(now) {
            return Some(Transition::fault(e.code(), e.to_string()));
        }

        if services.wifi.is_connected() {
            if let Err(e) = services.mqtt.update(now) {
                return Some(Transition::fault(e.code(), e.to_string()));
            }
            if services.mqtt.is_connected() {
                info!("Connectivity restored");
                return Some(Transition::To(StateId::Action));
            }
        }

        if has_elapsed(now, self.entered_at, services.config.wifi.reconnect_interval) {
            info!("Connectivity not restored, restarting setup");
            return Some(Transition::To(StateId::Setup));
        }

        None
    }

    fn exit(&mut self, _services: &mut Services) {
        debug!("Exiting IdleState");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::LinkStatus;
    use crate::testing::{connected_config, Rig};

    #[test]
    fn falls_back_to_setup_when_link_stays_down() {
        let rig = Rig::new();
        let config = connected_config();
        let interval = config.wifi.reconnect_interval;
        let mut services = rig.services(config);
        let mut idle = IdleState::default();
        idle.enter(&mut services);

        rig.clock.advance(interval - 1);
        assert_eq!(idle.update(&mut services), None);
        rig.clock.advance(1);
        assert_eq!(idle.update(&mut services), Some(Transition::To(StateId::Setup)));
    }

    #[test]
    fn returns_to_action_once_both_links_are_up() {
        let rig = Rig::new();
        let mut services = rig.services(connected_config());
        services.wifi.begin().unwrap();
        services.wifi.connect(0).unwrap();
        services.mqtt.begin().unwrap();
        rig.wifi.set_status(LinkStatus::Connected);

        let mut idle = IdleState::default();
        idle.enter(&mut services);
        rig.clock.advance(10);
        assert_eq!(idle.update(&mut services), Some(Transition::To(StateId::Action)));
    }
}
