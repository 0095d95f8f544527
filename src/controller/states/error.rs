//! # Error Coordinator
//!
//! Holds the single active fault, retries recovery on a fixed interval and
//! gives up after `max_recovery_attempts`.
//!
//! ```text
//! set_error ──► enter: report ──► every recovery_interval:
//!                                   attempt < max ? recover : escalate
//!                                   recovered     ? back to Idle/Action
//! ```
//!
//! Faults do not queue: a new `set_error` replaces the record and resets the
//! attempt counter. After escalation the coordinator stays put until a new
//! fault arrives or the device is reset.

use crate::clock::{has_elapsed, Millis};
use crate::connection::ConnectionState;
use crate::controller::{DeviceState, Services, StateId, Transition};
use crate::error::{ErrorCategory, ErrorCode};
use crate::mqtt::reports::FaultReport;
use crate::mqtt::topic;
use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub code: ErrorCode,
    pub source: StateId,
    pub message: String,
    pub recovery_attempts: u8,
    pub last_attempt: Millis,
    pub raised_at: DateTime<Local>,
}

#[derive(Debug, Default)]
pub struct ErrorState {
    fault: Option<FaultRecord>,
    escalated: bool,
}

impl ErrorState {
    /// Replaces the active fault and resets recovery.
    pub fn set_error(&mut self, code: ErrorCode, source: StateId, message: String, now: Millis) {
        if let Some(previous) = &self.fault {
            debug!("Replacing fault {} from {}", previous.code, previous.source);
        }
        self.fault = Some(FaultRecord {
            code,
            source,
            message,
            recovery_attempts: 0,
            last_attempt: now,
            raised_at: Local::now(),
        });
        self.escalated = false;
    }

    pub fn fault(&self) -> Option<&FaultRecord> {
        self.fault.as_ref()
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    /// Logs the active fault and publishes it retained when the broker is up.
    pub fn report(&self, services: &mut Services) {
        let Some(fault) = &self.fault else {
            return;
        };
        error!(
            "Error occurred in {}: {} - {}",
            fault.source, fault.code, fault.message
        );
        publish(services, fault, self.escalated);
    }

    fn escalate(&mut self, services: &mut Services) {
        self.escalated = true;
        if let Some(fault) = &self.fault {
            error!(
                "Fault {} unrecoverable after {} attempts, waiting for intervention",
                fault.code, fault.recovery_attempts
            );
            publish(services, fault, true);
        }
    }
}

fn publish(services: &mut Services, fault: &FaultRecord, escalated: bool) {
    if !services.mqtt.is_connected() {
        return;
    }

    let source = fault.source.as_str();
    let mut report = FaultReport::new(fault.code, &fault.message, source, fault.recovery_attempts);
    if escalated {
        report = report.unrecoverable();
    }
    if let Err(e) = services.mqtt.publish_json(topic::ERROR, &report, true) {
        warn!("Failed to publish fault report: {}", e);
    }
}

/// Where a recovered fault resumes.
fn recovery_target(source: StateId) -> StateId {
    match source {
        StateId::Setup | StateId::Idle => StateId::Idle,
        StateId::Action | StateId::Update | StateId::Error => StateId::Action,
    }
}

/// Re-invokes the failed subsystems and reports whether they are up now.
fn attempt_recovery(category: ErrorCategory, services: &mut Services, now: Millis) -> bool {
    if !services.wifi.is_connected() {
        let ready = match services.wifi.state() {
            ConnectionState::Uninitialized => services.wifi.begin().is_ok(),
            _ => true,
        };
        if ready && services.wifi.state() != ConnectionState::Connecting {
            if let Err(e) = services.wifi.connect(now) {
                warn!("Recovery connect failed: {}", e);
            }
        }
        return false;
    }

    if category == ErrorCategory::Connection {
        return true;
    }

    if let Err(e) = services.mqtt.begin().and_then(|_| services.mqtt.connect()) {
        warn!("Recovery broker connect failed: {}", e);
        return false;
    }
    true
}

impl DeviceState for ErrorState {
    fn id(&self) -> StateId {
        StateId::Error
    }

    fn enter(&mut self, services: &mut Services) {
        debug!("Entering ErrorState");
        let now = services.now();
        if let Some(fault) = self.fault.as_mut() {
            fault.last_attempt = now;
        }
        self.report(services);
    }

    fn update(&mut self, services: &mut Services) -> Option<Transition> {
        let now = services.now();

        // Let an in-flight association finish between attempts.
        if let Err(e) = services.wifi.update(now) {
            debug!("Link still failing: {}", e);
        }
        if services.wifi.is_connected() {
            if let Err(e) = services.mqtt.update(now) {
                debug!("Messaging still failing: {}", e);
            }
        }

        if self.escalated {
            return None;
        }

        let max_attempts = services.config.error.max_recovery_attempts;
        let interval = services.config.error.recovery_interval;
        let fault = self.fault.as_mut()?;

        if !has_elapsed(now, fault.last_attempt, interval) {
            return None;
        }

        if fault.recovery_attempts >= max_attempts {
            self.escalate(services);
            return None;
        }

        fault.recovery_attempts += 1;
        fault.last_attempt = now;
        info!(
            "Recovery attempt {}/{} for {}",
            fault.recovery_attempts, max_attempts, fault.code
        );

        let code = fault.code;
        let source = fault.source;
        let attempts = fault.recovery_attempts;

        if attempt_recovery(code.category(), services, now) {
            let target = recovery_target(source);
            info!("Recovered from {}, resuming in {}", code, target);
            return Some(Transition::To(target));
        }

        if attempts >= max_attempts {
            self.escalate(services);
        }
        None
    }

    fn exit(&mut self, _services: &mut Services) {
        debug!("Exiting ErrorState");
    }
}
