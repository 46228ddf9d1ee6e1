use callisto_mode::CalibrationMode;
use tracing::{debug, info, warn};

use crate::{Connector, LinkError, SerialDeviceConfig, SerialLink};

const IDENTITY_QUERY: &[u8] = b"V?\n";

/// What happened to a relay command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Written to the device. Firmware that does not acknowledge leaves `reply` empty.
    Accepted { reply: Option<String> },
    /// The device answered with its illegal-command marker.
    Rejected { reply: String },
    /// The command never made it to the device.
    TransportFailed,
}

impl RelayOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RelayOutcome::Accepted { .. })
    }
}

/// The Arduino relay box in front of the receiver.
///
/// Every operation opens the serial device, performs one exchange and releases it again;
/// the firmware does not cope with a port held open across retries.
pub struct CalibrationUnit<C = SerialDeviceConfig> {
    connector: C,
    identity: String,
    illegal_marker: String,
}

impl CalibrationUnit {
    pub fn new(config: SerialDeviceConfig) -> Self {
        let identity = config.identity.clone();
        let illegal_marker = config.illegal_marker.clone();

        Self::with_connector(config, identity, illegal_marker)
    }
}

impl<C: Connector> CalibrationUnit<C> {
    pub fn with_connector(
        connector: C,
        identity: impl Into<String>,
        illegal_marker: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            identity: identity.into(),
            illegal_marker: illegal_marker.into(),
        }
    }

    pub fn device(&self) -> String {
        self.connector.name()
    }

    /// True only when the device answers the identity query with exactly the configured
    /// identity string.
    pub fn verify_identity(&self) -> bool {
        match self.exchange(IDENTITY_QUERY) {
            Ok(Some(response)) if response.trim() == self.identity => {
                debug!(device = %self.device(), "calibration unit identified");
                true
            }
            Ok(Some(response)) => {
                warn!(
                    device = %self.device(),
                    response = %response.trim(),
                    expected = %self.identity,
                    "calibration unit reported an unexpected identity"
                );
                false
            }
            Ok(None) => {
                warn!(device = %self.device(), "calibration unit did not answer the identity query");
                false
            }
            Err(error) => {
                warn!(device = %self.device(), %error, "could not query calibration unit identity");
                false
            }
        }
    }

    pub fn set_relay(&self, mode: CalibrationMode) -> RelayOutcome {
        let command = mode.relay_command();

        match self.exchange(command) {
            Ok(Some(reply)) if self.is_illegal(&reply) => {
                warn!(
                    device = %self.device(),
                    %mode,
                    reply = %reply.trim(),
                    "calibration unit refused relay command"
                );
                RelayOutcome::Rejected {
                    reply: reply.trim().to_owned(),
                }
            }
            Ok(reply) => {
                info!(device = %self.device(), %mode, "relay set");
                RelayOutcome::Accepted {
                    reply: reply.map(|reply| reply.trim().to_owned()),
                }
            }
            Err(error) => {
                warn!(
                    device = %self.device(),
                    %mode,
                    %error,
                    "relay command did not reach the calibration unit"
                );
                RelayOutcome::TransportFailed
            }
        }
    }

    fn is_illegal(&self, reply: &str) -> bool {
        !self.illegal_marker.is_empty()
            && reply
                .to_ascii_lowercase()
                .contains(&self.illegal_marker.to_ascii_lowercase())
    }

    /// Open, write, read one line, close. A read timeout after a successful write is not a
    /// transport failure; it yields `None`.
    fn exchange(&self, request: &[u8]) -> Result<Option<String>, LinkError> {
        let mut link = SerialLink::open(&self.connector)?;

        link.write(request)?;

        let response = match link.read_response() {
            Ok(response) => Some(response),
            Err(LinkError::Timeout) => None,
            Err(error) => return Err(error),
        };

        link.close();

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::fake::FakeDevice;

    const IDENTITY: &str = "Version: test unit";

    fn unit(device: &FakeDevice) -> CalibrationUnit<FakeDevice> {
        CalibrationUnit::with_connector(device.clone(), IDENTITY, "illegal")
    }

    #[test]
    fn identity_matches_after_trimming() {
        let device = FakeDevice::default();
        device.reply(b"  Version: test unit\r\n");

        assert!(unit(&device).verify_identity());
        assert_eq!(device.written(), vec![b"V?\n".to_vec()]);
    }

    #[test]
    fn identity_must_match_exactly() {
        let device = FakeDevice::default();
        device.reply(b"Version: test unit v2\n");
        device.reply(b"version: test unit\n");

        let unit = unit(&device);

        assert!(!unit.verify_identity());
        assert!(!unit.verify_identity());
    }

    #[test]
    fn identity_fails_on_silence_or_missing_device() {
        let device = FakeDevice::default();
        let unit = unit(&device);

        assert!(!unit.verify_identity());

        device.unplug();

        assert!(!unit.verify_identity());
    }

    #[test]
    fn each_mode_sends_its_own_command() {
        let device = FakeDevice::default();
        let unit = unit(&device);

        for mode in CalibrationMode::ALL {
            assert!(unit.set_relay(mode).is_success());
        }

        assert_eq!(
            device.written(),
            vec![
                b"Tsky\n".to_vec(),
                b"Tcold\n".to_vec(),
                b"Twarm\n".to_vec(),
                b"Thot\n".to_vec(),
            ]
        );
    }

    #[test]
    fn every_exchange_releases_the_device() {
        let device = FakeDevice::default();
        device.reply(b"garbage\n");
        let unit = unit(&device);

        unit.verify_identity();
        unit.set_relay(CalibrationMode::Hot);
        device.fail_writes(io::ErrorKind::TimedOut);
        unit.set_relay(CalibrationMode::Sky);

        assert_eq!(device.opened(), 3);
        assert_eq!(device.closed(), 3);
    }

    #[test]
    fn illegal_reply_is_a_rejection() {
        let device = FakeDevice::default();
        device.reply(b"ILLEGAL command\n");

        assert_eq!(
            unit(&device).set_relay(CalibrationMode::Warm),
            RelayOutcome::Rejected {
                reply: "ILLEGAL command".into()
            }
        );
    }

    #[test]
    fn acknowledged_reply_is_kept() {
        let device = FakeDevice::default();
        device.reply(b"cold\r\n");

        assert_eq!(
            unit(&device).set_relay(CalibrationMode::Cold),
            RelayOutcome::Accepted {
                reply: Some("cold".into())
            }
        );
    }

    #[test]
    fn transport_failure_is_not_a_rejection() {
        let device = FakeDevice::default();
        device.fail_writes(io::ErrorKind::TimedOut);

        let outcome = unit(&device).set_relay(CalibrationMode::Hot);

        assert_eq!(outcome, RelayOutcome::TransportFailed);
        assert!(!outcome.is_success());
    }

    #[test]
    fn identity_without_line_break_is_accepted() {
        let device = FakeDevice::default();
        device.reply(IDENTITY.as_bytes());

        assert!(unit(&device).verify_identity());
        assert_eq!(device.closed(), 1);
    }
}
