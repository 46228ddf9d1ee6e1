use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use callisto_mode::CalibrationMode;
use callisto_serial::SerialDeviceConfig;
use color_eyre::eyre::{Context as _, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where a running calibration accepts `cancel` requests. Disabled when absent.
    pub cancel_listener: Option<SocketAddr>,
    pub instrument: InstrumentConfig,
    pub calibration_unit: SerialDeviceConfig,
    pub output: OutputConfig,
    pub timeouts: Timeouts,
}

impl Config {
    /// Reads the configuration at `path`, or the built-in defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read configuration {}", path.display()))?;

        toml::from_str(&text)
            .wrap_err_with(|| format!("failed to parse configuration {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstrumentConfig {
    /// Address of the instrument's control listener. Resolved to this machine's outbound
    /// address when absent.
    pub host: Option<IpAddr>,
    pub port: u16,
    pub executable: PathBuf,
    /// Process name as it appears in the host process table.
    pub binary_name: String,
    pub config_root: PathBuf,
    pub mode_case: ModeCase,
    pub service: String,
    /// Program and leading arguments used to start or stop `service`.
    pub service_manager: Vec<String>,
    /// Output the instrument prints when the receiver it found is not the expected one.
    pub wrong_device_marker: String,
    /// How long a fresh launch is watched for an early exit.
    #[serde(with = "humantime_serde")]
    pub launch_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub relaunch_delay: Duration,
    /// Upper bound on waiting for stray instances to exit after a stop.
    #[serde(with = "humantime_serde")]
    pub stop_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_retry_interval: Duration,
    pub commands: CommandSet,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 6789,
            executable: PathBuf::from("/usr/sbin/callisto"),
            binary_name: "callisto".into(),
            config_root: PathBuf::from("/etc/callisto"),
            mode_case: ModeCase::Upper,
            service: "callisto.service".into(),
            service_manager: vec!["sudo".into(), "/bin/systemctl".into()],
            wrong_device_marker: "wrong device".into(),
            launch_grace: Duration::from_secs(2),
            relaunch_delay: Duration::from_secs(5),
            stop_wait: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(1),
            connect_retry_interval: Duration::from_secs(1),
            commands: CommandSet::default(),
        }
    }
}

impl InstrumentConfig {
    /// `<config-root>/<binary-name>_<MODE>.cfg`
    pub fn mode_config_path(&self, mode: CalibrationMode) -> PathBuf {
        let mode = match self.mode_case {
            ModeCase::Upper => mode.as_str().to_owned(),
            ModeCase::Lower => mode.as_str().to_ascii_lowercase(),
        };

        self.config_root
            .join(format!("{}_{mode}.cfg", self.binary_name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeCase {
    Upper,
    Lower,
}

/// Words understood by the instrument's control listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandSet {
    pub fits: String,
    pub overview: String,
    pub stop: String,
    pub quit: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            fits: "start".into(),
            overview: "overview".into(),
            stop: "stop".into(),
            quit: "quit".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub overview_dir: PathBuf,
    pub overview_pattern: String,
    pub data_dir: PathBuf,
    pub fits_pattern: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            overview_dir: PathBuf::from("/var/lib/callisto/overview"),
            overview_pattern: "*.PRN".into(),
            data_dir: PathBuf::from("/var/lib/callisto/data"),
            fits_pattern: "*.fit".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    #[serde(with = "humantime_serde")]
    pub overview: Duration,
    #[serde(with = "humantime_serde")]
    pub fits: Duration,
    /// Pause between identity queries while waiting for the calibration unit.
    #[serde(with = "humantime_serde")]
    pub ready_interval: Duration,
    pub ready_attempts: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            overview: Duration::from_secs(180),
            fits: Duration::from_secs(1200),
            ready_interval: Duration::from_secs(1),
            ready_attempts: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.instrument.port, 6789);
        assert_eq!(config.calibration_unit.baud_rate, 9600);
        assert_eq!(config.timeouts.fits, Duration::from_secs(1200));
        assert_eq!(config.cancel_listener, None);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            cancel_listener = "127.0.0.1:6970"

            [instrument]
            host = "192.168.0.20"
            stop_wait = "30s"

            [instrument.commands]
            fits = "begin"

            [calibration_unit]
            path = "/dev/ttyUSB1"
            parity = "even"
            timeout = "500ms"

            [timeouts]
            overview = "3m"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.cancel_listener,
            Some("127.0.0.1:6970".parse().unwrap())
        );
        assert_eq!(
            config.instrument.host,
            Some("192.168.0.20".parse().unwrap())
        );
        assert_eq!(config.instrument.stop_wait, Duration::from_secs(30));
        assert_eq!(config.instrument.commands.fits, "begin");
        assert_eq!(config.instrument.commands.quit, "quit");
        assert_eq!(config.calibration_unit.path, PathBuf::from("/dev/ttyUSB1"));
        assert_eq!(config.calibration_unit.parity, callisto_serial::Parity::Even);
        assert_eq!(config.calibration_unit.timeout, Duration::from_millis(500));
        assert_eq!(config.timeouts.overview, Duration::from_secs(180));
        assert_eq!(config.timeouts.ready_attempts, 10);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_serial_framing() {
        assert!(toml::from_str::<Config>("[instrument]\nprot = 1").is_err());
        assert!(toml::from_str::<Config>("[calibration_unit]\ndata_bits = 9").is_err());
        assert!(toml::from_str::<Config>("[calibration_unit]\nstop_bits = 3").is_err());
    }

    #[test]
    fn mode_config_path_follows_convention() {
        let mut instrument = InstrumentConfig::default();

        assert_eq!(
            instrument.mode_config_path(CalibrationMode::Cold),
            PathBuf::from("/etc/callisto/callisto_COLD.cfg")
        );

        instrument.mode_case = ModeCase::Lower;

        assert_eq!(
            instrument.mode_config_path(CalibrationMode::Sky),
            PathBuf::from("/etc/callisto/callisto_sky.cfg")
        );
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nfits_pattern = \"*.fits\"").unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.output.fits_pattern, "*.fits");
        assert_eq!(Config::load(None).unwrap(), Config::default());
        assert!(Config::load(Some(Path::new("/nonexistent/callisto.toml"))).is_err());
    }
}
