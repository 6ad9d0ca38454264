use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use sortgate_frame::{CategorySet, ChannelConfig, CodecConfig, DEFAULT_MAX_PAYLOAD};

use crate::exit::{validation_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod actuate;
pub mod capture;
pub mod ports;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the capture/classify/actuate loop.
    Run(RunArgs),
    /// Capture one frame and save it.
    Capture(CaptureArgs),
    /// Send one gate command and print the ack.
    Actuate(ActuateArgs),
    /// List serial ports.
    Ports(PortsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Capture(args) => capture::run(args, format),
        Command::Actuate(args) => actuate::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Serial link options shared by every command that opens a port.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Serial device (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, short = 'p', env = "SORTGATE_PORT")]
    pub port: String,
    /// Baud rate.
    #[arg(long, env = "SORTGATE_BAUD", default_value_t = sortgate_transport::DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Wait after opening before the first command (e.g. 2s, 0ms).
    #[arg(long, env = "SORTGATE_SETTLE", default_value = "2s")]
    pub settle: String,
}

impl LinkArgs {
    /// Channel config sized to hold a whole data line of `max_payload` bytes.
    pub fn channel_config(&self, framing: &FramingArgs) -> CliResult<ChannelConfig> {
        Ok(ChannelConfig {
            settle: parse_duration(&self.settle)?,
            max_line_len: framing.max_payload.saturating_add(64),
            ..ChannelConfig::default()
        })
    }
}

/// Capture framing options.
#[derive(Args, Debug)]
pub struct FramingArgs {
    /// Wait for each header line (e.g. 3s).
    #[arg(long, env = "SORTGATE_HEADER_TIMEOUT", default_value = "3s")]
    pub header_timeout: String,
    /// Wait for the whole payload after the size header (e.g. 10s).
    #[arg(long, env = "SORTGATE_PAYLOAD_TIMEOUT", default_value = "10s")]
    pub payload_timeout: String,
    /// Wait for the gate ack (e.g. 6s).
    #[arg(long, env = "SORTGATE_ACK_TIMEOUT", default_value = "6s")]
    pub ack_timeout: String,
    /// Largest accepted declared image size in bytes.
    #[arg(long, env = "SORTGATE_MAX_PAYLOAD", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
    /// Accepted gate categories (comma-separated).
    #[arg(long, env = "SORTGATE_CATEGORIES", default_value = "plastic,paper,Aluminium")]
    pub categories: String,
}

impl FramingArgs {
    pub fn codec_config(&self) -> CliResult<CodecConfig> {
        Ok(CodecConfig {
            header_timeout: parse_timeout(&self.header_timeout)?,
            payload_timeout: parse_timeout(&self.payload_timeout)?,
            ack_timeout: parse_timeout(&self.ack_timeout)?,
            max_payload_size: self.max_payload,
            categories: self.category_set()?,
        })
    }

    pub fn category_set(&self) -> CliResult<CategorySet> {
        self.categories
            .parse()
            .map_err(|err| validation_error("--categories", err))
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[command(flatten)]
    pub framing: FramingArgs,
    /// Minimum classifier confidence to actuate, exclusive.
    #[arg(long, short = 't', env = "SORTGATE_THRESHOLD", default_value_t = sortgate_control::DEFAULT_THRESHOLD)]
    pub threshold: f64,
    /// Classifier program; gets a PNG on stdin, prints {"label","confidence"}.
    #[arg(long, env = "SORTGATE_CLASSIFIER")]
    pub classifier_cmd: String,
    /// Kill a classifier run that takes longer than this (e.g. 30s).
    #[arg(long, env = "SORTGATE_CLASSIFIER_TIMEOUT", default_value = "30s")]
    pub classifier_timeout: String,
    /// Stop after N cycles.
    #[arg(long, short = 'n')]
    pub count: Option<u64>,
    /// Pause between cycles (e.g. 500ms).
    #[arg(long, env = "SORTGATE_INTERVAL", default_value = "0s")]
    pub interval: String,
    /// Give up after N consecutive cycles with the link gone (0 = never).
    #[arg(long, env = "SORTGATE_LINK_LOSS_LIMIT", default_value_t = sortgate_control::DEFAULT_LINK_LOSS_LIMIT)]
    pub link_loss_limit: u32,
    /// Write each decoded frame to DIR/cycle-<n>.png.
    #[arg(long, value_name = "DIR")]
    pub save_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[command(flatten)]
    pub framing: FramingArgs,
    /// Write the payload here instead of only reporting its size.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ActuateArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[command(flatten)]
    pub framing: FramingArgs,
    /// Gate category to open.
    pub category: String,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds. Zero is allowed.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Like [`parse_duration`], but a timeout of zero is rejected.
pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let timeout = parse_duration(input)?;
    if timeout.is_zero() {
        return Err(CliError::usage("timeout must be greater than zero"));
    }
    Ok(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::USAGE;
    use sortgate_frame::DEFAULT_SETTLE;

    #[test]
    fn durations_accept_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("0ms").unwrap(), Duration::ZERO);
    }

    #[test]
    fn bad_durations_are_usage_errors() {
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("fast").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("-1s").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("0s").unwrap_err().code, USAGE);
    }

    #[test]
    fn framing_defaults_match_library_defaults() {
        let framing = FramingArgs {
            header_timeout: "3s".into(),
            payload_timeout: "10s".into(),
            ack_timeout: "6s".into(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            categories: "plastic,paper,Aluminium".into(),
        };
        let codec = framing.codec_config().unwrap();
        let defaults = CodecConfig::default();
        assert_eq!(codec.header_timeout, defaults.header_timeout);
        assert_eq!(codec.payload_timeout, defaults.payload_timeout);
        assert_eq!(codec.ack_timeout, defaults.ack_timeout);
        assert_eq!(codec.categories, defaults.categories);

        let link = LinkArgs {
            port: "/dev/null".into(),
            baud: 115_200,
            settle: "2s".into(),
        };
        let channel = link.channel_config(&framing).unwrap();
        assert_eq!(channel.settle, DEFAULT_SETTLE);
        assert_eq!(channel.max_line_len, ChannelConfig::default().max_line_len);
    }

    #[test]
    fn bad_category_list_is_usage_error() {
        let framing = FramingArgs {
            header_timeout: "3s".into(),
            payload_timeout: "10s".into(),
            ack_timeout: "6s".into(),
            max_payload: 1024,
            categories: "plastic,,paper".into(),
        };
        assert_eq!(framing.category_set().unwrap_err().code, USAGE);
    }
}
