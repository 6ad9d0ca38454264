use sortgate_control::AckStatus;
use sortgate_frame::{decode_ack, encode_command, ChannelError, FrameChannel};

use crate::cmd::ActuateArgs;
use crate::exit::{
    channel_error, transport_error, validation_error, CliResult, FAILURE, SUCCESS, TIMEOUT,
};
use crate::output::{print_ack, AckOutput, OutputFormat};

pub fn run(args: ActuateArgs, format: OutputFormat) -> CliResult<i32> {
    let codec = args.framing.codec_config()?;
    // Reject the category before touching the port.
    let command = encode_command(&args.category, &codec.categories)
        .map_err(|err| validation_error("actuate", err))?;

    let mut channel = FrameChannel::open(
        &args.link.port,
        args.link.baud,
        args.link.channel_config(&args.framing)?,
    )
    .map_err(|err| transport_error("open failed", err))?;

    channel
        .discard_input()
        .map_err(|err| channel_error("discard failed", err))?;
    channel
        .write_line(&command)
        .map_err(|err| channel_error("command failed", err))?;

    let ack = match decode_ack(&mut channel, codec.ack_timeout) {
        Ok(ack) if ack.matches(&args.category) => AckStatus::Confirmed {
            text: ack.text().to_string(),
        },
        Ok(ack) => AckStatus::Mismatch {
            text: ack.text().to_string(),
        },
        Err(ChannelError::Timeout { .. }) => AckStatus::Missing,
        Err(err) => return Err(channel_error("ack failed", err)),
    };
    channel
        .close()
        .map_err(|err| channel_error("close failed", err))?;

    print_ack(
        &AckOutput {
            category: &args.category,
            ack: &ack,
        },
        format,
    );
    Ok(exit_code(&ack))
}

fn exit_code(ack: &AckStatus) -> i32 {
    match ack {
        AckStatus::Confirmed { .. } => SUCCESS,
        AckStatus::Mismatch { .. } => FAILURE,
        AckStatus::Missing => TIMEOUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_status_sets_exit_code() {
        assert_eq!(
            exit_code(&AckStatus::Confirmed {
                text: "Gate:paper".into()
            }),
            SUCCESS
        );
        assert_eq!(
            exit_code(&AckStatus::Mismatch {
                text: "Gate:plastic".into()
            }),
            FAILURE
        );
        assert_eq!(exit_code(&AckStatus::Missing), TIMEOUT);
    }
}
