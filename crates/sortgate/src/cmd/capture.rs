use sortgate_frame::{decode_capture_response, encode_capture_request, FrameChannel};

use crate::cmd::CaptureArgs;
use crate::exit::{capture_error, channel_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_capture, CaptureOutput, OutputFormat};

pub fn run(args: CaptureArgs, format: OutputFormat) -> CliResult<i32> {
    let codec = args.framing.codec_config()?;
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
        .write_line(&encode_capture_request())
        .map_err(|err| channel_error("capture request failed", err))?;
    let payload = decode_capture_response(&mut channel, &codec)
        .map_err(|err| capture_error("capture failed", err))?;
    channel
        .close()
        .map_err(|err| channel_error("close failed", err))?;

    if let Some(path) = &args.out {
        std::fs::write(path, payload.as_bytes())
            .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
    }

    print_capture(
        &CaptureOutput {
            port: &args.link.port,
            size: payload.len(),
            path: args.out.as_ref().map(|p| p.display().to_string()),
        },
        payload.as_bytes(),
        format,
    );
    Ok(SUCCESS)
}
