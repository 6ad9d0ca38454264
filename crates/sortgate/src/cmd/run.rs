use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sortgate_control::{
    ControlLoop, CycleReport, ExitReason, JpegDecoder, LoopConfig, Pipeline, PixelBuffer,
    ProcessClassifier,
};
use tracing::{debug, warn};

use crate::cmd::{parse_duration, parse_timeout, RunArgs};
use crate::exit::{
    control_error, io_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR,
};
use crate::output::{print_cycle, print_summary, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let classifier = ProcessClassifier::from_command_line(&args.classifier_cmd)
        .ok_or_else(|| CliError::usage("--classifier-cmd must name a program"))?
        .with_timeout(parse_timeout(&args.classifier_timeout)?);
    let config = LoopConfig {
        threshold: args.threshold,
        codec: args.framing.codec_config()?,
        max_cycles: args.count,
        interval: parse_duration(&args.interval)?,
        link_loss_limit: args.link_loss_limit,
    };
    if let Some(dir) = &args.save_dir {
        std::fs::create_dir_all(dir)
            .map_err(|err| io_error(&format!("cannot create {}", dir.display()), err))?;
    }

    let control = ControlLoop::connect(
        &args.link.port,
        args.link.baud,
        args.link.channel_config(&args.framing)?,
        config,
    )
    .map_err(|err| control_error("connect failed", err))?;

    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(stop.clone())?;

    let decoder = JpegDecoder;
    let pipeline = Pipeline::new(&decoder, &classifier);
    let save_dir = args.save_dir;
    let mut observer = |report: &CycleReport, frame: Option<&PixelBuffer>| {
        print_cycle(report, format);
        if let (Some(dir), Some(frame)) = (save_dir.as_deref(), frame) {
            save_frame(dir, report.cycle, frame);
        }
    };

    let summary = control
        .run(&pipeline, &stop, &mut observer)
        .map_err(|err| control_error("control loop failed", err))?;
    print_summary(&summary, format);

    Ok(match summary.exit {
        ExitReason::LinkLost => TRANSPORT_ERROR,
        ExitReason::Stopped | ExitReason::CycleLimit => SUCCESS,
    })
}

fn frame_path(dir: &Path, cycle: u64) -> PathBuf {
    dir.join(format!("cycle-{cycle}.png"))
}

/// Best effort: failures are logged and the loop carries on.
fn save_frame(dir: &Path, cycle: u64, frame: &PixelBuffer) {
    let path = frame_path(dir, cycle);
    let written = frame
        .to_png()
        .map_err(|err| err.to_string())
        .and_then(|png| std::fs::write(&path, png).map_err(|err| err.to_string()));
    match written {
        Ok(()) => debug!(path = %path.display(), "frame saved"),
        Err(err) => warn!(path = %path.display(), %err, "could not save frame"),
    }
}

fn install_ctrlc_handler(stop: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_numbered_by_cycle() {
        assert_eq!(
            frame_path(Path::new("/tmp/frames"), 12),
            PathBuf::from("/tmp/frames/cycle-12.png")
        );
    }

    #[test]
    fn saved_frame_is_png() {
        let dir = std::env::temp_dir().join(format!("sortgate-save-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let frame = PixelBuffer::from_rgb(2, 1, vec![255, 0, 0, 0, 255, 0]).unwrap();

        save_frame(&dir, 1, &frame);

        let bytes = std::fs::read(frame_path(&dir, 1)).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
