//! Collaborators the control loop drives once a payload has arrived.

use std::io::Cursor;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::control::CycleReport;
use crate::error::{ClassifyError, DecodeError};
use crate::gate::ClassificationResult;

/// Decoded frame as packed RGB8 rows.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap packed RGB8 pixels. Returns `None` when the length does not
    /// match `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, rgb: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        (rgb.len() == expected).then_some(Self { width, height, rgb })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// Encode as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        PngEncoder::new(&mut out).write_image(
            &self.rgb,
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(out.into_inner())
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgb.len())
            .finish()
    }
}

/// Turns encoded image bytes into pixels.
pub trait ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer, DecodeError>;
}

/// Labels a decoded frame.
pub trait Classifier {
    fn classify(&self, frame: &PixelBuffer) -> Result<ClassificationResult, ClassifyError>;
}

/// Receives every finished cycle, with the frame when one was decoded.
pub trait CycleObserver {
    fn on_cycle(&mut self, report: &CycleReport, frame: Option<&PixelBuffer>);
}

impl<F> CycleObserver for F
where
    F: FnMut(&CycleReport, Option<&PixelBuffer>),
{
    fn on_cycle(&mut self, report: &CycleReport, frame: Option<&PixelBuffer>) {
        self(report, frame)
    }
}

/// Observer that ignores every cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CycleObserver for NoopObserver {
    fn on_cycle(&mut self, _report: &CycleReport, _frame: Option<&PixelBuffer>) {}
}

/// The decoder and classifier a loop runs each payload through.
#[derive(Clone, Copy)]
pub struct Pipeline<'a> {
    pub decoder: &'a dyn ImageDecoder,
    pub classifier: &'a dyn Classifier,
}

impl<'a> Pipeline<'a> {
    pub fn new(decoder: &'a dyn ImageDecoder, classifier: &'a dyn Classifier) -> Self {
        Self {
            decoder,
            classifier,
        }
    }
}

/// Decoder for the JPEG frames the camera sends. Any format the `image`
/// crate is built with is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegDecoder;

impl ImageDecoder for JpegDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(PixelBuffer {
            width,
            height,
            rgb: rgb.into_raw(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;

    pub(crate) fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let rgb: Vec<u8> = (0..width * height)
            .flat_map(|i| [(i % 251) as u8, 128, 64])
            .collect();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    #[test]
    fn jpeg_decodes_to_rgb() {
        let frame = JpegDecoder.decode(&sample_jpeg(8, 6)).unwrap();
        assert_eq!(frame.width(), 8);
        assert_eq!(frame.height(), 6);
        assert_eq!(frame.as_rgb().len(), 8 * 6 * 3);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(JpegDecoder.decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn garbage_payload_is_rejected() {
        let err = JpegDecoder.decode(b"ABCDEFGHIJ").unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }

    #[test]
    fn from_rgb_checks_length() {
        assert!(PixelBuffer::from_rgb(2, 2, vec![0; 12]).is_some());
        assert!(PixelBuffer::from_rgb(2, 2, vec![0; 11]).is_none());
    }

    #[test]
    fn png_round_trips_through_decoder() {
        let frame = PixelBuffer::from_rgb(3, 2, (0..18).collect()).unwrap();
        let png = frame.to_png().unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        assert_eq!(JpegDecoder.decode(&png).unwrap(), frame);
    }

    #[test]
    fn closures_observe_cycles() {
        use crate::control::{CycleOutcome, CycleReport};
        use crate::gate::SkipReason;

        let mut seen = Vec::new();
        let mut observer = |report: &CycleReport, frame: Option<&PixelBuffer>| {
            seen.push((report.cycle, frame.is_some()));
        };
        let report = CycleReport {
            cycle: 3,
            outcome: CycleOutcome::Skipped {
                reason: SkipReason::UnknownCategory {
                    label: "glass".into(),
                },
            },
            classification: None,
            payload_bytes: None,
            elapsed_ms: 0,
        };
        observer.on_cycle(&report, None);
        assert_eq!(seen, vec![(3, false)]);
    }
}
