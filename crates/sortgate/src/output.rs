use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use sortgate_control::{AckStatus, CycleOutcome, CycleReport, LoopSummary, SkipReason};
use sortgate_transport::PortSummary;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct Record<'a, T: Serialize> {
    event: &'a str,
    #[serde(flatten)]
    body: T,
    timestamp: String,
}

fn print_json<T: Serialize>(event: &str, body: T) {
    let record = Record {
        event,
        body,
        timestamp: now_unix_seconds(),
    };
    println!(
        "{}",
        serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

/// One-word outcome plus its detail, for table and pretty output.
fn outcome_columns(outcome: &CycleOutcome) -> (&'static str, String) {
    match outcome {
        CycleOutcome::Actuated { category, ack } => {
            ("actuated", format!("{category} ({})", ack_text(ack)))
        }
        CycleOutcome::Skipped { reason } => ("skipped", skip_text(reason)),
        CycleOutcome::Failed {
            stage,
            kind,
            reason,
        } => ("failed", format!("{stage}/{}: {reason}", kind.as_str())),
    }
}

fn ack_text(ack: &AckStatus) -> String {
    match ack {
        AckStatus::Confirmed { text } => format!("ack {text}"),
        AckStatus::Mismatch { text } => format!("unexpected ack {text:?}"),
        AckStatus::Missing => "no ack".to_string(),
    }
}

fn skip_text(reason: &SkipReason) -> String {
    match reason {
        SkipReason::BelowThreshold {
            confidence,
            threshold,
        } => format!("confidence {confidence:.3} <= {threshold:.3}"),
        SkipReason::UnknownCategory { label } => format!("unknown category {label:?}"),
    }
}

pub fn print_cycle(report: &CycleReport, format: OutputFormat) {
    let (outcome, detail) = outcome_columns(&report.outcome);
    let label = report
        .classification
        .as_ref()
        .map(|c| format!("{} {:.3}", c.label, c.confidence))
        .unwrap_or_else(|| "-".to_string());
    let size = report
        .payload_bytes
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());

    match format {
        OutputFormat::Json => print_json("cycle", report),
        OutputFormat::Table => print_table(
            vec!["CYCLE", "OUTCOME", "CLASS", "BYTES", "MS", "DETAIL"],
            vec![vec![
                report.cycle.to_string(),
                outcome.to_string(),
                label,
                size,
                report.elapsed_ms.to_string(),
                detail,
            ]],
        ),
        OutputFormat::Pretty => println!(
            "cycle={} outcome={} class={} bytes={} ms={} {}",
            report.cycle, outcome, label, size, report.elapsed_ms, detail
        ),
        OutputFormat::Raw => println!("{} {} {}", report.cycle, outcome, detail),
    }
}

pub fn print_summary(summary: &LoopSummary, format: OutputFormat) {
    let stats = &summary.stats;
    match format {
        OutputFormat::Json => print_json("summary", summary),
        OutputFormat::Table => print_table(
            vec!["CYCLES", "ACTUATED", "SKIPPED", "FAILED", "NO ACK", "BAD ACK", "EXIT"],
            vec![vec![
                stats.cycles.to_string(),
                stats.actuated.to_string(),
                stats.skipped.to_string(),
                stats.failed.to_string(),
                stats.acks_missing.to_string(),
                stats.acks_mismatched.to_string(),
                format!("{:?}", summary.exit),
            ]],
        ),
        OutputFormat::Pretty | OutputFormat::Raw => println!(
            "cycles={} actuated={} skipped={} failed={} acks_missing={} acks_mismatched={} exit={:?}",
            stats.cycles,
            stats.actuated,
            stats.skipped,
            stats.failed,
            stats.acks_missing,
            stats.acks_mismatched,
            summary.exit
        ),
    }
}

#[derive(Serialize)]
pub struct CaptureOutput<'a> {
    pub port: &'a str,
    pub size: usize,
    pub path: Option<String>,
}

/// Report a single capture. Raw output without a target file writes the
/// payload itself.
pub fn print_capture(capture: &CaptureOutput<'_>, payload: &[u8], format: OutputFormat) {
    let path = capture.path.as_deref().unwrap_or("-");
    match format {
        OutputFormat::Json => print_json("capture", capture),
        OutputFormat::Table => print_table(
            vec!["PORT", "BYTES", "FILE"],
            vec![vec![
                capture.port.to_string(),
                capture.size.to_string(),
                path.to_string(),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "port={} bytes={} file={}",
            capture.port, capture.size, path
        ),
        OutputFormat::Raw => {
            if capture.path.is_none() {
                print_raw(payload);
            } else {
                println!("{path}");
            }
        }
    }
}

#[derive(Serialize)]
pub struct AckOutput<'a> {
    pub category: &'a str,
    #[serde(flatten)]
    pub ack: &'a AckStatus,
}

pub fn print_ack(out: &AckOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json("actuate", out),
        OutputFormat::Table => print_table(
            vec!["CATEGORY", "ACK"],
            vec![vec![out.category.to_string(), ack_text(out.ack)]],
        ),
        OutputFormat::Pretty => println!("category={} {}", out.category, ack_text(out.ack)),
        OutputFormat::Raw => match out.ack {
            AckStatus::Confirmed { text } | AckStatus::Mismatch { text } => println!("{text}"),
            AckStatus::Missing => {}
        },
    }
}

#[derive(Serialize)]
struct PortOutput<'a> {
    name: &'a str,
    kind: &'a str,
    vid: Option<String>,
    pid: Option<String>,
    product: Option<&'a str>,
}

impl<'a> From<&'a PortSummary> for PortOutput<'a> {
    fn from(port: &'a PortSummary) -> Self {
        Self {
            name: &port.name,
            kind: port.kind,
            vid: port.vid.map(|v| format!("{v:04x}")),
            pid: port.pid.map(|p| format!("{p:04x}")),
            product: port.product.as_deref(),
        }
    }
}

pub fn print_ports(ports: &[PortSummary], format: OutputFormat) {
    let rows: Vec<PortOutput<'_>> = ports.iter().map(PortOutput::from).collect();
    match format {
        OutputFormat::Json => print_json("ports", serde_json::json!({ "ports": rows })),
        OutputFormat::Table => print_table(
            vec!["PORT", "TYPE", "VID:PID", "PRODUCT"],
            rows.iter()
                .map(|p| {
                    vec![
                        p.name.to_string(),
                        p.kind.to_string(),
                        match (&p.vid, &p.pid) {
                            (Some(vid), Some(pid)) => format!("{vid}:{pid}"),
                            _ => "-".to_string(),
                        },
                        p.product.unwrap_or("-").to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            for p in &rows {
                println!("{} type={} product={}", p.name, p.kind, p.product.unwrap_or("-"));
            }
        }
        OutputFormat::Raw => {
            for p in &rows {
                println!("{}", p.name);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sortgate_control::{CycleState, FailureKind};

    #[test]
    fn outcome_columns_describe_each_outcome() {
        let (word, detail) = outcome_columns(&CycleOutcome::Actuated {
            category: "paper".into(),
            ack: AckStatus::Confirmed {
                text: "Gate:paper".into(),
            },
        });
        assert_eq!(word, "actuated");
        assert_eq!(detail, "paper (ack Gate:paper)");

        let (word, detail) = outcome_columns(&CycleOutcome::Skipped {
            reason: SkipReason::BelowThreshold {
                confidence: 0.5,
                threshold: 0.7,
            },
        });
        assert_eq!(word, "skipped");
        assert_eq!(detail, "confidence 0.500 <= 0.700");

        let (word, detail) = outcome_columns(&CycleOutcome::Failed {
            stage: CycleState::Capturing,
            kind: FailureKind::Timeout,
            reason: "timed out".into(),
        });
        assert_eq!(word, "failed");
        assert_eq!(detail, "capturing/timeout: timed out");
    }

    #[test]
    fn json_record_flattens_body() {
        let ack = AckStatus::Missing;
        let record = Record {
            event: "actuate",
            body: AckOutput {
                category: "plastic",
                ack: &ack,
            },
            timestamp: "0".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["event"], "actuate");
        assert_eq!(value["category"], "plastic");
        assert_eq!(value["status"], "missing");
    }

    #[test]
    fn port_ids_render_as_hex() {
        let port = PortSummary {
            name: "/dev/ttyUSB0".into(),
            kind: "usb",
            vid: Some(0x10c4),
            pid: Some(0xea60),
            product: Some("CP2102".into()),
        };
        let out = PortOutput::from(&port);
        assert_eq!(out.vid.as_deref(), Some("10c4"));
        assert_eq!(out.pid.as_deref(), Some("ea60"));
    }
}
