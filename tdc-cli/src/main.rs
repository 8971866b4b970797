//! TDC control and event streaming tool.
//!
//! Configures channel enables and discriminator thresholds of a four-channel
//! serial TDC, or streams decoded edge events from the device or from a
//! recorded raw byte stream.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tdc_core::command::{parse_enable_pattern, parse_threshold_spec};
use tdc_core::device::{FileSession, SerialSession};
use tdc_core::output::EventWriter;
use tdc_core::source::{ByteSource, Clock};
use tdc_core::synth::{check_pulse_widths, PulseTrain};
use tdc_core::types::N_CHANNELS;
use tdc_core::{DeviceConfig, EventFormat, TdcDecoder, TdcSession};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SELF_TEST_PERIOD_NS: u64 = 10_000_001;
const SELF_TEST_WIDTH_NS: u64 = 101;
const SELF_TEST_PULSES: usize = 1000;

/// Control and readout tool for a four-channel serial TDC.
///
/// Without -e or -t, decoded edge events are streamed until the device goes
/// quiet. With -e or -t the commands are sent and the tool exits.
#[derive(Parser, Debug)]
#[command(name = "tdc-ctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial device (e.g. /dev/ttyACM0) or a recorded raw file
    #[arg(value_name = "DEVICE", required_unless_present = "self_test")]
    device: Option<String>,

    /// Channel enable pattern, one 0/1 character per channel
    ///
    /// Character i controls channel i, e.g. "0110" enables channels 1 and 2.
    #[arg(short, long, value_name = "PATTERN")]
    enable: Option<String>,

    /// Discriminator threshold as CHANNEL:VALUE, VALUE in 0..=4095
    ///
    /// May be given several times.
    #[arg(short, long, value_name = "CH:VALUE")]
    threshold: Vec<String>,

    /// Serial line speed
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Serial read timeout in milliseconds
    #[arg(long, default_value_t = 800)]
    timeout_ms: u64,

    /// Output format: text, csv or bin
    ///
    /// Defaults to the extension of --output, or text.
    #[arg(short, long)]
    format: Option<String>,

    /// Write events to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Add the calibrated sub-sample time to every event
    #[arg(long)]
    smooth: bool,

    /// Suppress progress and summary output
    #[arg(short, long)]
    quiet: bool,

    /// Decode a synthetic pulse train on every channel and check the widths
    #[arg(long)]
    self_test: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tdc=info")),
        )
        .with_writer(io::stderr)
        .init();

    if args.self_test {
        return self_test(args.quiet);
    }

    // Reject bad thresholds before the device is touched.
    let thresholds = args
        .threshold
        .iter()
        .map(|spec| {
            parse_threshold_spec(spec).with_context(|| format!("Invalid threshold {spec:?}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let Some(device) = args.device.as_deref() else {
        bail!("No device given");
    };
    let config = DeviceConfig {
        baud_rate: args.baud,
        read_timeout: Duration::from_millis(args.timeout_ms),
        ..Default::default()
    };

    if Path::new(device).is_file() {
        let mut session = FileSession::open_file(device, &config)
            .with_context(|| format!("Failed to open recording {device}"))?;
        run(&mut session, &args, &thresholds, false)
    } else {
        let mut session = SerialSession::open_serial(device, &config)
            .with_context(|| format!("Failed to open device {device}"))?;
        run(&mut session, &args, &thresholds, true)
    }
}

fn run<S: ByteSource, W: Write, C: Clock>(
    session: &mut TdcSession<S, W, C>,
    args: &Args,
    thresholds: &[(u8, u16)],
    live: bool,
) -> Result<()> {
    if args.enable.is_some() || !thresholds.is_empty() {
        return configure(session, args, thresholds);
    }

    let progress = if args.quiet || args.output.is_none() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Waiting for events...");
        pb
    };

    let start_time = Instant::now();
    let events = stream(session, args, &progress, live)?;
    let duration = start_time.elapsed();

    progress.finish_with_message(format!(
        "Done! Wrote {} events in {:.2}s",
        events,
        duration.as_secs_f64()
    ));

    if !args.quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Device:        {}", args.device.as_deref().unwrap_or_default());
        if let Some(path) = &args.output {
            eprintln!("  Output:        {:?}", path);
        }
        eprintln!("  Events:        {}", events);
        eprintln!("  Skipped bytes: {}", session.frames().skipped_bytes());
        eprintln!("  Bad frames:    {}", session.frames().dropped_frames());
        eprintln!("  Duration:      {:.3}s", duration.as_secs_f64());
    }

    Ok(())
}

/// Sends the enable pattern and threshold commands.
fn configure<S: ByteSource, W: Write, C: Clock>(
    session: &mut TdcSession<S, W, C>,
    args: &Args,
    thresholds: &[(u8, u16)],
) -> Result<()> {
    if let Some(pattern) = &args.enable {
        let parsed = parse_enable_pattern(pattern);
        for diagnostic in &parsed.diagnostics {
            eprintln!("{}: {}", pattern, diagnostic);
        }
        session
            .enable_channels(parsed.mask)
            .context("Failed to send enable command")?;
        info!(mask = %parsed.mask, "channels enabled");
    }

    for &(channel, threshold) in thresholds {
        session
            .set_threshold(channel.into(), threshold.into())
            .with_context(|| format!("Failed to set threshold of channel {channel}"))?;
        info!(channel, threshold, "threshold set");
    }

    Ok(())
}

/// Writes decoded events until end of stream and returns their number.
fn stream<S: ByteSource, W: Write, C: Clock>(
    session: &mut TdcSession<S, W, C>,
    args: &Args,
    progress: &ProgressBar,
    live: bool,
) -> Result<u64> {
    let format = match (&args.format, &args.output) {
        (Some(name), _) => EventFormat::from_str(name)
            .context("Invalid output format. Use text, csv or bin")?,
        (None, Some(path)) => path
            .extension()
            .and_then(|e| e.to_str())
            .map(EventFormat::from_extension)
            .unwrap_or_default(),
        (None, None) => EventFormat::Text,
    };

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    let mut writer = EventWriter::new(sink, format, args.smooth);
    writer
        .write_header()
        .context("Failed to write output header")?;

    while let Some(event) = session
        .next_event()
        .context("Failed to read from device")?
    {
        let smooth = args.smooth.then(|| session.smooth_time(&event));
        writer
            .write_event(&event, smooth)
            .context("Failed to write event")?;

        // Live events show up as they happen.
        if live {
            writer.flush().context("Failed to flush output")?;
        }
        if writer.events() % 10_000 == 0 {
            progress.set_message(format!("{} events", writer.events()));
        }
    }

    writer.flush().context("Failed to flush output")?;
    Ok(writer.events())
}

/// Decodes a synthetic pulse train on every channel and checks the widths.
fn self_test(quiet: bool) -> Result<()> {
    let mut rng = rand::thread_rng();
    let mut failed = 0;

    for channel in 0..N_CHANNELS as u8 {
        let train = PulseTrain {
            channel,
            period_ns: SELF_TEST_PERIOD_NS,
            width_ns: SELF_TEST_WIDTH_NS,
            pulses: SELF_TEST_PULSES,
        };
        let events = TdcDecoder::new()
            .decode_buffer(&train.to_bytes(&mut rng))
            .context("Failed to decode synthetic stream")?;
        let report = check_pulse_widths(events, channel, SELF_TEST_WIDTH_NS);

        if report.passed(SELF_TEST_PULSES) {
            if !quiet {
                eprintln!("channel {}: ok ({} pulses)", channel, report.falling_edges);
            }
        } else {
            eprintln!(
                "channel {}: FAILED ({} of {} pulses seen, {} with wrong width)",
                channel, report.falling_edges, SELF_TEST_PULSES, report.mismatches
            );
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("Self-test failed on {} channel(s)", failed);
    }
    Ok(())
}
