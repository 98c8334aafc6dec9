//! Radar feed: NMEA 0183 $RATTM tracked-target sentences at 4800 baud.
//!
//! The XOR checksum covers everything between `$` and `*`. Range arrives
//! in nautical miles and speed in knots; both are converted to SI on
//! decode. Plots accumulate per target id and age out after a few
//! seconds of silence.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use rampart_comms::{LinkConfig, ProtocolParser, SerialLink, Watchdog};
use rampart_types::RadarPlot;

use crate::{send_event, DeviceEvent, Result};

const NM_TO_M: f32 = 1852.0;
const KNOTS_TO_MPS: f32 = 0.514444;

/// Plots unseen for this long are dropped from the picture.
const PLOT_STALE_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct RadarParser {
    buffer: Vec<u8>,
}

impl ProtocolParser for RadarParser {
    type Msg = RadarPlot;

    fn parse(&mut self, raw: &[u8]) -> Vec<RadarPlot> {
        self.buffer.extend_from_slice(raw);
        let mut out = Vec::new();

        while let Some(end) = find_crlf(&self.buffer) {
            let sentence: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let sentence = &sentence[..sentence.len() - 2];
            if sentence.is_empty() {
                continue;
            }
            if sentence[0] != b'$' {
                continue;
            }
            if !validate_checksum(sentence) {
                warn!("NMEA checksum mismatch");
                continue;
            }
            let text = String::from_utf8_lossy(sentence);
            let data = text.split('*').next().unwrap_or("");
            if data.starts_with("$RATTM") {
                match parse_rattm(data) {
                    Some(plot) => out.push(plot),
                    None => warn!("malformed $RATTM sentence"),
                }
            }
        }
        out
    }
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

fn validate_checksum(sentence: &[u8]) -> bool {
    let Some(star) = sentence.iter().position(|&b| b == b'*') else {
        return false;
    };
    if star + 2 >= sentence.len() {
        return false;
    }
    let computed = sentence[1..star].iter().fold(0u8, |acc, &b| acc ^ b);
    let hex = std::str::from_utf8(&sentence[star + 1..star + 3]).ok();
    match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
        Some(received) => received == computed,
        None => false,
    }
}

/// `$RATTM,id,bearing,range,T/M,course,speed,...`
fn parse_rattm(data: &str) -> Option<RadarPlot> {
    let fields: Vec<&str> = data.split(',').collect();
    if fields.len() < 7 {
        return None;
    }
    Some(RadarPlot {
        id: fields[1].trim().parse().ok()?,
        azimuth_deg: fields[2].trim().parse().ok()?,
        range_m: fields[3].trim().parse::<f32>().ok()? * NM_TO_M,
        relative_course_deg: fields[5].trim().parse().ok()?,
        relative_speed_mps: fields[6].trim().parse::<f32>().ok()? * KNOTS_TO_MPS,
    })
}

/// Accumulates the track picture and expires stale plots.
#[derive(Debug, Default)]
pub struct RadarDevice {
    plots: BTreeMap<u32, (RadarPlot, Instant)>,
}

impl RadarDevice {
    /// Ingest one plot; returns the refreshed picture.
    pub fn ingest(&mut self, plot: RadarPlot, now: Instant) -> Vec<RadarPlot> {
        self.plots.insert(plot.id, (plot, now));
        self.sweep(now)
    }

    /// Drop stale plots; returns the current picture in id order.
    pub fn sweep(&mut self, now: Instant) -> Vec<RadarPlot> {
        self.plots
            .retain(|_, (_, seen)| now.duration_since(*seen) < PLOT_STALE_AFTER);
        self.plots.values().map(|(p, _)| *p).collect()
    }
}

pub async fn run(config: LinkConfig, events: Sender<DeviceEvent>) -> Result<()> {
    let mut link = SerialLink::open(&config).await?;
    let mut parser = RadarParser::default();
    let mut device = RadarDevice::default();
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    let mut sweep_tick = tokio::time::interval(Duration::from_secs(2));

    debug!("radar online on {}", config.port);

    loop {
        tokio::select! {
            chunk = link.recv() => {
                match chunk {
                    Ok(Some(bytes)) => {
                        let plots = parser.parse(&bytes);
                        if !plots.is_empty() {
                            watchdog.rearm();
                            let now = Instant::now();
                            let mut picture = Vec::new();
                            for plot in plots {
                                picture = device.ingest(plot, now);
                            }
                            send_event(&events, DeviceEvent::RadarPlots(picture))?;
                        }
                    }
                    Ok(None) | Err(_) => {
                        link.reconnect_with_backoff().await?;
                    }
                }
            }
            _ = sweep_tick.tick() => {
                let before = device.plots.len();
                let picture = device.sweep(Instant::now());
                if picture.len() != before {
                    send_event(&events, DeviceEvent::RadarPlots(picture))?;
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(watchdog.deadline())) => {
                if watchdog.take_expiry() {
                    warn!("radar communication timeout");
                    send_event(&events, DeviceEvent::RadarPlots(Vec::new()))?;
                    device.plots.clear();
                }
            }
        }
    }
}
