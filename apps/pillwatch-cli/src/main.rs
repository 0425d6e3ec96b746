mod ui;

use std::{env, sync::{mpsc, Arc}};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use futures::StreamExt;
use pillwatch_capture::{CommandSource, StaticSource, VideoSource};
use pillwatch_notify::{LocalBus, NotificationSink, TracingSink};
use pillwatch_ops::init_tracing;
use pillwatch_session::GridSession;
use pillwatch_types::{config::PillwatchConfig, frame::RawImage, geometry::Rectangle};
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::ui::UiMessage;

const DEMO_FRAME_WIDTH: u32 = 280;
const DEMO_FRAME_HEIGHT: u32 = 490;
const DEMO_POCKET: u32 = 70;
const TRAY: [u8; 4] = [96, 108, 120, 255];
const DIVIDER: [u8; 4] = [40, 44, 52, 255];
const PILL: [u8; 4] = [236, 214, 72, 255];

/// Watch a weekly pill organizer through a camera and flag pockets whose contents change.
#[derive(Debug, Parser)]
#[command(name = "pillwatch", version)]
struct Args {
    /// Config file; falls back to $PILLWATCH_CONFIG, then configs/dev.toml.
    #[arg(long, short)]
    config: Option<String>,
    /// Master region as `x,y,width,height` in mirrored preview pixels. Defaults to the whole frame.
    #[arg(long, value_parser = parse_region)]
    region: Option<Rectangle>,
    /// Log to stdout instead of drawing the terminal grid.
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.clone());
    // the terminal belongs to the grid view unless headless
    if args.headless {
        init_tracing(&config.ops)?;
    }

    if config.camera.command.is_empty() {
        let source = demo_source();
        tokio::spawn(animate_demo(source.clone()));
        run(source, config, args).await
    } else {
        let source = CommandSource::new(config.camera.clone())?;
        run(source, config, args).await
    }
}

async fn run<S: VideoSource + 'static>(mut source: S, config: PillwatchConfig, args: Args) -> Result<()> {
    source.connect().await.context("camera unavailable")?;
    let bus = LocalBus::new(64);
    let notifier: Arc<dyn NotificationSink> = if args.headless {
        Arc::new(TracingSink)
    } else {
        Arc::new(bus.clone())
    };
    let session = GridSession::new(config.session(), source, notifier)?;

    let region = match args.region {
        Some(region) => region,
        None => full_frame(session.source()).await?,
    };
    let cells = session.set_master_region(Some(region)).await?;
    let summary = session.capture_all_baselines().await?;
    session.wait_for_decodes().await;
    info!(
        "watching {} pockets, {} baselines captured",
        cells.len(),
        summary.captured
    );

    if args.headless {
        run_headless(&session).await;
        return Ok(());
    }

    let (tx, rx) = mpsc::channel();
    let mut notifications = bus.notifications();
    let forward = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            if tx.send(UiMessage::Notification(notification)).is_err() {
                break;
            }
        }
    });

    let title = format!(
        "region {region}  threshold {:.1}%  tolerance {}",
        config.detection.threshold_percent, config.detection.tolerance
    );
    let view_session = session.clone();
    tokio::task::spawn_blocking(move || ui::run(rx, title, move || view_session.view()))
        .await
        .map_err(|err| anyhow!("ui thread failed: {err}"))??;

    forward.abort();
    session.stop_polling().await;
    Ok(())
}

/// Notifications go to the log through the session's sink. Runs until the session
/// drops its grid, which only happens when the camera is lost.
async fn run_headless<S, N>(session: &GridSession<S, N>)
where
    S: VideoSource + 'static,
    N: NotificationSink + 'static,
{
    let mut check = interval(Duration::from_millis(500));
    loop {
        check.tick().await;
        if session.master_region().is_none() {
            warn!("monitoring ended");
            break;
        }
    }
}

async fn full_frame<S: VideoSource>(source: &S) -> Result<Rectangle> {
    let frame = source
        .current_frame()
        .await?
        .ok_or_else(|| anyhow!("camera returned no frame"))?;
    Ok(Rectangle::new(0.0, 0.0, frame.width as f64, frame.height as f64)?)
}

fn parse_region(raw: &str) -> std::result::Result<Rectangle, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|err| format!("region must be x,y,width,height: {err}"))?;
    match parts.as_slice() {
        [x, y, width, height] => Rectangle::new(*x, *y, *width, *height).map_err(|err| err.to_string()),
        _ => Err(format!("region needs 4 numbers, got {}", parts.len())),
    }
}

fn load_config(from_args: Option<String>) -> PillwatchConfig {
    let from_env = env::var("PILLWATCH_CONFIG").ok();
    let path = from_args
        .or(from_env)
        .unwrap_or_else(|| "configs/dev.toml".into());
    match PillwatchConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path
                );
                PillwatchConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path
            );
            PillwatchConfig::default()
        }
    }
}

/// Synthetic organizer: a tray with dividers and a pill in every pocket.
fn demo_source() -> StaticSource {
    let mut frame = RawImage::filled(DEMO_FRAME_WIDTH, DEMO_FRAME_HEIGHT, TRAY);
    for y in 0..DEMO_FRAME_HEIGHT {
        for x in 0..DEMO_FRAME_WIDTH {
            let (px, py) = (x % DEMO_POCKET, y % DEMO_POCKET);
            let color = if px < 2 || py < 2 {
                DIVIDER
            } else if (25..45).contains(&px) && (25..45).contains(&py) {
                PILL
            } else {
                continue;
            };
            set_pixel(&mut frame, x, y, color);
        }
    }
    StaticSource::with_frame(frame)
}

/// Takes the pill out of one pocket at a time and puts it back a few seconds later.
async fn animate_demo(source: StaticSource) {
    let pockets = (DEMO_FRAME_WIDTH / DEMO_POCKET) * (DEMO_FRAME_HEIGHT / DEMO_POCKET);
    let columns = DEMO_FRAME_WIDTH / DEMO_POCKET;
    let mut ticker = interval(Duration::from_secs(4));
    ticker.tick().await;
    for step in 0u32.. {
        ticker.tick().await;
        let pocket = (step / 2 * 5) % pockets;
        let color = if step % 2 == 0 { TRAY } else { PILL };
        let (ox, oy) = ((pocket % columns) * DEMO_POCKET, (pocket / columns) * DEMO_POCKET);
        source.update_frame(|frame| {
            for y in oy + 25..oy + 45 {
                for x in ox + 25..ox + 45 {
                    set_pixel(frame, x, y, color);
                }
            }
        });
    }
}

fn set_pixel(frame: &mut RawImage, x: u32, y: u32, rgba: [u8; 4]) {
    let idx = ((y * frame.width + x) * 4) as usize;
    if let Some(pixel) = frame.data.get_mut(idx..idx + 4) {
        pixel.copy_from_slice(&rgba);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_region_argument() {
        let region = parse_region("10, 20,280,490").expect("region");
        assert_eq!(region, Rectangle::new(10.0, 20.0, 280.0, 490.0).expect("rect"));
        assert!(parse_region("1,2,3").is_err());
        assert!(parse_region("a,b,c,d").is_err());
        assert!(parse_region("0,0,0,10").is_err());
    }

    #[test]
    fn demo_frame_has_a_pill_per_pocket() {
        let frame = demo_source();
        let frame = futures::executor::block_on(frame.current_frame())
            .expect("frame")
            .expect("some frame");
        assert_eq!(frame.pixel(35, 35), Some(PILL));
        assert_eq!(frame.pixel(245, 455), Some(PILL));
        assert_eq!(frame.pixel(0, 10), Some(DIVIDER));
        assert_eq!(frame.pixel(10, 10), Some(TRAY));
    }
}
