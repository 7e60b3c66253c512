use std::sync::Arc;
use std::time::{Duration, Instant};

use nvwatch::history::{HistoryMap, Metric, MetricSample};
use nvwatch::names::{ProcessNameCache, SystemNames};
use nvwatch::poller::{GpuPoller, PollerConfig};
use nvwatch::store::SnapshotStore;
use nvwatch::{create_provider, GpuSnapshot};

const DEFAULT_INTERVAL_MS: u64 = 1000;
/// Consumer tick; independent of the poller interval.
const RENDER_PERIOD: Duration = Duration::from_millis(500);
const SPARK_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const SPARK_WIDTH: usize = 30;

struct Args {
    json: bool,
    interval: Duration,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Args {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut json = false;
    let mut interval_ms: Option<u64> = None;
    while let Some(a) = it.next() {
        match a.as_str() {
            "--json" => json = true,
            "--interval" | "-i" => interval_ms = it.next().and_then(|v| v.parse().ok()),
            _ if a.starts_with("--interval=") => {
                if let Some((_, v)) = a.split_once('=') {
                    interval_ms = v.parse().ok();
                }
            }
            _ => {}
        }
    }
    Args {
        json,
        interval: Duration::from_millis(interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)),
    }
}

fn main() {
    nvwatch::init_logging();
    let args = parse_args(std::env::args());

    let Some(provider) = create_provider() else {
        std::process::exit(1);
    };

    let store = Arc::new(SnapshotStore::new());
    let names = ProcessNameCache::new(Box::new(SystemNames::new()));
    let mut poller = GpuPoller::new(provider, names, store.clone(), PollerConfig::default());
    poller.start(args.interval);

    if args.json {
        // Give the loop one tick to publish, then dump and leave.
        std::thread::sleep(args.interval + Duration::from_millis(50));
        let (devices, topology) = store.read();
        let doc = serde_json::json!({ "devices": devices, "topology": topology });
        match serde_json::to_string_pretty(&doc) {
            Ok(text) => println!("{text}"),
            Err(err) => log::error!("failed to serialize snapshot: {err}"),
        }
        poller.stop();
        return;
    }

    let (sig_tx, sig_rx) = crossbeam_channel::bounded(1);
    if let Err(err) = ctrlc::set_handler(move || {
        let _ = sig_tx.try_send(());
    }) {
        log::error!("failed to install Ctrl-C handler: {err}");
    }

    let mut histories = HistoryMap::new();
    let mut last_tick = Instant::now();
    loop {
        if sig_rx.recv_timeout(RENDER_PERIOD).is_ok() {
            break;
        }
        let (snapshots, topology) = store.read();
        let delta = last_tick.elapsed().as_secs_f32();
        last_tick = Instant::now();

        for snap in &snapshots {
            histories
                .history(&snap.uuid)
                .record(delta, &MetricSample::from_snapshot(snap));
        }
        histories.retain_devices(&snapshots);

        print!("\x1B[2J\x1B[H"); // clear screen, cursor home
        println!(
            "nvwatch — driver {} / CUDA {}{}",
            topology.driver_version,
            topology.cuda_version,
            if topology.nvlink_available {
                format!(" / NVLink {:?}", topology.nvlink_pairs)
            } else {
                String::new()
            }
        );
        for snap in &snapshots {
            print_device(snap, &mut histories);
        }
    }

    poller.stop();
}

fn print_device(snap: &GpuSnapshot, histories: &mut HistoryMap) {
    let mut window = Vec::new();
    histories
        .history(&snap.uuid)
        .window(Metric::GpuUtilization, &mut window);
    println!(
        "[{}] {} ({}){}",
        snap.index,
        snap.name,
        snap.pci_bus_id,
        if snap.compute_exclusive { " [compute]" } else { "" }
    );
    println!(
        "    util {:>3}% {}  mem {:.1}/{:.1} GiB  {}°C  fan {}%  {}W/{}W  {}MHz",
        snap.gpu_utilization,
        sparkline(&window),
        gib(snap.memory_used),
        gib(snap.memory_total),
        snap.temperature,
        snap.fan_speed,
        snap.power_draw,
        snap.power_limit,
        snap.core_clock,
    );
    for proc in &snap.processes {
        println!(
            "    {:>7}  {:<24} {:.1} GiB",
            proc.pid,
            proc.name,
            gib(proc.memory_used)
        );
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0 / 1024.0
}

/// Compress a [0,1] sample window into a fixed-width bar string.
fn sparkline(window: &[f32]) -> String {
    if window.is_empty() {
        return " ".repeat(SPARK_WIDTH);
    }
    let tail = &window[window.len().saturating_sub(SPARK_WIDTH)..];
    let mut line = String::with_capacity(SPARK_WIDTH);
    for _ in 0..SPARK_WIDTH - tail.len() {
        line.push(' ');
    }
    for v in tail {
        let level = (v.clamp(0.0, 1.0) * (SPARK_CHARS.len() - 1) as f32).round() as usize;
        line.push(SPARK_CHARS[level]);
    }
    line
}
