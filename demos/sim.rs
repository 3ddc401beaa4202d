//! Star topology simulation
//!
//! Leaf nodes send periodic traffic to a central sink, mixing high and low
//! priority packets, then per node statistics are printed.
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use std::time::Duration;

use log::{debug, info};

use structopt::StructOpt;

use sic_mac::prelude::*;
use sic_mac::sim::{Simulation, Medium};

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "4")]
    /// Number of leaf nodes around the sink
    pub leaves: u32,

    #[structopt(long, default_value = "10")]
    /// Packets sent by each leaf
    pub packets: u32,

    #[structopt(long, default_value = "50ms", parse(try_from_str = humantime::parse_duration))]
    /// Interval between packets from each leaf
    pub interval: Duration,

    #[structopt(long, default_value = "100")]
    /// Payload size in bytes
    pub size: usize,

    #[structopt(long, default_value = "4")]
    /// Send every Nth packet at high priority (0 to disable)
    pub high_every: u32,

    #[structopt(long, default_value = "60.0")]
    /// Leaf to sink path loss in dB
    pub loss: f64,

    #[structopt(long)]
    /// Disconnect leaves from each other (hidden terminals)
    pub hidden: bool,

    #[structopt(long)]
    /// Use sink polled contention instead of carrier sense
    pub contention: bool,

    #[structopt(long, default_value = "-100.0")]
    /// Ambient noise in dBm
    pub noise: f64,

    #[structopt(long, default_value = "1")]
    /// RNG seed
    pub seed: u64,

    #[structopt(long, default_value = "5s", parse(try_from_str = humantime::parse_duration))]
    /// Simulated run time
    pub duration: Duration,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let opts = Options::from_args();

    let _ = simplelog::TermLogger::init(
        opts.log_level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    info!("Starting sim with {} leaves", opts.leaves);

    let mut mac_config = MacConfig::default();
    if opts.contention {
        mac_config.mode = SensingMode::ContentionArbitration;
        mac_config.contention.sink = 0;
    }

    let mut sim = Simulation::new(Medium::new(opts.noise), opts.seed);

    let sink = sim.add_node(mac_config.clone(), RadioConfig::default())
        .map_err(|e| anyhow::anyhow!("Error adding sink: {}", e) )?;

    let mut leaves = Vec::new();
    for _ in 0..opts.leaves {
        let id = sim.add_node(mac_config.clone(), RadioConfig::default())
            .map_err(|e| anyhow::anyhow!("Error adding leaf: {}", e) )?;
        sim.set_link(sink, id, opts.loss);
        leaves.push(id);
    }

    if !opts.hidden {
        for (i, a) in leaves.iter().enumerate() {
            for b in &leaves[i+1..] {
                sim.set_link(*a, *b, opts.loss);
            }
        }
    }

    // Stagger leaves across the interval
    let interval = opts.interval.as_nanos() as Ts;
    let offset = interval / (opts.leaves.max(1) as Ts);

    for (i, leaf) in leaves.iter().enumerate() {
        for n in 0..opts.packets {
            let at = i as Ts * offset + n as Ts * interval;
            let priority = match opts.high_every {
                0 => Priority::Low,
                k if n % k == 0 => Priority::High,
                _ => Priority::Low,
            };

            debug!("Leaf {} packet {} at {} ns ({})", leaf, n, at, priority);
            sim.send(at, *leaf, sink, opts.size, priority);
        }
    }

    sim.run_until(opts.duration.as_nanos() as Ts)
        .map_err(|e| anyhow::anyhow!("Simulation error: {}", e) )?;

    let deliveries = sim.deliveries();
    let high = deliveries.iter().filter(|d| d.priority == Priority::High ).count();

    info!("Delivered {} packets to sink ({} high, {} low)",
        deliveries.len(), high, deliveries.len() - high);

    let radio: Vec<_> = sim.stats().into_iter().map(|(_m, r)| r ).collect();
    let stats = sim.teardown();

    println!("{:>4} {:>6} {:>6} {:>6} {:>6} {:>6} {:>8} {:>8}",
        "node", "queued", "acked", "drop", "flush", "recv", "decoded", "lost");

    for (id, (m, r)) in stats.iter().zip(radio.iter()).enumerate() {
        println!("{:>4} {:>6} {:>6} {:>6} {:>6} {:>6} {:>8} {:>8}",
            id, m.queued, m.acknowledged, m.dropped, m.flushed, m.received,
            r.decoded, r.not_decodable + r.per_dropped);
    }

    Ok(())
}
