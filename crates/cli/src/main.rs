//! Trace-driven simulator CLI.
//!
//! This binary wires the pieces together for one run: it parses the flag
//! surface, builds a [`SimConfig`], opens the gzip trace, constructs the
//! simulator with the shipped VTAGE + E-Stride value predictor, drives the
//! step loop, and prints the final report. Arguments after the trace path
//! are forwarded untouched to the predictor.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vpsim_core::config::{SimConfig, VpTrack};
use vpsim_core::{TraceReader, UarchSim, VtageEstride};

/// Fetch-bundle constraints: `width,branches,stop_indirect,stop_taken,icache`.
#[derive(Clone, Copy, Debug)]
struct FetchSpec {
    width: u64,
    num_branch: u64,
    stop_at_indirect: bool,
    stop_at_taken: bool,
    model_icache: bool,
}

fn parse_fetch(raw: &str) -> Result<FetchSpec, String> {
    let fields: Vec<u64> = raw
        .split(',')
        .map(|f| f.parse::<u64>().map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;
    if fields.len() != 5 {
        return Err(format!("expected 5 comma-separated fields, got {}", fields.len()));
    }
    Ok(FetchSpec {
        width: fields[0],
        num_branch: fields[1],
        stop_at_indirect: fields[2] != 0,
        stop_at_taken: fields[3] != 0,
        model_icache: fields[4] != 0,
    })
}

/// Instruction-cache geometry: `log2_size,assoc,blocksize`.
#[derive(Clone, Copy, Debug)]
struct ICacheSpec {
    log2_size: u32,
    assoc: u64,
    block_size: u64,
}

fn parse_icache(raw: &str) -> Result<ICacheSpec, String> {
    let fields: Vec<u64> = raw
        .split(',')
        .map(|f| f.parse::<u64>().map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;
    if fields.len() != 3 {
        return Err(format!("expected 3 comma-separated fields, got {}", fields.len()));
    }
    Ok(ICacheSpec {
        log2_size: fields[0] as u32,
        assoc: fields[1],
        block_size: fields[2],
    })
}

/// Data-hierarchy geometry, 13 fields:
/// `log2_L1,assoc,bs,lat, log2_L2,assoc,bs,lat, log2_L3,assoc,bs,lat, main`.
#[derive(Clone, Copy, Debug)]
struct DHierSpec {
    l1: (u32, u64, u64, u64),
    l2: (u32, u64, u64, u64),
    l3: (u32, u64, u64, u64),
    main_latency: u64,
}

fn parse_dhier(raw: &str) -> Result<DHierSpec, String> {
    let fields: Vec<u64> = raw
        .split(',')
        .map(|f| f.parse::<u64>().map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;
    if fields.len() != 13 {
        return Err(format!("expected 13 comma-separated fields, got {}", fields.len()));
    }
    Ok(DHierSpec {
        l1: (fields[0] as u32, fields[1], fields[2], fields[3]),
        l2: (fields[4] as u32, fields[5], fields[6], fields[7]),
        l3: (fields[8] as u32, fields[9], fields[10], fields[11]),
        main_latency: fields[12],
    })
}

#[derive(Parser, Debug)]
#[command(name = "vpsim")]
struct Cli {
    /// Enable value prediction.
    #[arg(short = 'v')]
    value_prediction: bool,

    /// Perfect value prediction (with -v).
    #[arg(short = 'p')]
    perfect_vp: bool,

    /// Track: 0 = ALL, 1 = LoadsOnly, 2 = LoadsOnlyHitMiss.
    #[arg(short = 't', value_name = "TRACK")]
    track: Option<u64>,

    /// Perfect data cache.
    #[arg(short = 'd')]
    perfect_cache: bool,

    /// Perfect branch prediction (all branch types).
    #[arg(short = 'b')]
    perfect_branch: bool,

    /// Perfect indirect-branch prediction.
    #[arg(short = 'i')]
    perfect_indirect: bool,

    /// Enable the stride prefetcher in the L1 data cache.
    #[arg(short = 'P')]
    prefetcher: bool,

    /// Pipeline fill latency.
    #[arg(short = 'f', value_name = "CYCLES")]
    fill_latency: Option<u64>,

    /// Number of load/store lanes (0 = unbounded).
    #[arg(short = 'M', value_name = "LANES")]
    ldst_lanes: Option<u64>,

    /// Number of ALU lanes (0 = unbounded).
    #[arg(short = 'A', value_name = "LANES")]
    alu_lanes: Option<u64>,

    /// Fetch-bundle constraints.
    #[arg(short = 'F', value_name = "W,B,SI,ST,IC", value_parser = parse_fetch)]
    fetch: Option<FetchSpec>,

    /// Instruction-cache geometry.
    #[arg(short = 'I', value_name = "LG,ASSOC,BS", value_parser = parse_icache)]
    icache: Option<ICacheSpec>,

    /// Data-hierarchy geometry (13 fields).
    #[arg(short = 'D', value_name = "SPEC", value_parser = parse_dhier)]
    dhier: Option<DHierSpec>,

    /// Window (reorder buffer) size.
    #[arg(short = 'w', value_name = "SIZE")]
    window_size: Option<usize>,

    /// Gzip-compressed trace file.
    trace: PathBuf,

    /// Arguments forwarded to the value predictor.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    predictor_args: Vec<String>,
}

fn print_usage(program: &str) {
    println!(
        "usage:\t{program}\n\
         \t[optional: -v to enable value prediction]\n\
         \t[optional: -p to enable perfect value prediction (if -v also specified)]\n\
         \t[optional: -t <track_number>]\n\
         \t[optional: -d to enable perfect data cache]\n\
         \t[optional: -b to enable perfect branch prediction (all branch types)]\n\
         \t[optional: -i to enable perfect indirect-branch prediction]\n\
         \t[optional: -P to enable stride prefetcher in L1D]\n\
         \t[optional: -f <pipeline_fill_latency>]\n\
         \t[optional: -M <num_ldst_lanes>]\n\
         \t[optional: -A <num_alu_lanes>]\n\
         \t[optional: -F <fetch_width>,<fetch_num_branch>,<fetch_stop_at_indirect>,<fetch_stop_at_taken>,<fetch_model_icache>]\n\
         \t[optional: -I <log2_ic_size>,<ic_assoc>,<ic_blocksize>]\n\
         \t[optional: -D <log2_L1_size>,<L1_assoc>,<L1_blocksize>,<L1_latency>,<log2_L2_size>,<L2_assoc>,<L2_blocksize>,<L2_latency>,<log2_L3_size>,<L3_assoc>,<L3_blocksize>,<L3_latency>,<main_memory_latency>]\n\
         \t[optional: -w <window_size>]\n\
         \t[REQUIRED: .gz trace file]\n\
         \t[optional: predictor's arguments]"
    );
}

fn build_config(cli: &Cli) -> Result<SimConfig, String> {
    let mut config = SimConfig::default();

    config.vp.enable = cli.value_prediction;
    config.vp.perfect = cli.perfect_vp;
    if let Some(track) = cli.track {
        config.vp.track =
            VpTrack::from_u64(track).ok_or_else(|| format!("invalid track {track}"))?;
    }
    config.memory.perfect_cache = cli.perfect_cache;
    config.branch.perfect = cli.perfect_branch;
    config.branch.perfect_indirect = cli.perfect_indirect;
    if cli.prefetcher {
        config.memory.prefetcher = true;
    }
    if let Some(fill) = cli.fill_latency {
        config.pipeline.fill_latency = fill;
    }
    if let Some(lanes) = cli.ldst_lanes {
        config.pipeline.ldst_lanes = lanes;
    }
    if let Some(lanes) = cli.alu_lanes {
        config.pipeline.alu_lanes = lanes;
    }
    if let Some(fetch) = cli.fetch {
        config.fetch.width = fetch.width;
        config.fetch.num_branch = fetch.num_branch;
        config.fetch.stop_at_indirect = fetch.stop_at_indirect;
        config.fetch.stop_at_taken = fetch.stop_at_taken;
        config.fetch.model_icache = fetch.model_icache;
    }
    if let Some(icache) = cli.icache {
        config.memory.icache.size = 1u64 << icache.log2_size;
        config.memory.icache.assoc = icache.assoc;
        config.memory.icache.block_size = icache.block_size;
    }
    if let Some(dhier) = cli.dhier {
        for (geom, spec) in [
            (&mut config.memory.l1, dhier.l1),
            (&mut config.memory.l2, dhier.l2),
            (&mut config.memory.l3, dhier.l3),
        ] {
            geom.size = 1u64 << spec.0;
            geom.assoc = spec.1;
            geom.block_size = spec.2;
            geom.latency = spec.3;
        }
        config.memory.main_latency = dhier.main_latency;
    }
    if let Some(window) = cli.window_size {
        config.pipeline.window_size = window;
    }

    Ok(config)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let program: String = std::env::args().next().unwrap_or_else(|| "vpsim".into());
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            print_usage(&program);
            process::exit(0);
        }
    };

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            print_usage(&program);
            process::exit(1);
        }
    };
    if let Err(error) = config.validate() {
        eprintln!("{error}");
        print_usage(&program);
        process::exit(1);
    }

    let mut reader = match TraceReader::open(&cli.trace) {
        Ok(reader) => reader,
        Err(error) => {
            eprintln!("{}: {error}", cli.trace.display());
            process::exit(1);
        }
    };

    let mut sim = UarchSim::new(&config, Box::new(VtageEstride::new(0)));
    sim.predictor_begin(&cli.predictor_args);

    loop {
        match reader.next_piece() {
            Ok(Some(op)) => sim.step(op),
            Ok(None) => break,
            Err(error) => {
                eprintln!("{error}");
                process::exit(1);
            }
        }
    }

    println!(" Read {} instrs ", reader.records_read());
    sim.predictor_end();
    sim.print_report();
}
