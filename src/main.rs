use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use rs_multipod_kinematics::config::MultipodConfig;
use rs_multipod_kinematics::displacement::Displacement;
use rs_multipod_kinematics::leg::{LEG_JOINTS, Leg, SolverKind, SolverSettings};
use rs_multipod_kinematics::lookup::LookupTable;
use rs_multipod_kinematics::multipod::Multipod;
use rs_multipod_kinematics::utils::{format_joints, format_point};

/// Multipod kinematics: lookup table generation and direct control simulation.
#[derive(Parser, Debug)]
#[command(name = "multipod", version)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Populate a lookup table and save it
    Generate {
        /// YAML configuration, the hexapod defaults if omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output .npy file
        #[arg(short, long)]
        output: PathBuf,
        /// Body table (x, y, z, yaw to all joint angles) instead of a leg table
        #[arg(long)]
        body: bool,
    },
    /// Run direct control ticks and print the joint angles
    Simulate {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Leg table for lookup legs, or body table with --body
        #[arg(short, long)]
        table: Option<PathBuf>,
        #[arg(long)]
        body: bool,
        #[arg(long, default_value_t = 25)]
        ticks: usize,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        x: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        y: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        z: f64,
        /// Yaw in degrees
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        yaw: f64,
    },
    /// Load a table and print its shape and a few samples
    Inspect {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        table: PathBuf,
        #[arg(long)]
        body: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Generate { config, output, body } => generate(&load_config(config.as_deref())?, &output, body),
        Commands::Simulate { config, table, body, ticks, x, y, z, yaw } => {
            let config = load_config(config.as_deref())?;
            simulate(&config, table.as_deref(), body, ticks, [x, y, z, yaw.to_radians()])
        }
        Commands::Inspect { config, table, body } => inspect(&load_config(config.as_deref())?, &table, body),
    }
}

fn load_config(path: Option<&Path>) -> Result<MultipodConfig> {
    match path {
        Some(path) => MultipodConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(MultipodConfig::default()),
    }
}

fn empty_table(config: &MultipodConfig, body: bool) -> Result<LookupTable> {
    let table = if body {
        config.body_lookup.table(config.legs * LEG_JOINTS)?
    } else {
        config.lookup.table(LEG_JOINTS)?
    };
    Ok(table)
}

fn load_table(config: &MultipodConfig, path: &Path, body: bool) -> Result<LookupTable> {
    let mut table = empty_table(config, body)?;
    table.load_file(path)
        .with_context(|| format!("Failed to load lookup table from {}", path.display()))?;
    Ok(table)
}

fn generate(config: &MultipodConfig, output: &Path, body: bool) -> Result<()> {
    let mut table = empty_table(config, body)?;
    info!(shape = ?table.shape(), "populating lookup table");
    if body {
        Multipod::populate_body_table(&config.multipod_settings(), &mut table, config.body_lookup.iterations)?;
    } else {
        Leg::populate_lookup_table(&config.leg_geometry(), &mut table, config.lookup.iterations)?;
    }
    table.save_file(output)
        .with_context(|| format!("Failed to save lookup table to {}", output.display()))?;
    info!(path = %output.display(), "lookup table saved");
    Ok(())
}

fn simulate(config: &MultipodConfig, table: Option<&Path>, body: bool, ticks: usize, target: [f64; 4]) -> Result<()> {
    let settings = config.multipod_settings();
    let [x, y, z, yaw] = target;

    let multipod = match (table, body) {
        (Some(path), true) => {
            let table = load_table(config, path, true)?;
            // Joint angles come from the table, the leg solver is never stepped
            let mut settings = settings.clone();
            settings.solver = SolverSettings::default();
            let mut multipod = Multipod::new(&settings, Displacement::identity())?;
            multipod.apply_body_table(&table, x, y, z, yaw)?;
            multipod
        }
        (Some(path), false) => {
            let table = Arc::new(load_table(config, path, false)?);
            let mut multipod = Multipod::with_leg_table(&settings, Displacement::identity(), table)?;
            for _ in 0..ticks {
                multipod.direct_control_xyz(x, y, z, yaw);
            }
            multipod
        }
        (None, _) => {
            if settings.solver.kind == SolverKind::Lookup {
                bail!("The lookup solver needs a leg table (--table)");
            }
            let mut multipod = Multipod::new(&settings, Displacement::identity())?;
            for _ in 0..ticks {
                multipod.direct_control_xyz(x, y, z, yaw);
            }
            multipod
        }
    };

    for (i, leg) in multipod.legs().iter().enumerate() {
        let error = (leg.target_endpoint() - leg.current_endpoint()).norm();
        println!("leg {}: {} endpoint {} error {:.5}",
                 i, format_joints(leg.joint_angles()), format_point(&leg.current_endpoint()), error);
    }
    Ok(())
}

fn inspect(config: &MultipodConfig, path: &Path, body: bool) -> Result<()> {
    let table = load_table(config, path, body)?;
    println!("shape {:?}", table.shape());
    for (i, axis) in table.axes().iter().enumerate() {
        println!("input {}: [{}, {}] with {} points", i, axis.from, axis.to, axis.points);
    }
    let samples: [f64; 3] = [0.0, 0.5, -0.5];
    for s in samples {
        let input: Vec<f64> = table.axes().iter().map(|a| a.from + (s + 0.5) * (a.to - a.from)).collect();
        let output = table.get_lerp(&input);
        println!("{:?} -> {:?}", input, output);
    }
    Ok(())
}
