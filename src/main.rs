use clap::{Parser, Subcommand};
use log::info;
use rubble::boundary::Domain;
use rubble::floating_type_mod::FT;
use rubble::initial::InitialConditions;
use rubble::io::binary::BinaryInput;
use rubble::nbody::HardSphereSolver;
use rubble::run::{Run, RunError, RunTypeId};
use rubble::settings::{BodySettings, BodySettingsId, RunSettings};
use rubble::solvers;
use rubble::statistics::Statistics;
use rubble::storage::Storage;
use rubble::vec3;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rubble", about = "SPH impact and N-body reaccumulation simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs an impact: SPH fragmentation followed by an optional N-body
    /// reaccumulation phase.
    Run {
        /// Run configuration; compiled-in defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Target body configuration.
        #[arg(long)]
        target: Option<PathBuf>,
        /// Impactor configuration; no impactor when omitted.
        #[arg(long)]
        impactor: Option<PathBuf>,
        /// Hand the fragments over to the hard-sphere solver afterwards.
        #[arg(long)]
        reaccumulate: bool,
    },
    /// Prints the metadata of a state dump.
    Info { dump: PathBuf },
    /// Prints the default run configuration.
    Defaults,
}

fn load_run_settings(path: &Option<PathBuf>) -> Result<RunSettings, RunError> {
    match path {
        Some(path) => RunSettings::load(path),
        None => Ok(RunSettings::default()),
    }
}

fn load_body_settings(path: &Option<PathBuf>) -> Result<BodySettings, RunError> {
    match path {
        Some(path) => BodySettings::load(path),
        None => Ok(BodySettings::default()),
    }
}

fn run_impact(
    config: &Option<PathBuf>,
    target: &Option<PathBuf>,
    impactor: &Option<PathBuf>,
    reaccumulate: bool,
) -> Result<(), RunError> {
    let settings = load_run_settings(config)?;
    let target_params = load_body_settings(target)?;

    let mut storage = Storage::new();
    let mut initial = InitialConditions::new();

    let target_radius: FT = target_params.get(BodySettingsId::BodyRadius);
    let target_domain = Domain::Sphere {
        center: vec3(0., 0., 0.),
        radius: target_radius,
    };
    let n = initial.add_body(&mut storage, &target_domain, target_params)?;
    info!("target body: {} particles", n);

    if let Some(impactor) = impactor {
        let impactor_params = BodySettings::load(impactor)?;
        let impactor_domain = Domain::Sphere {
            center: vec3(0., 0., 0.),
            radius: impactor_params.get(BodySettingsId::BodyRadius),
        };
        let n = initial.add_body(&mut storage, &impactor_domain, impactor_params)?;
        info!("impactor: {} particles", n);
    }

    let mut stats = Statistics::new();

    // fragmentation phase
    let solver = solvers::create_solver(&settings)?;
    let mut run = Run::new(&settings, storage, solver, RunTypeId::Sph)?;
    run.run(&mut stats)?;
    info!("fragmentation phase finished at t = {}", run.time());

    if reaccumulate {
        // hand the fragments to the hard-sphere solver; SPH smoothing
        // lengths become particle radii
        let storage = run.storage;
        let solver = Box::new(HardSphereSolver::from_settings(&settings)?);
        let mut nbody = Run::new(&settings, storage, solver, RunTypeId::Nbody)?;
        nbody.run(&mut stats)?;
        info!("reaccumulation phase finished at t = {}", nbody.time());
    }
    Ok(())
}

fn show_info(dump: &PathBuf) -> Result<(), RunError> {
    let (storage, metadata) = BinaryInput::load(dump)?;
    println!("run:       {}", metadata.run_name);
    println!("type:      {:?}", metadata.run_type);
    println!("time:      {}", metadata.time);
    println!("timestep:  {}", metadata.timestep);
    println!("particles: {}", storage.particle_count());
    println!("materials: {}", storage.material_count());
    println!("quantities:");
    for (id, q) in storage.quantities() {
        println!(
            "  {:<24} {:?} order {}",
            id.metadata().name,
            q.kind(),
            q.order() as u8
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Run {
            config,
            target,
            impactor,
            reaccumulate,
        } => run_impact(config, target, impactor, *reaccumulate),
        Command::Info { dump } => show_info(dump),
        Command::Defaults => {
            print!("{}", RunSettings::default().to_yaml());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let code = error.exit_code();
            eprintln!("{:#}", anyhow::Error::new(error).context("run failed"));
            ExitCode::from(code as u8)
        }
    }
}
