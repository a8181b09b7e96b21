use crate::boundary::{boundary_from_settings, BoundaryCondition};
use crate::floating_type_mod::FT;
use crate::io::binary::BinaryOutput;
use crate::settings::{RunSettings, RunSettingsId};
use crate::solvers::Solver;
use crate::statistics::{Statistics, StatsId};
use crate::storage::Storage;
use crate::timestepping::TimeStepping;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Recoverable error kinds of a run. Invariant violations (non-finite
/// values, storage inconsistency, impossible merges) are not represented
/// here; they panic. Convergence problems of the solvers and integrators
/// never surface as errors either: they are recovered in place and
/// reported through the statistics.
#[derive(Debug)]
pub enum RunError {
    /// Invalid or incompatible settings; reported at setup.
    Config(String),
    /// Filesystem failures, with the path for context.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Cooperative cancellation.
    Cancelled,
}

impl RunError {
    pub fn io(path: &Path, source: std::io::Error) -> RunError {
        RunError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Process exit code of the error kind: 1 for a cancelled run, 2 for
    /// configuration errors, 3 for i/o errors. 0 is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Cancelled => 1,
            RunError::Config(_) => 2,
            RunError::Io { .. } => 3,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Config(message) => write!(f, "invalid configuration: {}", message),
            RunError::Io { path, source } => {
                write!(f, "i/o error on '{}': {}", path.display(), source)
            }
            RunError::Cancelled => write!(f, "cancelled by user"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Kind of physics a run evolves; stored in the dump metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunTypeId {
    Sph = 0,
    Nbody = 1,
}

impl RunTypeId {
    pub fn from_tag(tag: u8) -> Option<RunTypeId> {
        match tag {
            0 => Some(RunTypeId::Sph),
            1 => Some(RunTypeId::Nbody),
            _ => None,
        }
    }
}

/// One phase of a simulation: owns the storage, the solver, the
/// timestepping and the output trigger, and steps until a budget is
/// exhausted or the stop flag is raised.
pub struct Run {
    pub storage: Storage,
    solver: Box<dyn Solver>,
    timestepping: TimeStepping,
    boundary: Option<Box<dyn BoundaryCondition>>,
    run_type: RunTypeId,
    name: String,
    end_time: FT,
    max_steps: i64,
    wallclock_limit: FT,
    output_interval: FT,
    output_path: PathBuf,
    time: FT,
    step_index: i64,
    dump_index: usize,
    stop: Arc<AtomicBool>,
}

impl Run {
    pub fn new(
        settings: &RunSettings,
        storage: Storage,
        solver: Box<dyn Solver>,
        run_type: RunTypeId,
    ) -> Result<Self, RunError> {
        let end_time: FT = settings.get(RunSettingsId::RunEndTime);
        if end_time <= 0. {
            return Err(RunError::Config("run end time must be positive".into()));
        }
        Ok(Run {
            storage,
            solver,
            timestepping: TimeStepping::from_settings(settings)?,
            boundary: boundary_from_settings(settings)?,
            run_type,
            name: settings.get(RunSettingsId::RunName),
            end_time,
            max_steps: settings.get(RunSettingsId::RunMaxSteps),
            wallclock_limit: settings.get(RunSettingsId::RunWallclockLimit),
            output_interval: settings.get(RunSettingsId::RunOutputInterval),
            output_path: PathBuf::from(settings.get::<String>(RunSettingsId::RunOutputPath)),
            time: 0.,
            step_index: 0,
            dump_index: 0,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared flag observed between steps; setting it ends the run cleanly.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn time(&self) -> FT {
        self.time
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn dump(&mut self, stats: &Statistics) -> Result<(), RunError> {
        std::fs::create_dir_all(&self.output_path)
            .map_err(|source| RunError::io(&self.output_path, source))?;
        let path = self
            .output_path
            .join(format!("{}_{:04}.srb", self.name.replace(' ', "_"), self.dump_index));
        let output = BinaryOutput {
            run_name: self.name.clone(),
            run_type: self.run_type,
            time: self.time,
            timestep: stats.get_float(StatsId::Timestep).unwrap_or(0.),
        };
        output.save(&path, &self.storage)?;
        self.dump_index += 1;
        Ok(())
    }

    /// Steps until the end time, the step budget or the wall-clock budget
    /// is reached; a raised stop flag ends the run with
    /// [`RunError::Cancelled`]. Budgets and the stop flag are only checked
    /// between steps, never mid-accumulation.
    pub fn run(&mut self, stats: &mut Statistics) -> Result<(), RunError> {
        // make sure all solver columns exist before the first step; every
        // material gets to register its quantities
        let materials: Vec<_> = self
            .storage
            .materials()
            .iter()
            .map(|entry| entry.material.clone())
            .collect();
        if materials.is_empty() {
            self.solver
                .create(&mut self.storage, &crate::storage::Material::null());
        }
        for material in &materials {
            self.solver.create(&mut self.storage, material);
        }

        let started = Instant::now();
        let mut next_dump = 0.;
        while self.time < self.end_time {
            if self.stop.load(Ordering::Relaxed) {
                info!("run '{}' cancelled at t = {}", self.name, self.time);
                return Err(RunError::Cancelled);
            }
            if self.step_index >= self.max_steps {
                info!("run '{}' exhausted its step budget", self.name);
                break;
            }
            if started.elapsed().as_secs_f64() as FT > self.wallclock_limit {
                info!("run '{}' exhausted its wall-clock budget", self.name);
                break;
            }

            if self.time >= next_dump {
                self.dump(stats)?;
                next_dump += self.output_interval;
            }

            let step_started = Instant::now();
            let dt = self.timestepping.current_dt();
            if let Some(boundary) = &mut self.boundary {
                boundary.initialize(&mut self.storage);
            }
            self.timestepping
                .step(self.solver.as_mut(), &mut self.storage, stats);
            if let Some(boundary) = &mut self.boundary {
                boundary.finalize(&mut self.storage);
            }
            self.time += dt;
            self.step_index += 1;
            stats.set_float(StatsId::RunTime, self.time);
            stats.set_float(
                StatsId::StepWallclockMs,
                step_started.elapsed().as_secs_f64() as FT * 1000.,
            );
        }

        // final state
        self.dump(stats)?;
        Ok(())
    }
}
