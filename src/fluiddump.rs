use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pfieldrs::{
    DiagnosticDescriptor, FieldRecord, MomentKind, PartitionLayout, RecordStatus, RunConfig,
    Species,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Reads the fluid diagnostics of a partitioned 3D PIC run
#[derive(Parser, Debug)]
#[command(
    name = "fluiddump",
    version,
    about = "Reassembles and summarises partitioned 3D fluid diagnostics",
    long_about = r#"Reads the fluid moment streams of a domain-decomposed 3D run,
gathers every timestep back onto the global grid and prints, per record,
the timestep, the simulation time and the range of each component.
Set RUST_LOG=debug to trace stream and layout setup."#
)]
struct Args {
    /// Path to the run description (.xml)
    #[arg()]
    file: PathBuf,

    /// Species whose fluid moments are read (electron or ion)
    #[arg(short = 's', long = "species")]
    species: Option<Species>,

    /// Prints the partition layout and the available diagnostics
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Restricts the summary to one moment (density, velocity, pressure, energy, heat-flux)
    #[arg(short = 'm', long = "moment")]
    moment: Option<MomentKind>,

    /// Stops after this many records
    #[arg(short = 'n', long = "limit")]
    limit: Option<usize>,

    /// Writes every reassembled record as .npy into this directory
    #[arg(long = "npy")]
    npy: Option<PathBuf>,

    /// Reads every available diagnostic, concurrently
    #[arg(short = 'a', long = "all")]
    all: bool,

    /// Shows a progress bar per diagnostic
    #[arg(short = 'p', long = "progress")]
    progress: bool,
}

fn print_layout(run: &RunConfig, layout: &PartitionLayout) {
    println!(
        "Grid: nx={} ny={} nz={} (ndim={}, dt={})",
        layout.grid.nx, layout.grid.ny, layout.grid.nz, run.ndim, run.dt
    );
    println!(
        "Processes: nvpy={} nvpz={}",
        layout.processes.nvpy, layout.processes.nvpz
    );
    println!(
        "Partitions: kyp={} kzp={} kyb={} kzb={} -> buffer {}x{}x{}",
        layout.kyp, layout.kzp, layout.kyb, layout.kzb, layout.grid.nx, layout.nyv, layout.nzv
    );
    for species in Species::ALL {
        match run.diagnostic(species) {
            Some(d) => println!(
                "\t{} [{}]: nts={} npro={} nprd={} records={} moments={:?} <{}>",
                species.description(),
                species,
                d.nts,
                d.npro,
                d.nprd,
                d.complete_records(layout),
                d.moments(run.ndim)
                    .iter()
                    .map(|k| k.name())
                    .collect::<Vec<_>>(),
                d.path.display()
            ),
            None => println!("\t{} [{}]: not written", species.description(), species),
        }
    }
}

fn value_range(record: &FieldRecord, c: usize) -> Option<(f32, f32)> {
    let comp = record.component(c)?;
    Some(comp.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    }))
}

/// Reads one diagnostic and returns its report lines.
fn dump_diagnostic(
    run: &RunConfig,
    layout: &PartitionLayout,
    diag: &DiagnosticDescriptor,
    args: &Args,
    bars: &MultiProgress,
) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>> {
    let components = match args.moment {
        Some(kind) => {
            if !diag.moments(run.ndim).contains(&kind) {
                return Err(
                    format!("{} diagnostic does not hold {}", diag.species, kind.name()).into(),
                );
            }
            kind.component_range(run.ndim)
        }
        None => 0..diag.nprd,
    };

    let mut nrec = diag.complete_records(layout);
    if let Some(limit) = args.limit {
        nrec = nrec.min(limit);
    }
    let mut report = vec![format!(
        "{} diagnostic selected, records found: nrec = {}",
        diag.species.description(),
        diag.complete_records(layout)
    )];

    let pb = if args.progress {
        let pb = bars.add(ProgressBar::new(nrec as u64));
        pb.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {prefix} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("##-"),
        );
        pb.set_prefix(diag.species.label());
        pb
    } else {
        ProgressBar::hidden()
    };

    if let Some(dir) = &args.npy {
        std::fs::create_dir_all(dir)?;
    }

    let clock = run.clock(diag);
    let mut stream = diag.open(layout)?;
    let mut record = FieldRecord::<f32>::try_new(layout, diag.nprd)?;
    for ii in 0..nrec {
        if stream.read_record_into(layout, &mut record)? == RecordStatus::EndOfStream {
            tracing::warn!(
                species = %diag.species,
                read = ii,
                expected = nrec,
                "stream ended early"
            );
            break;
        }
        let mut line = format!(
            "{} it,time= {} {}",
            diag.species,
            clock.timestep(ii),
            clock.time(ii)
        );
        for c in components.clone() {
            if let Some((lo, hi)) = value_range(&record, c) {
                line.push_str(&format!(" | c{c} [{lo:.4e}, {hi:.4e}]"));
            }
        }
        report.push(line);

        if let Some(dir) = &args.npy {
            let name = npy_name(dir, diag.species, clock.timestep(ii));
            let data = match args.moment {
                Some(kind) => record
                    .moment(kind, run.ndim)
                    .ok_or("moment missing from record")?
                    .to_owned(),
                None => record.to_valid_owned(),
            };
            ndarray_npy::write_npy(&name, &data)?;
            tracing::debug!(path = %name.display(), "wrote record");
        }
        pb.inc(1);
    }
    pb.finish();
    Ok(report)
}

fn npy_name(dir: &Path, species: Species, it: usize) -> PathBuf {
    dir.join(format!("{}.{:07}.npy", species.label().to_lowercase(), it))
}

fn main() -> Result<std::process::ExitCode, std::process::ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let run = match RunConfig::load(&args.file) {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Failed to read run description {}: {}", args.file.display(), e);
            return Err(std::process::ExitCode::FAILURE);
        }
    };
    let layout = match run.layout() {
        Ok(layout) => layout,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(std::process::ExitCode::FAILURE);
        }
    };

    if args.list {
        print_layout(&run, &layout);
        return Ok(std::process::ExitCode::SUCCESS);
    }

    let selected: Vec<&DiagnosticDescriptor> = if args.all {
        run.diagnostics.iter().collect()
    } else {
        match run.select(args.species) {
            Ok(d) => vec![d],
            Err(e) => {
                eprintln!("Error: {}", e);
                return Err(std::process::ExitCode::FAILURE);
            }
        }
    };
    if selected.is_empty() {
        eprintln!("Error: no fluid diagnostic files found");
        return Err(std::process::ExitCode::FAILURE);
    }

    let bars = MultiProgress::new();
    let reports: Vec<_> = selected
        .par_iter()
        .map(|d| (d.species, dump_diagnostic(&run, &layout, d, &args, &bars)))
        .collect();

    let mut failed = false;
    for (species, report) in reports {
        match report {
            Ok(lines) => lines.iter().for_each(|l| println!("{l}")),
            Err(e) => {
                eprintln!("Failed to read {} diagnostic: {}", species, e);
                failed = true;
            }
        }
    }
    if failed {
        return Err(std::process::ExitCode::FAILURE);
    }
    Ok(std::process::ExitCode::SUCCESS)
}
