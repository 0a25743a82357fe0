use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Parser;

use overlay_restore::{
    default_output_path, ExecutionStrategy, NoiseParams, NormalizedRegion, ProcessOutcome,
    ProfileKind, RemovalEngine, RunOptions,
};

#[derive(Parser)]
#[command(
    name = "overlay-restore",
    about = "Detect and repair overlay watermarks via neighbor-sampling inpainting",
    version,
    after_help = "Simple usage: overlay-restore <image>  (heuristic detection, repaired copy written next to the input)\n\n\
                  Mark the watermark yourself with --region X,Y,W,H (fractions of the image,\n\
                  e.g. --region 0.7,0.85,0.25,0.1) to override automatic detection."
)]
struct Cli {
    /// Input image file or directory
    input: String,

    /// Output file or directory (default: {name}_restored.{ext})
    #[arg(short, long)]
    output: Option<String>,

    /// Detection/repair profile (default: enhanced, or region-exact with --region)
    #[arg(short, long)]
    profile: Option<ProfileKind>,

    /// Explicit watermark region as normalized "x,y,w,h" (implies region-exact profile unless --profile is given)
    #[arg(short, long)]
    region: Option<String>,

    /// Run the engine on a background thread instead of the calling thread
    #[arg(long)]
    background: bool,

    /// Number of row bands to split the image into
    #[arg(long, default_value = "0")]
    bands: u32,

    /// Abort a run after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Add seeded repair noise with the given seed (deterministic per seed)
    #[arg(long)]
    noise_seed: Option<u64>,

    /// Noise amplitude in channel units (only with --noise-seed)
    #[arg(long, default_value = "3")]
    noise_amplitude: u8,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn parse_region(arg: &str) -> Result<NormalizedRegion, String> {
    let parts: Vec<&str> = arg.split(',').collect();
    if parts.len() != 4 {
        return Err(format!("expected x,y,w,h, got '{arg}'"));
    }
    let mut vals = [0.0f32; 4];
    for (v, part) in vals.iter_mut().zip(&parts) {
        *v = part
            .trim()
            .parse()
            .map_err(|e| format!("bad component '{part}': {e}"))?;
    }
    NormalizedRegion::new(vals[0], vals[1], vals[2], vals[3]).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "overlay_restore=debug".into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let region = match cli.region.as_deref().map(parse_region) {
        Some(Ok(r)) => Some(r),
        Some(Err(e)) => {
            eprintln!("Error: invalid --region: {e}");
            process::exit(1);
        }
        None => None,
    };

    // An explicit region defaults to the exact-region profile.
    let profile_kind = cli.profile.unwrap_or(if region.is_some() {
        ProfileKind::RegionExact
    } else {
        ProfileKind::Enhanced
    });

    let opts = RunOptions {
        strategy: if cli.background {
            ExecutionStrategy::Background
        } else {
            ExecutionStrategy::Cooperative
        },
        band_count: cli.bands,
        cancel: None,
        timeout: cli.timeout_ms.map(Duration::from_millis),
        noise: cli.noise_seed.map(|seed| NoiseParams {
            seed,
            amplitude: cli.noise_amplitude,
        }),
    };

    let engine = RemovalEngine::new(profile_kind.profile());

    let input_path = Path::new(&cli.input);
    if !input_path.exists() {
        eprintln!("Error: Input path does not exist: {}", cli.input);
        process::exit(1);
    }

    if !cli.quiet {
        match region {
            Some(r) => eprintln!(
                "Explicit region ({:.2},{:.2})+({:.2}x{:.2}), profile: {profile_kind}",
                r.x, r.y, r.w, r.h
            ),
            None => eprintln!("Heuristic detection, profile: {profile_kind}"),
        }
        eprintln!();
    }

    let results = if input_path.is_dir() {
        let output_dir = if let Some(o) = &cli.output {
            PathBuf::from(o)
        } else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: overlay-restore <input_dir> -o <output_dir>");
            process::exit(1);
        };
        engine.process_directory(input_path, &output_dir, region, &opts)
    } else {
        let output_path = match &cli.output {
            Some(o) => PathBuf::from(o),
            None => default_output_path(input_path),
        };
        vec![engine.process_file(input_path, &output_path, region, &opts)]
    };

    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fail_count = 0u32;

    for r in &results {
        print_outcome(r, cli.quiet);
        if r.skipped {
            skip_count += 1;
        } else if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 && !cli.quiet {
        eprintln!();
        eprint!("[Summary] Repaired: {success_count}");
        if skip_count > 0 {
            eprint!(", Skipped: {skip_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

fn print_outcome(outcome: &ProcessOutcome, quiet: bool) {
    if quiet && outcome.success {
        return;
    }

    let filename = outcome.path.file_name().map_or_else(
        || outcome.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if outcome.skipped {
        if !quiet {
            eprintln!("[SKIP] {filename}: {}", outcome.message);
        }
    } else if outcome.success {
        if !quiet {
            eprintln!("[OK] {filename}");
        }
    } else {
        eprintln!("[FAIL] {filename}: {}", outcome.message);
    }
}
