use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use clprobe::DebugSession;

/// Printf breakpoint debugger for OpenCL kernels.
#[derive(Parser)]
#[command(name = "clprobe", version, about)]
struct Cli {
    /// Kernel source file to instrument
    #[arg(short = 'k', long)]
    kernel: PathBuf,

    /// Host application binary that launches the kernel
    #[arg(short = 'a', long)]
    application: PathBuf,

    /// Shell command that rebuilds the application before the run
    #[arg(long)]
    build: Option<String>,

    /// 1-based breakpoint line in the kernel source
    #[arg(short = 'b', long)]
    breakpoint: u32,

    /// Global thread ids to capture, in report order
    #[arg(short = 't', long, num_args = 1.., required = true)]
    threads: Vec<u64>,

    /// Overall deadline in seconds for the build and the run
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut session = DebugSession::new(&cli.kernel, &cli.application)
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    if let Some(build) = &cli.build {
        session = session.with_build_command(build.clone());
    }

    match session.run(cli.breakpoint, &cli.threads).await {
        Ok(vars) => {
            for var in &vars {
                println!("{}", var);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
