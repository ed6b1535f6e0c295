use camino::Utf8PathBuf;
use clap::Parser;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use monobuild::{BuildConfig, EsbuildBackend};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Keep running and rebuild affected packages on change.
    #[arg(long)]
    watch: bool,

    /// Base URL expression written into the registration data.
    #[arg(long, default_value = "/")]
    base_url: String,
}

fn init_logging() {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let root = Utf8PathBuf::try_from(std::env::current_dir()?)?;
    let config = BuildConfig::new(root).with_env().base_url(args.base_url);
    let backend = EsbuildBackend::new();

    if args.watch {
        monobuild::watch(config, backend)?;
    } else {
        monobuild::build(config, backend)?;
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging();

    if let Err(e) = run(args) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
