use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gcc_builder::log;
use gcc_builder::pipeline::{self, BuildContext, BuildError, Outcome, Pipeline};
use gcc_builder::process::{CommandRunner, SystemRunner};
use gcc_builder::request::{default_jobs, Arch, BuildRequest, Compression, Flavor};
use gcc_builder::resolver::{self, host, HostInfo, Mirrors, SystemClock};
use gcc_builder::store;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, warn, Level};

/// Builds a GCC cross (or native) toolchain from upstream sources.
#[derive(Parser)]
#[command(author, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Target architecture
    #[arg(long, short)]
    arch: Arch,

    /// Upstream flavor of the compiler sources
    #[arg(long, short)]
    source: Flavor,

    /// GCC major version
    #[arg(long, short)]
    version: u32,

    #[arg(default_value_t = default_jobs(), long, short)]
    jobs: usize,

    /// Keep existing clones as they are
    #[arg(default_value_t = false, long)]
    no_update: bool,

    /// Clone with full history instead of depth 1
    #[arg(default_value_t = false, long)]
    full_history: bool,

    /// Archive the finished toolchain
    #[arg(long, short)]
    package: Option<Compression>,

    /// Build inside tmpfs mounts
    #[arg(default_value_t = false, long)]
    tmpfs: bool,

    /// Use release tarballs instead of git mirrors
    #[arg(default_value_t = false, long, short)]
    tarballs: bool,

    #[arg(default_value_t = false, long, short = 'V')]
    verbose: bool,

    #[arg(default_value = ".", env = "GCC_BUILDER_ROOT", long)]
    root: PathBuf,

    #[arg(long)]
    gnu_mirror: Option<String>,

    #[arg(env = "GCC_BUILDER_PATCH_MIRROR", long)]
    patch_mirror: Option<String>,

    #[arg(default_value_t = Level::INFO, long)]
    level: Level,
}

impl Cli {
    fn request(&self) -> BuildRequest {
        let mut request = BuildRequest::new(self.arch, self.source, self.version);

        request.jobs = self.jobs;
        request.tarballs = self.tarballs;
        request.tmpfs = self.tmpfs;
        request.no_update = self.no_update;
        request.full_history = self.full_history;
        request.package = self.package;
        request.verbose = self.verbose;

        request
    }

    fn mirrors(&self) -> Mirrors {
        let mut mirrors = Mirrors::default();

        if let Some(gnu) = &self.gnu_mirror {
            mirrors.gnu = gnu.trim_end_matches('/').to_string();
        }

        mirrors.patches = self.patch_mirror.clone();

        mirrors
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn interrupted() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}

async fn build(cli: &Cli, request: BuildRequest) -> Result<Result<Outcome, BuildError>> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::default());

    let host = match request.arch {
        Arch::Host => host::detect(runner.as_ref()).await,
        _ => HostInfo::default(),
    };

    let mirrors = cli.mirrors();
    let clock = Arc::new(SystemClock);
    let plan = resolver::resolve(&request, &host, &mirrors, clock.as_ref())?;

    log::print_plan(&plan);

    tokio::fs::create_dir_all(&cli.root)
        .await
        .with_context(|| format!("failed to create {}", cli.root.display()))?;

    let root = tokio::fs::canonicalize(&cli.root).await?;
    let ctx = BuildContext::new(request, plan, root, mirrors, runner, clock);

    store::check(&ctx.layout).await?;

    Ok(pipeline::execute(&Pipeline::standard(), &ctx, interrupted()).await)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let request = cli.request();
    let level = log::level(cli.level, request.verbose);

    let subscriber = log::subscriber(level, std::io::stdout);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set up logging: {err}");
        return ExitCode::FAILURE;
    }

    let result = match build(&cli, request).await {
        Ok(result) => result,
        Err(err) => {
            error!("{:#}", err);
            return ExitCode::FAILURE;
        }
    };

    match &result {
        Ok(Outcome::Finished) => {}
        Ok(Outcome::Cancelled) => log::print_aborted(),
        Err(err) => error!("{}", err),
    }

    ExitCode::from(pipeline::exit_code(&result))
}
