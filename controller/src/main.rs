use std::path::PathBuf;

use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use controller::*;

fn main() {
    use clap::{crate_authors, crate_description, crate_name, crate_version, Arg, Command, ValueHint};
    use std::process;

    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommands([Command::new("run").about("sync a Devfile component into a cluster").args([
            Arg::new("namespace")
                .long("namespace")
                .env("ODOSYNC_NAMESPACE")
                .required(true)
                .help("namespace the component's records and workload live in"),
            Arg::new("component")
                .long("component")
                .env("ODOSYNC_COMPONENT")
                .required(true)
                .help("Devfile component name this process targets"),
            Arg::new("devfile_path")
                .long("devfile-path")
                .value_hint(ValueHint::FilePath)
                .help("path to the Devfile, defaults to <working directory>/devfile.yaml"),
            Arg::new("default_image")
                .long("default-image")
                .env("DEVFILE_DEFAULT_IMAGE")
                .help("image used for any Devfile container that omits one"),
        ])]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("run", m)) => match Args::try_from(m) {
            Ok(args) => startup(args),
            Err(e) => Err(e),
        },
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

struct Args {
    namespace: String,
    component: String,
    devfile_path: Option<PathBuf>,
    default_image: Option<String>,
}

impl TryFrom<&clap::ArgMatches> for Args {
    type Error = Error;

    fn try_from(m: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            namespace: m.get_one::<String>("namespace").unwrap().clone(),
            component: m.get_one::<String>("component").unwrap().clone(),
            devfile_path: m.get_one::<String>("devfile_path").map(PathBuf::from),
            default_image: m.get_one::<String>("default_image").cloned(),
        })
    }
}

fn startup(args: Args) -> Result<()> {
    use tokio::{runtime, signal};
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let wd = std::env::current_dir()?;
    std::fs::create_dir_all(wd.join(".odo"))?;
    let file_appender = tracing_appender::rolling::never(wd.join(".odo"), "controller.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if std::io::stdout().is_terminal() {
            Some(tracing_subscriber::fmt::layer())
        } else {
            None
        })
        .with(if std::io::stdout().is_terminal() {
            None
        } else {
            Some(tracing_subscriber::fmt::layer().json())
        })
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer));
    tracing::subscriber::set_global_default(collector)?;
    // Keep the non-blocking writer's flush thread alive for the process lifetime.
    Box::leak(Box::new(file_guard));

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    rt.handle().spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "error reading interrupt signal");
        }
        signal_cancel.cancel();
    });
    rt.block_on(run(args, cancel))
}

async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    let config = kube::Config::infer().await?;
    let client = kube::client::ClientBuilder::try_from(config)?.build();

    let wd = std::env::current_dir()?;
    let devfile_path = orchestrator::devfile_path(&wd, args.devfile_path.as_deref());

    info!(namespace = args.namespace, component = args.component, "starting odosync");
    let opts = orchestrator::Options {
        namespace: args.namespace,
        component: args.component,
        wd,
        devfile_path,
        default_image: args.default_image,
    };
    orchestrator::run(client, opts, cancel).await
}
