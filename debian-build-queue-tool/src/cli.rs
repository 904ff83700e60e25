// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_build_queue::{
        build_queue::BuildQueue,
        config::{BuildQueueConfig, QueueLayout},
        environment::Cowbuilder,
        error::BuildQueueError,
        fetch::{fetch_source_package, HttpFetcher},
        queue_item::{QueueItem, QueueLocation},
    },
    log::{info, warn, LevelFilter},
    thiserror::Error,
};

const CONFIG_ABOUT: &str = "\
Configuration

Settings are read from the YAML file given by --config. Every key is optional
and defaults as follows:

mirror: http://192.168.1.1/ubuntu
distribution: gutsy
components: [universe, multiverse]
layout:
  incoming: /build/incoming
  queued: /build/queued
  built: /build/complete
  work: /build/work
descriptor_extension: .dsc
cowbuilder: cowbuilder

--root DIR replaces the layout with DIR/incoming, DIR/queued, DIR/complete
and DIR/work.
";

const RUN_ABOUT: &str = "\
Process the build queue once.

Interrupted file operations from a previous run are completed first and
descriptors left in the queued directory are picked up again. Then every
valid descriptor in the incoming directory is moved to the queued directory.

If anything is queued, the build environment is created (once per process),
refreshed, and each queued package is built in order. An item is removed
after its build attempt whether or not the build succeeded.

The process exits 0 once the pass completes, even if some builds failed.
";

#[derive(Debug, Error)]
pub enum DbqError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    BuildQueue(#[from] BuildQueueError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, DbqError>;

type CowbuilderQueue = BuildQueue<Cowbuilder, Cowbuilder>;

fn resolve_config(args: &ArgMatches) -> Result<BuildQueueConfig> {
    let mut config = if let Some(path) = args.value_of_os("config") {
        BuildQueueConfig::from_yaml_path(path)?
    } else {
        BuildQueueConfig::default()
    };

    if let Some(root) = args.value_of_os("root") {
        config.layout = QueueLayout::under_root(root);
    }

    Ok(config)
}

fn new_queue(config: BuildQueueConfig) -> CowbuilderQueue {
    let cowbuilder = Cowbuilder::new(&config.cowbuilder);

    BuildQueue::new(config, cowbuilder.clone(), cowbuilder)
}

fn import(queue: &mut CowbuilderQueue) -> Result<()> {
    queue.config().layout.ensure_directories()?;

    let recovered = queue.recover()?;
    if recovered > 0 {
        info!("recovered {} queued items", recovered);
    }

    let imported = queue.import_incoming()?;
    info!("queued {} new items; {} awaiting build", imported, queue.size());

    Ok(())
}

fn command_run(args: &ArgMatches) -> Result<()> {
    let mut queue = new_queue(resolve_config(args)?);

    import(&mut queue)?;

    if queue.is_empty() {
        info!("nothing to build");
        return Ok(());
    }

    let report = queue.build()?;

    for record in &report.records {
        println!("{}: {}", record.source, record.outcome);
    }

    if report.failed() > 0 {
        warn!(
            "{} of {} builds failed",
            report.failed(),
            report.records.len()
        );
    }

    Ok(())
}

fn command_import(args: &ArgMatches) -> Result<()> {
    let mut queue = new_queue(resolve_config(args)?);

    import(&mut queue)?;

    for item in queue.iter() {
        println!("{}", item);
    }

    Ok(())
}

fn command_status(args: &ArgMatches) -> Result<()> {
    let config = resolve_config(args)?;
    let queue = new_queue(config.clone());

    for location in [QueueLocation::Incoming, QueueLocation::Queued] {
        let directory = config.layout.directory(location);
        println!("{} ({})", location, directory.display());

        if !directory.is_dir() {
            println!("  (missing)");
            continue;
        }

        for name in queue.list_descriptors(location)? {
            let status = match QueueItem::load(&config.layout, &name, location)
                .and_then(|item| item.validate().map(|valid| (item, valid)))
            {
                Ok((item, true)) => format!("valid {}", item.descriptor()?.version()),
                Ok((_, false)) => "invalid".to_string(),
                Err(e) => format!("error: {}", e),
            };

            println!("  {} {}", name, status);
        }
    }

    Ok(())
}

fn command_fetch(args: &ArgMatches) -> Result<()> {
    let config = resolve_config(args)?;
    let url = args.value_of("url").expect("url argument is required");

    config.layout.ensure_directories()?;

    let fetcher = HttpFetcher::new()?;
    let record = fetch_source_package(&fetcher, url, &config.layout.incoming)?;

    println!("{} {}", record.source(), record.version());

    Ok(())
}

fn command_init(args: &ArgMatches) -> Result<()> {
    let config = resolve_config(args)?;

    config.layout.ensure_directories()?;

    for path in config.layout.iter_directories() {
        println!("{}", path.display());
    }

    Ok(())
}

fn command_show_config(args: &ArgMatches) -> Result<()> {
    print!("{}", resolve_config(args)?.to_yaml_string()?);

    Ok(())
}

fn init_logging(matches: &ArgMatches) {
    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    if log_level <= LevelFilter::Info {
        builder.format_timestamp(None).format_target(false);
    }

    if log_level == LevelFilter::Info {
        builder.filter_module("rustls", LevelFilter::Error);
        builder.filter_module("reqwest", LevelFilter::Warn);
    }

    builder.init();
}

pub fn run_cli() -> Result<()> {
    let app = Command::new("Debian Build Queue")
        .version("0.1")
        .about("Validate and build queued Debian source packages")
        .after_long_help(CONFIG_ABOUT)
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML configuration file"),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Directory holding the incoming, queued, complete and work directories"),
        );

    let app = app.subcommand(
        Command::new("run")
            .about("Import incoming packages and build everything queued")
            .long_about(RUN_ABOUT),
    );

    let app = app.subcommand(
        Command::new("import")
            .about("Move valid incoming packages to the queue without building"),
    );

    let app = app.subcommand(
        Command::new("status").about("Show descriptors in the incoming and queued directories"),
    );

    let app = app.subcommand(
        Command::new("fetch")
            .about("Download a source package into the incoming directory")
            .arg(
                Arg::new("url")
                    .takes_value(true)
                    .required(true)
                    .help("URL of the .dsc file to fetch"),
            ),
    );

    let app = app.subcommand(Command::new("init").about("Create the queue directories"));

    let mut app =
        app.subcommand(Command::new("show-config").about("Print the effective configuration"));

    let matches = app.clone().get_matches();

    init_logging(&matches);

    match matches.subcommand() {
        Some(("run", args)) => command_run(args),
        Some(("import", args)) => command_import(args),
        Some(("status", args)) => command_status(args),
        Some(("fetch", args)) => command_fetch(args),
        Some(("init", args)) => command_init(args),
        Some(("show-config", args)) => command_show_config(args),
        Some((command, _)) => Err(DbqError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}
