//! Workload-driven index advisor for openGauss
//!
//! Reads a workload (SQL file or JSON template store), asks the optimizer of
//! the target database about hypothetical indexes, and prints the recommended
//! indexes together with unused or redundant existing ones.

use clap::{Arg, ArgAction, ArgMatches, Command};
use dbmind_advisor::index_advisor::report::render_text;
use dbmind_advisor::logging::{init_logging, parse_level};
use dbmind_advisor::metrics::gather_metrics;
use dbmind_advisor::{AdvisorConfig, GsqlExecutor, IndexAdvisor};
use std::error::Error;
use std::path::PathBuf;

fn main() {
    let matches = create_cli().get_matches();

    if let Err(e) = run(&matches) {
        eprintln!("Error: {}", e);
        let code = e
            .downcast_ref::<dbmind_advisor::Error>()
            .map(|e| e.error_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn create_cli() -> Command {
    Command::new("index-advisor")
        .about("Recommend indexes for a SQL workload")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(Arg::new("db_port")
            .help("Port of the database")
            .required(true)
            .value_parser(clap::value_parser!(u16))
            .index(1))
        .arg(Arg::new("database")
            .help("Name of the database")
            .required(true)
            .index(2))
        .arg(Arg::new("file")
            .help("Workload file, SQL statements or a JSON template store with --json")
            .required(true)
            .value_parser(clap::value_parser!(PathBuf))
            .index(3))
        .arg(Arg::new("schema")
            .help("Schema the workload runs against")
            .long("schema")
            .required(true))
        .arg(Arg::new("host")
            .help("Database host")
            .long("host"))
        .arg(Arg::new("db-user")
            .help("Database user")
            .long("db-user"))
        .arg(Arg::new("password-env")
            .help("Environment variable holding the password")
            .long("password-env"))
        .arg(Arg::new("max-index-num")
            .help("Maximum number of recommended indexes")
            .long("max-index-num")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("max-index-storage")
            .help("Storage budget of the recommendation in MB")
            .long("max-index-storage")
            .value_parser(clap::value_parser!(f64)))
        .arg(Arg::new("multi-iter-mode")
            .help("Search index combinations instead of ranking single indexes")
            .long("multi-iter-mode")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("max-n-distinct")
            .help("Largest 1/n_distinct of a candidate column")
            .long("max-n-distinct")
            .value_parser(clap::value_parser!(f64)))
        .arg(Arg::new("min-improved-rate")
            .help("Smallest mean cost reduction of a recommended index")
            .long("min-improved-rate")
            .value_parser(clap::value_parser!(f64)))
        .arg(Arg::new("max-index-columns")
            .help("Widest recommended index")
            .long("max-index-columns")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("min-reltuples")
            .help("Smallest table that gets index candidates")
            .long("min-reltuples")
            .value_parser(clap::value_parser!(f64)))
        .arg(Arg::new("multi-node")
            .help("Target is a distributed deployment")
            .long("multi-node")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("advise-gsi")
            .help("Also propose global secondary indexes")
            .long("advise-gsi")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("multi-thread-num")
            .help("Worker threads, 0 runs serially")
            .long("multi-thread-num")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("json")
            .help("Workload file is a JSON template store")
            .long("json")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("driver")
            .help("Database driver")
            .long("driver")
            .value_parser(["gsql"])
            .default_value("gsql"))
        .arg(Arg::new("show-detail")
            .help("Show per-statement details")
            .long("show-detail")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("show-benefits")
            .help("Show benefit and storage of every index")
            .long("show-benefits")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("config")
            .help("JSON configuration file, overridden by flags")
            .long("config")
            .value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("output")
            .help("Output format")
            .long("output")
            .value_parser(["text", "json"])
            .default_value("json"))
        .arg(Arg::new("log-level")
            .help("Log level")
            .long("log-level")
            .default_value("warn"))
        .arg(Arg::new("log-json")
            .help("Emit logs as JSON")
            .long("log-json")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("print-metrics")
            .help("Print run metrics in Prometheus text format to stderr")
            .long("print-metrics")
            .action(ArgAction::SetTrue))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String, Box<dyn Error>> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| format!("missing argument: {}", name).into())
}

/// Layer command line flags over the configuration file
fn build_config(matches: &ArgMatches) -> Result<AdvisorConfig, Box<dyn Error>> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => AdvisorConfig::from_json_file(path)?,
        None => AdvisorConfig::default(),
    };
    config.schema = required(matches, "schema")?.clone();
    if let Some(n) = matches.get_one::<usize>("max-index-num") {
        config.max_index_num = Some(*n);
    }
    if let Some(mb) = matches.get_one::<f64>("max-index-storage") {
        config.max_index_storage = Some(*mb);
    }
    if let Some(v) = matches.get_one::<f64>("max-n-distinct") {
        config.max_n_distinct = *v;
    }
    if let Some(v) = matches.get_one::<f64>("min-improved-rate") {
        config.min_improved_rate = *v;
    }
    if let Some(v) = matches.get_one::<usize>("max-index-columns") {
        config.max_index_columns = *v;
    }
    if let Some(v) = matches.get_one::<f64>("min-reltuples") {
        config.min_reltuples = *v;
    }
    if let Some(v) = matches.get_one::<usize>("multi-thread-num") {
        config.multi_thread_num = *v;
    }
    config.multi_iter_mode |= matches.get_flag("multi-iter-mode");
    config.multi_node |= matches.get_flag("multi-node");
    config.advise_gsi |= matches.get_flag("advise-gsi");
    Ok(config)
}

fn run(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let level_name = required(matches, "log-level")?;
    let level = parse_level(level_name).ok_or_else(|| format!("unknown log level: {}", level_name))?;
    init_logging(level, matches.get_flag("log-json"));

    let config = build_config(matches)?;
    let port = *matches.get_one::<u16>("db_port").ok_or("missing argument: db_port")?;
    let database = required(matches, "database")?;
    let file = matches.get_one::<PathBuf>("file").ok_or("missing argument: file")?;

    let mut executor = GsqlExecutor::new(port, database.as_str(), config.schema.as_str());
    if let Some(host) = matches.get_one::<String>("host") {
        executor = executor.with_host(host.as_str());
    }
    if let Some(user) = matches.get_one::<String>("db-user") {
        let password = match matches.get_one::<String>("password-env") {
            Some(var) => Some(std::env::var(var).map_err(|_| format!("environment variable {} is not set", var))?),
            None => None,
        };
        executor = executor.with_credentials(user.as_str(), password);
    }

    let advisor = IndexAdvisor::new(&executor, config)?;
    let report = advisor.advise_file(file, matches.get_flag("json"))?;

    let detail = matches.get_flag("show-detail");
    let benefits = matches.get_flag("show-benefits");
    match required(matches, "output")?.as_str() {
        "text" => print!("{}", render_text(&report, detail, benefits)),
        _ => {
            println!("{}", report.to_json()?);
            if detail || benefits {
                eprint!("{}", render_text(&report, detail, benefits));
            }
        }
    }
    if matches.get_flag("print-metrics") {
        eprint!("{}", gather_metrics()?);
    }
    Ok(())
}
