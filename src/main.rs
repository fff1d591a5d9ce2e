use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use feature_flags::{
    disable_flag, enable_flag, form_data, get_flag_history, import_flag_states_csv, Config,
    ConditionRegistry, FlagContext, FlagMetadataForm, FlagSet, FlagStateForm, RequestInfo,
};

/// Feature flag administration
#[derive(Parser, Debug)]
#[command(name = "feature-flags")]
#[command(version, about, long_about = None)]
struct Cli {
    /// SQLite database holding flag states and metadata
    #[arg(long, global = true, env = "FLAGS_DATABASE")]
    database: Option<PathBuf>,

    /// JSON file declaring flags and their conditions
    #[arg(long, global = true, env = "FLAGS_SETTINGS")]
    settings: Option<PathBuf>,

    /// Log filter, e.g. "info" or "feature_flags=debug"
    #[arg(long, global = true, env = "FLAGS_LOG")]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered conditions
    Conditions,

    /// List all flags with their conditions and metadata
    List,

    /// Add a flag state (validated like form input)
    AddState {
        name: String,
        condition: String,
        value: String,

        /// Condition must be met for the flag to be enabled
        #[arg(long)]
        required: bool,
    },

    /// Add a metadata entry to a flag
    AddMeta {
        name: String,
        key: String,
        value: String,
    },

    /// Evaluate a flag
    Check {
        name: String,

        /// Evaluate as this user
        #[arg(long, conflicts_with = "anonymous")]
        user: Option<String>,

        /// Evaluate as an anonymous request
        #[arg(long)]
        anonymous: bool,

        /// Request path
        #[arg(long)]
        path: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,

        /// Evaluation time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        at: Option<String>,
    },

    /// Set the flag's boolean state to on
    Enable { name: String },

    /// Set the flag's boolean state to off
    Disable { name: String },

    /// Import flag states from a CSV file (name,condition,value[,required])
    Import { file: PathBuf },

    /// Show the change history of a flag
    History { name: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config();

    init_logging(&config);

    let registry = ConditionRegistry::with_defaults();
    run(cli.command, &config, &registry)
}

impl Cli {
    /// Defaults overridden by whatever clap resolved (flag first, then FLAGS_* variable)
    fn config(&self) -> Config {
        Config::default()
            .with_database(self.database.clone())
            .with_settings(self.settings.clone())
            .with_log_filter(self.log.clone())
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(command: Commands, config: &Config, registry: &ConditionRegistry) -> Result<()> {
    match command {
        Commands::Conditions => {
            for name in registry.list_names() {
                println!("{}", name);
            }
        }

        Commands::List => {
            let conn = config.open_database()?;
            let flags = FlagSet::load(&config.load_settings()?, &conn)?;

            if flags.is_empty() {
                println!("No flags defined");
            }
            for flag in flags.iter() {
                println!("{}", flag.name);
                for condition in &flag.conditions {
                    println!(
                        "  {} = {}{} ({})",
                        condition.condition,
                        condition.value,
                        if condition.required { " [required]" } else { "" },
                        condition.source.as_str(),
                    );
                }
                for (key, value) in &flag.metadata {
                    println!("  {}: {}", key, value);
                }
            }
        }

        Commands::AddState { name, condition, value, required } => {
            let conn = config.open_database()?;
            let mut data = form_data([("name", name), ("condition", condition), ("value", value)]);
            if required {
                data.insert("required".to_string(), "on".to_string());
            }

            let form = FlagStateForm::new(&data, registry);
            if !form.is_valid() {
                print_help(&form.error_help());
                bail!("Invalid flag state: {}", form.errors());
            }
            let state = form.save(&conn)?;
            println!("✓ Added {} {} = {} ({})", state.name, state.condition, state.value, state.id);
        }

        Commands::AddMeta { name, key, value } => {
            let conn = config.open_database()?;
            let form = FlagMetadataForm::new(&form_data([("name", name), ("key", key), ("value", value)]));
            if !form.is_valid() {
                print_help(&form.error_help());
                bail!("Invalid flag metadata: {}", form.errors());
            }
            let metadata = form.save(&conn)?;
            println!("✓ Added {} {}: {}", metadata.name, metadata.key, metadata.value);
        }

        Commands::Check { name, user, anonymous, path, params, at } => {
            let conn = config.open_database()?;
            let flags = FlagSet::load(&config.load_settings()?, &conn)?;
            let ctx = build_context(user, anonymous, path, params, at)?;

            match flags.state(&name, registry, &ctx)? {
                Some(true) => println!("{}: enabled", name),
                Some(false) => println!("{}: disabled", name),
                None => println!("{}: not defined (disabled)", name),
            }
        }

        Commands::Enable { name } => {
            let conn = config.open_database()?;
            enable_flag(&conn, &name, "cli")?;
            println!("✓ {} enabled", name);
        }

        Commands::Disable { name } => {
            let conn = config.open_database()?;
            disable_flag(&conn, &name, "cli")?;
            println!("✓ {} disabled", name);
        }

        Commands::Import { file } => {
            let conn = config.open_database()?;
            let report = import_flag_states_csv(&file, registry, &conn)?;

            println!("✓ Inserted: {} flag states", report.inserted);
            println!("✓ Skipped duplicates: {}", report.duplicates);
            for rejected in &report.rejected {
                println!("✗ Line {}: {}", rejected.line, rejected.errors);
            }
        }

        Commands::History { name } => {
            let conn = config.open_database()?;
            let history = get_flag_history(&conn, &name)?;

            if history.is_empty() {
                println!("No history for {}", name);
            }
            for change in history {
                println!(
                    "{} {} by {} {}",
                    change.recorded_at.to_rfc3339(),
                    change.kind.as_str(),
                    change.actor,
                    change.details
                );
            }
        }
    }

    Ok(())
}

fn print_help(help: &[(&str, &str)]) {
    for (label, text) in help {
        eprintln!("  {}: {}", label, text);
    }
}

fn build_context(
    user: Option<String>,
    anonymous: bool,
    path: Option<String>,
    params: Vec<String>,
    at: Option<String>,
) -> Result<FlagContext> {
    let mut ctx = FlagContext::new();

    if user.is_some() || anonymous || path.is_some() || !params.is_empty() {
        let mut request = RequestInfo::new(path.unwrap_or_else(|| "/".to_string()));
        request.username = user;

        for param in params {
            let (key, value) = param
                .split_once('=')
                .with_context(|| format!("Parameter must be key=value: {}", param))?;
            request = request.with_param(key, value);
        }
        ctx = ctx.with_request(request);
    }

    if let Some(at) = at {
        let now = feature_flags::parse_date(&at).with_context(|| format!("Invalid --at time: {}", at))?;
        ctx = ctx.at(now);
    }

    Ok(ctx)
}
