use clap::{ArgAction, Parser, Subcommand};
use stagehand::config::{self, CONFIG_FILE, SiteConfig};
use stagehand::{FsSource, Pipeline, output};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn version_string() -> &'static str {
    let on_tag = env!("STAGEHAND_ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("STAGEHAND_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Plugin-driven static site builder")]
#[command(long_about = "\
Plugin-driven static site builder

Every file under the content directory is run through a chain of events
(PRE_RENDER, SHORTCODES, MARKDOWN, TEMPLATE, POST_RENDER) and each feature
is a plugin listening on some of them.

Content structure:

  content/
  ├── index.md                 # → public/index.html
  ├── 010-about.md             # → public/about/index.html (prefix stripped)
  ├── 020-blog/
  │   ├── index.md             # → public/blog/index.html
  │   └── 010-hello.md         # → public/blog/hello/index.html
  └── assets/                  # Copied verbatim into public/

Front matter is an optional TOML block between +++ lines:

  +++
  title = \"Hello\"
  slug = \"hi\"        # overrides the URL segment
  draft = true       # never written
  +++

Run 'stagehand gen-config' to generate a documented stagehand.toml.
Run 'stagehand plugins' to see plugin states and plugin-provided commands.")]
#[command(version = version_string())]
struct Cli {
    /// Config file
    #[arg(long, default_value = CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Content directory (overrides content_dir)
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Output directory (overrides output_dir)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: CREATE → every file → POST_LOOP
    Build,
    /// Validate plugins and list content without building
    Check,
    /// List plugins with their lifecycle state, and plugin commands
    Plugins,
    /// Print a stock stagehand.toml with all options documented
    GenConfig,
    /// A command contributed by a plugin
    #[command(external_subcommand)]
    External(Vec<String>),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        // Every error message already embeds its cause.
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    match &cli.command {
        Command::Build => {
            let (site_config, mut pipeline) = prepare(&cli)?;
            let content_root = PathBuf::from(&site_config.content_dir);
            println!("==> Building {}", content_root.display());
            let report = pipeline.build(&FsSource)?;
            output::print_build_report(&report, &content_root);
            if report.should_fail() {
                return Ok(ExitCode::FAILURE);
            }
            println!("==> Build complete: {}", site_config.output_dir);
        }
        Command::Check => {
            let (site_config, mut pipeline) = prepare(&cli)?;
            let content_root = PathBuf::from(&site_config.content_dir);
            println!("==> Checking {}", content_root.display());
            let report = pipeline.check(&FsSource)?;
            output::print_check_report(&report, &content_root);
        }
        Command::Plugins => {
            let (_, mut pipeline) = prepare(&cli)?;
            let commands = pipeline.console_init()?;
            output::print_plugins(pipeline.plugins().records());
            if !commands.is_empty() {
                println!();
                output::print_console_commands(&commands);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::External(args) => {
            let Some((name, rest)) = args.split_first() else {
                return Err("missing command name".into());
            };
            let (_, mut pipeline) = prepare(&cli)?;
            pipeline.run_console_command(name, rest)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn prepare(cli: &Cli) -> Result<(SiteConfig, Pipeline), config::ConfigError> {
    let site_config = load_site_config(cli)?;
    let pipeline = Pipeline::from_site_config(&site_config);
    Ok((site_config, pipeline))
}

/// Load the config file, then apply `--source` / `--output`.
fn load_site_config(cli: &Cli) -> Result<SiteConfig, config::ConfigError> {
    let mut site_config = config::load_config(&cli.config)?;
    if let Some(source) = &cli.source {
        site_config.content_dir = path_string(source);
    }
    if let Some(output) = &cli.output {
        site_config.output_dir = path_string(output);
    }
    site_config.validate()?;
    Ok(site_config)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Default level `warn`, raised by `-v`; `RUST_LOG` overrides both.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .format_timestamp(None)
        .init();
}
