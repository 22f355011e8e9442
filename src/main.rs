use clap::{Parser, Subcommand};
use fragments::{
    project::{build_site, scaffold::create_site, site_cache, SiteConfig, CONFIG_FILE},
    runtime::FragmentKind,
    tools::{
        diagnostics::{emit_fragment_error, emit_issues},
        logging::init_logging,
    },
};
use std::{path::PathBuf, process};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fragments")]
#[command(about = "Compose static HTML sites from scriptable fragments")]
struct Cli {
    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build every page into the build directory
    Build {
        #[arg(long, default_value = CONFIG_FILE)]
        config: PathBuf,
    },
    /// Render one page to stdout
    Render {
        /// Page name relative to the pages directory, without extension
        page: String,
        #[arg(long, default_value = CONFIG_FILE)]
        config: PathBuf,
    },
    /// Create a starter site
    New { dir: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Command::Build { config } => build(load_config(config)),
        Command::Render { page, config } => render(load_config(config), &page),
        Command::New { dir } => match create_site(&dir) {
            Ok(_) => {
                info!("Created site in {}", dir.display());
                0
            }
            Err(err) => {
                error!("{err}");
                1
            }
        },
    };
    process::exit(code);
}

/// A missing config file falls back to the default layout in the file's
/// directory.
fn load_config(path: PathBuf) -> SiteConfig {
    if !path.exists() {
        let root = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(|parent| parent.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        info!("{} not found, using default layout", path.display());
        return SiteConfig::with_defaults(root);
    }
    match SiteConfig::load(&path) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            process::exit(1);
        }
    }
}

fn build(config: SiteConfig) -> i32 {
    let report = match build_site(&config) {
        Ok(report) => report,
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };
    emit_issues(&report.issues);
    for (_, err) in &report.failed {
        emit_fragment_error(err);
    }
    info!(
        "Built {} page(s) into {}",
        report.built.len(),
        config.build.display()
    );
    if report.is_clean() {
        0
    } else {
        1
    }
}

fn render(config: SiteConfig, page: &str) -> i32 {
    let cache = site_cache(&config);
    let result = cache.render(page, FragmentKind::Page);
    emit_issues(&cache.diagnostics().take());
    match result {
        Ok(html) => {
            println!("{html}");
            0
        }
        Err(err) => {
            emit_fragment_error(&err);
            1
        }
    }
}
