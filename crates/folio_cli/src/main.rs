//! FOLIO CLI
//!
//! Compiles sitemaps and serves single requests with the built-in stages.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use folio_cache::{CacheStore, FsStore, FsStoreConfig, MemoryStore};
use folio_core::Parameters;
use folio_plan::{ConfigNode, LanguageRegistry, TreeBuilder};
use folio_runtime::{Engine, EngineConfig, Request, StageRegistry};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "FOLIO - declarative document pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a sitemap and report the first configuration error
    Check {
        /// Sitemap JSON file
        #[arg(short, long)]
        sitemap: PathBuf,
    },
    /// Print the compiled node tree and its views
    Tree {
        /// Sitemap JSON file
        #[arg(short, long)]
        sitemap: PathBuf,
    },
    /// Serve one request and write the body to stdout
    Run {
        /// Sitemap JSON file
        #[arg(short, long)]
        sitemap: PathBuf,
        /// Request path
        #[arg(short, long, default_value = "/")]
        path: String,
        /// Request parameter as name=value, repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// View to render
        #[arg(long)]
        view: Option<String>,
        /// Persist the cache in this directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Engine configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

fn load_sitemap(path: &Path) -> Result<ConfigNode> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    ConfigNode::from_json(&text).map_err(|err| eyre!("{}: {}", path.display(), err))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

fn compile(sitemap: &Path) -> Result<folio_plan::NodeTree> {
    let root = load_sitemap(sitemap)?;
    let registry = StageRegistry::with_builtins();
    TreeBuilder::new(&LanguageRegistry::builtins(), &registry)
        .build(&root)
        .wrap_err_with(|| format!("compiling {}", sitemap.display()))
}

fn run(
    sitemap: &Path,
    request: &Request,
    cache_dir: Option<PathBuf>,
    config: Option<&Path>,
) -> Result<()> {
    let root = load_sitemap(sitemap)?;
    let config = load_config(config)?;
    let store: Arc<dyn CacheStore> = match cache_dir {
        Some(dir) => Arc::new(
            FsStore::open(FsStoreConfig::default().with_dir(dir)).wrap_err("opening cache directory")?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let engine = Engine::build(
        &root,
        Arc::new(StageRegistry::with_builtins()),
        &LanguageRegistry::builtins(),
        store,
        config,
    )
    .wrap_err_with(|| format!("compiling {}", sitemap.display()))?;

    let response = engine.execute(request)?;
    info!(mime_type = %response.mime_type, cache = response.cache.as_str(), "served");

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.body)?;
    stdout.write_all(b"\n")?;
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("FOLIO_LOG").unwrap_or_else(|_| EnvFilter::new("folio=info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { sitemap } => {
            let tree = compile(&sitemap)?;
            println!(
                "{}: ok ({} nodes, {} views)",
                sitemap.display(),
                tree.len(),
                tree.views().len()
            );
            Ok(())
        }
        Commands::Tree { sitemap } => {
            print!("{}", compile(&sitemap)?.dump());
            Ok(())
        }
        Commands::Run {
            sitemap,
            path,
            params,
            view,
            cache_dir,
            config,
        } => {
            let request = Request {
                path,
                parameters: params.into_iter().collect::<Parameters>(),
                view,
            };
            run(&sitemap, &request, cache_dir, config.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const SITEMAP: &str = r#"{
        "kind": "container",
        "children": [
            {"kind": "stage", "attributes": {"role": "source", "type": "text", "content": "Hi {name}", "label": "content"}},
            {"kind": "stage", "attributes": {"role": "sink", "type": "xml"}},
            {"kind": "view", "attributes": {"name": "raw", "from-label": "content"}, "children": [
                {"kind": "stage", "attributes": {"role": "sink", "type": "text"}}
            ]}
        ]
    }"#;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("lang=fr"), Ok(("lang".to_string(), "fr".to_string())));
        assert_eq!(parse_param("q=a=b"), Ok(("q".to_string(), "a=b".to_string())));
        assert!(parse_param("lang").is_err());
        assert!(parse_param("=fr").is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "folio", "run", "--sitemap", "site.json", "--param", "name=Ann", "--view", "raw",
        ])
        .unwrap();
        let Commands::Run { path, params, view, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(path, "/");
        assert_eq!(params, vec![("name".to_string(), "Ann".to_string())]);
        assert_eq!(view.as_deref(), Some("raw"));
    }

    #[test]
    fn test_compile_and_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let sitemap = dir.path().join("site.json");
        std::fs::write(&sitemap, SITEMAP).unwrap();
        let tree = compile(&sitemap).unwrap();
        assert_eq!(tree.views().len(), 1);

        let config = dir.path().join("engine.json");
        std::fs::write(&config, r#"{"validate_balance": false}"#).unwrap();
        let loaded = load_config(Some(config.as_path())).unwrap();
        assert!(!loaded.validate_balance);
        assert_eq!(load_config(None).unwrap(), EngineConfig::default());

        std::fs::write(&sitemap, r#"{"kind": "stage"}"#).unwrap();
        assert!(compile(&sitemap).is_err());
    }
}
