//! Terminal client over the persisted artifacts.
//!
//! Single-shot listings or an interactive REPL, with table or JSON output.
//! Reads the same catalog the HTTP server serves, without a server.
//!
//! # Examples
//!
//! ```bash
//! explore clusters
//! explore articles --cluster 101 --search "bone" --limit 5
//! explore --format json associations --term microgravity
//! explore --interactive
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paper_topics::{
    config::PipelineConfig,
    models::{ArticleView, AssociationRule, ClusterSummary, UNCATEGORIZED_ID},
    query::{ArticleQuery, AssociationQuery, Catalog, Page, DEFAULT_ARTICLE_LIMIT, DEFAULT_RULE_LIMIT},
    storage::json::JsonArtifactStore,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Browse clusters, articles and association rules
#[derive(Parser, Debug)]
#[command(
    name = "explore",
    version,
    about = "Browse the clustered knowledge base from the terminal",
    long_about = "Query clusters, articles and association rules from the artifact directory. \
                  Supports single listings and an interactive mode."
)]
struct Args {
    /// TOML configuration file
    #[arg(long, short, value_name = "FILE", env = "PAPER_TOPICS_CONFIG")]
    config: Option<PathBuf>,

    /// Artifact directory (overrides paths.data_dir)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List labelled clusters
    Clusters,
    /// List articles
    Articles {
        /// Final cluster id (-1 for uncategorized)
        #[arg(long, allow_hyphen_values = true)]
        cluster: Option<String>,
        /// Case-insensitive text search over title and abstract
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = DEFAULT_ARTICLE_LIMIT)]
        limit: usize,
    },
    /// Show one article by link
    Article {
        link: String,
    },
    /// List association rules, strongest lift first
    Associations {
        /// Antecedent term
        #[arg(long)]
        term: Option<String>,
        #[arg(long, default_value_t = 0.5)]
        min_confidence: f64,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = DEFAULT_RULE_LIMIT)]
        limit: usize,
    },
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        header
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table
}

fn format_clusters_table(clusters: &[ClusterSummary]) -> String {
    if clusters.is_empty() {
        return "No clusters found.".to_string();
    }
    let mut table = new_table(&["Id", "Name", "Articles", "Keywords"]);
    for cluster in clusters {
        table.add_row(vec![
            Cell::new(&cluster.id),
            Cell::new(&cluster.name),
            Cell::new(cluster.article_count),
            Cell::new(cluster.keywords.join(", ")),
        ]);
    }
    table.to_string()
}

fn format_articles_table(page: &Page<ArticleView>) -> String {
    if page.items.is_empty() {
        return format!("No articles on this page ({} matches).", page.total_results);
    }
    let mut table = new_table(&["#", "Cluster", "Title", "Link"]);
    for (idx, article) in page.items.iter().enumerate() {
        let cluster = if article.final_cluster == UNCATEGORIZED_ID {
            Cell::new(&article.cluster_name).fg(Color::DarkGrey)
        } else {
            Cell::new(format!("{} {}", article.final_cluster, article.cluster_name))
        };
        table.add_row(vec![
            Cell::new(page.skip + idx + 1),
            cluster,
            Cell::new(truncate(&article.title, 70)),
            Cell::new(&article.link),
        ]);
    }
    format!(
        "{table}\nShowing {} of {} matches",
        page.items.len(),
        page.total_results
    )
}

fn format_rules_table(page: &Page<AssociationRule>) -> String {
    if page.items.is_empty() {
        return format!("No rules on this page ({} matches).", page.total_results);
    }
    let mut table = new_table(&["Antecedents", "Consequents", "Support", "Confidence", "Lift"]);
    for rule in &page.items {
        table.add_row(vec![
            Cell::new(rule.antecedents.join(", ")),
            Cell::new(rule.consequents.join(", ")).fg(Color::Cyan),
            Cell::new(format!("{:.3}", rule.support)),
            Cell::new(format!("{:.3}", rule.confidence)),
            Cell::new(format!("{:.3}", rule.lift)),
        ]);
    }
    format!(
        "{table}\nShowing {} of {} matches",
        page.items.len(),
        page.total_results
    )
}

fn display_article(article: &ArticleView) {
    println!("\n{}", "═".repeat(80));
    println!("Title: {}", article.title);
    println!("Link: {}", article.link);
    println!("Cluster: {} ({})", article.final_cluster, article.cluster_name);
    println!("\nAbstract:\n{}", article.abstract_text);
    println!("{}", "═".repeat(80));
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize results to JSON")?;
    println!("{json}");
    Ok(())
}

fn run_command(catalog: &Catalog, command: Command, format: OutputFormat) -> Result<()> {
    match command {
        Command::Clusters => match format {
            OutputFormat::Table => println!("{}", format_clusters_table(catalog.list_clusters())),
            OutputFormat::Json => print_json(&catalog.list_clusters())?,
        },
        Command::Articles {
            cluster,
            search,
            skip,
            limit,
        } => {
            let page = catalog.list_articles(&ArticleQuery {
                cluster_id: cluster,
                search,
                skip,
                limit,
            })?;
            match format {
                OutputFormat::Table => println!("{}", format_articles_table(&page)),
                OutputFormat::Json => print_json(&page)?,
            }
        }
        Command::Article { link } => match catalog.article(&link) {
            Some(article) => match format {
                OutputFormat::Table => display_article(article),
                OutputFormat::Json => print_json(article)?,
            },
            None => anyhow::bail!("No article with link {link}"),
        },
        Command::Associations {
            term,
            min_confidence,
            skip,
            limit,
        } => {
            let page = catalog.list_associations(&AssociationQuery {
                term,
                min_confidence,
                skip,
                limit,
            })?;
            match format {
                OutputFormat::Table => println!("{}", format_rules_table(&page)),
                OutputFormat::Json => print_json(&page)?,
            }
        }
    }
    Ok(())
}

const HELP: &str = "Commands:
  <text>            - Search articles (current cluster filter applies)
  /clusters         - List clusters
  /cluster ID       - Filter articles by cluster (-1 for uncategorized)
  /cluster clear    - Clear cluster filter
  /rules [TERM]     - Association rules, optionally for an antecedent term
  /next             - Next page of the last article search
  /limit N          - Set page size to N (1-100)
  /detail N         - Show full article for row N of the last page
  /format table     - Use table output format
  /format json      - Use JSON output format
  /help             - Show this help
  Ctrl+D or Ctrl+C  - Exit";

/// Run interactive REPL mode
fn run_interactive(catalog: &Catalog, mut format: OutputFormat) -> Result<()> {
    println!("Interactive Knowledge Base Explorer");
    println!("{HELP}\n");

    let mut rl = DefaultEditor::new().with_context(|| "Failed to create readline editor")?;

    let mut query = ArticleQuery::default();
    let mut last_page: Option<Page<ArticleView>> = None;

    loop {
        match rl.readline("Explore> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line).ok();

                let result = if let Some(command) = line.strip_prefix('/') {
                    let parts: Vec<&str> = command.split_whitespace().collect();
                    match parts.as_slice() {
                        ["help"] => {
                            println!("{HELP}");
                            Ok(())
                        }
                        ["clusters"] => run_command(catalog, Command::Clusters, format),
                        ["cluster", "clear"] => {
                            query.cluster_id = None;
                            println!("Cleared cluster filter");
                            Ok(())
                        }
                        ["cluster", id] => {
                            query.cluster_id = Some((*id).to_string());
                            println!("Filtering articles by cluster {id}");
                            Ok(())
                        }
                        ["rules", rest @ ..] => run_command(
                            catalog,
                            Command::Associations {
                                term: rest.first().map(|t| (*t).to_string()),
                                min_confidence: 0.5,
                                skip: 0,
                                limit: query.limit,
                            },
                            format,
                        ),
                        ["next"] => {
                            query.skip += query.limit;
                            search(catalog, &query, format, &mut last_page)
                        }
                        ["limit", n] => match n.parse::<usize>() {
                            Ok(n) if (1..=100).contains(&n) => {
                                query.limit = n;
                                println!("Set page size to {n}");
                                Ok(())
                            }
                            _ => {
                                eprintln!("Invalid number: must be between 1 and 100");
                                Ok(())
                            }
                        },
                        ["detail", n] => {
                            let row = n.parse::<usize>().ok();
                            let article = last_page.as_ref().and_then(|page| {
                                row.and_then(|r| r.checked_sub(page.skip + 1))
                                    .and_then(|i| page.items.get(i))
                            });
                            match article {
                                Some(article) => display_article(article),
                                None => eprintln!("Row {n} is not on the last page"),
                            }
                            Ok(())
                        }
                        ["format", "table"] => {
                            format = OutputFormat::Table;
                            println!("Set output format to table");
                            Ok(())
                        }
                        ["format", "json"] => {
                            format = OutputFormat::Json;
                            println!("Set output format to JSON");
                            Ok(())
                        }
                        _ => {
                            eprintln!("Unknown command: /{command}. Type /help for available commands.");
                            Ok(())
                        }
                    }
                } else {
                    query.search = Some(line.to_string());
                    query.skip = 0;
                    search(catalog, &query, format, &mut last_page)
                };

                if let Err(e) = result {
                    eprintln!("Error: {e:#}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error reading input: {err}");
                break;
            }
        }
    }

    Ok(())
}

fn search(
    catalog: &Catalog,
    query: &ArticleQuery,
    format: OutputFormat,
    last_page: &mut Option<Page<ArticleView>>,
) -> Result<()> {
    debug!(?query, "Article search");
    let page = catalog.list_articles(query)?;
    match format {
        OutputFormat::Table => println!("{}", format_articles_table(&page)),
        OutputFormat::Json => print_json(&page)?,
    }
    *last_page = Some(page);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let mut config = PipelineConfig::load_or_default(args.config.as_deref())
        .with_context(|| format!("Failed to load configuration {:?}", args.config))?;
    if let Some(dir) = args.data_dir.clone() {
        config.paths.data_dir = dir;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let catalog = runtime.block_on(async {
        let store = JsonArtifactStore::open(config.paths.data_dir.clone())
            .await
            .with_context(|| format!("Failed to open artifact directory {:?}", config.paths.data_dir))?;
        Catalog::load(&store)
            .await
            .context("Failed to load artifacts; run the pipeline first")
    })?;
    info!(articles = catalog.article_count(), "Catalog loaded");

    match (args.interactive, args.command) {
        (true, _) => run_interactive(&catalog, args.format),
        (false, Some(command)) => run_command(&catalog, command, args.format),
        (false, None) => {
            eprintln!("Specify a command or --interactive. See --help.");
            Ok(())
        }
    }
}
