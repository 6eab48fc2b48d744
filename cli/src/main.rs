use std::io::BufRead;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing::info;
use tracing::warn;
use vlmrag_core::CommandCaptioner;
use vlmrag_core::Config;
use vlmrag_core::ConfigOverrides;
use vlmrag_core::EvalReport;
use vlmrag_core::IndexingPipeline;
use vlmrag_core::QueryPipeline;
use vlmrag_core::QueryResponse;
use vlmrag_core::caption::caption_batch;
use vlmrag_core::caption::partition_outcomes;
use vlmrag_core::caption::read_caption_file;
use vlmrag_core::caption::write_caption_file;
use vlmrag_core::eval::DEFAULT_QUERIES;
use vlmrag_core::eval::LATENCY_TARGET_MS;
use vlmrag_core::eval::read_query_file;
use vlmrag_core::eval::run_eval;
use vlmrag_core::images::list_images;
use vlmrag_core::open_backend;
use vlmrag_core::select_embedding_provider;

/// Caption-based image retrieval.
///
/// Index captions produced by a vision-language model, then search the
/// images by free text.
#[derive(Debug, Parser)]
#[clap(author, name = "vlmrag", version = env!("CARGO_PKG_VERSION"), bin_name = "vlmrag")]
struct Cli {
    #[clap(flatten)]
    global: GlobalArgs,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Args)]
struct GlobalArgs {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the persisted vector file.
    #[arg(long = "index-dir", value_name = "DIR", env = "INDEX_DIR", global = true)]
    index_dir: Option<PathBuf>,

    #[arg(long = "collection", value_name = "NAME", env = "COLLECTION_NAME", global = true)]
    collection: Option<String>,

    #[arg(long = "image-dir", value_name = "DIR", env = "IMAGE_DIR", global = true)]
    image_dir: Option<PathBuf>,

    /// Number of results per query.
    #[arg(long = "top-k", value_name = "K", env = "TOP_K", global = true)]
    top_k: Option<usize>,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Caption images with an external command and write a caption file.
    Caption(CaptionCommand),

    /// Embed caption records and add them to the index.
    Index(IndexCommand),

    /// Search indexed images by text.
    #[clap(visible_alias = "q")]
    Query(QueryCommand),

    /// Show collection statistics.
    Stats(StatsCommand),

    /// List indexable images in the image directory.
    Images(ImagesCommand),

    /// Time a set of queries against the index.
    Eval(EvalCommand),
}

#[derive(Debug, clap::Args)]
struct CaptionCommand {
    /// Program that prints a caption for the image path given as its last argument.
    #[arg(long = "command", value_name = "PROGRAM")]
    command: PathBuf,

    /// Extra argument passed before the image path; repeatable.
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Caption file to write, one JSON record per line.
    #[arg(long = "out", value_name = "FILE")]
    out: PathBuf,

    /// Only caption the first N images.
    #[arg(long = "max", value_name = "N")]
    max: Option<usize>,
}

#[derive(Debug, clap::Args)]
struct IndexCommand {
    /// Caption file, one JSON record per line.
    #[arg(long = "captions", value_name = "FILE")]
    captions: PathBuf,

    /// Only index the first N caption records.
    #[arg(long = "max", value_name = "N")]
    max: Option<usize>,

    /// Delete the existing vector file before indexing.
    #[arg(long = "force", default_value_t = false)]
    force: bool,
}

#[derive(Debug, clap::Args)]
struct QueryCommand {
    /// Query text.
    #[arg(value_name = "TEXT", required_unless_present = "interactive")]
    text: Option<String>,

    /// Read queries from stdin until `exit` or `quit`.
    #[arg(long = "interactive", short = 'i', default_value_t = false, conflicts_with = "text")]
    interactive: bool,

    /// Print the response as JSON.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Debug, clap::Args)]
struct StatsCommand {
    #[arg(long = "json", default_value_t = false)]
    json: bool,

    /// Also show the first N records.
    #[arg(long = "sample", value_name = "N", default_value_t = 0)]
    sample: usize,
}

#[derive(Debug, clap::Args)]
struct EvalCommand {
    /// Query file, one query per line; a built-in set is used when omitted.
    #[arg(long = "queries", value_name = "FILE")]
    queries: Option<PathBuf>,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Debug, clap::Args)]
struct ImagesCommand {
    /// Only list the first N images.
    #[arg(long = "max", value_name = "N")]
    max: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        image_dir: cli.global.image_dir,
        index_dir: cli.global.index_dir,
        collection_name: cli.global.collection,
        top_k: cli.global.top_k,
        dedupe: None,
    };
    let config = Config::load_with_overrides(cli.global.config.as_deref(), overrides)?;

    match cli.subcommand {
        Subcommand::Caption(cmd) => run_caption(&config, cmd),
        Subcommand::Index(cmd) => run_index(&config, cmd),
        Subcommand::Query(cmd) => run_query(&config, cmd),
        Subcommand::Stats(cmd) => run_stats(&config, cmd),
        Subcommand::Images(cmd) => run_images(&config, cmd),
        Subcommand::Eval(cmd) => run_eval_command(&config, cmd),
    }
}

fn run_caption(config: &Config, cmd: CaptionCommand) -> anyhow::Result<()> {
    if !config.image_dir.is_dir() {
        anyhow::bail!("image directory not found: {}", config.image_dir.display());
    }
    let mut images = list_images(&config.image_dir)?;
    if let Some(max) = cmd.max {
        images.truncate(max);
    }
    info!(count = images.len(), program = %cmd.command.display(), "captioning images");

    let captioner = CommandCaptioner::new(cmd.command, cmd.args);
    let outcomes = caption_batch(&captioner, &images, &config.caption.settings());
    write_caption_file(&cmd.out, &outcomes)?;

    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    println!("images:        {}", outcomes.len());
    println!("captioned:     {}", outcomes.len() - failed);
    println!("failed:        {failed}");
    println!("caption file:  {}", cmd.out.display());
    Ok(())
}

fn run_index(config: &Config, cmd: IndexCommand) -> anyhow::Result<()> {
    if !cmd.captions.exists() {
        anyhow::bail!("caption file not found: {}", cmd.captions.display());
    }
    let mut outcomes = read_caption_file(&cmd.captions)?;
    if let Some(max) = cmd.max {
        outcomes.truncate(max);
    }
    let (records, failures) = partition_outcomes(outcomes);
    for f in &failures {
        warn!(image_id = %f.image_id, reason = %f.reason, "skipping failed caption");
    }

    let vector_path = config.vector_path();
    if cmd.force && vector_path.exists() {
        std::fs::remove_file(&vector_path)?;
        info!(path = %vector_path.display(), "removed existing vector file");
    }

    let embedder = select_embedding_provider(&config.embedding)?;
    let mut backend = open_backend(config)?;
    let report = IndexingPipeline::new(backend.as_mut(), embedder.as_ref()).index_batch(&records)?;

    println!("captions read:     {}", records.len() + failures.len());
    println!("caption failures:  {}", failures.len());
    println!("indexed:           {}", report.succeeded);
    println!("failed:            {}", report.failed);
    println!("skipped (dedupe):  {}", report.skipped);
    println!("collection size:   {}", backend.count());
    println!("vector file:       {}", vector_path.display());
    Ok(())
}

fn run_query(config: &Config, cmd: QueryCommand) -> anyhow::Result<()> {
    let embedder = select_embedding_provider(&config.embedding)?;

    if cmd.interactive {
        // A broken index still lets the session run; every query answers empty.
        let backend = match open_backend(config) {
            Ok(b) => Some(b),
            Err(e) => {
                error!("cannot open index: {e}");
                None
            }
        };
        let pipeline = QueryPipeline::new(backend, embedder);
        return interactive_loop(&pipeline, config.top_k, cmd.json);
    }

    let Some(text) = cmd.text else {
        anyhow::bail!("query text is required unless --interactive is given");
    };
    let pipeline = QueryPipeline::new(Some(open_backend(config)?), embedder);
    let response = pipeline.query(text.trim(), config.top_k)?;
    print_response(&response, cmd.json)
}

fn interactive_loop(pipeline: &QueryPipeline, top_k: usize, json: bool) -> anyhow::Result<()> {
    println!("Interactive mode: type a query (exit to leave)");
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut line = String::new();
    loop {
        print!("query> ");
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
            break;
        }
        let response = match pipeline.query(text, top_k) {
            Ok(r) => r,
            Err(e) => {
                error!("query failed: {e}");
                QueryResponse { query: text.to_string(), results: Vec::new(), elapsed_ms: 0 }
            }
        };
        print_response(&response, json)?;
    }
    Ok(())
}

fn print_response(response: &QueryResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    println!("\n[query] {}\n", response.query);
    println!(
        "[results] {} matching images (query time: {:.3}s)\n",
        response.results.len(),
        response.elapsed_ms as f64 / 1000.0
    );
    for (idx, hit) in response.results.iter().enumerate() {
        println!("{}. [score: {:.2}]", idx + 1, hit.score);
        println!("   image: {}", hit.image_path);
        println!("   caption: {}\n", hit.caption);
    }
    Ok(())
}

fn run_stats(config: &Config, cmd: StatsCommand) -> anyhow::Result<()> {
    let backend = open_backend(config)?;
    let stats = backend.stats();
    let sample = backend.sample(cmd.sample);
    if cmd.json {
        let value = serde_json::json!({ "stats": stats, "sample": sample });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    println!("collection:    {}", config.collection_name);
    println!("vector file:   {}", config.vector_path().display());
    println!("records:       {}", stats.count);
    match stats.dim {
        Some(d) => println!("dimension:     {d}"),
        None => println!("dimension:     -"),
    }
    match stats.last_indexed {
        Some(t) => println!("last indexed:  {}", t.to_rfc3339()),
        None => println!("last indexed:  never"),
    }
    for (i, m) in sample.iter().enumerate() {
        println!("\n{}. id: {}", i + 1, m.image_id);
        println!("   caption: {}", truncate_chars(&m.caption, 50));
        println!("   image: {}", m.image_path);
    }
    Ok(())
}

/// At most `max` chars, with `...` appended when cut.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

fn run_eval_command(config: &Config, cmd: EvalCommand) -> anyhow::Result<()> {
    let queries = match &cmd.queries {
        Some(path) => read_query_file(path)?,
        None => DEFAULT_QUERIES.iter().map(|q| q.to_string()).collect(),
    };
    if queries.is_empty() {
        anyhow::bail!("no queries to run");
    }
    let embedder = select_embedding_provider(&config.embedding)?;
    let pipeline = QueryPipeline::new(Some(open_backend(config)?), embedder);
    let report = run_eval(&pipeline, &queries, config.top_k)?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_eval(&report);
    Ok(())
}

fn print_eval(report: &EvalReport) {
    for (i, t) in report.timings.iter().enumerate() {
        println!("\n[{}/{}] {}", i + 1, report.timings.len(), t.query);
        println!("   time:    {:.2}s", t.elapsed_ms as f64 / 1000.0);
        println!("   results: {}", t.result_count);
        println!("   max score: {:.3}", t.max_score.unwrap_or(0.0));
        println!("   min score: {:.3}", t.min_score.unwrap_or(0.0));
    }
    let s = &report.summary;
    println!("\nqueries:       {}", s.queries);
    println!("total time:    {:.2}s", s.total_ms as f64 / 1000.0);
    println!("average time:  {:.2}s", s.avg_ms / 1000.0);
    println!("fastest:       {:.2}s", s.min_ms as f64 / 1000.0);
    println!("slowest:       {:.2}s", s.max_ms as f64 / 1000.0);
    println!("over {}s:       {}", LATENCY_TARGET_MS / 1000, s.over_target);
}

fn run_images(config: &Config, cmd: ImagesCommand) -> anyhow::Result<()> {
    if !config.image_dir.is_dir() {
        anyhow::bail!("image directory not found: {}", config.image_dir.display());
    }
    let mut images = list_images(&config.image_dir)?;
    if let Some(max) = cmd.max {
        images.truncate(max);
    }
    for p in &images {
        println!("{}", p.display());
    }
    info!(count = images.len(), dir = %config.image_dir.display(), "listed images");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["vlmrag", "query", "a red car", "--top-k", "3", "--index-dir", "/tmp/x"])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(cli.global.top_k, Some(3));
        assert_eq!(cli.global.index_dir, Some(PathBuf::from("/tmp/x")));
        match cli.subcommand {
            Subcommand::Query(q) => assert_eq!(q.text.as_deref(), Some("a red car")),
            other => panic!("unexpected subcommand: {other:?}"),
        }
    }

    #[test]
    fn eval_and_caption_parse() {
        let cli = Cli::try_parse_from(["vlmrag", "eval", "--queries", "q.txt"]).unwrap_or_else(|e| panic!("{e}"));
        match cli.subcommand {
            Subcommand::Eval(e) => assert_eq!(e.queries, Some(PathBuf::from("q.txt"))),
            other => panic!("unexpected subcommand: {other:?}"),
        }
        let cli = Cli::try_parse_from([
            "vlmrag", "caption", "--command", "vlm", "--arg", "--lang", "--arg", "zh", "--out", "c.jsonl",
        ])
        .unwrap_or_else(|e| panic!("{e}"));
        match cli.subcommand {
            Subcommand::Caption(c) => {
                assert_eq!(c.command, PathBuf::from("vlm"));
                assert_eq!(c.args, vec!["--lang", "zh"]);
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }
        assert!(Cli::try_parse_from(["vlmrag", "caption", "--command", "vlm"]).is_err());
    }

    #[test]
    fn truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("short", 50), "short");
        assert_eq!(truncate_chars("一二三四五", 3), "一二三...");
    }

    #[test]
    fn query_requires_text_or_interactive() {
        assert!(Cli::try_parse_from(["vlmrag", "query"]).is_err());
        assert!(Cli::try_parse_from(["vlmrag", "query", "--interactive"]).is_ok());
    }
}
