//! ontofill CLI - Command-line interface
//!
//! Usage:
//!   ontofill run --ontology <file> --save <file> --url <url>
//!   ontofill run --ontology <file> --save <file> --paths-file <file>
//!   ontofill prompt --ontology <file> [--languages kz,en,ru]
//!   ontofill chunk --file <file> --ontology <file>
//!
//! Author: hephaex@gmail.com

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use ontofill_core::{AppConfig, LoggingConfig, Observer, PlaceSource, TextSource};
use ontofill_extractor::Chunker;
use ontofill_kb::{generate_prompt, OntologyDocument, OntologyKnowledgeBase, PromptOptions};
use ontofill_llm::{available_budget, token_counter_for_model, OpenAiGateway};
use ontofill_pipeline::{
    FanoutObserver, FileTextSource, LinePlaces, Pipeline, ProcessingState, ProgressCounters,
    SinglePlace, TracingObserver, WebTextSource,
};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ontofill")]
#[command(about = "Fill an ontology with facts extracted by a language model")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract facts from places into the ontology
    Run(RunArgs),
    /// Print the extraction prompt generated from an ontology
    Prompt {
        /// Ontology document (JSON or TOML)
        #[arg(short, long)]
        ontology: PathBuf,

        /// Label languages, comma separated
        #[arg(long, value_delimiter = ',')]
        languages: Option<Vec<String>>,
    },
    /// Print the chunks a text file is split into
    Chunk {
        /// Text file to split
        #[arg(short, long)]
        file: PathBuf,

        /// Ontology the task prompt is generated from; the default limit is
        /// what `run` would leave for text next to that prompt
        #[arg(short, long, required_unless_present = "token_limit")]
        ontology: Option<PathBuf>,

        /// Token limit per chunk
        #[arg(long)]
        token_limit: Option<usize>,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("places").required(true).args(["url", "urls_file", "text_file", "paths_file"])))]
struct RunArgs {
    /// Ontology document (JSON or TOML)
    #[arg(short, long)]
    ontology: PathBuf,

    /// Where to save the filled ontology
    #[arg(short, long)]
    save: PathBuf,

    /// A single web page
    #[arg(long)]
    url: Option<String>,

    /// File with one URL per line
    #[arg(long)]
    urls_file: Option<PathBuf>,

    /// A single local text file
    #[arg(long)]
    text_file: Option<PathBuf>,

    /// File with one local text file path per line
    #[arg(long)]
    paths_file: Option<PathBuf>,

    /// Task prompt; generated from the ontology when neither prompt option is given
    #[arg(long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// File holding the task prompt
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Override the number of workers
    #[arg(long)]
    workers: Option<usize>,

    /// Override the consensus threshold
    #[arg(long)]
    threshold: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Run(args) => run(config, args).await?,
        Commands::Prompt {
            ontology,
            languages,
        } => {
            let document = OntologyDocument::from_file(&ontology)?;
            let mut options = PromptOptions::from_config(&config.extraction);
            if let Some(languages) = languages {
                options = options.with_languages(languages);
            }
            println!("{}", generate_prompt(&document.schema, &options));
        }
        Commands::Chunk {
            file,
            ontology,
            token_limit,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let counter = token_counter_for_model(&config.llm.model);
            let token_limit = match (token_limit, ontology) {
                (Some(limit), _) => limit,
                (None, Some(ontology)) => {
                    let document = OntologyDocument::from_file(&ontology)?;
                    let prompt = generate_prompt(
                        &document.schema,
                        &PromptOptions::from_config(&config.extraction),
                    );
                    available_budget(
                        config.llm.context_size,
                        &config.llm.system_message,
                        &prompt,
                        counter.as_ref(),
                    )
                }
                (None, None) => anyhow::bail!("give --ontology or --token-limit"),
            };
            if token_limit == 0 {
                anyhow::bail!("the system message and task prompt fill the model context");
            }

            let chunker = Chunker::from_config(&config.extraction, token_limit)?;
            for chunk in chunker.split(&text, counter.as_ref()) {
                println!(
                    "--- chunk {} ({} tokens, {} bytes overlap) ---",
                    chunk.index, chunk.token_count, chunk.overlap_len
                );
                println!("{}", chunk.text);
            }
        }
    }

    Ok(())
}

async fn run(mut config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    if let Some(threshold) = args.threshold {
        config.extraction.threshold = threshold;
    }

    // Everything that can be rejected up front is checked before the pool starts
    config.validate()?;
    check_save_path(&args.save)?;

    let document = OntologyDocument::from_file(&args.ontology)?;
    let prompt = match (&args.prompt, &args.prompt_file) {
        (Some(prompt), _) => prompt.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read prompt file {}", path.display()))?,
        (None, None) => generate_prompt(
            &document.schema,
            &PromptOptions::from_config(&config.extraction),
        ),
    };

    let places: Box<dyn PlaceSource> = if let Some(url) = &args.url {
        Box::new(SinglePlace::new(url.as_str()))
    } else if let Some(path) = &args.urls_file {
        Box::new(LinePlaces::open(path).await?)
    } else if let Some(path) = &args.text_file {
        Box::new(SinglePlace::new(path.display().to_string()))
    } else if let Some(path) = &args.paths_file {
        Box::new(LinePlaces::open(path).await?)
    } else {
        anyhow::bail!("no places given");
    };
    let text_source: Arc<dyn TextSource> = if args.url.is_some() || args.urls_file.is_some() {
        Arc::new(WebTextSource::new()?)
    } else {
        Arc::new(FileTextSource)
    };

    let counters = Arc::new(ProgressCounters::new());
    let observer: Arc<dyn Observer> = Arc::new(
        FanoutObserver::new()
            .with(Arc::new(TracingObserver))
            .with(counters.clone()),
    );

    let gateway =
        Arc::new(OpenAiGateway::from_config(&config.llm, prompt)?.with_observer(observer.clone()));
    let knowledge_base = Arc::new(
        OntologyKnowledgeBase::new(document)
            .with_save_path(&args.save)
            .with_observer(observer.clone()),
    );

    let state = ProcessingState::running();
    let pipeline = Pipeline::new(&config, text_source, gateway, knowledge_base, state.clone())?
        .with_observer(observer);

    tokio::spawn({
        let state = state.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing in-flight places");
                state.stop();
            }
        }
    });

    tracing::info!(
        ontology = %args.ontology.display(),
        save = %args.save.display(),
        model = %config.llm.model,
        "Starting extraction"
    );

    let summary = pipeline.run(places).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("{}", counters.snapshot());

    Ok(())
}

fn check_save_path(path: &Path) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let metadata = std::fs::metadata(dir)
        .with_context(|| format!("save directory {} is not accessible", dir.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    if metadata.permissions().readonly() {
        anyhow::bail!("save directory {} is read-only", dir.display());
    }
    Ok(())
}

fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}
