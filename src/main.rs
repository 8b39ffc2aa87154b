use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use namegrams::counter::Representation;
use namegrams::loader::load_corpus_dir;
use namegrams::service::{FileRequest, SuggestionService, VariableRequest};
use namegrams::vocabulary::UNKNOWN_TOKEN;
use namegrams::{shutdown, CancellationToken, EngineConfig, NGramTrainer, PersistentVocabulary, Vocabulary};

/// Logging setup arg group.
#[derive(Args, Debug)]
struct LogArgs {
    /// Silence log messages.
    #[arg(short, long)]
    quiet: bool,

    /// Turn debugging information on (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl LogArgs {
    fn setup_logging(&self, default: u8) -> anyhow::Result<()> {
        let level = if self.verbose > 0 { self.verbose } else { default };
        let log_level = match level {
            0 => stderrlog::LogLevelNum::Off,
            1 => stderrlog::LogLevelNum::Error,
            2 => stderrlog::LogLevelNum::Warn,
            3 => stderrlog::LogLevelNum::Info,
            4 => stderrlog::LogLevelNum::Debug,
            _ => stderrlog::LogLevelNum::Trace,
        };
        stderrlog::new()
            .quiet(self.quiet)
            .verbosity(log_level)
            .init()?;
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Suggests variable names from n-gram and neural models", long_about = None)]
struct Cli {
    #[command(flatten)]
    logging: LogArgs,

    /// JSON engine configuration; defaults are used for missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train an n-gram model on a directory of lexed files (.jsonl, .jsonl.gz, .jsonl.zst)
    Train {
        corpus: PathBuf,
        model: PathBuf,

        /// Also write memory-mappable counts for disk-backed loading
        #[arg(long)]
        frozen: bool,

        #[arg(long)]
        progress: bool,
    },
    /// Suggest names for the variables of a JSON request
    Suggest {
        model: PathBuf,

        /// A variable request, or a file request with `--file`
        request: PathBuf,

        /// The request holds a whole file, which is forgotten while its variables are named
        #[arg(long)]
        file: bool,

        /// Memory-map the counts instead of loading them
        #[arg(long)]
        disk: bool,
    },
    /// Print context statistics and the probability of the current name
    Stats {
        model: PathBuf,
        request: PathBuf,

        #[arg(long)]
        disk: bool,
    },
    /// Build a persistent vocabulary from a word list, one word per line
    Vocab { words: PathBuf, output: PathBuf },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("opening {:?}", path))?);
    serde_json::from_reader(reader).with_context(|| format!("parsing {:?}", path))
}

fn representation(disk: bool) -> Representation {
    if disk {
        Representation::Disk
    } else {
        Representation::Ram
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;

    match cli.command {
        Command::Train {
            corpus,
            model,
            frozen,
            progress,
        } => {
            let files = load_corpus_dir(&corpus)?;
            let mut trainer = NGramTrainer::new(config.ngram.clone());
            trainer.learn_corpus(&files, progress);
            let trained = trainer.into_model()?;
            let mut bytes = trained.save(&model)?;
            if frozen {
                bytes += trained.freeze(&model)?;
            }
            println!("{} files, {} bytes written to {:?}", files.len(), bytes, model);
        }
        Command::Suggest {
            model,
            request,
            file,
            disk,
        } => {
            let service = SuggestionService::load(&model, representation(disk), None, &config)?;
            let cancel = CancellationToken::new();
            let output = if file {
                let request: FileRequest = read_json(&request)?;
                serde_json::to_string_pretty(&service.suggest_file(&request, &cancel))?
            } else {
                let request: VariableRequest = read_json(&request)?;
                serde_json::to_string_pretty(&service.suggest_variable_name(&request, &cancel))?
            };
            println!("{}", output);
        }
        Command::Stats { model, request, disk } => {
            let service = SuggestionService::load(&model, representation(disk), None, &config)?;
            let request: VariableRequest = read_json(&request)?;
            let cancel = CancellationToken::new();
            let stats = service.context_statistics(&request);
            println!(
                "{}",
                serde_json::json!({
                    "usageCount": stats.usage_count,
                    "totalNgramCounts": stats.total_ngram_counts,
                    "countsMean": stats.counts_mean(),
                    "probability": service.get_variable_name_probability(&request, &cancel),
                    "inconsistent": service.is_inconsistent(&request, &cancel),
                })
            );
        }
        Command::Vocab { words, output } => {
            let vocabulary = PersistentVocabulary::read_from_file(&words, Some(&output), UNKNOWN_TOKEN)?;
            println!("{} words in {:?}", vocabulary.size(), output);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.logging.setup_logging(2)?;
    let _shutdown = shutdown::guard();
    run(cli)
}
