use anyhow::{Context, Result};
use futures_util::StreamExt;
use ragchat::chain::{ChainResources, ToolRegistry};
use ragchat::embeddings::{EmbeddingsStore, OpenAIEmbedder};
use ragchat::ingest::Indexer;
use ragchat::llm::{OpenAIChatModel, TokenStream};
use ragchat::{ChatSession, Config};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const USAGE: &str = "Usage: ragchat <command>

Commands:
  index   Embed the training, knowledge and user corpora
  reset   Delete the vector index and the indexed ledger
  chat    Index, then start an interactive chat on stdin

Chat commands:
  /set Key=Value   Update a setting (Model, Streaming, Chain, UseHistory, Temperature, MaxTokens, Debug)
  /settings        Show the active settings
  /upload <path>   Copy a file into the user corpus and index it
  /history         Show the conversation so far
  /clear           Forget the conversation so far
  /quit            Exit";

fn api_key(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| {
        format!(
            "Environment variable {} not set. Set it in your .env file or as an environment variable.",
            var
        )
    })
}

/// Open the embeddings store with an LRU query-embedding cache when enabled
async fn open_store(config: &Config) -> Result<Arc<EmbeddingsStore>> {
    let embedder = OpenAIEmbedder::new(
        api_key(&config.embeddings.api_key_env)?,
        config.embeddings.model.clone(),
        config.embeddings.batch_size,
    )?;
    log::info!("Embedding model: {}", embedder.model());

    let mut store = EmbeddingsStore::open(config.embeddings_path(), Arc::new(embedder)).await?;
    if config.embeddings.cache_capacity > 0 {
        store = store.with_query_cache(config.embeddings.cache_capacity);
    }
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    if !matches!(command, "index" | "reset" | "chat") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.ragchat.log_level.as_str()),
    )
    .init();
    log::info!("Starting Ragchat v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config).await?;

    match command {
        "index" => {
            let indexer = Indexer::from_config(&config, store)?;
            indexer.system_index().await?;
            indexer.user_index().await?;
        }
        "reset" => {
            store.reset().await?;
            println!("Removed index content under {}", store.root().display());
        }
        _ => run_chat(config, store).await?,
    }

    Ok(())
}

async fn run_chat(config: Config, store: Arc<EmbeddingsStore>) -> Result<()> {
    let indexer = Indexer::from_config(&config, Arc::clone(&store))?;
    indexer.system_index().await?;
    indexer.user_index().await?;

    let model = OpenAIChatModel::new(api_key(&config.chat.api_key_env)?)?;
    let resources = ChainResources {
        model: Arc::new(model),
        retriever: store.retriever(config.retrieval.top_k),
        tools: ToolRegistry::new(),
        max_agent_iterations: config.chat.max_agent_iterations,
    };
    let session = ChatSession::new(resources, config.chat.supported_models.clone());
    session.configure(config.chain_config()?)?;

    println!("Hi, I'm here to help. Ask me anything about the indexed documents (/quit to exit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(command, &session, &indexer).await {
                break;
            }
            continue;
        }

        match session.ask(line) {
            Ok(stream) => {
                tokio::select! {
                    result = print_stream(stream) => {
                        if let Err(e) = result {
                            println!("\nError: {}", e);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        println!("\n[cancelled]");
                    }
                }
            }
            Err(e) => println!("{}", e),
        }
    }

    Ok(())
}

/// Returns false when the session should end
async fn handle_command(command: &str, session: &ChatSession, indexer: &Indexer) -> bool {
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "quit" | "exit" => return false,
        "set" => match rest.split_once('=') {
            Some((key, value)) => match session.apply_setting(key, value) {
                Ok(settings) => println!("{:?}", settings),
                Err(e) => println!("{}", e),
            },
            None => println!("Usage: /set Key=Value"),
        },
        "settings" => match session.settings() {
            Some(settings) => println!("{:?}", settings),
            None => println!("No chain configured"),
        },
        "history" => {
            for turn in session.history() {
                println!("Human: {}\nAssistant: {}", turn.question, turn.answer);
            }
        }
        "clear" => {
            session.clear_history();
            println!("Conversation history cleared");
        }
        "upload" => {
            if let Err(e) = upload(rest.trim(), indexer).await {
                println!("Upload failed: {:#}", e);
            }
        }
        _ => println!("{}", USAGE),
    }
    true
}

async fn upload(path: &str, indexer: &Indexer) -> Result<()> {
    let path = Path::new(path);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let report = indexer.add_file_to_user_index(file_name, &content).await?;
    println!(
        "{} added ({} stored, {} skipped, {} failed)",
        file_name, report.stored, report.skipped, report.failed
    );
    Ok(())
}

async fn print_stream(mut stream: TokenStream) -> Result<()> {
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        write!(stdout, "{}", chunk?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}
