use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use moodboard_contracts::bbox::{resolve_bounding_box, whole_image, CoordinateInput, RegionInput};
use moodboard_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use moodboard_contracts::grid::{locate, ImageDimensions};
use moodboard_contracts::grounding::needs_search_grounding;
use moodboard_contracts::MoodboardError;
use moodboard_engine::{
    BatchRequest, EditRequest, EditSource, EngineConfig, GenerateRequest, GeneratedAsset,
    MoodboardEngine, ProviderKind,
};
use serde_json::{json, Value};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "moodboard",
    version,
    about = "Generate fashion moodboards and edit regions of them"
)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,
    /// Repeat for more log output.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Directory boards and events.jsonl are written to.
    #[arg(long, global = true)]
    outputs: Option<PathBuf>,
    /// Directory holding prompt_template.txt and edit_template.txt.
    #[arg(long, global = true)]
    templates: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = ProviderArg::Gemini)]
    provider: ProviderArg,
    #[arg(long, global = true)]
    model: Option<String>,
    /// Per-request timeout in seconds.
    #[arg(long, global = true, default_value_t = 120)]
    timeout: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Gemini,
    Dryrun,
}

impl From<ProviderArg> for ProviderKind {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Gemini => ProviderKind::Gemini,
            ProviderArg::Dryrun => ProviderKind::Dryrun,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a moodboard from a subject description.
    Generate(GenerateArgs),
    /// Edit a region of an existing board, or the whole board.
    Edit(EditArgs),
    /// Send one raw prompt several times in parallel.
    Batch(BatchArgs),
    /// Interactive session.
    Chat,
    /// Report whether a prompt would run with search grounding.
    Classify(ClassifyArgs),
    /// Map a bounding box onto the moodboard grid.
    Locate(LocateArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(required = true, num_args = 1..)]
    subject: Vec<String>,
    /// Use this template file instead of the stored one for this request.
    #[arg(long)]
    template_file: Option<PathBuf>,
    #[arg(long)]
    reasoning: bool,
}

#[derive(Debug, Parser)]
struct EditArgs {
    /// Path, upload temp path or URL of the board to edit.
    #[arg(long)]
    image: String,
    #[arg(long, allow_hyphen_values = true)]
    x_top: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    y_top: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    x_bottom: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    y_bottom: Option<String>,
    #[arg(required = true, num_args = 1..)]
    request: Vec<String>,
    #[arg(long)]
    template_file: Option<PathBuf>,
    #[arg(long)]
    reasoning: bool,
}

#[derive(Debug, Parser)]
struct BatchArgs {
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
    #[arg(long, short = 'n', default_value_t = 1)]
    count: usize,
}

#[derive(Debug, Parser)]
struct ClassifyArgs {
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
}

#[derive(Debug, Parser)]
struct LocateArgs {
    #[arg(allow_hyphen_values = true)]
    x_top: i64,
    #[arg(allow_hyphen_values = true)]
    y_top: i64,
    x_bottom: i64,
    y_bottom: i64,
    #[arg(long, default_value_t = 1440)]
    width: u32,
    #[arg(long, default_value_t = 1024)]
    height: u32,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("moodboard error: {err:#}{}", retry_hint(&err));
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Classify(args) => run_classify(args),
        Command::Locate(args) => run_locate(args),
        Command::Generate(args) => run_generate(&build_engine(&cli.engine)?, args),
        Command::Edit(args) => run_edit(&build_engine(&cli.engine)?, args),
        Command::Batch(args) => run_batch(&build_engine(&cli.engine)?, &cli.engine, args),
        Command::Chat => {
            let engine = build_engine(&cli.engine)?;
            run_chat(&engine, ChatState::new(cli.engine.model.clone()))?;
            Ok(0)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "moodboard=info,moodboard_engine=info,moodboard_contracts=info",
        _ => "moodboard=debug,moodboard_engine=debug,moodboard_contracts=debug",
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn engine_config(args: &EngineArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env().with_timeout(Duration::from_secs(args.timeout));
    config.provider = args.provider.into();
    if let Some(outputs) = args.outputs.clone() {
        config.output_dir = outputs;
    }
    if let Some(templates) = args.templates.clone() {
        config.template_dir = templates;
    }
    config.default_model = args.model.clone();
    config
}

fn build_engine(args: &EngineArgs) -> Result<MoodboardEngine> {
    let config = engine_config(args);
    let engine = MoodboardEngine::from_config(&config)?;
    tracing::debug!(
        provider = engine.provider_name(),
        outputs = %engine.outputs().dir().display(),
        templates = %engine.templates().dir().display(),
        "engine ready"
    );
    Ok(engine)
}

fn read_template(path: Option<&PathBuf>) -> Result<Option<String>> {
    path.map(|path| {
        fs::read_to_string(path)
            .with_context(|| format!("failed reading template {}", path.display()))
    })
    .transpose()
}

fn run_generate(engine: &MoodboardEngine, args: GenerateArgs) -> Result<i32> {
    let asset = engine.generate(GenerateRequest {
        subject: args.subject.join(" "),
        model: None,
        template_override: read_template(args.template_file.as_ref())?,
        include_reasoning: args.reasoning,
    })?;
    print_asset(&asset);
    Ok(0)
}

fn run_edit(engine: &MoodboardEngine, args: EditArgs) -> Result<i32> {
    let coordinates: RegionInput = [args.x_top, args.y_top, args.x_bottom, args.y_bottom]
        .map(CoordinateInput::from);
    let asset = engine.edit_region(EditRequest {
        source: Some(EditSource::Path(args.image)),
        coordinates,
        edit_request: args.request.join(" "),
        model: None,
        template_override: read_template(args.template_file.as_ref())?,
        include_reasoning: args.reasoning,
    })?;
    print_asset(&asset);
    Ok(0)
}

fn run_batch(engine: &MoodboardEngine, engine_args: &EngineArgs, args: BatchArgs) -> Result<i32> {
    let assets = engine.generate_batch(BatchRequest {
        prompt: args.prompt.join(" "),
        count: args.count,
        model: engine_args.model.clone(),
    })?;
    for asset in &assets {
        print_asset(asset);
    }
    if assets.len() < args.count {
        println!("{} of {} images generated", assets.len(), args.count);
    }
    Ok(0)
}

fn run_classify(args: ClassifyArgs) -> Result<i32> {
    let prompt = args.prompt.join(" ");
    let report = json!({
        "prompt": prompt,
        "search_grounding": needs_search_grounding(&prompt),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}

fn run_locate(args: LocateArgs) -> Result<i32> {
    let dims = ImageDimensions::new(args.width, args.height)?;
    let coordinates: RegionInput = [args.x_top, args.y_top, args.x_bottom, args.y_bottom]
        .map(CoordinateInput::from);
    let Some(bbox) = resolve_bounding_box(&coordinates, dims)? else {
        anyhow::bail!("locate needs all four coordinates");
    };
    println!("{}", serde_json::to_string_pretty(&locate(&bbox, dims))?);
    Ok(0)
}

fn print_asset(asset: &GeneratedAsset) {
    println!(
        "Saved {} ({}x{}, {}{})",
        asset.path.display(),
        asset.dimensions.width(),
        asset.dimensions.height(),
        asset.model,
        if asset.search_grounding {
            ", search grounding"
        } else {
            ""
        }
    );
    if !asset.reasoning.is_empty() {
        println!("Reasoning:\n{}", asset.reasoning);
    }
}

/// What the chat loop remembers between lines.
#[derive(Debug, Default)]
struct ChatState {
    model: Option<String>,
    active_image: Option<String>,
    reasoning: bool,
    template: Option<String>,
    edit_template: Option<String>,
}

impl ChatState {
    fn new(model: Option<String>) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }
}

enum ChatStep {
    Continue,
    Quit,
}

fn run_chat(engine: &MoodboardEngine, mut state: ChatState) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Moodboard chat started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match handle_intent(engine, &mut state, &intent) {
            Ok(ChatStep::Continue) => {}
            Ok(ChatStep::Quit) => break,
            Err(err) => println!("Error: {err:#}{}", retry_hint(&err)),
        }
    }
    Ok(())
}

/// Suffix for errors where the same request may succeed on a second try.
fn retry_hint(err: &anyhow::Error) -> &'static str {
    let retryable = err.chain().any(|cause| {
        cause
            .downcast_ref::<MoodboardError>()
            .is_some_and(MoodboardError::is_retryable)
    });
    if retryable {
        " [transient upstream failure, safe to retry]"
    } else {
        ""
    }
}

fn handle_intent(
    engine: &MoodboardEngine,
    state: &mut ChatState,
    intent: &Intent,
) -> Result<ChatStep> {
    match intent.action.as_str() {
        "noop" => {}
        "quit" => return Ok(ChatStep::Quit),
        "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
        "status" => {
            println!("Provider: {}", engine.provider_name());
            println!("Model: {}", state.model.as_deref().unwrap_or("(default)"));
            println!(
                "Active image: {}",
                state.active_image.as_deref().unwrap_or("(none)")
            );
            println!("Reasoning: {}", if state.reasoning { "on" } else { "off" });
        }
        "set_model" => {
            state.model = value_as_non_empty_string(intent.command_args.get("model"));
            println!("Model set to {}", state.model.as_deref().unwrap_or("(default)"));
        }
        "set_active_image" => match value_as_non_empty_string(intent.command_args.get("path")) {
            Some(path) => {
                println!("Active image set to {path}");
                state.active_image = Some(path);
            }
            None => println!("/use requires a path"),
        },
        "set_reasoning" => match intent.command_args.get("enabled").and_then(Value::as_bool) {
            Some(enabled) => {
                state.reasoning = enabled;
                println!("Reasoning {}", if enabled { "on" } else { "off" });
            }
            None => println!("/reasoning takes on or off"),
        },
        "set_template" => {
            state.template = template_from_arg(intent)?;
            println!("Generation template {}", describe_override(&state.template));
        }
        "set_edit_template" => {
            state.edit_template = template_from_arg(intent)?;
            println!("Edit template {}", describe_override(&state.edit_template));
        }
        "generate" => {
            let asset = engine.generate(GenerateRequest {
                subject: intent.prompt.clone().unwrap_or_default(),
                model: state.model.clone(),
                template_override: state.template.clone(),
                include_reasoning: state.reasoning,
            })?;
            print_asset(&asset);
            state.active_image = Some(asset.path.to_string_lossy().to_string());
        }
        "edit" => {
            let asset = engine.edit_region(EditRequest {
                source: state.active_image.clone().map(EditSource::Path),
                coordinates: region_from_value(intent.command_args.get("region")),
                edit_request: intent.prompt.clone().unwrap_or_default(),
                model: state.model.clone(),
                template_override: state.edit_template.clone(),
                include_reasoning: state.reasoning,
            })?;
            print_asset(&asset);
            state.active_image = Some(asset.path.to_string_lossy().to_string());
        }
        "batch" => {
            let count = intent
                .command_args
                .get("count")
                .and_then(Value::as_u64)
                .unwrap_or(1) as usize;
            let assets = engine.generate_batch(BatchRequest {
                prompt: intent.prompt.clone().unwrap_or_default(),
                count,
                model: state.model.clone(),
            })?;
            for asset in &assets {
                print_asset(asset);
            }
            if let Some(last) = assets.last() {
                state.active_image = Some(last.path.to_string_lossy().to_string());
            }
        }
        _ => {
            let command = value_as_non_empty_string(intent.command_args.get("command"))
                .unwrap_or_else(|| intent.action.clone());
            println!("Unknown command: {command}");
        }
    }
    Ok(ChatStep::Continue)
}

/// An empty path clears the override.
fn template_from_arg(intent: &Intent) -> Result<Option<String>> {
    let path = value_as_non_empty_string(intent.command_args.get("path")).map(PathBuf::from);
    read_template(path.as_ref())
}

fn describe_override(template: &Option<String>) -> &'static str {
    if template.is_some() {
        "override loaded"
    } else {
        "reset to default"
    }
}

fn region_from_value(value: Option<&Value>) -> RegionInput {
    let Some(items) = value.and_then(Value::as_array) else {
        return whole_image();
    };
    let mut region = whole_image();
    for (slot, item) in region.iter_mut().zip(items) {
        *slot = match item {
            Value::String(text) => CoordinateInput::from(text.as_str()),
            Value::Number(number) => number
                .as_i64()
                .map(CoordinateInput::Int)
                .unwrap_or_else(|| number.as_f64().map(CoordinateInput::Float).unwrap_or_default()),
            _ => CoordinateInput::Missing,
        };
    }
    region
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
