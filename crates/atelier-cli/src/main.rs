use std::env;
use std::fs;
use std::io::{self, ErrorKind, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use atelier_contracts::chat::{parse_command, ShellCommand, CHAT_HELP_COMMANDS};
use atelier_contracts::media::ImagePayload;
use atelier_contracts::models::ModelRegistry;
use atelier_engine::panels::{
    GoldPricePanel, ImageAnalyzePanel, ImageEditPanel, ImageGeneratePanel, Panel, PanelRun,
    SearchPanel, SpeechPanel, VideoAnimatorPanel,
};
use atelier_engine::{
    AspectRatio, ChatPhase, CredentialHost, Credentials, DryrunGateway, EnvCredentialHost,
    Gateway, GatewayConfig, GeminiGateway, Studio, SubmitOutcome,
};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "atelier",
    version,
    about = "Terminal studio for Gemini chat, images, video, search and speech"
)]
struct Cli {
    /// State directory (sessions, drafts, events). Defaults to $ATELIER_HOME
    /// or the platform data directory.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    /// Use the offline deterministic gateway.
    #[arg(long, global = true)]
    dryrun: bool,
    /// Chat model to switch to after activation.
    #[arg(long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat shell with slash commands.
    Chat(ChatArgs),
    #[command(subcommand)]
    Image(ImageCommand),
    /// Animate a still image into a short video.
    Animate(AnimateArgs),
    /// Web-grounded answer with citations.
    Search(PromptArgs),
    /// Current gold spot price.
    Gold,
    /// Synthesize speech into a WAV file.
    Speak(SpeakArgs),
    #[command(subcommand)]
    Sessions(SessionsCommand),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Session to resume (id, list index or id prefix).
    #[arg(long)]
    session: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ImageCommand {
    Generate(GenerateArgs),
    Edit(SourceArgs),
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Parser)]
struct PromptArgs {
    /// Prompt text; the saved draft is reused when omitted.
    prompt: Vec<String>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    prompt: Vec<String>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SourceArgs {
    image: PathBuf,
    prompt: Vec<String>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    image: PathBuf,
    prompt: Vec<String>,
}

#[derive(Debug, Parser)]
struct AnimateArgs {
    image: PathBuf,
    prompt: Vec<String>,
    #[arg(long, default_value = "16:9")]
    aspect_ratio: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SpeakArgs {
    text: Vec<String>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum SessionsCommand {
    List,
    Delete { key: String },
}

/// Environment key first, then a hidden terminal prompt.
struct PromptCredentialHost;

impl CredentialHost for PromptCredentialHost {
    fn selected(&self) -> Option<String> {
        EnvCredentialHost.selected()
    }

    fn prompt_selection(&self) -> Option<String> {
        if !io::stdin().is_terminal() {
            return None;
        }
        rpassword::prompt_password("Gemini API key: ")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let registry = ModelRegistry::default();
    let gateway = build_gateway(cli.dryrun, &registry)?;
    let state_dir = resolve_state_dir(cli.state_dir.clone())?;
    let mut studio = Studio::open(&state_dir, gateway, registry)?;

    let ok = match cli.command {
        Command::Chat(args) => {
            run_chat_shell(&mut studio, args.session.as_deref(), cli.model.as_deref())?;
            true
        }
        Command::Image(ImageCommand::Generate(args)) => {
            let prompt = studio.resolve_prompt(ImageGeneratePanel::NAME, joined(&args.prompt).as_deref())?;
            generate_image(&studio, &prompt, args.out)?
        }
        Command::Image(ImageCommand::Edit(args)) => {
            let prompt = studio.resolve_prompt(ImageEditPanel::NAME, joined(&args.prompt).as_deref())?;
            edit_image(&studio, &args.image, &prompt, args.out)?
        }
        Command::Image(ImageCommand::Analyze(args)) => {
            let prompt = studio.resolve_prompt(ImageAnalyzePanel::NAME, joined(&args.prompt).as_deref())?;
            analyze_image(&studio, &args.image, &prompt)
        }
        Command::Animate(args) => {
            let Some(aspect_ratio) = AspectRatio::parse(&args.aspect_ratio) else {
                bail!("unsupported aspect ratio '{}' (use 16:9 or 9:16)", args.aspect_ratio);
            };
            let prompt = studio.resolve_prompt(VideoAnimatorPanel::NAME, joined(&args.prompt).as_deref())?;
            animate_image(&studio, &args.image, &prompt, aspect_ratio, args.out)?
        }
        Command::Search(args) => {
            let query = studio.resolve_prompt(SearchPanel::NAME, joined(&args.prompt).as_deref())?;
            search(&studio, &query)
        }
        Command::Gold => gold_price(&studio),
        Command::Speak(args) => {
            let text = studio.resolve_prompt(SpeechPanel::NAME, joined(&args.text).as_deref())?;
            speak(&studio, &text, args.out)?
        }
        Command::Sessions(SessionsCommand::List) => {
            print_sessions(&studio);
            true
        }
        Command::Sessions(SessionsCommand::Delete { key }) => delete_session(&mut studio, &key)?,
    };
    Ok(if ok { 0 } else { 1 })
}

fn build_gateway(dryrun: bool, registry: &ModelRegistry) -> Result<Arc<dyn Gateway>> {
    if dryrun {
        return Ok(Arc::new(DryrunGateway));
    }
    let config = GatewayConfig::from_env(registry);
    let gateway = GeminiGateway::new(config, Credentials::new(PromptCredentialHost))
        .context("failed to build Gemini HTTP client")?;
    Ok(Arc::new(gateway))
}

fn resolve_state_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(home) = env::var_os("ATELIER_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    match dirs::data_dir() {
        Some(base) => Ok(base.join("atelier")),
        None => bail!("no data directory available; pass --state-dir or set ATELIER_HOME"),
    }
}

fn joined(words: &[String]) -> Option<String> {
    (!words.is_empty()).then(|| words.join(" "))
}

fn run_chat_shell(studio: &mut Studio, session: Option<&str>, model: Option<&str>) -> Result<()> {
    if let Err(err) = studio.activate_chat(session) {
        println!("Chat unavailable: {err}");
    } else if let Some(model) = model {
        studio.switch_model(model)?;
    }
    println!(
        "Atelier chat ({}) on {}. Type /help for commands.",
        studio.gateway().name(),
        studio.chat().model()
    );

    let stdin = io::stdin();
    let mut line = String::new();
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

        let command = parse_command(line.trim_end_matches(['\n', '\r']));
        if command.action == "quit" {
            break;
        }
        dispatch_shell_command(studio, &command)?;
    }
    Ok(())
}

fn dispatch_shell_command(studio: &mut Studio, command: &ShellCommand) -> Result<()> {
    match command.action.as_str() {
        "noop" => {}
        "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
        "chat" => submit_chat(studio, command.prompt.as_deref().unwrap_or(""))?,
        "new_chat" => match studio.new_chat() {
            Ok(()) => println!("New chat on {}.", studio.chat().model()),
            Err(err) => println!("Chat unavailable: {err}"),
        },
        "list_sessions" => print_sessions(studio),
        "open_session" => {
            let key = command.arg("session");
            if key.is_empty() {
                println!("/open requires a session id or index");
            } else if studio.sessions().resolve(key).is_none() {
                println!("No session matches '{key}'.");
            } else {
                match studio.activate_chat(Some(key)) {
                    Ok(()) => print_transcript(studio),
                    Err(err) => println!("Chat unavailable: {err}"),
                }
            }
        }
        "delete_session" => {
            let key = command.arg("session");
            if key.is_empty() {
                println!("/delete requires a session id or index");
            } else {
                delete_session(studio, key)?;
            }
        }
        "set_model" => {
            let model = command.arg("model");
            if model.is_empty() {
                println!("Current model: {}", studio.chat().model());
            } else {
                match studio.switch_model(model) {
                    Ok(true) => println!("Model set to {}", studio.chat().model()),
                    Ok(false) => println!("Model can't be changed right now."),
                    Err(err) => println!("Model switch failed: {err:#}"),
                }
            }
        }
        "list_models" => print_models(studio),
        "generate_image" => {
            let prompt = studio.resolve_prompt(ImageGeneratePanel::NAME, Some(command.arg("prompt")))?;
            generate_image(studio, &prompt, None)?;
        }
        "edit_image" => {
            let prompt = studio.resolve_prompt(ImageEditPanel::NAME, Some(command.arg("prompt")))?;
            with_path(command, |path| edit_image(studio, path, &prompt, None).map(|_| ()))?;
        }
        "analyze_image" => {
            let prompt = studio.resolve_prompt(ImageAnalyzePanel::NAME, Some(command.arg("prompt")))?;
            with_path(command, |path| {
                analyze_image(studio, path, &prompt);
                Ok(())
            })?;
        }
        "animate" => {
            let aspect_ratio = command
                .args
                .get("aspect_ratio")
                .and_then(|value| value.as_str())
                .and_then(AspectRatio::parse)
                .unwrap_or_default();
            let prompt = studio.resolve_prompt(VideoAnimatorPanel::NAME, Some(command.arg("prompt")))?;
            with_path(command, |path| {
                animate_image(studio, path, &prompt, aspect_ratio, None).map(|_| ())
            })?;
        }
        "search" => {
            let query = studio.resolve_prompt(SearchPanel::NAME, Some(command.arg("query")))?;
            search(studio, &query);
        }
        "gold_price" => {
            gold_price(studio);
        }
        "speak" => {
            let text = studio.resolve_prompt(SpeechPanel::NAME, Some(command.arg("text")))?;
            speak(studio, &text, None)?;
        }
        "unknown" => println!(
            "Unknown command /{}. Type /help for commands.",
            command.arg("command")
        ),
        other => println!("Unhandled action: {other}"),
    }
    Ok(())
}

fn with_path(command: &ShellCommand, run: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    let path = command.arg("path");
    if path.is_empty() {
        println!("{} requires an image path", command.raw.trim());
        return Ok(());
    }
    run(Path::new(path))
}

fn submit_chat(studio: &mut Studio, input: &str) -> Result<()> {
    let mut stdout = io::stdout();
    let outcome = studio.submit_chat(input, |fragment| {
        print!("{fragment}");
        let _ = stdout.flush();
    })?;
    match outcome {
        SubmitOutcome::Ignored => {
            if let ChatPhase::Uninitialized = studio.chat().phase() {
                println!("Chat is not ready; try /new.");
            }
        }
        SubmitOutcome::Completed(done) => {
            println!();
            if done.created {
                println!("(saved as session {})", short_id(&done.session_id));
            }
        }
        SubmitOutcome::Failed(err) => {
            println!();
            println!("Chat error: {err}");
        }
    }
    Ok(())
}

fn print_transcript(studio: &Studio) {
    for turn in studio.chat().turns() {
        println!("{}: {}", turn.role.as_wire(), turn.content);
    }
}

fn print_sessions(studio: &Studio) {
    if studio.sessions().is_empty() {
        println!("No saved sessions.");
        return;
    }
    let active = studio.chat().active_session();
    for (idx, session) in studio.sessions().sessions().iter().enumerate() {
        let marker = if active == Some(session.id.as_str()) { "*" } else { " " };
        println!(
            "{marker}{:>3}. {}  {}  ({} turns, {})",
            idx + 1,
            short_id(&session.id),
            session.title,
            session.turns.len(),
            if session.model.is_empty() { "default" } else { session.model.as_str() },
        );
    }
}

fn print_models(studio: &Studio) {
    let current = studio.chat().model();
    for model in studio.registry().list() {
        let capabilities: Vec<&str> = model
            .capabilities
            .iter()
            .map(|capability| capability.as_str())
            .collect();
        let marker = if model.name == current { "*" } else { " " };
        let context = model
            .context_window
            .map(|tokens| format!("  {}k context", tokens / 1000))
            .unwrap_or_default();
        println!(
            "{marker} {}  {}  [{}]{context}",
            model.name,
            model.label,
            capabilities.join(", ")
        );
    }
}

fn delete_session(studio: &mut Studio, key: &str) -> Result<bool> {
    match studio.delete_session(key)? {
        Some(session) => {
            println!("Deleted session {} ({})", short_id(&session.id), session.title);
            Ok(true)
        }
        None => {
            println!("No session matches '{key}'.");
            Ok(false)
        }
    }
}

fn report<P: Panel>(panel: &P, run: PanelRun) -> bool {
    match run {
        PanelRun::Succeeded => true,
        PanelRun::Skipped => {
            println!("{}: nothing to do (empty prompt).", panel.name());
            false
        }
        PanelRun::Failed => {
            println!(
                "{} failed: {}",
                panel.name(),
                panel.error().unwrap_or("unknown error")
            );
            false
        }
    }
}

fn open_source(path: &Path) -> Option<ImagePayload> {
    match ImagePayload::open(path) {
        Ok(image) => Some(image),
        Err(err) => {
            println!("Cannot use {}: {err}", path.display());
            None
        }
    }
}

fn generate_image(studio: &Studio, prompt: &str, out: Option<PathBuf>) -> Result<bool> {
    let mut panel = ImageGeneratePanel::default();
    let run = studio.run_panel(&mut panel, |panel, gateway| panel.generate(gateway, prompt));
    if !report(&panel, run) {
        return Ok(false);
    }
    let Some(image) = panel.state().result() else {
        return Ok(false);
    };
    let out = out.unwrap_or_else(|| output_path(studio, "image", image.mime().extension()));
    image.save(&out)?;
    println!("Image saved to {}", out.display());
    Ok(true)
}

fn edit_image(studio: &Studio, source: &Path, instruction: &str, out: Option<PathBuf>) -> Result<bool> {
    let Some(image) = open_source(source) else {
        return Ok(false);
    };
    let mut panel = ImageEditPanel::default();
    panel.set_source(image);
    let run = studio.run_panel(&mut panel, |panel, gateway| panel.edit(gateway, instruction));
    if !report(&panel, run) {
        return Ok(false);
    }
    let Some(image) = panel.state().result() else {
        return Ok(false);
    };
    let out = out.unwrap_or_else(|| output_path(studio, "edit", image.mime().extension()));
    image.save(&out)?;
    println!("Edited image saved to {}", out.display());
    Ok(true)
}

fn analyze_image(studio: &Studio, source: &Path, instruction: &str) -> bool {
    let Some(image) = open_source(source) else {
        return false;
    };
    let mut panel = ImageAnalyzePanel::default();
    panel.set_source(image);
    let run = studio.run_panel(&mut panel, |panel, gateway| panel.analyze(gateway, instruction));
    if !report(&panel, run) {
        return false;
    }
    if let Some(text) = panel.state().result() {
        println!("{text}");
    }
    true
}

fn animate_image(
    studio: &Studio,
    source: &Path,
    prompt: &str,
    aspect_ratio: AspectRatio,
    out: Option<PathBuf>,
) -> Result<bool> {
    let Some(image) = open_source(source) else {
        return Ok(false);
    };
    let mut panel = VideoAnimatorPanel::default();
    panel.set_source(image);
    panel.set_aspect_ratio(aspect_ratio);
    println!("Animating ({aspect_ratio}); this can take a few minutes...");
    let run = studio.run_panel(&mut panel, |panel, gateway| panel.animate(gateway, prompt));
    if !report(&panel, run) {
        return Ok(false);
    }
    let Some(clip) = panel.state().result() else {
        return Ok(false);
    };
    let out = out.unwrap_or_else(|| output_path(studio, "video", "mp4"));
    write_file(&out, &clip.bytes)?;
    println!("Video saved to {}", out.display());
    Ok(true)
}

fn search(studio: &Studio, query: &str) -> bool {
    let mut panel = SearchPanel::default();
    let run = studio.run_panel(&mut panel, |panel, gateway| panel.search(gateway, query));
    if !report(&panel, run) {
        return false;
    }
    if let Some(result) = panel.state().result() {
        println!("{}", result.text.trim());
        if !result.citations.is_empty() {
            println!();
            println!("Sources:");
            for (idx, citation) in result.citations.iter().enumerate() {
                println!("  [{}] {} <{}>", idx + 1, citation.title, citation.uri);
            }
        }
    }
    true
}

fn gold_price(studio: &Studio) -> bool {
    let mut panel = GoldPricePanel::default();
    let run = studio.run_panel(&mut panel, |panel, gateway| panel.refresh(gateway));
    if !report(&panel, run) {
        return false;
    }
    if let Some(snapshot) = panel.state().result() {
        println!(
            "Gold: ${:.2} / troy oz, ${:.2} / g",
            snapshot.price_per_ounce_usd, snapshot.price_per_gram_usd
        );
        println!("Last updated: {}", snapshot.last_updated);
    }
    true
}

fn speak(studio: &Studio, text: &str, out: Option<PathBuf>) -> Result<bool> {
    let mut panel = SpeechPanel::default();
    let run = studio.run_panel(&mut panel, |panel, gateway| panel.speak(gateway, text));
    if !report(&panel, run) {
        return Ok(false);
    }
    let Some(audio) = panel.state().result() else {
        return Ok(false);
    };
    let out = out.unwrap_or_else(|| output_path(studio, "speech", "wav"));
    ensure_parent(&out)?;
    audio.write_wav(&out)?;
    println!(
        "Speech saved to {} ({:.1}s)",
        out.display(),
        audio.duration_seconds()?
    );
    Ok(true)
}

fn output_path(studio: &Studio, stem: &str, extension: &str) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    studio
        .root()
        .join("outputs")
        .join(format!("{stem}-{millis}.{extension}"))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
