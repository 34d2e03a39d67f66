use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::unbounded;
use log::info;

use content_tracker::{
    AssetKind, AssetSummary, ContentError, ContentTracker, DirectoryReader, Payload, ReadContext,
    TrackerConfig,
};

const USAGE: &str = "Usage: content-tracker <content-dir> [kind:name ...] [--config FILE] \
                     [--async] [--source-assets] [--release] [--json]";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;

    let mut config = match &options.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(directory) = &options.content_dir {
        config.root_directory = directory.clone();
    }
    if options.source_assets {
        config.use_source_assets = true;
    }

    let mut requests = config
        .preload
        .iter()
        .map(|entry| Request::new(&entry.kind, &entry.name))
        .collect::<Result<Vec<_>>>()?;
    for asset in &options.assets {
        requests.push(Request::parse(asset)?);
    }
    if requests.is_empty() {
        bail!("no assets requested\n{USAGE}");
    }

    let reader = DirectoryReader::new(&config.root_directory)
        .with_decoder::<TextAsset, _>("txt", decode_text)
        .with_decoder::<Bundle, _>("bundle", decode_bundle);
    let tracker = ContentTracker::with_config(reader, config);
    tracker.register_source_loader::<TextAsset, _>(&[".md"], |path| {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(TextAsset(text))
    });
    info!(
        "content root {} (source assets {})",
        tracker.root_directory().display(),
        if tracker.use_source_assets() { "on" } else { "off" }
    );

    if options.background {
        load_in_background(&tracker, &requests)?;
    } else {
        for request in &requests {
            let payload = tracker
                .load_kind(&request.name, request.kind.asset_kind())
                .with_context(|| format!("failed to load {}", request.name))?;
            info!("{}: {}", request.name, describe(&payload));
        }
    }

    print_assets(&tracker, options.json)?;

    if options.release {
        for request in &requests {
            tracker.release(&request.name);
        }
        println!("After release:");
        print_assets(&tracker, options.json)?;
    }

    tracker.teardown();
    Ok(())
}

fn load_in_background(tracker: &ContentTracker, requests: &[Request]) -> Result<()> {
    let (sender, results) = unbounded();
    for request in requests {
        let sender = sender.clone();
        let name = request.name.clone();
        tracker
            .load_async_kind(
                &request.name,
                request.kind.asset_kind(),
                move |outcome: std::result::Result<&Payload, &ContentError>| {
                    let outcome = outcome.map(|_| ()).map_err(|err| format!("{err:#}"));
                    let _ = sender.send((name, outcome));
                },
            )
            .with_context(|| format!("failed to queue {}", request.name))?;
    }
    drop(sender);

    for _ in requests {
        let (name, outcome) = results
            .recv()
            .context("background loader stopped before finishing")?;
        if let Err(err) = outcome {
            bail!("failed to load {name}: {err}");
        }
        if let Some(payload) = tracker.handle(&name).and_then(|handle| handle.payload()) {
            info!("{name}: {}", describe(&payload));
        }
    }
    Ok(())
}

/// Plain text asset (`.txt`, or `.md` when source assets are enabled).
#[derive(Debug)]
struct TextAsset(String);

/// List of other assets, one `kind name` pair per line.
#[derive(Debug)]
struct Bundle {
    members: Vec<String>,
}

fn describe(payload: &Payload) -> String {
    if let Some(text) = payload.downcast_ref::<TextAsset>() {
        format!("{} bytes of text", text.0.len())
    } else if let Some(bundle) = payload.downcast_ref::<Bundle>() {
        format!("bundle of [{}]", bundle.members.join(", "))
    } else {
        format!("{:?}", payload.kind())
    }
}

fn decode_text(bytes: &[u8], _ctx: &mut ReadContext<'_>) -> Result<TextAsset> {
    let text = String::from_utf8(bytes.to_vec()).context("text assets must be UTF-8")?;
    Ok(TextAsset(text))
}

fn decode_bundle(bytes: &[u8], ctx: &mut ReadContext<'_>) -> Result<Bundle> {
    let listing = std::str::from_utf8(bytes).context("bundles must be UTF-8")?;
    let mut members = Vec::new();
    for line in listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
    {
        let (label, name) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow!("bundle line {line:?} must be `kind name`"))?;
        let kind = Kind::parse(label)?;
        let name = name.trim();
        ctx.load_kind(name, kind.asset_kind())?;
        members.push(name.to_string());
    }
    Ok(Bundle { members })
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Text,
    Bundle,
}

impl Kind {
    fn parse(label: &str) -> Result<Self> {
        match label {
            "text" => Ok(Self::Text),
            "bundle" => Ok(Self::Bundle),
            other => Err(anyhow!("unknown asset kind {other}. Expected text or bundle")),
        }
    }

    fn asset_kind(self) -> AssetKind {
        match self {
            Self::Text => AssetKind::of::<TextAsset>(),
            Self::Bundle => AssetKind::of::<Bundle>(),
        }
    }
}

struct Request {
    kind: Kind,
    name: String,
}

impl Request {
    fn new(kind: &str, name: &str) -> Result<Self> {
        Ok(Self {
            kind: Kind::parse(kind)?,
            name: name.to_string(),
        })
    }

    /// `kind:name`, or a bare name for text assets.
    fn parse(arg: &str) -> Result<Self> {
        match arg.split_once(':') {
            Some((kind, name)) => Self::new(kind, name),
            None => Self::new("text", arg),
        }
    }
}

fn print_assets(tracker: &ContentTracker, json: bool) -> Result<()> {
    let summaries = tracker.summaries();
    if json {
        let text = serde_json::to_string_pretty(&summaries).context("failed to encode summaries")?;
        println!("{text}");
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No assets loaded");
        return Ok(());
    }
    println!("Loaded {} asset(s):", summaries.len());
    for root in summaries.iter().filter(|summary| summary.dependents.is_empty()) {
        print_tree(&summaries, root, 0, &mut HashSet::new());
    }
    Ok(())
}

fn print_tree<'a>(
    summaries: &'a [AssetSummary],
    summary: &'a AssetSummary,
    depth: usize,
    path: &mut HashSet<&'a str>,
) {
    println!(
        "{} - {} ({}, refs: {})",
        "  ".repeat(depth),
        summary.name,
        short_type_name(&summary.kind),
        summary.ref_count
    );
    if !path.insert(&summary.name) {
        return;
    }
    for child in &summary.depends_on {
        if let Some(child) = summaries.iter().find(|s| s.tracked && s.name == *child) {
            print_tree(summaries, child, depth + 1, path);
        }
    }
    path.remove(summary.name.as_str());
}

fn short_type_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

struct CliOptions {
    content_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    assets: Vec<String>,
    background: bool,
    source_assets: bool,
    release: bool,
    json: bool,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        let mut args = env::args().skip(1);
        let mut positional = Vec::new();
        let mut config = None;
        let mut background = false;
        let mut source_assets = false;
        let mut release = false;
        let mut json = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let Some(path) = args.next() else {
                        bail!("--config needs a file\n{USAGE}");
                    };
                    config = Some(PathBuf::from(path));
                }
                "--async" => background = true,
                "--source-assets" => source_assets = true,
                "--release" => release = true,
                "--json" => json = true,
                other if other.starts_with("--") => {
                    bail!("Unknown argument: {other}\n{USAGE}");
                }
                _ => positional.push(arg),
            }
        }

        let content_dir = if config.is_none() {
            if positional.is_empty() {
                bail!("{USAGE}");
            }
            let directory = PathBuf::from(positional.remove(0));
            if !directory.is_dir() {
                bail!("content directory {} does not exist", directory.display());
            }
            Some(directory)
        } else {
            None
        };

        Ok(Self {
            content_dir,
            config,
            assets: positional,
            background,
            source_assets,
            release,
            json,
        })
    }
}
