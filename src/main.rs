use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser};

use docx_stamp::config::{init_default_config, load_config_or_default, resolve_config_path};
use docx_stamp::docx::filter::filter_tree;
use docx_stamp::docx::package::DocxPackage;
use docx_stamp::docx::text::body_text;
use docx_stamp::docx::tree::XmlTree;
use docx_stamp::progress::{ConsoleLog, LogLevel};
use docx_stamp::record::load_record;
use docx_stamp::template::scan::body;
use docx_stamp::template::{normalize_body, render, RenderReport};

#[derive(Parser, Debug)]
#[command(name = "docx-stamp")]
#[command(about = "Fill [field] placeholders and <...> loops of a DOCX template from YAML/JSON/TOML data", long_about = None)]
struct Args {
    /// Write a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file to (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Template .docx
    #[arg(value_name = "TEMPLATE")]
    template: Option<PathBuf>,

    /// Record data (.yaml, .yml, .json or .toml)
    #[arg(long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Output .docx (default: <template_stem><output_suffix>.docx)
    #[arg(short, long, value_name = "DOCX")]
    output: Option<PathBuf>,

    /// Config file path (default: search for docx-stamp.toml upwards, or DOCX_STAMP_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write the rendered body as plain text
    #[arg(long, value_name = "TXT")]
    text_output: Option<PathBuf>,

    /// Only clean up the template (noise filter + placeholder rejoining); no data needed
    #[arg(long)]
    skip_substitution: bool,

    /// Log progress
    #[arg(short, long)]
    verbose: bool,

    /// Log per-field details
    #[arg(short, long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.debug {
        LogLevel::Debug
    } else if args.verbose {
        LogLevel::Info
    } else {
        LogLevel::Quiet
    };
    let log = ConsoleLog::new(level);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let template = match args.template.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  docx-stamp <template.docx> --data <record.yaml>\n\nTIPS:\n  - Default config search: docx-stamp.toml (upwards), or set DOCX_STAMP_CONFIG.\n"
            );
            return Ok(());
        }
    };
    let is_docx = template
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("docx"));
    if !is_docx {
        return Err(anyhow!(
            "template must be a .docx file: {}",
            template.display()
        ));
    }

    let workdir = template
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let cfg_path = resolve_config_path(args.config.clone(), &workdir);
    let cfg = load_config_or_default(cfg_path.as_deref())?;
    match cfg_path.as_ref() {
        Some(p) => log.debug(format!("config: {}", p.display())),
        None => log.debug("config: defaults"),
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_for(&template, &cfg.render.output_suffix));
    if same_file(&template, &output) {
        return Err(anyhow!(
            "refusing to overwrite the template: {}",
            template.display()
        ));
    }

    let mut pkg = DocxPackage::open(&template)?;
    let part = cfg.render.document_part.as_str();
    let xml = pkg
        .part(part)
        .ok_or_else(|| anyhow!("{part} not found in {}", template.display()))?;
    let mut tree = XmlTree::parse(xml).with_context(|| format!("parse xml: {part}"))?;

    let body = body(&tree)?;
    let filtered = filter_tree(&mut tree, body, &cfg.filter);
    log.debug(format!(
        "filter: {} elements dropped, {} attributes stripped",
        filtered.dropped_elements, filtered.stripped_attributes
    ));

    if args.skip_substitution {
        let stats = normalize_body(&mut tree)?;
        log.info(format!(
            "normalized: {} tokens rejoined from {} leaves",
            stats.merged_tokens, stats.drained_leaves
        ));
    } else {
        let data = args
            .data
            .as_ref()
            .context("missing --data (or pass --skip-substitution)")?;
        let record = load_record(data)?;
        log.info(format!(
            "loaded {} fields from {}",
            record.len(),
            data.display()
        ));
        let report = render(&mut tree, &record)
            .with_context(|| format!("render template: {}", template.display()))?;
        log_report(&log, &report);
    }

    pkg.replace_part(part, tree.write())?;
    write_atomically(&pkg, &output)?;
    log.info(format!("wrote {}", output.display()));

    if let Some(text_path) = args.text_output.as_ref() {
        let text = body_text(&tree, body);
        std::fs::write(text_path, text)
            .with_context(|| format!("write text output: {}", text_path.display()))?;
        log.info(format!("wrote {}", text_path.display()));
    }
    Ok(())
}

fn default_output_for(template: &Path, suffix: &str) -> PathBuf {
    let stem = template
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    template.with_file_name(format!("{stem}{suffix}.docx"))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Writes beside the destination first so a failed write never leaves a truncated output.
fn write_atomically(pkg: &DocxPackage, output: &Path) -> anyhow::Result<()> {
    let file_name = output
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("invalid output path: {}", output.display()))?;
    let tmp = output.with_file_name(format!(".{file_name}.tmp"));
    let result = File::create(&tmp)
        .with_context(|| format!("create output docx: {}", tmp.display()))
        .and_then(|f| pkg.write_to(BufWriter::new(f)));
    if let Err(err) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    std::fs::rename(&tmp, output)
        .with_context(|| format!("move {} to {}", tmp.display(), output.display()))
}

fn log_report(log: &ConsoleLog, report: &RenderReport) {
    log.info(format!(
        "rendered: {} fields substituted, {} loops expanded into {} copies, {} blocks omitted",
        report.substituted.len(),
        report.expanded.len(),
        report.stamped_copies,
        report.omitted_blocks
    ));
    if report.normalize.merged_tokens > 0 {
        log.debug(format!(
            "rejoined {} split tokens",
            report.normalize.merged_tokens
        ));
    }
    for (name, count) in &report.substituted {
        log.debug(format!("[{name}] replaced {count}x"));
    }
    for (name, copies) in &report.expanded {
        log.debug(format!("[{name}] expanded into {copies} copies"));
    }
    for (name, tags) in &report.item_tags {
        let fields: Vec<&str> = tags.keys().map(String::as_str).collect();
        log.debug(format!("[{name}] last copy used: {}", fields.join(", ")));
    }
    for name in &report.unused_fields {
        log.debug(format!("field '{name}' not used by the template"));
    }
    for w in &report.warnings {
        log.warn(w);
    }
}
